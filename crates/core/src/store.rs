//! Create-intent contract with the spreadsheet-backed task store.
//!
//! The field names of [`CreateTaskRequest`] are what the store's web app reads
//! when appending a row, so they are fixed.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::domain::task::{TaskCategory, TaskRecord, TaskStatus, Urgency};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CreateTaskRequest<'a> {
    pub action: &'static str,
    #[serde(rename = "type")]
    pub item_type: &'static str,
    pub data: TaskRow<'a>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TaskRow<'a> {
    #[serde(rename = "내용")]
    pub content: &'a str,
    #[serde(rename = "담당자")]
    pub assignee: &'a str,
    #[serde(rename = "상태")]
    pub status: TaskStatus,
    #[serde(rename = "긴급도")]
    pub urgency: Urgency,
    #[serde(rename = "마감일")]
    pub deadline: &'a str,
    #[serde(rename = "구분")]
    pub category: TaskCategory,
}

impl<'a> CreateTaskRequest<'a> {
    pub fn from_record(record: &'a TaskRecord) -> Self {
        Self {
            action: "create",
            item_type: "task",
            data: TaskRow {
                content: record.content(),
                assignee: record.assignee(),
                status: record.status(),
                urgency: record.urgency(),
                deadline: record.deadline().unwrap_or(""),
                category: record.category(),
            },
        }
    }
}

/// What the store answered for an accepted create intent.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreReceipt {
    pub task_id: Option<String>,
    pub response: Value,
}

impl StoreReceipt {
    /// Reads the web app's `{ "success": bool, "result": { "id": .. }, "error": .. }`
    /// envelope. A body that says `success: false` is a rejection even on HTTP 200.
    pub fn from_response(response: Value) -> Result<Self, SubmitError> {
        if response.get("success").and_then(Value::as_bool) == Some(false) {
            let detail = response
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("store reported failure without detail")
                .to_owned();
            return Err(SubmitError::StoreReported(detail));
        }

        let task_id = response
            .pointer("/result/id")
            .and_then(|id| match id {
                Value::String(id) => Some(id.clone()),
                Value::Number(id) => Some(id.to_string()),
                _ => None,
            })
            .filter(|id| !id.trim().is_empty());

        Ok(Self { task_id, response })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("HTTP {status}")]
    Rejected { status: u16 },
    #[error("{0}")]
    Transport(String),
    #[error("store returned an unreadable body: {0}")]
    Decode(String),
    #[error("store reported failure: {0}")]
    StoreReported(String),
}

/// Single-shot submission of a task record. Implementations do not retry.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn submit(&self, record: &TaskRecord) -> Result<StoreReceipt, SubmitError>;
}
