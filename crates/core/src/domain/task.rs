use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Lifecycle state of a task. The bot only ever creates tasks; every later
/// transition belongs to the spreadsheet store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    #[serde(rename = "시작전")]
    NotStarted,
}

impl TaskStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotStarted => "시작전",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Urgency {
    #[default]
    #[serde(rename = "보통")]
    Normal,
    #[serde(rename = "높음")]
    High,
    #[serde(rename = "긴급")]
    Urgent,
}

impl Urgency {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Normal => "보통",
            Self::High => "높음",
            Self::Urgent => "긴급",
        }
    }

    /// Parses a user-typed urgency label. Accepts the store labels and their
    /// English names, case-insensitively.
    pub fn from_label(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "보통" | "normal" => Some(Self::Normal),
            "높음" | "high" | "important" => Some(Self::High),
            "긴급" | "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

/// Which entry point produced a task. Serialized as the store's `구분` literal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskCategory {
    #[serde(rename = "Slack 자동등록")]
    AutoMention,
    #[serde(rename = "Slack 수동등록")]
    ManualCommand,
    #[serde(rename = "이모지 등록")]
    Reaction,
}

impl TaskCategory {
    pub fn label(&self) -> &'static str {
        match self {
            Self::AutoMention => "Slack 자동등록",
            Self::ManualCommand => "Slack 수동등록",
            Self::Reaction => "이모지 등록",
        }
    }

    /// Marker prepended to the task content so the sheet shows where it came from.
    pub fn content_prefix(&self) -> Option<&'static str> {
        match self {
            Self::AutoMention => Some("[Slack]"),
            Self::ManualCommand => None,
            Self::Reaction => Some("[📌 Slack]"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    content: String,
    assignee: String,
    status: TaskStatus,
    urgency: Urgency,
    deadline: Option<String>,
    category: TaskCategory,
}

impl TaskRecord {
    pub fn new(
        content: impl Into<String>,
        assignee: impl Into<String>,
        urgency: Urgency,
        deadline: Option<String>,
        category: TaskCategory,
    ) -> Result<Self, DomainError> {
        let content = content.into();
        let assignee = assignee.into();
        if content.trim().is_empty() {
            return Err(DomainError::EmptyContent);
        }
        if assignee.trim().is_empty() {
            return Err(DomainError::EmptyAssignee);
        }

        Ok(Self {
            content,
            assignee: assignee.trim().to_owned(),
            status: TaskStatus::NotStarted,
            urgency,
            deadline: deadline.filter(|value| !value.trim().is_empty()),
            category,
        })
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn assignee(&self) -> &str {
        &self.assignee
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn urgency(&self) -> Urgency {
        self.urgency
    }

    pub fn deadline(&self) -> Option<&str> {
        self.deadline.as_deref()
    }

    pub fn category(&self) -> TaskCategory {
        self.category
    }
}

/// Per-event context for the mention and reaction paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadContext {
    pub channel_id: String,
    pub thread_ts: String,
    pub user_id: String,
    pub text: String,
}

impl ThreadContext {
    /// Slack permalink: `<workspace_url>archives/<channel>/p<ts without dots>`.
    pub fn permalink(&self, workspace_url: &str) -> String {
        message_permalink(workspace_url, &self.channel_id, &self.thread_ts)
    }
}

pub fn message_permalink(workspace_url: &str, channel_id: &str, ts: &str) -> String {
    let base = if workspace_url.ends_with('/') {
        workspace_url.to_owned()
    } else {
        format!("{workspace_url}/")
    };
    format!("{base}archives/{channel_id}/p{}", ts.replace('.', ""))
}
