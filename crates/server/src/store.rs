use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use taskbot_core::config::StoreConfig;
use taskbot_core::{CreateTaskRequest, StoreReceipt, SubmitError, TaskRecord, TaskStore};
use tracing::{debug, warn};

/// Posts create intents to the spreadsheet web app. One attempt per task.
pub struct SheetsTaskStore {
    http: reqwest::Client,
    endpoint_url: String,
    timeout: Duration,
}

impl SheetsTaskStore {
    pub fn new(config: &StoreConfig) -> Result<Self, reqwest::Error> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { http, endpoint_url: config.endpoint_url.clone(), timeout })
    }
}

#[async_trait]
impl TaskStore for SheetsTaskStore {
    async fn submit(&self, record: &TaskRecord) -> Result<StoreReceipt, SubmitError> {
        let request = CreateTaskRequest::from_record(record);
        debug!(
            event_name = "store.submit.start",
            category = record.category().label(),
            "submitting task to store"
        );

        let response =
            self.http.post(&self.endpoint_url).json(&request).send().await.map_err(|error| {
                if error.is_timeout() {
                    SubmitError::Transport(format!(
                        "request timed out after {}s",
                        self.timeout.as_secs()
                    ))
                } else {
                    SubmitError::Transport(error.to_string())
                }
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(
                event_name = "store.submit.rejected",
                status = status.as_u16(),
                "store rejected task"
            );
            return Err(SubmitError::Rejected { status: status.as_u16() });
        }

        let body: Value =
            response.json().await.map_err(|error| SubmitError::Decode(error.to_string()))?;
        StoreReceipt::from_response(body)
    }
}
