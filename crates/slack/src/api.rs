//! Outbound Slack Web API surface the pipeline depends on.

use async_trait::async_trait;
use serde::Deserialize;
use taskbot_core::PipelineError;
use thiserror::Error;

use crate::blocks::MessageTemplate;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SlackMessage {
    pub ts: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel_id: String,
    pub thread_ts: Option<String>,
    pub message: MessageTemplate,
}

impl OutboundMessage {
    pub fn new(channel_id: impl Into<String>, message: MessageTemplate) -> Self {
        Self { channel_id: channel_id.into(), thread_ts: None, message }
    }

    pub fn in_thread(mut self, thread_ts: impl Into<String>) -> Self {
        self.thread_ts = Some(thread_ts.into());
        self
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SlackApiError {
    #[error("slack request failed: {0}")]
    Transport(String),
    #[error("slack {method} returned HTTP {status}")]
    Status { method: String, status: u16 },
    #[error("slack {method} failed: {error}")]
    Api { method: String, error: String },
    #[error("slack {method} response could not be decoded: {detail}")]
    Decode { method: String, detail: String },
}

impl From<SlackApiError> for PipelineError {
    fn from(error: SlackApiError) -> Self {
        PipelineError::transport("slack api", error.to_string())
    }
}

#[async_trait]
pub trait SlackApi: Send + Sync {
    /// Every message of the thread rooted at `thread_ts`, root included, in order.
    async fn thread_messages(
        &self,
        channel_id: &str,
        thread_ts: &str,
    ) -> Result<Vec<SlackMessage>, SlackApiError>;

    /// The channel message posted at exactly `ts`, if history still has it.
    async fn message_at(
        &self,
        channel_id: &str,
        ts: &str,
    ) -> Result<Option<SlackMessage>, SlackApiError>;

    /// Posts a message and returns its `ts`.
    async fn post_message(&self, message: &OutboundMessage) -> Result<String, SlackApiError>;

    /// Workspace base URL, e.g. `https://acme.slack.com/`.
    async fn workspace_url(&self) -> Result<String, SlackApiError>;
}
