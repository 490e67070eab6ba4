use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;
use taskbot_core::{StoreReceipt, SubmitError, TaskRecord, TaskStore};
use tokio::sync::Mutex;

use crate::api::{OutboundMessage, SlackApi, SlackApiError, SlackMessage};

pub fn slack_message(ts: &str, user: &str) -> SlackMessage {
    SlackMessage {
        ts: ts.to_owned(),
        user: Some(user.to_owned()),
        text: "message".to_owned(),
    }
}

pub struct FakeSlackApi {
    state: Mutex<FakeSlackState>,
}

struct FakeSlackState {
    threads: HashMap<(String, String), Vec<SlackMessage>>,
    thread_error: Option<SlackApiError>,
    thread_reads: usize,
    history: HashMap<String, Vec<SlackMessage>>,
    history_error: Option<SlackApiError>,
    history_reads: usize,
    workspace_url: Result<String, SlackApiError>,
    posted: Vec<OutboundMessage>,
    post_error: Option<SlackApiError>,
}

impl Default for FakeSlackApi {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeSlackState {
                threads: HashMap::new(),
                thread_error: None,
                thread_reads: 0,
                history: HashMap::new(),
                history_error: None,
                history_reads: 0,
                workspace_url: Ok("https://acme.slack.com/".to_owned()),
                posted: Vec::new(),
                post_error: None,
            }),
        }
    }
}

impl FakeSlackApi {
    pub async fn set_thread(&self, channel_id: &str, thread_ts: &str, messages: Vec<SlackMessage>) {
        self.state
            .lock()
            .await
            .threads
            .insert((channel_id.to_owned(), thread_ts.to_owned()), messages);
    }

    pub async fn fail_thread_reads(&self, error: SlackApiError) {
        self.state.lock().await.thread_error = Some(error);
    }

    pub async fn set_history_message(&self, channel_id: &str, message: SlackMessage) {
        self.state.lock().await.history.entry(channel_id.to_owned()).or_default().push(message);
    }

    pub async fn fail_history_reads(&self, error: SlackApiError) {
        self.state.lock().await.history_error = Some(error);
    }

    pub async fn fail_workspace_lookup(&self, error: SlackApiError) {
        self.state.lock().await.workspace_url = Err(error);
    }

    pub async fn fail_posts(&self, error: SlackApiError) {
        self.state.lock().await.post_error = Some(error);
    }

    pub async fn posted(&self) -> Vec<OutboundMessage> {
        self.state.lock().await.posted.clone()
    }

    pub async fn thread_reads(&self) -> usize {
        self.state.lock().await.thread_reads
    }

    pub async fn history_reads(&self) -> usize {
        self.state.lock().await.history_reads
    }
}

#[async_trait]
impl SlackApi for FakeSlackApi {
    async fn thread_messages(
        &self,
        channel_id: &str,
        thread_ts: &str,
    ) -> Result<Vec<SlackMessage>, SlackApiError> {
        let mut state = self.state.lock().await;
        state.thread_reads += 1;
        if let Some(error) = state.thread_error.clone() {
            return Err(error);
        }
        Ok(state
            .threads
            .get(&(channel_id.to_owned(), thread_ts.to_owned()))
            .cloned()
            .unwrap_or_default())
    }

    async fn message_at(
        &self,
        channel_id: &str,
        ts: &str,
    ) -> Result<Option<SlackMessage>, SlackApiError> {
        let mut state = self.state.lock().await;
        state.history_reads += 1;
        if let Some(error) = state.history_error.clone() {
            return Err(error);
        }
        // Mirrors `latest` + `inclusive` + `limit=1`: newest message at or before `ts`.
        Ok(state.history.get(channel_id).and_then(|messages| {
            messages
                .iter()
                .filter(|message| message.ts.as_str() <= ts)
                .max_by(|left, right| left.ts.cmp(&right.ts))
                .cloned()
        }))
    }

    async fn post_message(&self, message: &OutboundMessage) -> Result<String, SlackApiError> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.post_error.clone() {
            return Err(error);
        }
        state.posted.push(message.clone());
        Ok(format!("1730000999.{:06}", state.posted.len()))
    }

    async fn workspace_url(&self) -> Result<String, SlackApiError> {
        self.state.lock().await.workspace_url.clone()
    }
}

pub struct FakeTaskStore {
    state: Mutex<FakeStoreState>,
}

struct FakeStoreState {
    submissions: Vec<TaskRecord>,
    response: Result<StoreReceipt, SubmitError>,
}

impl Default for FakeTaskStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeStoreState {
                submissions: Vec::new(),
                response: Ok(StoreReceipt { task_id: None, response: json!({ "success": true }) }),
            }),
        }
    }
}

impl FakeTaskStore {
    pub async fn respond_with(&self, response: Result<StoreReceipt, SubmitError>) {
        self.state.lock().await.response = response;
    }

    pub async fn submissions(&self) -> Vec<TaskRecord> {
        self.state.lock().await.submissions.clone()
    }
}

#[async_trait]
impl TaskStore for FakeTaskStore {
    async fn submit(&self, record: &TaskRecord) -> Result<StoreReceipt, SubmitError> {
        let mut state = self.state.lock().await;
        state.submissions.push(record.clone());
        state.response.clone()
    }
}
