use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use taskbot_core::config::SlackConfig;
use taskbot_slack::api::{OutboundMessage, SlackApi, SlackApiError, SlackMessage};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const REPLIES_PAGE_LIMIT: &str = "200";

/// Slack Web API over reqwest. Bot token for reads and posts, app token only
/// for opening socket-mode connections.
pub struct HttpSlackApi {
    http: reqwest::Client,
    api_base: String,
    bot_token: SecretString,
    app_token: Option<SecretString>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<SlackMessage>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Deserialize)]
struct PostMessageResponse {
    ts: String,
}

#[derive(Deserialize)]
struct TeamInfoResponse {
    team: TeamInfo,
}

#[derive(Deserialize)]
struct TeamInfo {
    url: String,
}

#[derive(Deserialize)]
struct OpenConnectionResponse {
    url: String,
}

impl HttpSlackApi {
    pub fn new(config: &SlackConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("taskbot/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_owned(),
            bot_token: config.bot_token.clone(),
            app_token: config.app_token.clone(),
        })
    }

    /// `apps.connections.open`: a fresh single-use websocket URL.
    pub async fn open_socket_url(&self) -> Result<String, SlackApiError> {
        const METHOD: &str = "apps.connections.open";
        let Some(app_token) = &self.app_token else {
            return Err(SlackApiError::Api {
                method: METHOD.to_owned(),
                error: "app token not configured".to_owned(),
            });
        };

        let response: OpenConnectionResponse = self
            .call(METHOD, self.http.post(self.url(METHOD)).bearer_auth(app_token.expose_secret()))
            .await?;
        Ok(response.url)
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base)
    }

    fn get(&self, method: &str) -> reqwest::RequestBuilder {
        self.http.get(self.url(method)).bearer_auth(self.bot_token.expose_secret())
    }

    async fn call<T>(&self, method: &str, request: reqwest::RequestBuilder) -> Result<T, SlackApiError>
    where
        T: DeserializeOwned,
    {
        let response = request
            .send()
            .await
            .map_err(|error| SlackApiError::Transport(format!("{method}: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SlackApiError::Status { method: method.to_owned(), status: status.as_u16() });
        }

        let body: Value = response.json().await.map_err(|error| SlackApiError::Decode {
            method: method.to_owned(),
            detail: error.to_string(),
        })?;
        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            let error = body.get("error").and_then(Value::as_str).unwrap_or("unknown_error");
            return Err(SlackApiError::Api { method: method.to_owned(), error: error.to_owned() });
        }

        serde_json::from_value(body).map_err(|error| SlackApiError::Decode {
            method: method.to_owned(),
            detail: error.to_string(),
        })
    }
}

#[async_trait]
impl SlackApi for HttpSlackApi {
    async fn thread_messages(
        &self,
        channel_id: &str,
        thread_ts: &str,
    ) -> Result<Vec<SlackMessage>, SlackApiError> {
        const METHOD: &str = "conversations.replies";
        let mut messages = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query =
                vec![("channel", channel_id), ("ts", thread_ts), ("limit", REPLIES_PAGE_LIMIT)];
            if let Some(cursor) = cursor.as_deref() {
                query.push(("cursor", cursor));
            }

            let page: MessagesResponse = self.call(METHOD, self.get(METHOD).query(&query)).await?;
            messages.extend(page.messages);

            match page.response_metadata.map(|meta| meta.next_cursor).filter(|next| !next.is_empty())
            {
                Some(next) => cursor = Some(next),
                None => return Ok(messages),
            }
        }
    }

    async fn message_at(
        &self,
        channel_id: &str,
        ts: &str,
    ) -> Result<Option<SlackMessage>, SlackApiError> {
        const METHOD: &str = "conversations.history";
        let query = [("channel", channel_id), ("latest", ts), ("inclusive", "true"), ("limit", "1")];

        let page: MessagesResponse = self.call(METHOD, self.get(METHOD).query(&query)).await?;
        Ok(page.messages.into_iter().next())
    }

    async fn post_message(&self, message: &OutboundMessage) -> Result<String, SlackApiError> {
        const METHOD: &str = "chat.postMessage";
        let mut payload = json!({
            "channel": message.channel_id,
            "text": message.message.fallback_text,
            "blocks": message.message.blocks,
            "unfurl_links": false,
        });
        if let Some(thread_ts) = &message.thread_ts {
            payload["thread_ts"] = Value::String(thread_ts.clone());
        }

        let response: PostMessageResponse = self
            .call(
                METHOD,
                self.http
                    .post(self.url(METHOD))
                    .bearer_auth(self.bot_token.expose_secret())
                    .json(&payload),
            )
            .await?;
        Ok(response.ts)
    }

    async fn workspace_url(&self) -> Result<String, SlackApiError> {
        const METHOD: &str = "team.info";
        let response: TeamInfoResponse = self.call(METHOD, self.get(METHOD)).await?;
        Ok(response.team.url)
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;
    use taskbot_core::config::AppConfig;
    use taskbot_slack::api::{OutboundMessage, SlackApi, SlackApiError};
    use taskbot_slack::blocks::MessageBuilder;

    use super::HttpSlackApi;

    fn client(server: &MockServer, app_token: Option<&str>) -> HttpSlackApi {
        let mut config = AppConfig::default().slack;
        config.api_base = server.base_url();
        config.bot_token = "xoxb-test".to_owned().into();
        config.app_token = app_token.map(|token| token.to_owned().into());
        HttpSlackApi::new(&config).expect("client")
    }

    #[tokio::test]
    async fn reads_thread_replies_with_bot_token() {
        let server = MockServer::start();
        let replies = server.mock(|when, then| {
            when.method(GET)
                .path("/conversations.replies")
                .header("authorization", "Bearer xoxb-test")
                .query_param("channel", "C1")
                .query_param("ts", "1730000000.000100");
            then.status(200).json_body(json!({
                "ok": true,
                "messages": [
                    { "ts": "1730000000.000100", "user": "UA", "text": "<@U0BOT> 확인" },
                    { "ts": "1730000000.000200", "user": "UB", "text": "봤어요" }
                ]
            }));
        });

        let messages = client(&server, None)
            .thread_messages("C1", "1730000000.000100")
            .await
            .expect("replies");

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].user.as_deref(), Some("UB"));
        assert_eq!(replies.calls(), 1);
    }

    #[tokio::test]
    async fn slack_error_body_becomes_api_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/conversations.replies");
            then.status(200).json_body(json!({ "ok": false, "error": "not_in_channel" }));
        });

        let error = client(&server, None)
            .thread_messages("C1", "1.1")
            .await
            .expect_err("must fail");

        assert_eq!(
            error,
            SlackApiError::Api {
                method: "conversations.replies".to_owned(),
                error: "not_in_channel".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn http_failure_becomes_status_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/team.info");
            then.status(503).body("unavailable");
        });

        let error = client(&server, None).workspace_url().await.expect_err("must fail");
        assert_eq!(error, SlackApiError::Status { method: "team.info".to_owned(), status: 503 });
    }

    #[tokio::test]
    async fn history_lookup_is_inclusive_and_limited_to_one() {
        let server = MockServer::start();
        let history = server.mock(|when, then| {
            when.method(GET)
                .path("/conversations.history")
                .query_param("channel", "C1")
                .query_param("latest", "1730000000.000500")
                .query_param("inclusive", "true")
                .query_param("limit", "1");
            then.status(200).json_body(json!({
                "ok": true,
                "messages": [{ "ts": "1730000000.000500", "user": "UA", "text": "도메인 갱신" }]
            }));
        });

        let message = client(&server, None)
            .message_at("C1", "1730000000.000500")
            .await
            .expect("history")
            .expect("message");

        assert_eq!(message.text, "도메인 갱신");
        assert_eq!(history.calls(), 1);
    }

    #[tokio::test]
    async fn posts_threaded_message_with_blocks() {
        let server = MockServer::start();
        let post = server.mock(|when, then| {
            when.method(POST)
                .path("/chat.postMessage")
                .header("authorization", "Bearer xoxb-test")
                .body_includes("\"channel\":\"C1\"")
                .body_includes("\"thread_ts\":\"1730000000.000100\"")
                .body_includes("\"blocks\":[");
            then.status(200).json_body(json!({ "ok": true, "channel": "C1", "ts": "1730000001.000100" }));
        });

        let message = MessageBuilder::new("hello")
            .section("s1", |section| {
                section.mrkdwn("hello");
            })
            .build();
        let ts = client(&server, None)
            .post_message(&OutboundMessage::new("C1", message).in_thread("1730000000.000100"))
            .await
            .expect("post");

        assert_eq!(ts, "1730000001.000100");
        assert_eq!(post.calls(), 1);
    }

    #[tokio::test]
    async fn workspace_url_comes_from_team_info() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/team.info");
            then.status(200).json_body(json!({
                "ok": true,
                "team": { "id": "T1", "url": "https://acme.slack.com/" }
            }));
        });

        let url = client(&server, None).workspace_url().await.expect("url");
        assert_eq!(url, "https://acme.slack.com/");
    }

    #[tokio::test]
    async fn socket_url_requires_and_uses_app_token() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path("/apps.connections.open")
                .header("authorization", "Bearer xapp-test");
            then.status(200).json_body(json!({ "ok": true, "url": "wss://example.invalid/link" }));
        });

        let url = client(&server, Some("xapp-test")).open_socket_url().await.expect("url");
        assert_eq!(url, "wss://example.invalid/link");

        let error = client(&server, None).open_socket_url().await.expect_err("no app token");
        assert!(matches!(error, SlackApiError::Api { .. }));
    }
}
