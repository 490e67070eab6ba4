use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use taskbot_core::PipelineError;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{EventProcessor, RawSlashCommand, SlackEnvelope, SlackEvent};

/// Disconnect reason Slack sends when socket mode is turned off for the app.
pub const LINK_DISABLED_REASON: &str = "link_disabled";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
    /// Slack asked us to reconnect or the socket closed under us.
    #[error("connection closed by slack: {0}")]
    Closed(String),
}

impl From<TransportError> for PipelineError {
    fn from(error: TransportError) -> Self {
        PipelineError::transport("socket mode", error.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// A socket-mode connection. `next_envelope` yields `Ok(None)` only when the
/// runner should stop for good.
#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// One decoded socket-mode text frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketFrame {
    Hello,
    Disconnect { reason: String },
    Envelope(SlackEnvelope),
    Other { frame_type: String },
}

pub fn parse_socket_frame(text: &str) -> Result<SocketFrame, TransportError> {
    let frame: Value = serde_json::from_str(text)
        .map_err(|error| TransportError::Receive(format!("invalid socket frame: {error}")))?;
    let frame_type = frame.get("type").and_then(Value::as_str).unwrap_or("unknown");

    let envelope_id = || {
        frame
            .get("envelope_id")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| TransportError::Receive(format!("{frame_type} frame without envelope_id")))
    };
    let payload = frame.get("payload").cloned().unwrap_or(Value::Null);

    match frame_type {
        "hello" => Ok(SocketFrame::Hello),
        "disconnect" => Ok(SocketFrame::Disconnect {
            reason: frame.get("reason").and_then(Value::as_str).unwrap_or("unspecified").to_owned(),
        }),
        "events_api" => {
            Ok(SocketFrame::Envelope(SlackEnvelope::from_event_callback(envelope_id()?, &payload)))
        }
        "slash_commands" => {
            let command = serde_json::from_value::<RawSlashCommand>(payload).map_err(|error| {
                TransportError::Receive(format!("invalid slash command payload: {error}"))
            })?;
            Ok(SocketFrame::Envelope(SlackEnvelope::from_slash_command(envelope_id()?, command)))
        }
        other if frame.get("envelope_id").is_some() => Ok(SocketFrame::Envelope(SlackEnvelope {
            envelope_id: envelope_id()?,
            event: SlackEvent::Unsupported { event_type: other.to_owned() },
        })),
        other => Ok(SocketFrame::Other { frame_type: other.to_owned() }),
    }
}

pub struct SocketModeRunner {
    transport: Arc<dyn SocketTransport>,
    processor: Arc<EventProcessor>,
    reconnect_policy: ReconnectPolicy,
}

impl SocketModeRunner {
    pub fn new(
        transport: Arc<dyn SocketTransport>,
        processor: Arc<EventProcessor>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, processor, reconnect_policy }
    }

    pub async fn start(&self) -> Result<()> {
        let mut failures = 0_u32;
        loop {
            let mut connected = false;
            match self.connect_and_pump(failures, &mut connected).await {
                Ok(()) => return Ok(()),
                Err(TransportError::Closed(reason)) if reason == LINK_DISABLED_REASON => {
                    warn!(reason = %reason, "socket mode disabled for this app; stopping");
                    if let Err(error) = self.transport.disconnect().await {
                        debug!(error = %error, "socket mode disconnect after link_disabled failed");
                    }
                    return Ok(());
                }
                Err(TransportError::Closed(reason)) => {
                    failures = 0;
                    let delay = self.reconnect_policy.backoff(0);
                    info!(
                        reason = %reason,
                        delay_ms = delay.as_millis() as u64,
                        "socket mode connection closed; reconnecting"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(transport_error) => {
                    if connected {
                        failures = 0;
                    }
                    warn!(
                        attempt = failures,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "socket mode transport failed"
                    );

                    if failures >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "socket mode retries exhausted; continuing process without crash"
                        );
                        return Ok(());
                    }

                    let delay = self.reconnect_policy.backoff(failures);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    failures += 1;
                }
            }
        }
    }

    async fn connect_and_pump(
        &self,
        attempt: u32,
        connected: &mut bool,
    ) -> Result<(), TransportError> {
        info!(attempt, "opening socket mode transport connection");
        self.transport.connect().await?;
        *connected = true;
        info!(attempt, "socket mode transport connected");

        loop {
            let Some(envelope) = self.transport.next_envelope().await? else {
                info!(attempt, "socket mode transport stream closed");
                self.transport.disconnect().await?;
                return Ok(());
            };
            let target = envelope.event.reply_target();
            let channel_id = target.as_ref().map(|target| target.channel_id.as_str());
            let thread_ts = target.as_ref().and_then(|target| target.thread_ts.as_deref());

            info!(
                event_name = "ingress.slack.envelope_received",
                envelope_id = %envelope.envelope_id,
                event_type = ?envelope.event.event_type(),
                correlation_id = %envelope.envelope_id,
                channel_id = channel_id.unwrap_or("unknown"),
                thread_ts = thread_ts.unwrap_or("unknown"),
                "received slack envelope"
            );

            if let Err(error) = self.transport.acknowledge(&envelope.envelope_id).await {
                warn!(
                    event_name = "ingress.slack.ack_failed",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    error = %error,
                    "failed to acknowledge slack envelope"
                );
            } else {
                debug!(
                    event_name = "ingress.slack.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    "acknowledged slack envelope"
                );
            }

            self.processor.spawn(envelope);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::{
        parse_socket_frame, ReconnectPolicy, SocketFrame, SocketModeRunner, SocketTransport,
        TransportError, LINK_DISABLED_REASON,
    };
    use crate::api::SlackApi;
    use crate::events::{EventDispatcher, EventProcessor, SlackEnvelope, SlackEvent};
    use crate::testing::FakeSlackApi;

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        envelopes: VecDeque<Result<Option<SlackEnvelope>, TransportError>>,
        connect_attempts: usize,
        acknowledgements: Vec<String>,
        disconnect_calls: usize,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            envelopes: Vec<Result<Option<SlackEnvelope>, TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    envelopes: envelopes.into(),
                    ..ScriptedState::default()
                }),
            }
        }

        async fn connect_attempts(&self) -> usize {
            self.state.lock().await.connect_attempts
        }

        async fn acknowledgements(&self) -> Vec<String> {
            self.state.lock().await.acknowledgements.clone()
        }

        async fn disconnect_calls(&self) -> usize {
            self.state.lock().await.disconnect_calls
        }
    }

    #[async_trait]
    impl SocketTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.connect_attempts += 1;
            state.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
            let mut state = self.state.lock().await;
            state.envelopes.pop_front().unwrap_or(Ok(None))
        }

        async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.acknowledgements.push(envelope_id.to_owned());
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.disconnect_calls += 1;
            Ok(())
        }
    }

    fn unsupported(envelope_id: &str) -> SlackEnvelope {
        SlackEnvelope {
            envelope_id: envelope_id.to_owned(),
            event: SlackEvent::Unsupported { event_type: "test".to_owned() },
        }
    }

    fn runner(transport: Arc<ScriptedTransport>) -> SocketModeRunner {
        runner_with_policy(
            transport,
            ReconnectPolicy { max_retries: 2, base_delay_ms: 0, max_delay_ms: 0 },
        )
    }

    fn runner_with_policy(
        transport: Arc<ScriptedTransport>,
        policy: ReconnectPolicy,
    ) -> SocketModeRunner {
        let api: Arc<dyn SlackApi> = Arc::new(FakeSlackApi::default());
        SocketModeRunner::new(
            transport,
            Arc::new(EventProcessor::new(EventDispatcher::default(), api)),
            policy,
        )
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![Ok(Some(unsupported("env-1"))), Ok(None)],
        ));

        runner(transport.clone()).start().await.expect("runner should not fail");

        assert_eq!(transport.connect_attempts().await, 2);
        assert_eq!(transport.acknowledgements().await, vec!["env-1"]);
        assert_eq!(transport.disconnect_calls().await, 1);
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
        ));

        runner(transport.clone()).start().await.expect("runner should degrade gracefully");
        assert_eq!(transport.connect_attempts().await, 3);
    }

    #[tokio::test]
    async fn slack_requested_disconnect_reconnects_without_spending_retries() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![],
            vec![
                Err(TransportError::Closed("refresh_requested".to_owned())),
                Err(TransportError::Closed("refresh_requested".to_owned())),
                Err(TransportError::Closed("refresh_requested".to_owned())),
                Ok(Some(unsupported("env-after-refresh"))),
                Ok(None),
            ],
        ));

        runner(transport.clone()).start().await.expect("runner");

        assert_eq!(transport.connect_attempts().await, 4);
        assert_eq!(transport.acknowledgements().await, vec!["env-after-refresh"]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_closes_wait_before_reconnecting() {
        let closes: Vec<Result<Option<SlackEnvelope>, TransportError>> = (0..20)
            .map(|_| Err(TransportError::Closed("refresh_requested".to_owned())))
            .chain([Ok(None)])
            .collect();
        let transport = Arc::new(ScriptedTransport::with_script(vec![], closes));
        let policy = ReconnectPolicy::default();
        let minimum_wait = policy.backoff(0) * 20;

        let started = tokio::time::Instant::now();
        runner_with_policy(transport.clone(), policy).start().await.expect("runner");

        assert_eq!(transport.connect_attempts().await, 21);
        assert!(started.elapsed() >= minimum_wait);
    }

    #[tokio::test]
    async fn link_disabled_stops_the_runner() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![],
            vec![
                Err(TransportError::Closed(LINK_DISABLED_REASON.to_owned())),
                Ok(Some(unsupported("never-read"))),
            ],
        ));

        runner(transport.clone()).start().await.expect("runner");

        assert_eq!(transport.connect_attempts().await, 1);
        assert_eq!(transport.disconnect_calls().await, 1);
        assert!(transport.acknowledgements().await.is_empty());
    }

    #[tokio::test]
    async fn receive_failure_after_connect_resets_retry_budget() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![],
            vec![
                Err(TransportError::Receive("reset".to_owned())),
                Err(TransportError::Receive("reset".to_owned())),
                Err(TransportError::Receive("reset".to_owned())),
                Ok(Some(unsupported("env-3"))),
                Ok(None),
            ],
        ));

        runner(transport.clone()).start().await.expect("runner");

        assert_eq!(transport.connect_attempts().await, 4);
        assert_eq!(transport.acknowledgements().await, vec!["env-3"]);
    }

    #[test]
    fn parses_events_api_frame() {
        let frame = parse_socket_frame(
            r#"{
                "type": "events_api",
                "envelope_id": "env-9",
                "payload": {
                    "type": "event_callback",
                    "event": {
                        "type": "app_mention",
                        "user": "UA",
                        "text": "<@U0BOT> 확인",
                        "ts": "1730000000.000100",
                        "channel": "C1"
                    }
                }
            }"#,
        )
        .expect("frame");

        let SocketFrame::Envelope(envelope) = frame else {
            panic!("expected envelope frame");
        };
        assert_eq!(envelope.envelope_id, "env-9");
        assert!(matches!(envelope.event, SlackEvent::AppMention(_)));
    }

    #[test]
    fn parses_slash_command_frame() {
        let frame = parse_socket_frame(
            r#"{
                "type": "slash_commands",
                "envelope_id": "env-10",
                "payload": {
                    "command": "/업무추가",
                    "text": "Fix login | Jane",
                    "channel_id": "C9",
                    "user_id": "UA",
                    "trigger_id": "t-1"
                }
            }"#,
        )
        .expect("frame");

        assert!(matches!(
            frame,
            SocketFrame::Envelope(SlackEnvelope { event: SlackEvent::SlashCommand(ref payload), .. })
                if payload.text == "Fix login | Jane"
        ));
    }

    #[test]
    fn parses_control_frames() {
        assert_eq!(
            parse_socket_frame(r#"{"type":"hello","num_connections":1}"#).expect("hello"),
            SocketFrame::Hello
        );
        assert_eq!(
            parse_socket_frame(r#"{"type":"disconnect","reason":"refresh_requested"}"#)
                .expect("disconnect"),
            SocketFrame::Disconnect { reason: "refresh_requested".to_owned() }
        );
        assert!(matches!(
            parse_socket_frame(r#"{"type":"interactive","envelope_id":"env-11","payload":{}}"#),
            Ok(SocketFrame::Envelope(SlackEnvelope { event: SlackEvent::Unsupported { .. }, .. }))
        ));
    }

    #[test]
    fn rejects_garbage_and_missing_envelope_ids() {
        assert!(matches!(parse_socket_frame("not json"), Err(TransportError::Receive(_))));
        assert!(matches!(
            parse_socket_frame(r#"{"type":"events_api","payload":{}}"#),
            Err(TransportError::Receive(_))
        ));
    }

    #[test]
    fn transport_errors_surface_as_transport_kind() {
        let error = taskbot_core::PipelineError::from(TransportError::Closed("refresh".to_owned()));
        assert!(matches!(error, taskbot_core::PipelineError::Transport { .. }));
    }
}
