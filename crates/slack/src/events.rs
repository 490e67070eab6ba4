use std::{collections::HashMap, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::Deserialize;
use serde_json::Value;
use taskbot_core::PipelineError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    api::{OutboundMessage, SlackApi},
    blocks::failure_message,
    commands::{is_task_command, SlashCommandPayload},
    pipeline::{PipelineOutcome, SkipReason, TaskPipeline},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event: SlackEvent,
}

impl SlackEnvelope {
    /// Builds an envelope from an Events API `event_callback` body.
    pub fn from_event_callback(envelope_id: impl Into<String>, payload: &Value) -> Self {
        let event = match payload.get("event") {
            Some(event) => SlackEvent::from_event_json(event),
            None => SlackEvent::Unsupported {
                event_type: payload
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_owned(),
            },
        };
        Self { envelope_id: envelope_id.into(), event }
    }

    /// Builds an envelope from slash command fields, either the socket-mode
    /// JSON payload or the HTTP form body.
    pub fn from_slash_command(envelope_id: impl Into<String>, command: RawSlashCommand) -> Self {
        Self { envelope_id: envelope_id.into(), event: SlackEvent::SlashCommand(command.into()) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    AppMention(MentionEvent),
    SlashCommand(SlashCommandPayload),
    ReactionAdded(ReactionAddedEvent),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::AppMention(_) => SlackEventType::AppMention,
            Self::SlashCommand(_) => SlackEventType::SlashCommand,
            Self::ReactionAdded(_) => SlackEventType::ReactionAdded,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }

    /// Where a reply about this event belongs.
    pub fn reply_target(&self) -> Option<ReplyTarget> {
        match self {
            Self::AppMention(event) => Some(ReplyTarget {
                channel_id: event.channel_id.clone(),
                thread_ts: Some(event.thread_root().to_owned()),
            }),
            Self::SlashCommand(payload) => {
                Some(ReplyTarget { channel_id: payload.channel_id.clone(), thread_ts: None })
            }
            Self::ReactionAdded(event) => Some(ReplyTarget {
                channel_id: event.channel_id.clone(),
                thread_ts: Some(event.message_ts.clone()),
            }),
            Self::Unsupported { .. } => None,
        }
    }

    fn from_event_json(event: &Value) -> Self {
        let event_type = event.get("type").and_then(Value::as_str).unwrap_or("unknown").to_owned();
        match serde_json::from_value::<RawEvent>(event.clone()) {
            Ok(RawEvent::AppMention { channel, user, text, ts, thread_ts }) => {
                Self::AppMention(MentionEvent {
                    channel_id: channel,
                    ts,
                    thread_ts,
                    user_id: user,
                    text,
                })
            }
            Ok(RawEvent::ReactionAdded { user, reaction, item }) if item.item_type == "message" => {
                Self::ReactionAdded(ReactionAddedEvent {
                    channel_id: item.channel,
                    message_ts: item.ts,
                    reactor_user_id: user,
                    reaction,
                })
            }
            Ok(_) => Self::Unsupported { event_type },
            Err(error) => {
                debug!(event_type = %event_type, error = %error, "slack event payload not recognized");
                Self::Unsupported { event_type }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    AppMention,
    SlashCommand,
    ReactionAdded,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyTarget {
    pub channel_id: String,
    pub thread_ts: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MentionEvent {
    pub channel_id: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    pub user_id: String,
    pub text: String,
}

impl MentionEvent {
    /// The mention's own ts unless it was posted inside a thread.
    pub fn thread_root(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionAddedEvent {
    pub channel_id: String,
    pub message_ts: String,
    pub reactor_user_id: String,
    pub reaction: String,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawEvent {
    AppMention {
        channel: String,
        #[serde(default)]
        user: String,
        #[serde(default)]
        text: String,
        ts: String,
        #[serde(default)]
        thread_ts: Option<String>,
    },
    ReactionAdded {
        #[serde(default)]
        user: String,
        reaction: String,
        item: RawReactionItem,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct RawReactionItem {
    #[serde(rename = "type")]
    item_type: String,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    ts: String,
}

/// Slash command fields as Slack sends them.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawSlashCommand {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub trigger_id: String,
}

impl From<RawSlashCommand> for SlashCommandPayload {
    fn from(raw: RawSlashCommand) -> Self {
        Self {
            command: raw.command,
            text: raw.text,
            channel_id: raw.channel_id,
            user_id: raw.user_id,
            trigger_id: raw.trigger_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(OutboundMessage),
    Processed,
    Ignored,
}

/// Handlers settle every pipeline error into a user-facing reply themselves,
/// so handling cannot fail.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(&self, envelope: &SlackEnvelope, ctx: &EventContext) -> HandlerResult;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(&self, envelope: &SlackEnvelope, ctx: &EventContext) -> HandlerResult {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return HandlerResult::Ignored;
        };

        handler.handle(envelope, ctx).await
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Mention, slash command and reaction handlers over one shared pipeline.
pub fn task_dispatcher(pipeline: Arc<TaskPipeline>) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(MentionHandler::new(Arc::clone(&pipeline)));
    dispatcher.register(SlashCommandHandler::new(Arc::clone(&pipeline)));
    dispatcher.register(ReactionAddedHandler::new(pipeline));
    dispatcher
}

pub struct MentionHandler {
    pipeline: Arc<TaskPipeline>,
}

impl MentionHandler {
    pub fn new(pipeline: Arc<TaskPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl EventHandler for MentionHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::AppMention
    }

    async fn handle(&self, envelope: &SlackEnvelope, ctx: &EventContext) -> HandlerResult {
        let SlackEvent::AppMention(event) = &envelope.event else {
            return HandlerResult::Ignored;
        };

        let outcome = self.pipeline.handle_mention(event).await;
        settle(outcome, envelope, ctx)
    }
}

pub struct SlashCommandHandler {
    pipeline: Arc<TaskPipeline>,
}

impl SlashCommandHandler {
    pub fn new(pipeline: Arc<TaskPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl EventHandler for SlashCommandHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::SlashCommand
    }

    async fn handle(&self, envelope: &SlackEnvelope, ctx: &EventContext) -> HandlerResult {
        let SlackEvent::SlashCommand(payload) = &envelope.event else {
            return HandlerResult::Ignored;
        };
        if !is_task_command(&payload.command) {
            debug!(
                correlation_id = %ctx.correlation_id,
                command = %payload.command,
                "ignoring unrelated slash command"
            );
            return HandlerResult::Ignored;
        }

        let outcome = self.pipeline.handle_manual_command(payload).await;
        settle(outcome, envelope, ctx)
    }
}

pub struct ReactionAddedHandler {
    pipeline: Arc<TaskPipeline>,
}

impl ReactionAddedHandler {
    pub fn new(pipeline: Arc<TaskPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl EventHandler for ReactionAddedHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::ReactionAdded
    }

    async fn handle(&self, envelope: &SlackEnvelope, ctx: &EventContext) -> HandlerResult {
        let SlackEvent::ReactionAdded(event) = &envelope.event else {
            return HandlerResult::Ignored;
        };

        let outcome = self.pipeline.handle_reaction(event).await;
        settle(outcome, envelope, ctx)
    }
}

/// Top-level adapter: every error kind becomes a reply to where the event
/// came from.
fn settle(
    outcome: Result<PipelineOutcome, PipelineError>,
    envelope: &SlackEnvelope,
    ctx: &EventContext,
) -> HandlerResult {
    match outcome {
        Ok(PipelineOutcome::Acknowledged(message)) => HandlerResult::Responded(message),
        Ok(PipelineOutcome::Skipped(SkipReason::AlreadyAnswered | SkipReason::ReplyCheckFailed)) => {
            HandlerResult::Processed
        }
        Ok(PipelineOutcome::Skipped(_)) => HandlerResult::Ignored,
        Err(error) => failure_reply(&error, envelope, ctx),
    }
}

fn failure_reply(
    error: &PipelineError,
    envelope: &SlackEnvelope,
    ctx: &EventContext,
) -> HandlerResult {
    warn!(
        event_name = "pipeline.failed",
        correlation_id = %ctx.correlation_id,
        event_type = ?envelope.event.event_type(),
        error_kind = error.kind(),
        error = %error,
        "event handling failed; notifying user"
    );

    match envelope.event.reply_target() {
        Some(target) => {
            let message = failure_message(error, &ctx.correlation_id);
            let outbound = OutboundMessage {
                channel_id: target.channel_id,
                thread_ts: target.thread_ts,
                message,
            };
            HandlerResult::Responded(outbound)
        }
        None => HandlerResult::Processed,
    }
}

/// Dispatches envelopes and delivers whatever the handler wants said.
/// Shared by both ingress transports.
pub struct EventProcessor {
    dispatcher: EventDispatcher,
    api: Arc<dyn SlackApi>,
}

impl EventProcessor {
    pub fn new(dispatcher: EventDispatcher, api: Arc<dyn SlackApi>) -> Self {
        Self { dispatcher, api }
    }

    pub fn handler_count(&self) -> usize {
        self.dispatcher.handler_count()
    }

    /// Runs the envelope on its own task so a debounce never holds up other
    /// events.
    pub fn spawn(self: &Arc<Self>, envelope: SlackEnvelope) -> JoinHandle<HandlerResult> {
        let processor = Arc::clone(self);
        tokio::spawn(async move {
            let ctx = EventContext { correlation_id: envelope.envelope_id.clone() };
            processor.process(&envelope, &ctx).await
        })
    }

    pub async fn process(&self, envelope: &SlackEnvelope, ctx: &EventContext) -> HandlerResult {
        let dispatched =
            AssertUnwindSafe(self.dispatcher.dispatch(envelope, ctx)).catch_unwind().await;
        let result = match dispatched {
            Ok(result) => result,
            Err(_) => {
                error!(
                    event_name = "pipeline.panicked",
                    correlation_id = %ctx.correlation_id,
                    event_type = ?envelope.event.event_type(),
                    "event handler panicked"
                );
                let error = PipelineError::Internal("unexpected handler failure".to_owned());
                failure_reply(&error, envelope, ctx)
            }
        };

        if let HandlerResult::Responded(message) = &result {
            match self.api.post_message(message).await {
                Ok(ts) => info!(
                    event_name = "egress.slack.message_posted",
                    correlation_id = %ctx.correlation_id,
                    channel_id = %message.channel_id,
                    ts = %ts,
                    "reply posted"
                ),
                Err(error) => warn!(
                    event_name = "egress.slack.message_failed",
                    correlation_id = %ctx.correlation_id,
                    channel_id = %message.channel_id,
                    error = %error,
                    "failed to post reply"
                ),
            }
        }

        result
    }
}
