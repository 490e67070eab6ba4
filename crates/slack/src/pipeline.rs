//! Unanswered-mention-to-task pipeline and its two direct entry points.

use std::sync::Arc;
use std::time::Duration;

use taskbot_core::config::{PipelineConfig, ReplyCheckFailurePolicy};
use taskbot_core::domain::task::message_permalink;
use taskbot_core::extract::strip_leading_mention;
use taskbot_core::{
    AssignmentRotator, PipelineError, TaskCategory, TaskFieldExtractor, TaskRecord, TaskStore,
    ThreadContext,
};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::api::{OutboundMessage, SlackApi};
use crate::blocks::{self, RegisteredTask};
use crate::commands::{parse_task_command, SlashCommandPayload};
use crate::events::{MentionEvent, ReactionAddedEvent};
use crate::replies::{ReplyCheck, ReplyDetector};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineSettings {
    pub reply_wait: Duration,
    pub watch_channels: Vec<String>,
    pub team_members: Vec<String>,
    pub trigger_reactions: Vec<String>,
    pub dashboard_url: Option<String>,
    pub on_reply_check_failure: ReplyCheckFailurePolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            reply_wait: Duration::from_secs(3),
            watch_channels: Vec::new(),
            team_members: Vec::new(),
            trigger_reactions: taskbot_core::config::DEFAULT_TRIGGER_REACTIONS
                .iter()
                .map(|reaction| reaction.to_string())
                .collect(),
            dashboard_url: None,
            on_reply_check_failure: ReplyCheckFailurePolicy::Escalate,
        }
    }
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            reply_wait: Duration::from_secs(config.reply_wait_secs),
            watch_channels: config.watch_channels.clone(),
            team_members: config.team_members.clone(),
            trigger_reactions: config
                .trigger_reactions
                .iter()
                .map(|reaction| normalize_reaction_token(reaction))
                .collect(),
            dashboard_url: config.dashboard_url.clone(),
            on_reply_check_failure: config.on_reply_check_failure,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    ChannelNotWatched,
    NoTeamMemberMentioned,
    EmptyMessage,
    AlreadyAnswered,
    ReplyCheckFailed,
    NotTriggerReaction,
    MessageNotFound,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChannelNotWatched => "channel_not_watched",
            Self::NoTeamMemberMentioned => "no_team_member_mentioned",
            Self::EmptyMessage => "empty_message",
            Self::AlreadyAnswered => "already_answered",
            Self::ReplyCheckFailed => "reply_check_failed",
            Self::NotTriggerReaction => "not_trigger_reaction",
            Self::MessageNotFound => "message_not_found",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// A task was created; the message acknowledges it.
    Acknowledged(OutboundMessage),
    /// Nothing to do. No output goes back to Slack.
    Skipped(SkipReason),
}

pub struct TaskPipeline {
    rotator: Arc<AssignmentRotator>,
    extractor: TaskFieldExtractor,
    store: Arc<dyn TaskStore>,
    api: Arc<dyn SlackApi>,
    replies: ReplyDetector,
    settings: PipelineSettings,
    workspace_url: OnceCell<String>,
}

impl TaskPipeline {
    pub fn new(
        rotator: Arc<AssignmentRotator>,
        extractor: TaskFieldExtractor,
        store: Arc<dyn TaskStore>,
        api: Arc<dyn SlackApi>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            rotator,
            extractor,
            store,
            replies: ReplyDetector::new(Arc::clone(&api)),
            api,
            settings,
            workspace_url: OnceCell::new(),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Mention path: wait, check for a reply, and escalate the mention into a
    /// task when nobody else answered.
    pub async fn handle_mention(
        &self,
        event: &MentionEvent,
    ) -> Result<PipelineOutcome, PipelineError> {
        if let Some(reason) = self.mention_filter(event) {
            debug!(
                event_name = "pipeline.mention.filtered",
                channel_id = %event.channel_id,
                reason = reason.as_str(),
                "mention ignored"
            );
            return Ok(PipelineOutcome::Skipped(reason));
        }

        let body = strip_leading_mention(&event.text);
        if body.is_empty() {
            return Ok(PipelineOutcome::Skipped(SkipReason::EmptyMessage));
        }
        let context = ThreadContext {
            channel_id: event.channel_id.clone(),
            thread_ts: event.thread_root().to_owned(),
            user_id: event.user_id.clone(),
            text: body.to_owned(),
        };

        info!(
            event_name = "pipeline.mention.received",
            channel_id = %context.channel_id,
            thread_ts = %context.thread_ts,
            user_id = %context.user_id,
            wait_ms = self.settings.reply_wait.as_millis() as u64,
            "mention detected; waiting for a reply"
        );
        if !self.settings.reply_wait.is_zero() {
            tokio::time::sleep(self.settings.reply_wait).await;
        }

        match self.replies.has_reply(&context.channel_id, &context.thread_ts, &context.user_id).await
        {
            ReplyCheck::Replied => {
                info!(
                    event_name = "pipeline.mention.suppressed",
                    channel_id = %context.channel_id,
                    thread_ts = %context.thread_ts,
                    "thread already answered; task not created"
                );
                return Ok(PipelineOutcome::Skipped(SkipReason::AlreadyAnswered));
            }
            ReplyCheck::NoReply => {}
            ReplyCheck::Unknown(detail) => match self.settings.on_reply_check_failure {
                ReplyCheckFailurePolicy::Escalate => {
                    warn!(
                        event_name = "pipeline.mention.reply_check_degraded",
                        channel_id = %context.channel_id,
                        thread_ts = %context.thread_ts,
                        error = %detail,
                        "reply check failed; escalating as unanswered"
                    );
                }
                ReplyCheckFailurePolicy::Suppress => {
                    warn!(
                        event_name = "pipeline.mention.reply_check_degraded",
                        channel_id = %context.channel_id,
                        thread_ts = %context.thread_ts,
                        error = %detail,
                        "reply check failed; dropping mention"
                    );
                    return Ok(PipelineOutcome::Skipped(SkipReason::ReplyCheckFailed));
                }
            },
        }

        let extracted = self.extractor.extract(&context.text, TaskCategory::AutoMention);
        let assignee = self.rotator.next();
        let record = TaskRecord::new(
            extracted.content,
            assignee,
            extracted.urgency,
            None,
            extracted.category,
        )?;
        let permalink = self.workspace_url().await.map(|url| context.permalink(&url));

        let receipt = self.store.submit(&record).await?;
        info!(
            event_name = "pipeline.task.created",
            channel_id = %context.channel_id,
            thread_ts = %context.thread_ts,
            category = record.category().label(),
            assignee = record.assignee(),
            urgency = record.urgency().label(),
            task_id = receipt.task_id.as_deref().unwrap_or("unknown"),
            "task registered from unanswered mention"
        );

        let message = blocks::mention_task_message(
            RegisteredTask {
                record: &record,
                summary: &context.text,
                permalink: permalink.as_deref(),
                task_id: receipt.task_id.as_deref(),
            },
            self.settings.dashboard_url.as_deref(),
        );
        Ok(PipelineOutcome::Acknowledged(
            OutboundMessage::new(context.channel_id, message).in_thread(context.thread_ts),
        ))
    }

    /// Manual path: `/업무추가 title | assignee | deadline`.
    pub async fn handle_manual_command(
        &self,
        payload: &SlashCommandPayload,
    ) -> Result<PipelineOutcome, PipelineError> {
        let command = parse_task_command(&payload.text)?;

        let assignee = command.assignee.clone().unwrap_or_else(|| self.rotator.next());
        let extracted = self.extractor.extract(&command.title, TaskCategory::ManualCommand);
        let record = TaskRecord::new(
            extracted.content,
            assignee,
            command.urgency,
            command.deadline.clone(),
            extracted.category,
        )?;

        let receipt = self.store.submit(&record).await?;
        info!(
            event_name = "pipeline.task.created",
            channel_id = %payload.channel_id,
            user_id = %payload.user_id,
            category = record.category().label(),
            assignee = record.assignee(),
            urgency = record.urgency().label(),
            task_id = receipt.task_id.as_deref().unwrap_or("unknown"),
            "task registered from slash command"
        );

        let message = blocks::manual_task_message(RegisteredTask {
            record: &record,
            summary: &command.title,
            permalink: None,
            task_id: receipt.task_id.as_deref(),
        });
        Ok(PipelineOutcome::Acknowledged(OutboundMessage::new(payload.channel_id.clone(), message)))
    }

    /// Reaction path: a trigger emoji on a message registers that message.
    pub async fn handle_reaction(
        &self,
        event: &ReactionAddedEvent,
    ) -> Result<PipelineOutcome, PipelineError> {
        let reaction = normalize_reaction_token(&event.reaction);
        if !self.settings.trigger_reactions.iter().any(|trigger| trigger == &reaction) {
            return Ok(PipelineOutcome::Skipped(SkipReason::NotTriggerReaction));
        }

        let message = self.api.message_at(&event.channel_id, &event.message_ts).await?;
        let Some(message) = message.filter(|message| message.ts == event.message_ts) else {
            warn!(
                event_name = "pipeline.reaction.message_missing",
                channel_id = %event.channel_id,
                message_ts = %event.message_ts,
                "reacted message not found in channel history"
            );
            return Ok(PipelineOutcome::Skipped(SkipReason::MessageNotFound));
        };
        if message.text.trim().is_empty() {
            return Ok(PipelineOutcome::Skipped(SkipReason::EmptyMessage));
        }

        let extracted = self.extractor.extract(&message.text, TaskCategory::Reaction);
        let assignee = self.rotator.next();
        let record = TaskRecord::new(
            extracted.content,
            assignee,
            extracted.urgency,
            None,
            extracted.category,
        )?;
        let permalink = self
            .workspace_url()
            .await
            .map(|url| message_permalink(&url, &event.channel_id, &event.message_ts));

        let receipt = self.store.submit(&record).await?;
        info!(
            event_name = "pipeline.task.created",
            channel_id = %event.channel_id,
            message_ts = %event.message_ts,
            reaction = %reaction,
            category = record.category().label(),
            assignee = record.assignee(),
            task_id = receipt.task_id.as_deref().unwrap_or("unknown"),
            "task registered from reaction"
        );

        let ack = blocks::reaction_task_message(RegisteredTask {
            record: &record,
            summary: message.text.trim(),
            permalink: permalink.as_deref(),
            task_id: receipt.task_id.as_deref(),
        });
        Ok(PipelineOutcome::Acknowledged(
            OutboundMessage::new(event.channel_id.clone(), ack).in_thread(event.message_ts.clone()),
        ))
    }

    fn mention_filter(&self, event: &MentionEvent) -> Option<SkipReason> {
        let watched = &self.settings.watch_channels;
        if !watched.is_empty() && !watched.iter().any(|channel| channel == &event.channel_id) {
            return Some(SkipReason::ChannelNotWatched);
        }

        let members = &self.settings.team_members;
        if !members.is_empty()
            && !members.iter().any(|member| event.text.contains(&format!("<@{member}>")))
        {
            return Some(SkipReason::NoTeamMemberMentioned);
        }

        None
    }

    /// Cached after the first success. A failed lookup only drops the permalink.
    async fn workspace_url(&self) -> Option<String> {
        let lookup = self
            .workspace_url
            .get_or_try_init(|| async { self.api.workspace_url().await })
            .await;
        match lookup {
            Ok(workspace_url) => Some(workspace_url.clone()),
            Err(error) => {
                warn!(
                    event_name = "pipeline.workspace_lookup.failed",
                    error = %error,
                    "workspace url lookup failed; acknowledging without permalink"
                );
                None
            }
        }
    }
}

/// `:PushPin:` and ` pushpin ` both become `pushpin`.
pub fn normalize_reaction_token(reaction: &str) -> String {
    reaction.trim().trim_matches(':').to_ascii_lowercase()
}
