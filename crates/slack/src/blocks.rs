use serde::Serialize;
use taskbot_core::{extract::preview, PipelineError, TaskRecord};

use crate::commands::TASK_COMMAND;

pub const CONTENT_PREVIEW_CHARS: usize = 50;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    PlainText { text: String },
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::PlainText { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { block_id: String, text: TextObject },
    Context { block_id: String, elements: Vec<TextObject> },
}

/// Outbound message body: `fallback_text` goes to `text`, `blocks` to `blocks`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    pub fallback_text: String,
    pub blocks: Vec<Block>,
}

pub struct MessageBuilder {
    fallback_text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { fallback_text: fallback_text.into(), blocks: Vec::new() }
    }

    pub fn section<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut SectionBuilder),
    {
        let mut builder = SectionBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Section { block_id: block_id.into(), text: builder.build() });
        self
    }

    pub fn context<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ContextBuilder),
    {
        let mut builder = ContextBuilder::default();
        build(&mut builder);
        let elements = builder.build();
        if !elements.is_empty() {
            self.blocks.push(Block::Context { block_id: block_id.into(), elements });
        }
        self
    }

    pub fn build(self) -> MessageTemplate {
        MessageTemplate { fallback_text: self.fallback_text, blocks: self.blocks }
    }
}

#[derive(Default)]
pub struct SectionBuilder {
    text: Option<TextObject>,
}

impl SectionBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> TextObject {
        self.text.unwrap_or_else(|| TextObject::plain(""))
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    elements: Vec<TextObject>,
}

impl ContextBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> Vec<TextObject> {
        self.elements
    }
}

/// Details of a task the store accepted, for rendering acknowledgements.
#[derive(Clone, Copy, Debug)]
pub struct RegisteredTask<'a> {
    pub record: &'a TaskRecord,
    /// Message text as the user wrote it, without the source marker.
    pub summary: &'a str,
    pub permalink: Option<&'a str>,
    pub task_id: Option<&'a str>,
}

pub fn mention_task_message(task: RegisteredTask<'_>, dashboard_url: Option<&str>) -> MessageTemplate {
    let mut body = format!(
        "✅ 업무가 자동 등록되었습니다!\n📋 내용: {}\n👤 담당자: {}\n⚡ 긴급도: {}",
        escape_mrkdwn(&preview(task.summary, CONTENT_PREVIEW_CHARS)),
        escape_mrkdwn(task.record.assignee()),
        task.record.urgency().label(),
    );
    if let Some(dashboard_url) = dashboard_url {
        body.push_str(&format!("\n\n대시보드에서 확인하세요: {dashboard_url}"));
    }

    MessageBuilder::new(body.clone())
        .section("task.mention.summary.v1", |section| {
            section.mrkdwn(body);
        })
        .context("task.mention.context.v1", |context| {
            source_context(context, task);
        })
        .build()
}

pub fn manual_task_message(task: RegisteredTask<'_>) -> MessageTemplate {
    let body = format!(
        "✅ 업무가 등록되었습니다!\n📋 제목: {}\n👤 담당자: {}\n📅 마감일: {}",
        escape_mrkdwn(task.summary),
        escape_mrkdwn(task.record.assignee()),
        escape_mrkdwn(task.record.deadline().unwrap_or("미정")),
    );

    MessageBuilder::new(body.clone())
        .section("task.manual.summary.v1", |section| {
            section.mrkdwn(body);
        })
        .context("task.manual.context.v1", |context| {
            source_context(context, task);
        })
        .build()
}

pub fn reaction_task_message(task: RegisteredTask<'_>) -> MessageTemplate {
    let body = format!(
        "✅ 이 메시지가 업무로 등록되었습니다! (담당자: {})",
        escape_mrkdwn(task.record.assignee())
    );

    MessageBuilder::new(body.clone())
        .section("task.reaction.summary.v1", |section| {
            section.mrkdwn(body);
        })
        .context("task.reaction.context.v1", |context| {
            source_context(context, task);
        })
        .build()
}

pub fn failure_message(error: &PipelineError, correlation_id: &str) -> MessageTemplate {
    let summary = error.user_message();
    MessageBuilder::new(summary.clone())
        .section("task.error.summary.v1", |section| {
            section.mrkdwn(summary);
        })
        .context("task.error.context.v1", |context| {
            context.plain(format!("Correlation ID: {correlation_id}"));
        })
        .build()
}

pub fn usage_text() -> String {
    format!("사용법: `{TASK_COMMAND} [제목] | [담당자] | [마감일]`")
}

/// Escapes `&`, `<` and `>` so user text renders literally in mrkdwn.
pub fn escape_mrkdwn(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn source_context(context: &mut ContextBuilder, task: RegisteredTask<'_>) {
    if let Some(permalink) = task.permalink {
        context.mrkdwn(format!("<{permalink}|원본 메시지>"));
    }
    if let Some(task_id) = task.task_id {
        context.plain(format!("업무 ID: {task_id}"));
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use taskbot_core::{PipelineError, TaskCategory, TaskRecord, Urgency};

    use super::{
        escape_mrkdwn, failure_message, manual_task_message, mention_task_message,
        reaction_task_message, usage_text, Block, MessageBuilder, RegisteredTask, TextObject,
    };

    fn record(category: TaskCategory, deadline: Option<&str>) -> TaskRecord {
        TaskRecord::new(
            "[Slack] 이거 확인 필요합니다",
            "정혜인",
            Urgency::High,
            deadline.map(str::to_owned),
            category,
        )
        .expect("valid record")
    }

    #[test]
    fn message_builder_creates_typed_block_structure() {
        let message = MessageBuilder::new("fallback")
            .section("s1", |section| {
                section.mrkdwn("*bold*");
            })
            .context("c1", |context| {
                context.plain("note");
            })
            .context("c2", |_| {})
            .build();

        assert_eq!(message.blocks.len(), 2, "empty context blocks are dropped");
        assert_eq!(
            message.blocks[0],
            Block::Section { block_id: "s1".to_owned(), text: TextObject::mrkdwn("*bold*") }
        );
        assert_eq!(
            serde_json::to_value(&message.blocks[1]).expect("serialize"),
            json!({
                "type": "context",
                "block_id": "c1",
                "elements": [{ "type": "plain_text", "text": "note" }]
            })
        );
    }

    #[test]
    fn mention_acknowledgement_lists_assignee_and_urgency() {
        let record = record(TaskCategory::AutoMention, None);
        let summary = "이거 확인 필요합니다";
        let message = mention_task_message(
            RegisteredTask {
                record: &record,
                summary,
                permalink: Some("https://acme.slack.com/archives/C1/p1730000000000100"),
                task_id: Some("TASK-1"),
            },
            Some("https://dashboard.example.com"),
        );

        assert!(message.fallback_text.starts_with("✅ 업무가 자동 등록되었습니다!"));
        assert!(message.fallback_text.contains("📋 내용: 이거 확인 필요합니다"));
        assert!(message.fallback_text.contains("👤 담당자: 정혜인"));
        assert!(message.fallback_text.contains("⚡ 긴급도: 높음"));
        assert!(message.fallback_text.contains("대시보드에서 확인하세요: https://dashboard.example.com"));
        assert_eq!(message.blocks.len(), 2);
    }

    #[test]
    fn mention_acknowledgement_truncates_long_content() {
        let record = record(TaskCategory::AutoMention, None);
        let summary = "가".repeat(80);
        let message = mention_task_message(
            RegisteredTask { record: &record, summary: &summary, permalink: None, task_id: None },
            None,
        );

        let expected = format!("📋 내용: {}...", "가".repeat(50));
        assert!(message.fallback_text.contains(&expected));
        assert!(!message.fallback_text.contains("대시보드"));
        assert_eq!(message.blocks.len(), 1, "no context without link or id");
    }

    #[test]
    fn manual_acknowledgement_shows_undecided_deadline() {
        let record = record(TaskCategory::ManualCommand, None);
        let message = manual_task_message(RegisteredTask {
            record: &record,
            summary: "Fix login bug",
            permalink: None,
            task_id: None,
        });
        assert!(message.fallback_text.contains("📋 제목: Fix login bug"));
        assert!(message.fallback_text.contains("📅 마감일: 미정"));

        let dated = record_with_deadline();
        let message = manual_task_message(RegisteredTask {
            record: &dated,
            summary: "Fix login",
            permalink: None,
            task_id: None,
        });
        assert!(message.fallback_text.contains("📅 마감일: 2025-01-10"));
    }

    #[test]
    fn user_text_cannot_ping_the_channel() {
        let record = record(TaskCategory::AutoMention, None);
        let message = mention_task_message(
            RegisteredTask {
                record: &record,
                summary: "<!channel> 서버 A&B 점검",
                permalink: None,
                task_id: None,
            },
            None,
        );

        assert!(message.fallback_text.contains("📋 내용: &lt;!channel&gt; 서버 A&amp;B 점검"));
        assert!(!message.fallback_text.contains("<!channel>"));
        assert_eq!(escape_mrkdwn("plain 텍스트"), "plain 텍스트");
    }

    fn record_with_deadline() -> TaskRecord {
        record(TaskCategory::ManualCommand, Some("2025-01-10"))
    }

    #[test]
    fn reaction_acknowledgement_names_assignee() {
        let record = record(TaskCategory::Reaction, None);
        let message = reaction_task_message(RegisteredTask {
            record: &record,
            summary: "도메인 갱신",
            permalink: None,
            task_id: None,
        });
        assert_eq!(message.fallback_text, "✅ 이 메시지가 업무로 등록되었습니다! (담당자: 정혜인)");
    }

    #[test]
    fn failure_template_contains_correlation_id() {
        let message =
            failure_message(&PipelineError::StoreRejection("HTTP 500".to_owned()), "Ev123");
        assert_eq!(message.fallback_text, "❌ 업무 등록 실패: HTTP 500");
        assert!(matches!(
            &message.blocks[1],
            Block::Context { elements, .. }
                if elements == &vec![TextObject::plain("Correlation ID: Ev123")]
        ));
    }

    #[test]
    fn usage_hint_names_the_command() {
        assert_eq!(usage_text(), "사용법: `/업무추가 [제목] | [담당자] | [마감일]`");
    }
}
