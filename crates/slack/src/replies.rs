use std::sync::Arc;

use tracing::warn;

use crate::api::{SlackApi, SlackMessage};

/// Outcome of looking for a third-party reply in a thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyCheck {
    Replied,
    NoReply,
    /// The thread could not be read; nothing is known about replies.
    Unknown(String),
}

#[derive(Clone)]
pub struct ReplyDetector {
    api: Arc<dyn SlackApi>,
}

impl ReplyDetector {
    pub fn new(api: Arc<dyn SlackApi>) -> Self {
        Self { api }
    }

    /// Checks whether anyone other than `original_author` posted in the thread
    /// rooted at `thread_ts`. Retrieval failures come back as
    /// [`ReplyCheck::Unknown`] and are never propagated.
    pub async fn has_reply(
        &self,
        channel_id: &str,
        thread_ts: &str,
        original_author: &str,
    ) -> ReplyCheck {
        match self.api.thread_messages(channel_id, thread_ts).await {
            Ok(messages) => {
                if has_third_party_reply(&messages, thread_ts, original_author) {
                    ReplyCheck::Replied
                } else {
                    ReplyCheck::NoReply
                }
            }
            Err(error) => {
                warn!(
                    event_name = "pipeline.reply_check.failed",
                    channel_id,
                    thread_ts,
                    error = %error,
                    "could not read thread replies"
                );
                ReplyCheck::Unknown(error.to_string())
            }
        }
    }
}

/// A reply is any message other than the root whose author differs from the
/// original author. Messages without a user (bot posts) count as replies.
pub fn has_third_party_reply(
    messages: &[SlackMessage],
    thread_ts: &str,
    original_author: &str,
) -> bool {
    messages
        .iter()
        .any(|message| message.ts != thread_ts && message.user.as_deref() != Some(original_author))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{has_third_party_reply, ReplyCheck, ReplyDetector};
    use crate::api::{SlackApiError, SlackMessage};
    use crate::testing::FakeSlackApi;

    fn message(ts: &str, user: Option<&str>) -> SlackMessage {
        SlackMessage {
            ts: ts.to_owned(),
            user: user.map(str::to_owned),
            text: "text".to_owned(),
        }
    }

    #[test]
    fn follow_up_from_the_original_author_is_not_a_reply() {
        let messages = vec![message("100.1", Some("UA")), message("100.2", Some("UA"))];
        assert!(!has_third_party_reply(&messages, "100.1", "UA"));
    }

    #[test]
    fn message_from_someone_else_is_a_reply() {
        let messages = vec![message("100.1", Some("UA")), message("100.2", Some("UB"))];
        assert!(has_third_party_reply(&messages, "100.1", "UA"));
    }

    #[test]
    fn root_message_is_never_a_reply_even_from_another_author() {
        let messages = vec![message("100.1", Some("UB"))];
        assert!(!has_third_party_reply(&messages, "100.1", "UA"));
    }

    #[test]
    fn userless_message_counts_as_reply() {
        let messages = vec![message("100.1", Some("UA")), message("100.2", None)];
        assert!(has_third_party_reply(&messages, "100.1", "UA"));
    }

    #[tokio::test]
    async fn detector_reports_replied_and_no_reply() {
        let api = Arc::new(FakeSlackApi::default());
        api.set_thread("C1", "100.1", vec![message("100.1", Some("UA")), message("100.2", Some("UA"))])
            .await;
        api.set_thread("C1", "200.1", vec![message("200.1", Some("UA")), message("200.2", Some("UB"))])
            .await;
        let detector = ReplyDetector::new(api);

        assert_eq!(detector.has_reply("C1", "100.1", "UA").await, ReplyCheck::NoReply);
        assert_eq!(detector.has_reply("C1", "200.1", "UA").await, ReplyCheck::Replied);
    }

    #[tokio::test]
    async fn retrieval_failure_is_distinguishable_from_no_reply() {
        let api = Arc::new(FakeSlackApi::default());
        api.fail_thread_reads(SlackApiError::Api {
            method: "conversations.replies".to_owned(),
            error: "ratelimited".to_owned(),
        })
        .await;
        let detector = ReplyDetector::new(api);

        let outcome = detector.has_reply("C1", "100.1", "UA").await;
        assert!(matches!(outcome, ReplyCheck::Unknown(ref detail) if detail.contains("ratelimited")));
    }
}
