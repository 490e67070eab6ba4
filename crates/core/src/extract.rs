//! Task field extraction from free-form chat text.
//!
//! Urgency comes from an ordered rule list; the first rule whose predicate
//! matches wins. The default rules are plain substring checks over a keyword
//! set.

use std::sync::Arc;

use crate::domain::task::{TaskCategory, Urgency};

pub const URGENT_KEYWORDS: &[&str] =
    &["긴급", "급함", "빨리", "즉시", "urgent", "asap", "immediately"];
pub const IMPORTANT_KEYWORDS: &[&str] =
    &["중요", "확인 필요", "검토 요청", "important", "needs review", "please check"];

pub trait UrgencyClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Urgency;
}

/// One classification rule. Matching is case-insensitive substring containment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeywordRule {
    pub urgency: Urgency,
    pub keywords: Vec<String>,
}

impl KeywordRule {
    pub fn new<I, S>(urgency: Urgency, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urgency,
            keywords: keywords.into_iter().map(|keyword| keyword.into().to_lowercase()).collect(),
        }
    }

    fn matches(&self, normalized_text: &str) -> bool {
        self.keywords.iter().any(|keyword| normalized_text.contains(keyword.as_str()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeywordUrgencyClassifier {
    rules: Vec<KeywordRule>,
    fallback: Urgency,
}

impl KeywordUrgencyClassifier {
    pub fn new(rules: Vec<KeywordRule>, fallback: Urgency) -> Self {
        Self { rules, fallback }
    }

    pub fn rules(&self) -> &[KeywordRule] {
        &self.rules
    }
}

impl Default for KeywordUrgencyClassifier {
    fn default() -> Self {
        Self::new(
            vec![
                KeywordRule::new(Urgency::Urgent, URGENT_KEYWORDS.iter().copied()),
                KeywordRule::new(Urgency::High, IMPORTANT_KEYWORDS.iter().copied()),
            ],
            Urgency::Normal,
        )
    }
}

impl UrgencyClassifier for KeywordUrgencyClassifier {
    fn classify(&self, text: &str) -> Urgency {
        let normalized = text.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&normalized))
            .map(|rule| rule.urgency)
            .unwrap_or(self.fallback)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedTask {
    pub content: String,
    pub urgency: Urgency,
    pub category: TaskCategory,
}

#[derive(Clone)]
pub struct TaskFieldExtractor {
    classifier: Arc<dyn UrgencyClassifier>,
}

impl Default for TaskFieldExtractor {
    fn default() -> Self {
        Self::new(Arc::new(KeywordUrgencyClassifier::default()))
    }
}

impl TaskFieldExtractor {
    pub fn new(classifier: Arc<dyn UrgencyClassifier>) -> Self {
        Self { classifier }
    }

    /// Builds display content (with the category's source marker), urgency and
    /// category from raw message text. No I/O.
    pub fn extract(&self, raw_text: &str, category: TaskCategory) -> ExtractedTask {
        let text = raw_text.trim();
        let content = match category.content_prefix() {
            Some(prefix) => format!("{prefix} {text}"),
            None => text.to_owned(),
        };

        ExtractedTask { content, urgency: self.classifier.classify(text), category }
    }
}

/// Drops the leading `<@BOT>` mention from an `app_mention` text: everything
/// up to and including the first `>` goes.
pub fn strip_leading_mention(text: &str) -> &str {
    match text.split_once('>') {
        Some((_, rest)) => rest.trim(),
        None => text.trim(),
    }
}

/// Truncates to `max_chars` characters, appending `...` when anything was cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head = chars.by_ref().take(max_chars).collect::<String>();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
