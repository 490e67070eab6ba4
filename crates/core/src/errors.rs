use thiserror::Error;

use crate::store::SubmitError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("task content must not be empty")]
    EmptyContent,
    #[error("task assignee must not be empty")]
    EmptyAssignee,
    #[error("assignment roster must contain at least one name")]
    EmptyRoster,
}

/// Failure kinds a handler can end in. Every entry point maps its failure into
/// one of these and then into a single acknowledgement line for the user.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("transport failure during {operation}: {detail}")]
    Transport { operation: &'static str, detail: String },
    #[error("validation failure: {0}")]
    Validation(String),
    #[error("store rejected task: {0}")]
    StoreRejection(String),
    #[error("internal failure: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn transport(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::Transport { operation, detail: detail.into() }
    }

    /// Short text shown in Slack. Submission failures keep the store's detail
    /// so the user can see the status code.
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport { operation: "store submission", detail }
            | Self::StoreRejection(detail) => format!("❌ 업무 등록 실패: {detail}"),
            Self::Validation(detail) => detail.clone(),
            Self::Transport { detail, .. } | Self::Internal(detail) => {
                format!("⚠️ 처리 중 오류 발생: {detail}")
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport_failure",
            Self::Validation(_) => "validation_failure",
            Self::StoreRejection(_) => "store_rejection",
            Self::Internal(_) => "unhandled",
        }
    }
}

impl From<DomainError> for PipelineError {
    fn from(value: DomainError) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<SubmitError> for PipelineError {
    fn from(value: SubmitError) -> Self {
        match value {
            SubmitError::Transport(_) => Self::transport("store submission", value.to_string()),
            SubmitError::Rejected { .. }
            | SubmitError::StoreReported(_)
            | SubmitError::Decode(_) => Self::StoreRejection(value.to_string()),
        }
    }
}
