pub mod config;
pub mod domain;
pub mod errors;
pub mod extract;
pub mod rotation;
pub mod store;

pub use domain::task::{TaskCategory, TaskRecord, TaskStatus, ThreadContext, Urgency};
pub use errors::{DomainError, PipelineError};
pub use extract::{
    ExtractedTask, KeywordRule, KeywordUrgencyClassifier, TaskFieldExtractor, UrgencyClassifier,
};
pub use rotation::AssignmentRotator;
pub use store::{CreateTaskRequest, StoreReceipt, SubmitError, TaskStore};
