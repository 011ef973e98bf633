use crate::job::JobState;
use crate::types::ItemIndex;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A required setting (e.g. the external-service credential) is missing.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid job transition for index {index}: {from} -> {to}")]
    InvalidTransition {
        index: ItemIndex,
        from: JobState,
        to: JobState,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}
