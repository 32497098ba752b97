use thiserror::Error;

/// Outcome of a failed store operation.
///
/// A backing store that cannot be reached is `StorageUnavailable`, never
/// `NotFound`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    ParentNotFound(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn task_not_found(task_id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("task {task_id} not found"))
    }

    pub fn subtask_not_found(subtask_id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("subtask {subtask_id} not found"))
    }

    pub fn parent_not_found(task_id: impl std::fmt::Display) -> Self {
        Self::ParentNotFound(format!("parent task {task_id} not found"))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(error: rusqlite::Error) -> Self {
        Self::StorageUnavailable(format!("sqlite: {error}"))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(error: std::io::Error) -> Self {
        Self::StorageUnavailable(format!("io: {error}"))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::StorageUnavailable(format!("json: {error}"))
    }
}
