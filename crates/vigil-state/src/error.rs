//! Failures of the task status store.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// A redb failure, a record that would not (de)serialize, or a lookup of a
/// task the store has never seen. Backend errors are flattened to strings.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open status store: {0}")]
    Open(String),

    #[error("status store transaction failed: {0}")]
    Transaction(String),

    #[error("failed to open status table: {0}")]
    Table(String),

    #[error("failed to read task record: {0}")]
    Read(String),

    #[error("failed to write task record: {0}")]
    Write(String),

    #[error("failed to encode task record: {0}")]
    Serialize(String),

    #[error("failed to decode task record: {0}")]
    Deserialize(String),

    /// A status was appended for a task that was never stored.
    #[error("unknown task '{0}'")]
    TaskNotFound(String),
}
