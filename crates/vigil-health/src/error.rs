//! Health checker error types.

use thiserror::Error;

/// Errors raised while setting up health checking for a task.
///
/// Probe failures never surface here; they are outcomes, not errors.
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("invalid health check: {0}")]
    InvalidSpec(#[from] vigil_core::ValidationError),
}

pub type HealthResult<T> = Result<T, HealthError>;
