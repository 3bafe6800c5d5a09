//! Error types for health check validation.

use thiserror::Error;

use crate::types::CheckKind;

/// Reasons a `HealthCheckSpec` is rejected before a checker is built.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("health check kind must be one of command, http or tcp")]
    UnknownKind,

    #[error("{0} health check requires a `{0}` section")]
    MissingSection(CheckKind),

    #[error("{kind} health check must not carry a `{section}` section")]
    UnexpectedSection { kind: CheckKind, section: CheckKind },

    #[error("command health check requires a non-empty `command.value`")]
    EmptyCommand,

    #[error("unsupported http scheme '{0}', expected http or https")]
    UnsupportedScheme(String),

    #[error("http path '{0}' must start with '/'")]
    InvalidPath(String),

    #[error("`{field}` must be between 0 and 100 years in seconds, got {value}")]
    InvalidDuration { field: &'static str, value: f64 },
}
