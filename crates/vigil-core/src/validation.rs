//! Health check validation.
//!
//! Runs once, before a checker is constructed. A spec that fails here must
//! keep its task from starting; it never turns into a probe failure later.

use crate::error::ValidationError;
use crate::types::{CheckKind, CommandCheck, HealthCheckSpec, HttpCheck};

/// HTTP schemes an HTTP check may use.
pub const SUPPORTED_SCHEMES: &[&str] = &["http", "https"];

/// Longest accepted delay, interval, timeout or grace period (100 years).
pub const MAX_DURATION_SECONDS: f64 = 100.0 * 365.0 * 24.0 * 3600.0;

const KINDS: [CheckKind; 3] = [CheckKind::Command, CheckKind::Http, CheckKind::Tcp];

/// Validate a health check spec. The first violation wins.
pub fn validate(spec: &HealthCheckSpec) -> Result<(), ValidationError> {
    if spec.kind == CheckKind::Unknown {
        return Err(ValidationError::UnknownKind);
    }

    if !has_section(spec, spec.kind) {
        return Err(ValidationError::MissingSection(spec.kind));
    }

    if let Some(section) = KINDS
        .into_iter()
        .find(|&other| other != spec.kind && has_section(spec, other))
    {
        return Err(ValidationError::UnexpectedSection {
            kind: spec.kind,
            section,
        });
    }

    match spec.kind {
        CheckKind::Command => {
            if let Some(command) = &spec.command {
                validate_command(command)?;
            }
        }
        CheckKind::Http => {
            if let Some(http) = &spec.http {
                validate_http(http)?;
            }
        }
        CheckKind::Tcp | CheckKind::Unknown => {}
    }

    validate_durations(spec)
}

fn has_section(spec: &HealthCheckSpec, kind: CheckKind) -> bool {
    match kind {
        CheckKind::Command => spec.command.is_some(),
        CheckKind::Http => spec.http.is_some(),
        CheckKind::Tcp => spec.tcp.is_some(),
        CheckKind::Unknown => false,
    }
}

fn validate_command(command: &CommandCheck) -> Result<(), ValidationError> {
    if command.value.trim().is_empty() {
        return Err(ValidationError::EmptyCommand);
    }
    Ok(())
}

fn validate_http(http: &HttpCheck) -> Result<(), ValidationError> {
    if let Some(scheme) = &http.scheme
        && !SUPPORTED_SCHEMES.contains(&scheme.as_str())
    {
        return Err(ValidationError::UnsupportedScheme(scheme.clone()));
    }

    if let Some(path) = &http.path
        && !path.starts_with('/')
    {
        return Err(ValidationError::InvalidPath(path.clone()));
    }

    Ok(())
}

fn validate_durations(spec: &HealthCheckSpec) -> Result<(), ValidationError> {
    let fields = [
        ("delay_seconds", Some(spec.delay_seconds)),
        ("interval_seconds", Some(spec.interval_seconds)),
        ("timeout_seconds", spec.timeout_seconds),
        ("grace_period_seconds", Some(spec.grace_period_seconds)),
    ];

    for (field, value) in fields {
        if let Some(value) = value
            && !(0.0..=MAX_DURATION_SECONDS).contains(&value)
        {
            return Err(ValidationError::InvalidDuration { field, value });
        }
    }

    Ok(())
}
