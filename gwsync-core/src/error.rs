//! Error types for gwsync-core.

use thiserror::Error;

/// Errors raised while resolving and validating the agent configuration.
///
/// All of them are fatal: the agent refuses to start.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting was not provided and has no default.
    #[error("missing required setting {field}")]
    Missing { field: &'static str },

    /// A setting that must be an absolute http(s) URL could not be parsed.
    #[error("invalid URL for {field} ({value}): {source}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },

    /// A Go-style duration (`10s`, `1m30s`) could not be parsed.
    #[error("invalid duration for {field} ({value}): {source}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    /// The value parsed but violates a constraint.
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
