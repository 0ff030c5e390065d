use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the daemon runtime and its HTTP clients.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build HTTP client for {client}: {source}")]
    HttpClient {
        client: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("signal handler failed: {0}")]
    Signal(String),

    #[error("{task} task join failure: {reason}")]
    Join { task: String, reason: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
