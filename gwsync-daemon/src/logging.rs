//! Subscriber set-up: one console layer (text or JSON) filtered by
//! `RUST_LOG`, plus an optional file layer that receives only DEBUG records
//! from this workspace's crates.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{Level, Metadata};
use tracing_subscriber::filter::{filter_fn, EnvFilter};
use tracing_subscriber::fmt::writer::{EitherWriter, MakeWriter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, registry};

use gwsync_core::config::LogSettings;
use gwsync_core::LogFormat;

use crate::error::{io_err, DaemonError};

/// Opens the debug log in append mode for every record, so a rotation
/// between two records is picked up without any reopen signal.
#[derive(Debug, Clone)]
pub struct DebugLogWriter {
    path: PathBuf,
}

impl DebugLogWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<'a> MakeWriter<'a> for DebugLogWriter {
    type Writer = EitherWriter<File, io::Sink>;

    fn make_writer(&'a self) -> Self::Writer {
        match OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(file) => EitherWriter::A(file),
            Err(_) => EitherWriter::B(io::sink()),
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn is_own_debug_record(meta: &Metadata<'_>) -> bool {
    *meta.level() == Level::DEBUG && meta.target().starts_with("gwsync")
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_tracing(settings: &LogSettings) -> Result<(), DaemonError> {
    let text = (settings.format == LogFormat::Text)
        .then(|| fmt::layer().with_target(false).with_filter(env_filter()));
    let json = (settings.format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_target(false)
            .with_filter(env_filter())
    });

    let debug_file = if settings.debug {
        if let Some(parent) = settings.debug_log.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
            }
        }
        Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(DebugLogWriter::new(&settings.debug_log))
                .with_filter(filter_fn(is_own_debug_record)),
        )
    } else {
        None
    };

    let _ = registry().with(text).with(json).with(debug_file).try_init();
    Ok(())
}
