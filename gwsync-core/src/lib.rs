//! gwsync core library: domain types, configuration, errors.
//!
//! - [`types`]: raw snapshot, canonical model, target representation, sessions
//! - [`config`]: [`AgentConfig`] resolution and validation
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{AgentConfig, ConfigInput, LogFormat, Mode};
pub use error::ConfigError;
pub use types::{
    CanonicalMiddleware, CanonicalModel, CanonicalRouter, Gateway, HealthCheck, OptionValue,
    RawRouter, RawSnapshot, ServiceRegistration, Session, SessionId, SessionState, Snapshot,
};
