//! gwsync daemon: HTTP clients for Traefik and Consul, logging, and the
//! tokio runtime that drives the sync engine's loops.

pub mod consul;
pub mod error;
pub mod log_rotation;
pub mod logging;
pub mod runtime;
pub mod traefik;

pub use consul::ConsulRegistry;
pub use error::DaemonError;
pub use logging::init_tracing;
pub use runtime::{run, run_engine, start_blocking, Schedule};
pub use traefik::TraefikSource;
