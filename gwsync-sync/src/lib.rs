//! # gwsync-sync
//!
//! Normalization, target building and differential reconciliation of a
//! routing snapshot into the registry.
//!
//! [`SyncEngine`] drives one cycle at a time through [`pipeline`] and the
//! mode's [`SyncStrategy`]; the daemon crate supplies the HTTP
//! implementations of [`ports::Registry`] and [`ports::SnapshotSource`].

pub mod engine;
pub mod error;
pub mod kv_builder;
pub mod lease;
pub mod ledger;
pub mod normalizer;
pub mod pipeline;
pub mod ports;
pub mod reconcile;
pub mod strategy;
pub mod tag_builder;

pub use engine::{CycleOutcome, MonitorOutcome, SyncEngine};
pub use error::{RegistryError, SourceError};
pub use ledger::{fingerprint, Ledger};
pub use normalizer::{normalize, NormalizeOptions, Normalized, Rejection, RejectionKind};
pub use pipeline::{prepare, Prepared};
pub use ports::{Registry, SnapshotSource};
pub use reconcile::{ReconcileReport, WriteResult};
pub use strategy::{
    strategy_for, KvStrategy, LeaseTick, SessionSlot, SyncState, SyncStrategy, TagStrategy,
};
