//! The two external collaborators of the sync engine.
//!
//! The daemon crate provides HTTP implementations; tests use in-memory fakes.

use std::time::Duration;

use async_trait::async_trait;

use gwsync_core::{RawSnapshot, ServiceRegistration, SessionId};

use crate::error::{RegistryError, SourceError};

/// Registry primitives (Consul HTTP API shaped).
#[async_trait]
pub trait Registry: Send + Sync {
    /// Write `value` at `key` bound to `session`. `Ok(false)` means the key is
    /// held by another session.
    async fn kv_acquire(
        &self,
        key: &str,
        value: &str,
        session: &SessionId,
    ) -> Result<bool, RegistryError>;

    async fn kv_delete(&self, key: &str) -> Result<(), RegistryError>;

    /// Delete every key under `prefix`.
    async fn kv_delete_tree(&self, prefix: &str) -> Result<(), RegistryError>;

    /// Register (or replace) a service; the tag list is replaced as a whole.
    async fn register_service(
        &self,
        registration: &ServiceRegistration,
    ) -> Result<(), RegistryError>;

    /// Create a delete-behavior session with the given TTL.
    async fn session_create(&self, name: &str, ttl: Duration)
        -> Result<SessionId, RegistryError>;

    /// Renew a session. Unknown sessions yield [`RegistryError::SessionNotFound`].
    async fn session_renew(&self, id: &SessionId) -> Result<(), RegistryError>;

    async fn session_destroy(&self, id: &SessionId) -> Result<(), RegistryError>;

    /// Connectivity probe. `true` when the registry has a leader.
    async fn probe(&self) -> bool;
}

/// Where raw routing snapshots come from.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self) -> Result<RawSnapshot, SourceError>;
}
