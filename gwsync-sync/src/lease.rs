//! Registry session lifecycle (key-value mode).
//!
//! `Created → Active → {Expired | Destroyed}`; see [`gwsync_core::Session`].
//! A lost session is never revived: [`LeaseManager::replace`] always creates
//! a fresh one.

use std::time::Duration;

use chrono::{DateTime, Utc};

use gwsync_core::Session;

use crate::error::RegistryError;
use crate::ports::Registry;

/// Result of one renew attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewOutcome {
    Renewed,
    /// Transient failure; state unchanged, retry next tick.
    Unreachable,
    /// The registry no longer knows the session, or a full TTL has elapsed
    /// since the last successful renew.
    Expired,
}

#[derive(Debug, Clone)]
pub struct LeaseManager {
    name: String,
    ttl: Duration,
}

impl LeaseManager {
    pub fn new(node: &str, ttl: Duration) -> Self {
        Self {
            name: format!("gwsync-{node}"),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Create and activate a new session.
    pub async fn create(
        &self,
        registry: &dyn Registry,
        now: DateTime<Utc>,
    ) -> Result<Session, RegistryError> {
        let id = registry.session_create(&self.name, self.ttl).await?;
        let mut session = Session::new(id, self.ttl, now);
        session.activate(now);
        tracing::info!(session = %session.id, ttl_secs = self.ttl.as_secs(), "session created");
        Ok(session)
    }

    pub async fn renew(
        &self,
        registry: &dyn Registry,
        session: &mut Session,
        now: DateTime<Utc>,
    ) -> RenewOutcome {
        if !session.is_active() {
            return RenewOutcome::Expired;
        }
        match registry.session_renew(&session.id).await {
            Ok(()) => {
                session.renewed(now);
                tracing::debug!(session = %session.id, "session renewed");
                RenewOutcome::Renewed
            }
            Err(e) if e.is_session_not_found() => {
                tracing::info!(session = %session.id, "session unknown to registry");
                session.expire();
                RenewOutcome::Expired
            }
            Err(e) => {
                if session.renew_overdue(now) {
                    tracing::warn!(
                        session = %session.id,
                        error = %e,
                        "no successful renew within TTL, presuming session reaped"
                    );
                    session.expire();
                    RenewOutcome::Expired
                } else {
                    tracing::warn!(session = %session.id, error = %e, "session renew failed");
                    RenewOutcome::Unreachable
                }
            }
        }
    }

    /// Expire `old` (if any) and create its replacement.
    pub async fn replace(
        &self,
        registry: &dyn Registry,
        old: Option<&mut Session>,
        now: DateTime<Utc>,
    ) -> Result<Session, RegistryError> {
        if let Some(old) = old {
            old.expire();
            tracing::info!(
                old = %old.id,
                age_secs = old.age(now).num_seconds(),
                "replacing session"
            );
        }
        self.create(registry, now).await
    }

    /// Destroy the session; the registry drops every key it holds.
    pub async fn destroy(
        &self,
        registry: &dyn Registry,
        session: &mut Session,
    ) -> Result<(), RegistryError> {
        if session.state == gwsync_core::SessionState::Destroyed {
            return Ok(());
        }
        let result = registry.session_destroy(&session.id).await;
        session.destroy();
        match &result {
            Ok(()) => tracing::info!(session = %session.id, "session destroyed"),
            Err(e) => tracing::warn!(session = %session.id, error = %e, "session destroy failed"),
        }
        result
    }
}
