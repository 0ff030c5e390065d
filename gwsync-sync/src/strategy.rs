//! The two publication modes, chosen once at startup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use gwsync_core::{AgentConfig, CanonicalModel, Mode, Session, SessionId, Snapshot};

use crate::error::RegistryError;
use crate::kv_builder::KvBuilder;
use crate::lease::{LeaseManager, RenewOutcome};
use crate::ledger::Ledger;
use crate::ports::Registry;
use crate::reconcile::{reconcile_kv, register_all, ReconcileReport};
use crate::tag_builder::TagBuilder;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Mutable sync state. Lives behind the engine's state mutex; every
/// reconciliation runs while it is held.
#[derive(Debug, Default)]
pub struct SyncState {
    pub ledger: Ledger,
    /// Last snapshot whose key-value writes all landed; replayed after outages.
    pub last_applied: Option<Snapshot>,
    /// Last snapshot a pass was attempted for.
    pub desired: Option<Snapshot>,
}

/// The registry session, locked apart from [`SyncState`] so a renew never
/// waits behind a reconciliation pass. A pass only holds it to read or
/// replace the session, never across key writes.
#[derive(Debug, Default)]
pub struct SessionSlot(Mutex<Option<Session>>);

impl SessionSlot {
    /// Id of the current session while it is active.
    pub async fn active_id(&self) -> Option<SessionId> {
        active_id(&*self.0.lock().await)
    }
}

fn active_id(session: &Option<Session>) -> Option<SessionId> {
    session.as_ref().filter(|s| s.is_active()).map(|s| s.id.clone())
}

/// Result of one lease-loop tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseTick {
    /// Tag mode has no session.
    NotApplicable,
    Renewed,
    Unreachable,
    /// A session was created where there was none.
    Created,
    /// The session expired and a replacement was created; keys must be
    /// re-acquired.
    Replaced,
    Failed(RegistryError),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SyncStrategy: Send + Sync {
    fn mode(&self) -> Mode;

    /// Target representation for a canonical model.
    fn build(&self, model: &CanonicalModel, taken_at: DateTime<Utc>) -> Snapshot;

    async fn on_start(&self, registry: &dyn Registry, slot: &SessionSlot);

    async fn reconcile(
        &self,
        registry: &dyn Registry,
        state: &mut SyncState,
        slot: &SessionSlot,
        snapshot: &Snapshot,
        force: bool,
    ) -> ReconcileReport;

    /// Renew the current session; touches only the slot. `None` means there
    /// is no live session and [`SyncStrategy::replace_session`] must run.
    async fn renew(&self, registry: &dyn Registry, slot: &SessionSlot) -> Option<LeaseTick>;

    /// Create a session to replace a lost one. Callers hold the state lock
    /// so no pass is writing under the old id meanwhile.
    async fn replace_session(&self, registry: &dyn Registry, slot: &SessionSlot) -> LeaseTick;

    async fn on_shutdown(&self, registry: &dyn Registry, slot: &SessionSlot);
}

/// Strategy for the configured mode.
pub fn strategy_for(config: &AgentConfig) -> Box<dyn SyncStrategy> {
    match config.mode {
        Mode::Kv => Box::new(KvStrategy::new(config)),
        Mode::Tags => Box::new(TagStrategy::new(config)),
    }
}

// ---------------------------------------------------------------------------
// Key-value mode
// ---------------------------------------------------------------------------

pub struct KvStrategy {
    builder: KvBuilder,
    lease: LeaseManager,
    destroy_on_shutdown: bool,
}

impl KvStrategy {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            builder: KvBuilder::new(config),
            lease: LeaseManager::new(&config.node_name, config.session_ttl()),
            destroy_on_shutdown: config.destroy_session_on_shutdown,
        }
    }

    async fn ensure_session(
        &self,
        registry: &dyn Registry,
        slot: &SessionSlot,
    ) -> Result<SessionId, RegistryError> {
        let mut current = slot.0.lock().await;
        if let Some(id) = active_id(&current) {
            return Ok(id);
        }
        let session = self
            .lease
            .replace(registry, current.as_mut(), Utc::now())
            .await?;
        let id = session.id.clone();
        *current = Some(session);
        Ok(id)
    }

    /// Expire the session a pass found gone, unless the lease loop already
    /// replaced it.
    async fn forget_session(&self, slot: &SessionSlot, lost: &SessionId) {
        let mut current = slot.0.lock().await;
        if let Some(session) = current.as_mut().filter(|s| &s.id == lost) {
            session.expire();
        }
    }

    async fn pass(
        &self,
        registry: &dyn Registry,
        state: &mut SyncState,
        slot: &SessionSlot,
        snapshot: &Snapshot,
        force: bool,
    ) -> Result<ReconcileReport, RegistryError> {
        let session = self.ensure_session(registry, slot).await?;
        reconcile_kv(registry, &mut state.ledger, &session, &snapshot.entries, force).await
    }
}

fn no_session_report(snapshot: &Snapshot, error: &RegistryError) -> ReconcileReport {
    tracing::warn!(error = %error, "no registry session, key-value pass skipped");
    ReconcileReport {
        failed_writes: snapshot.entries.keys().cloned().collect(),
        unreachable: error.is_unreachable(),
        no_session: true,
        ..ReconcileReport::default()
    }
}

#[async_trait]
impl SyncStrategy for KvStrategy {
    fn mode(&self) -> Mode {
        Mode::Kv
    }

    fn build(&self, model: &CanonicalModel, taken_at: DateTime<Utc>) -> Snapshot {
        Snapshot {
            taken_at,
            entries: self.builder.build(model),
            registrations: self.builder.registrations(),
        }
    }

    async fn on_start(&self, registry: &dyn Registry, slot: &SessionSlot) {
        if let Err(e) = self.ensure_session(registry, slot).await {
            tracing::warn!(error = %e, "session create failed, will retry");
        }
    }

    async fn reconcile(
        &self,
        registry: &dyn Registry,
        state: &mut SyncState,
        slot: &SessionSlot,
        snapshot: &Snapshot,
        force: bool,
    ) -> ReconcileReport {
        let mut report = match self.pass(registry, state, slot, snapshot, force).await {
            Ok(report) => report,
            Err(RegistryError::SessionNotFound(lost)) => {
                tracing::info!(session = %lost, "session lost during pass, replacing");
                self.forget_session(slot, &lost).await;
                match self.pass(registry, state, slot, snapshot, true).await {
                    Ok(report) => report,
                    Err(e) => no_session_report(snapshot, &e),
                }
            }
            Err(e) => no_session_report(snapshot, &e),
        };

        if !report.unreachable {
            register_all(registry, &snapshot.registrations, &mut report).await;
        }
        report
    }

    async fn renew(&self, registry: &dyn Registry, slot: &SessionSlot) -> Option<LeaseTick> {
        let mut current = slot.0.lock().await;
        let session = current.as_mut().filter(|s| s.is_active())?;
        match self.lease.renew(registry, session, Utc::now()).await {
            RenewOutcome::Renewed => Some(LeaseTick::Renewed),
            RenewOutcome::Unreachable => Some(LeaseTick::Unreachable),
            RenewOutcome::Expired => None,
        }
    }

    async fn replace_session(&self, registry: &dyn Registry, slot: &SessionSlot) -> LeaseTick {
        let mut current = slot.0.lock().await;
        if let Some(id) = active_id(&current) {
            tracing::debug!(session = %id, "session already replaced by a pass");
            return LeaseTick::Renewed;
        }
        let had_session = current.is_some();
        match self.lease.replace(registry, current.as_mut(), Utc::now()).await {
            Ok(session) => {
                *current = Some(session);
                if had_session {
                    LeaseTick::Replaced
                } else {
                    LeaseTick::Created
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "session create failed, will retry");
                LeaseTick::Failed(e)
            }
        }
    }

    async fn on_shutdown(&self, registry: &dyn Registry, slot: &SessionSlot) {
        let mut current = slot.0.lock().await;
        let Some(session) = current.as_mut().filter(|s| s.is_active()) else {
            return;
        };
        if self.destroy_on_shutdown {
            // Failure is logged inside; the TTL reaps the keys either way.
            let _ = self.lease.destroy(registry, session).await;
        } else {
            tracing::info!(session = %session.id, "leaving session to expire by TTL");
        }
    }
}

// ---------------------------------------------------------------------------
// Tag mode
// ---------------------------------------------------------------------------

pub struct TagStrategy {
    builder: TagBuilder,
}

impl TagStrategy {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            builder: TagBuilder::new(config),
        }
    }
}

#[async_trait]
impl SyncStrategy for TagStrategy {
    fn mode(&self) -> Mode {
        Mode::Tags
    }

    fn build(&self, model: &CanonicalModel, taken_at: DateTime<Utc>) -> Snapshot {
        Snapshot {
            taken_at,
            entries: Default::default(),
            registrations: self.builder.build(model),
        }
    }

    async fn on_start(&self, _registry: &dyn Registry, _slot: &SessionSlot) {}

    async fn reconcile(
        &self,
        registry: &dyn Registry,
        _state: &mut SyncState,
        _slot: &SessionSlot,
        snapshot: &Snapshot,
        _force: bool,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        register_all(registry, &snapshot.registrations, &mut report).await;
        report
    }

    async fn renew(&self, _registry: &dyn Registry, _slot: &SessionSlot) -> Option<LeaseTick> {
        Some(LeaseTick::NotApplicable)
    }

    async fn replace_session(&self, _registry: &dyn Registry, _slot: &SessionSlot) -> LeaseTick {
        LeaseTick::NotApplicable
    }

    async fn on_shutdown(&self, _registry: &dyn Registry, _slot: &SessionSlot) {}
}
