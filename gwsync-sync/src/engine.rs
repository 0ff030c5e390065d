//! Sync engine: periodic cycle, degraded mode and replay.
//!
//! The engine is shared (`Arc<SyncEngine>`) between the daemon's resync,
//! lease and monitor loops. Reconciliation passes are serialized by the
//! [`SyncState`] mutex. The session sits in its own [`SessionSlot`] so the
//! lease loop can renew while a pass is in flight; the degraded flag is an
//! atomic for the same reason.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use gwsync_core::{AgentConfig, Mode, Snapshot};

use crate::error::SourceError;
use crate::ledger::short_fingerprint;
use crate::normalizer::NormalizeOptions;
use crate::pipeline::{fetch_and_prepare, Prepared};
use crate::ports::{Registry, SnapshotSource};
use crate::reconcile::ReconcileReport;
use crate::strategy::{strategy_for, LeaseTick, SessionSlot, SyncState, SyncStrategy};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What one resync cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Degraded: nothing fetched, nothing written.
    Skipped,
    /// Fetch failed; the applied state is kept.
    SourceFailed(SourceError),
    /// Everything applied; the snapshot is now the replay cache.
    Applied(ReconcileReport),
    /// Some operations failed but the registry is reachable; retried next cycle.
    Partial(ReconcileReport),
    /// The probe confirmed the registry is down; the engine is now degraded.
    RegistryUnreachable(ReconcileReport),
}

/// What one reachability check did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    Healthy,
    /// Probe failed; cycles are suspended.
    WentDown,
    StillDown,
    /// Probe succeeded while degraded; the cached snapshot (if any) was
    /// replayed and degraded mode cleared.
    Recovered { replay: Option<ReconcileReport> },
    /// Probe succeeded but the replay hit another transport failure.
    ReplayFailed(ReconcileReport),
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SyncEngine {
    source: Arc<dyn SnapshotSource>,
    registry: Arc<dyn Registry>,
    strategy: Box<dyn SyncStrategy>,
    normalize: NormalizeOptions,
    state: Mutex<SyncState>,
    session: SessionSlot,
    degraded: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        config: &AgentConfig,
        source: Arc<dyn SnapshotSource>,
        registry: Arc<dyn Registry>,
    ) -> Self {
        Self::with_strategy(
            NormalizeOptions::from_config(config),
            source,
            registry,
            strategy_for(config),
        )
    }

    pub fn with_strategy(
        normalize: NormalizeOptions,
        source: Arc<dyn SnapshotSource>,
        registry: Arc<dyn Registry>,
        strategy: Box<dyn SyncStrategy>,
    ) -> Self {
        Self {
            source,
            registry,
            strategy,
            normalize,
            state: Mutex::new(SyncState::default()),
            session: SessionSlot::default(),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> Mode {
        self.strategy.mode()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn set_degraded(&self, degraded: bool) -> bool {
        self.degraded.swap(degraded, Ordering::SeqCst)
    }

    /// Snapshot of the replay cache, for inspection.
    pub async fn last_applied(&self) -> Option<Snapshot> {
        self.state.lock().await.last_applied.clone()
    }

    /// Id of the current session, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.session.active_id().await.map(|id| id.0)
    }

    /// Initial probe, then strategy start-up (session creation in KV mode).
    pub async fn start(&self) {
        if !self.registry.probe().await {
            tracing::warn!("registry unreachable at start, entering degraded mode");
            self.set_degraded(true);
            return;
        }
        self.strategy.on_start(self.registry.as_ref(), &self.session).await;
        tracing::info!(mode = %self.strategy.mode(), "sync engine started");
    }

    /// Reconcile `snapshot` under the lock. Once its key-value half is
    /// clean it becomes the replay cache; registrations are re-sent every
    /// cycle anyway, so their failures do not hold the cache back.
    async fn apply(&self, state: &mut SyncState, snapshot: Snapshot, force: bool) -> ReconcileReport {
        state.desired = Some(snapshot.clone());
        let report = self
            .strategy
            .reconcile(self.registry.as_ref(), state, &self.session, &snapshot, force)
            .await;
        if report.kv_clean() {
            state.last_applied = Some(snapshot);
        }
        report
    }

    /// One resync cycle: fetch → normalize → build → reconcile.
    pub async fn run_cycle(&self) -> CycleOutcome {
        if self.is_degraded() {
            tracing::debug!("degraded, cycle skipped");
            return CycleOutcome::Skipped;
        }

        let prepared = match fetch_and_prepare(
            self.source.as_ref(),
            &self.normalize,
            self.strategy.as_ref(),
        )
        .await
        {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!(error = %e, "fetch failed, keeping applied state");
                return CycleOutcome::SourceFailed(e);
            }
        };
        let Prepared { snapshot, .. } = prepared;
        let print = short_fingerprint(&snapshot);

        let report = {
            let mut state = self.state.lock().await;
            self.apply(&mut state, snapshot, false).await
        };

        if report.is_clean() {
            tracing::info!(
                fingerprint = %print,
                written = report.written,
                deleted = report.deleted,
                unchanged = report.unchanged,
                registered = report.registered,
                "cycle applied"
            );
            return CycleOutcome::Applied(report);
        }

        if self.registry.probe().await {
            tracing::warn!(
                failed_writes = report.failed_writes.len(),
                failed_deletes = report.failed_deletes.len(),
                failed_registrations = report.failed_registrations.len(),
                "cycle partially applied, retrying next cycle"
            );
            CycleOutcome::Partial(report)
        } else {
            if !self.set_degraded(true) {
                tracing::warn!("registry unreachable, entering degraded mode");
            }
            CycleOutcome::RegistryUnreachable(report)
        }
    }

    /// Reachability check. On recovery the cached snapshot is replayed as a
    /// forced reconciliation before degraded mode is cleared.
    pub async fn monitor_tick(&self) -> MonitorOutcome {
        let reachable = self.registry.probe().await;
        match (self.is_degraded(), reachable) {
            (false, true) => MonitorOutcome::Healthy,
            (true, false) => MonitorOutcome::StillDown,
            (false, false) => {
                tracing::warn!("registry probe failed, entering degraded mode");
                self.set_degraded(true);
                MonitorOutcome::WentDown
            }
            (true, true) => {
                let mut state = self.state.lock().await;
                let Some(cached) = state.last_applied.clone() else {
                    self.set_degraded(false);
                    tracing::info!("registry reachable again, nothing cached to replay");
                    return MonitorOutcome::Recovered { replay: None };
                };
                tracing::info!(
                    fingerprint = %short_fingerprint(&cached),
                    "registry reachable again, replaying cached snapshot"
                );
                let report = self.apply(&mut state, cached, true).await;
                if report.unreachable {
                    tracing::warn!("replay interrupted, staying degraded");
                    return MonitorOutcome::ReplayFailed(report);
                }
                self.set_degraded(false);
                MonitorOutcome::Recovered {
                    replay: Some(report),
                }
            }
        }
    }

    /// Renew the session without waiting for an in-flight pass. Replacing a
    /// lost session takes the state lock, and every desired key is then
    /// re-acquired under the new id before the lock is released.
    pub async fn lease_tick(&self) -> LeaseTick {
        if self.is_degraded() {
            return LeaseTick::Unreachable;
        }
        if let Some(tick) = self.strategy.renew(self.registry.as_ref(), &self.session).await {
            return tick;
        }
        let mut state = self.state.lock().await;
        let tick = self
            .strategy
            .replace_session(self.registry.as_ref(), &self.session)
            .await;
        if matches!(tick, LeaseTick::Replaced | LeaseTick::Created) {
            let target = state.desired.clone().or_else(|| state.last_applied.clone());
            if let Some(snapshot) = target {
                let report = self.apply(&mut state, snapshot, true).await;
                let stale = match self.session.active_id().await {
                    Some(id) => state.ledger.bound_elsewhere(&id),
                    None => 0,
                };
                tracing::info!(
                    written = report.written,
                    stale,
                    clean = report.is_clean(),
                    "re-acquired keys under new session"
                );
            }
        }
        tick
    }

    /// Graceful shutdown: destroy the session if configured.
    pub async fn shutdown(&self) {
        let _state = self.state.lock().await;
        self.strategy.on_shutdown(self.registry.as_ref(), &self.session).await;
        tracing::info!("sync engine stopped");
    }
}
