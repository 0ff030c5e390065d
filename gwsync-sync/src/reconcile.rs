//! Differential reconciliation against the registry.
//!
//! ## Key-value pass
//!
//! 1. Delete `(applied − desired) ∪ pending`. A failed delete stays pending.
//! 2. Acquire every desired key whose value or session differs from the
//!    ledger (all of them when forced).
//! 3. A key held by a foreign session is deleted and acquired again.
//! 4. The first transport failure aborts the pass; the rest is retried on
//!    the next one.
//!
//! A `SessionNotFound` answer aborts with an error so the caller can replace
//! the session and rerun the pass.

use std::collections::BTreeMap;

use gwsync_core::{ServiceRegistration, SessionId};

use crate::error::RegistryError;
use crate::ledger::Ledger;
use crate::ports::Registry;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of one key write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// Acquired (new key, changed value, or rebound to a new session).
    Written { key: String },
    /// Ledger already holds this value under this session.
    Unchanged { key: String },
    /// Held by a foreign session; taken over after a delete.
    TakenOver { key: String },
    Failed { key: String, error: RegistryError },
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub written: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub conflicts: usize,
    pub registered: usize,
    pub failed_writes: Vec<String>,
    pub failed_deletes: Vec<String>,
    pub failed_registrations: Vec<String>,
    /// A transport failure cut the pass short.
    pub unreachable: bool,
    /// No usable session could be obtained for the pass.
    pub no_session: bool,
}

impl ReconcileReport {
    /// Everything desired is applied and nothing is owed.
    pub fn is_clean(&self) -> bool {
        self.failed_writes.is_empty()
            && self.failed_deletes.is_empty()
            && self.failed_registrations.is_empty()
            && !self.unreachable
            && !self.no_session
    }

    /// Every desired key is applied and no stale key is owed. Registration
    /// failures do not count; they are re-sent on every pass.
    pub fn kv_clean(&self) -> bool {
        self.failed_writes.is_empty()
            && self.failed_deletes.is_empty()
            && !self.unreachable
            && !self.no_session
    }

    /// Nothing had to be sent besides the registrations.
    pub fn is_noop(&self) -> bool {
        self.written == 0 && self.deleted == 0
    }

    fn record(&mut self, result: &WriteResult) {
        match result {
            WriteResult::Written { .. } => self.written += 1,
            WriteResult::TakenOver { .. } => {
                self.written += 1;
                self.conflicts += 1;
            }
            WriteResult::Unchanged { .. } => self.unchanged += 1,
            WriteResult::Failed { key, error } => {
                self.failed_writes.push(key.clone());
                if error.is_unreachable() {
                    self.unreachable = true;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Key-value
// ---------------------------------------------------------------------------

/// Acquire one key, taking it over from a foreign session if needed.
async fn acquire(
    registry: &dyn Registry,
    key: &str,
    value: &str,
    session: &SessionId,
) -> Result<WriteResult, RegistryError> {
    let failed = |error| WriteResult::Failed {
        key: key.to_owned(),
        error,
    };
    match registry.kv_acquire(key, value, session).await {
        Ok(true) => return Ok(WriteResult::Written { key: key.to_owned() }),
        Ok(false) => {}
        Err(e @ RegistryError::SessionNotFound(_)) => return Err(e),
        Err(e) => return Ok(failed(e)),
    }

    tracing::warn!(key, "key held by another session, taking it over");
    if let Err(e) = registry.kv_delete(key).await {
        return Ok(failed(e));
    }
    match registry.kv_acquire(key, value, session).await {
        Ok(true) => Ok(WriteResult::TakenOver { key: key.to_owned() }),
        Ok(false) => Ok(failed(RegistryError::Decode(format!(
            "acquire of {key} refused after takeover"
        )))),
        Err(e @ RegistryError::SessionNotFound(_)) => Err(e),
        Err(e) => Ok(failed(e)),
    }
}

/// Bring the registry's key-value tree in line with `desired`.
pub async fn reconcile_kv(
    registry: &dyn Registry,
    ledger: &mut Ledger,
    session: &SessionId,
    desired: &BTreeMap<String, String>,
    force: bool,
) -> Result<ReconcileReport, RegistryError> {
    let mut report = ReconcileReport::default();

    // Deletes first.
    let deletions = ledger.deletions_for(desired);
    for (i, key) in deletions.iter().enumerate() {
        match registry.kv_delete(key).await {
            Ok(()) => {
                tracing::debug!(key = %key, "deleted");
                ledger.record_delete(key);
                report.deleted += 1;
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "delete failed, will retry");
                ledger.mark_pending_delete(key);
                report.failed_deletes.push(key.clone());
                if e.is_unreachable() {
                    for rest in &deletions[i + 1..] {
                        ledger.mark_pending_delete(rest);
                        report.failed_deletes.push(rest.clone());
                    }
                    report.unreachable = true;
                    report.failed_writes.extend(
                        desired
                            .iter()
                            .filter(|(k, v)| force || ledger.needs_write(k, v, session))
                            .map(|(k, _)| k.clone()),
                    );
                    return Ok(report);
                }
            }
        }
    }

    // Then writes.
    let mut pending = desired.iter();
    while let Some((key, value)) = pending.next() {
        if !force && !ledger.needs_write(key, value, session) {
            report.record(&WriteResult::Unchanged { key: key.clone() });
            continue;
        }
        let result = acquire(registry, key, value, session).await?;
        match &result {
            WriteResult::Written { .. } | WriteResult::TakenOver { .. } => {
                tracing::debug!(key = %key, "written");
                ledger.record_write(key, value, session);
            }
            WriteResult::Failed { error, .. } => {
                tracing::warn!(key = %key, error = %error, "write failed, will retry");
            }
            WriteResult::Unchanged { .. } => {}
        }
        report.record(&result);
        if report.unreachable {
            report
                .failed_writes
                .extend(pending.by_ref().map(|(k, _)| k.clone()));
            break;
        }
    }

    Ok(report)
}

// ---------------------------------------------------------------------------
// Service registrations
// ---------------------------------------------------------------------------

/// Register every service; the registry replaces each tag list wholesale.
pub async fn register_all(
    registry: &dyn Registry,
    registrations: &[ServiceRegistration],
    report: &mut ReconcileReport,
) {
    for registration in registrations {
        match registry.register_service(registration).await {
            Ok(()) => {
                tracing::debug!(
                    service = %registration.id,
                    tags = registration.tags.len(),
                    "registered"
                );
                report.registered += 1;
            }
            Err(e) => {
                tracing::warn!(service = %registration.id, error = %e, "registration failed");
                report.failed_registrations.push(registration.id.clone());
                if e.is_unreachable() {
                    report.unreachable = true;
                    return;
                }
            }
        }
    }
}
