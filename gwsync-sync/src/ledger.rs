//! Applied-state ledger: what this agent believes the registry holds.
//!
//! `applied` maps each key to the value and session it was last written
//! with. `pending_delete` holds keys that must not exist but whose delete
//! has not yet succeeded; they are retried on every pass until it does.
//!
//! Also home of the snapshot fingerprint (SHA-256 over the content).

use std::collections::{BTreeMap, BTreeSet};

use sha2::{Digest, Sha256};

use gwsync_core::{SessionId, Snapshot};

/// One key as last written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedEntry {
    pub value: String,
    pub session: SessionId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    applied: BTreeMap<String, AppliedEntry>,
    pending_delete: BTreeSet<String>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` unless `key` is already applied with this value under this
    /// session.
    pub fn needs_write(&self, key: &str, value: &str, session: &SessionId) -> bool {
        match self.applied.get(key) {
            Some(entry) => entry.value != value || &entry.session != session,
            None => true,
        }
    }

    pub fn record_write(&mut self, key: &str, value: &str, session: &SessionId) {
        self.pending_delete.remove(key);
        self.applied.insert(
            key.to_owned(),
            AppliedEntry {
                value: value.to_owned(),
                session: session.clone(),
            },
        );
    }

    pub fn record_delete(&mut self, key: &str) {
        self.applied.remove(key);
        self.pending_delete.remove(key);
    }

    /// The delete of `key` failed: it leaves the applied set but stays owed.
    pub fn mark_pending_delete(&mut self, key: &str) {
        self.applied.remove(key);
        self.pending_delete.insert(key.to_owned());
    }

    /// Keys to delete before writing `desired`: stale applied keys plus any
    /// earlier deletes still owed, minus keys that are wanted again.
    pub fn deletions_for(&self, desired: &BTreeMap<String, String>) -> Vec<String> {
        let stale = self.applied.keys().filter(|k| !desired.contains_key(*k));
        let owed = self
            .pending_delete
            .iter()
            .filter(|k| !desired.contains_key(*k));
        stale.chain(owed).cloned().collect::<BTreeSet<_>>().into_iter().collect()
    }

    pub fn get(&self, key: &str) -> Option<&AppliedEntry> {
        self.applied.get(key)
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    pub fn pending_deletes(&self) -> impl Iterator<Item = &str> {
        self.pending_delete.iter().map(String::as_str)
    }

    /// Number of applied keys still bound to a session other than `current`.
    pub fn bound_elsewhere(&self, current: &SessionId) -> usize {
        self.applied.values().filter(|e| &e.session != current).count()
    }
}

/// Stable hex SHA-256 of a snapshot's content (timestamp excluded).
pub fn fingerprint(snapshot: &Snapshot) -> String {
    let mut h = Sha256::new();
    for (key, value) in &snapshot.entries {
        h.update(key.as_bytes());
        h.update([0u8]);
        h.update(value.as_bytes());
        h.update([b'\n']);
    }
    for reg in &snapshot.registrations {
        // Registrations serialize from plain fields; this cannot fail.
        let json = serde_json::to_vec(reg).unwrap_or_default();
        h.update(&json);
        h.update([b'\n']);
    }
    hex::encode(h.finalize())
}

/// First 12 hex digits of [`fingerprint`], for log lines.
pub fn short_fingerprint(snapshot: &Snapshot) -> String {
    let mut print = fingerprint(snapshot);
    print.truncate(12);
    print
}
