//! Shared pipeline used by the engine and the `render` command:
//! fetch → normalize → build.

use chrono::{DateTime, Utc};

use gwsync_core::{CanonicalModel, RawSnapshot, Snapshot};

use crate::error::SourceError;
use crate::normalizer::{normalize, NormalizeOptions, Rejection};
use crate::ports::SnapshotSource;
use crate::strategy::SyncStrategy;

/// A built snapshot together with what normalization produced and left out.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub model: CanonicalModel,
    pub snapshot: Snapshot,
    pub rejections: Vec<Rejection>,
}

/// Normalize and build. Rejections are logged at warn level and returned.
pub fn prepare(
    raw: &RawSnapshot,
    opts: &NormalizeOptions,
    strategy: &dyn SyncStrategy,
    taken_at: DateTime<Utc>,
) -> Prepared {
    let normalized = normalize(raw, opts);
    for rejection in &normalized.rejections {
        tracing::warn!("skipped {rejection}");
    }
    if normalized.model.is_empty() {
        tracing::info!("no routable routers, every published route will be removed");
    }
    let snapshot = strategy.build(&normalized.model, taken_at);
    tracing::debug!(
        routers = normalized.model.routers.len(),
        middlewares = normalized.model.middlewares.len(),
        keys = snapshot.key_count(),
        tags = snapshot.tag_count(),
        "snapshot built"
    );
    Prepared {
        model: normalized.model,
        snapshot,
        rejections: normalized.rejections,
    }
}

/// Fetch from `source`, then [`prepare`].
pub async fn fetch_and_prepare(
    source: &dyn SnapshotSource,
    opts: &NormalizeOptions,
    strategy: &dyn SyncStrategy,
) -> Result<Prepared, SourceError> {
    let raw = source.fetch().await?;
    Ok(prepare(&raw, opts, strategy, Utc::now()))
}
