//! Entry check run at the top of every lifecycle handler.
//!
//! Loads the item through the version detector's retry policy and classifies
//! its schema; handlers receive the result as an explicit [`ActionContext`].

use spoolflow_core::{Error, ItemId, Result, WorkItem, Worker};
use tracing::debug;

use crate::version::{VersionDetector, VersionInfo};

/// Validated input of one lifecycle action.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub item: WorkItem,
    pub version: VersionInfo,
    pub worker: Worker,
    /// Clock reading taken when the action started.
    pub now: u64,
}

impl ActionContext {
    #[must_use]
    pub fn item_id(&self) -> &ItemId {
        &self.item.id
    }

    /// Swaps in a fresher copy of the item, e.g. once the lock is held.
    pub fn refresh(&mut self, item: WorkItem) {
        self.version = VersionInfo::classify(&item);
        self.item = item;
    }
}

/// Fetches the item and builds the context.
///
/// # Errors
///
/// `NotFound`, `TransientStoreError` once retries are exhausted, or
/// `StoreUnavailable` from the lookup.
pub async fn prepare(
    versions: &VersionDetector,
    item_id: &ItemId,
    worker: &Worker,
    now: u64,
) -> Result<ActionContext> {
    let item = versions
        .fetch(item_id)
        .await
        .map_err(|e| Error::from_store(item_id, e))?;
    let version = VersionInfo::classify(&item);
    debug!(item_id = %item_id, worker_id = %worker.id, version = %version.version, "action context ready");
    Ok(ActionContext {
        item,
        version,
        worker: worker.clone(),
        now,
    })
}
