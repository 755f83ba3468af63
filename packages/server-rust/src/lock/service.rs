//! Occupation locks: at most one worker per item.
//!
//! Exclusivity rests entirely on the atomic primitives of [`LockStore`].
//! Nothing here reads a lock and then writes it in a separate round trip.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use spoolflow_core::{ClockSource, Error, ItemId, Result, StoreError, Worker, WorkerId};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::{item_from_key, lock_key, ExtendOutcome, LockStore, LockValue, LOCK_KEY_PREFIX};
use crate::config::{LockConfig, LockMode};
use crate::traits::ItemRepository;

/// Prefix of tokens minted while the lock store is unreachable.
pub const DEGRADED_TOKEN_PREFIX: &str = "degraded-";

/// Whether `token` was minted in degraded mode.
#[must_use]
pub fn is_degraded_token(token: &str) -> bool {
    token.starts_with(DEGRADED_TOKEN_PREFIX)
}

/// Enough of a token to correlate log lines without leaking it.
fn short(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(DEGRADED_TOKEN_PREFIX.len() + 8)
        .map_or(token.len(), |(i, _)| i);
    &token[..end]
}

/// Proof of holding an item, returned by a successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub item_id: ItemId,
    pub owner: WorkerId,
    pub token: String,
    pub acquired_at: u64,
}

impl LockToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        is_degraded_token(&self.token)
    }
}

/// Current holder of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockOwner {
    pub worker_id: WorkerId,
    pub label: Option<String>,
    #[serde(skip)]
    pub token: String,
    /// `None` when read from the item occupant in degraded mode.
    pub acquired_at: Option<u64>,
}

impl LockOwner {
    fn from_value(value: LockValue) -> Self {
        Self {
            worker_id: value.owner_id,
            label: value.owner_label,
            token: value.token,
            acquired_at: Some(value.acquired_at),
        }
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        is_degraded_token(&self.token)
    }

    /// Reuses the held lock as if it had just been acquired.
    #[must_use]
    pub fn into_token(self, item_id: &ItemId) -> LockToken {
        LockToken {
            item_id: item_id.clone(),
            owner: self.worker_id,
            token: self.token,
            acquired_at: self.acquired_at.unwrap_or_default(),
        }
    }
}

/// A live lock, for supervisor views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveLock {
    pub item_id: ItemId,
    #[serde(flatten)]
    pub owner: LockOwner,
}

/// Acquires, releases and extends occupation locks.
pub struct LockService {
    store: Arc<dyn LockStore>,
    items: Arc<dyn ItemRepository>,
    clock: Arc<dyn ClockSource>,
    config: LockConfig,
}

impl LockService {
    #[must_use]
    pub fn new(
        store: Arc<dyn LockStore>,
        items: Arc<dyn ItemRepository>,
        clock: Arc<dyn ClockSource>,
        config: LockConfig,
    ) -> Self {
        Self {
            store,
            items,
            clock,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Claims `item_id` for `worker` in the configured mode.
    ///
    /// # Errors
    ///
    /// - `AlreadyOccupied` naming the holder if the item is taken.
    /// - `TransientStoreError` once transport retries are exhausted, or when
    ///   a persistent lock could not be made persistent.
    /// - `StoreUnavailable` when neither the lock store nor the item
    ///   repository can be reached.
    pub async fn acquire(&self, item_id: &ItemId, worker: &Worker) -> Result<LockToken> {
        let ttl = match self.config.mode {
            LockMode::Ttl => self.config.ttl,
            LockMode::Persistent => self.config.safety_ttl,
        };
        self.create(item_id, worker, self.config.mode, ttl).await
    }

    /// Claims `item_id` with a plain TTL regardless of the configured mode.
    ///
    /// Used around instant operations that must not outlive the request.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub async fn acquire_for(
        &self,
        item_id: &ItemId,
        worker: &Worker,
        ttl: Duration,
    ) -> Result<LockToken> {
        self.create(item_id, worker, LockMode::Ttl, ttl).await
    }

    async fn create(
        &self,
        item_id: &ItemId,
        worker: &Worker,
        mode: LockMode,
        ttl: Duration,
    ) -> Result<LockToken> {
        let key = lock_key(item_id);
        let acquired_at = self.clock.now();
        let token = Uuid::new_v4().to_string();
        let value = LockValue {
            owner_id: worker.id,
            token: token.clone(),
            acquired_at,
            owner_label: Some(worker.label.clone()),
        }
        .to_string();

        let mut attempt = 0;
        let created = loop {
            match self.store.set_if_absent(&key, &value, ttl).await {
                Ok(true) => break true,
                Ok(false) if attempt == 0 => break false,
                Ok(false) => {
                    // An earlier attempt may have committed before its reply was lost.
                    let held = self
                        .store
                        .get(&key)
                        .await
                        .map_err(|e| Error::from_store(item_id, e))?;
                    break held.is_some_and(|raw| LockValue::carries_token(&raw, &token));
                }
                Err(StoreError::Transient(reason)) if attempt < self.config.transport_retries => {
                    attempt += 1;
                    warn!(item_id = %item_id, attempt, reason = %reason, "lock store transport error, retrying");
                }
                Err(StoreError::Unavailable(reason)) => {
                    return self.acquire_degraded(item_id, worker, &reason).await;
                }
                Err(err) => return Err(Error::from_store(item_id, err)),
            }
        };

        if !created {
            return Err(self.occupied_error(item_id, &key).await);
        }

        if mode == LockMode::Persistent {
            self.make_persistent(item_id, &key, &token).await?;
        }

        info!(
            item_id = %item_id,
            worker_id = %worker.id,
            token = short(&token),
            mode = ?mode,
            "lock acquired"
        );
        Ok(LockToken {
            item_id: item_id.clone(),
            owner: worker.id,
            token,
            acquired_at,
        })
    }

    /// Second round trip of a persistent acquisition. On failure the lock is
    /// deleted so no immortal orphan can remain; if even that fails the
    /// safety TTL cleans up.
    async fn make_persistent(&self, item_id: &ItemId, key: &str, token: &str) -> Result<()> {
        let failure = match self.store.persist(key).await {
            Ok(true) => return Ok(()),
            Ok(false) => Error::TransientStoreError {
                item_id: item_id.clone(),
                reason: "lock vanished before it could be made persistent".into(),
            },
            Err(err) => Error::from_store(item_id, err),
        };
        if let Err(err) = self.store.compare_and_delete(key, token).await {
            warn!(item_id = %item_id, error = %err, "could not roll back half-acquired lock; safety TTL will expire it");
        }
        warn!(item_id = %item_id, error = %failure, "persistent lock acquisition failed");
        Err(failure)
    }

    async fn occupied_error(&self, item_id: &ItemId, key: &str) -> Error {
        match self.store.get(key).await {
            Ok(Some(raw)) => match LockValue::parse(&raw) {
                Some(value) => Error::AlreadyOccupied {
                    item_id: item_id.clone(),
                    operation: None,
                    owner_id: value.owner_id,
                    owner_label: value
                        .owner_label
                        .unwrap_or_else(|| format!("worker {}", value.owner_id)),
                },
                None => {
                    warn!(item_id = %item_id, "unparsable lock value");
                    Error::AlreadyOccupied {
                        item_id: item_id.clone(),
                        operation: None,
                        owner_id: WorkerId(0),
                        owner_label: "unknown".into(),
                    }
                }
            },
            // Released between our attempt and this read.
            Ok(None) => Error::TransientStoreError {
                item_id: item_id.clone(),
                reason: "lock holder released during acquisition".into(),
            },
            Err(err) => Error::from_store(item_id, err),
        }
    }

    /// Best-effort fallback: trust the occupant recorded on the item.
    async fn acquire_degraded(
        &self,
        item_id: &ItemId,
        worker: &Worker,
        lock_reason: &str,
    ) -> Result<LockToken> {
        warn!(item_id = %item_id, reason = %lock_reason, "lock store unreachable, using degraded mode");
        let item = match self.items.get_by_id(item_id).await {
            Ok(item) => item,
            Err(StoreError::NotFound) => {
                return Err(Error::NotFound {
                    item_id: item_id.clone(),
                })
            }
            Err(err) => {
                return Err(Error::StoreUnavailable {
                    item_id: item_id.clone(),
                    reason: format!("lock store: {lock_reason}; item repository: {err}"),
                })
            }
        };
        if let Some(occupant) = item.occupant.filter(|o| o.worker_id != worker.id) {
            return Err(Error::AlreadyOccupied {
                item_id: item_id.clone(),
                operation: None,
                owner_id: occupant.worker_id,
                owner_label: occupant.label,
            });
        }
        let token = format!("{DEGRADED_TOKEN_PREFIX}{}", Uuid::new_v4());
        info!(item_id = %item_id, worker_id = %worker.id, token = short(&token), "degraded lock issued");
        Ok(LockToken {
            item_id: item_id.clone(),
            owner: worker.id,
            token,
            acquired_at: self.clock.now(),
        })
    }

    /// Releases the lock if `token` still holds it.
    ///
    /// Returns `false` without touching anything on a token mismatch.
    /// Degraded tokens release successfully without contacting the store.
    ///
    /// # Errors
    ///
    /// `TransientStoreError` once retries are exhausted, `StoreUnavailable`
    /// if the store is down.
    pub async fn release(&self, item_id: &ItemId, worker_id: WorkerId, token: &str) -> Result<bool> {
        if is_degraded_token(token) {
            debug!(item_id = %item_id, worker_id = %worker_id, "degraded token released");
            return Ok(true);
        }
        let key = lock_key(item_id);
        let mut attempt = 0;
        let released = loop {
            match self.store.compare_and_delete(&key, token).await {
                Ok(true) => break true,
                Ok(false) if attempt == 0 => break false,
                Ok(false) => {
                    // Gone either way: ours if a lost reply already deleted it.
                    let held = self
                        .store
                        .get(&key)
                        .await
                        .map_err(|e| Error::from_store(item_id, e))?;
                    break held.is_none();
                }
                Err(StoreError::Transient(reason)) if attempt < self.config.transport_retries => {
                    attempt += 1;
                    warn!(item_id = %item_id, attempt, reason = %reason, "lock store transport error, retrying");
                }
                Err(err) => return Err(Error::from_store(item_id, err)),
            }
        };
        if released {
            info!(item_id = %item_id, worker_id = %worker_id, token = short(token), "lock released");
        } else {
            warn!(item_id = %item_id, worker_id = %worker_id, token = short(token), "release refused: token does not hold the lock");
        }
        Ok(released)
    }

    /// Adds `extra` to the remaining lifetime of the lock.
    ///
    /// Returns `false` if another token holds the lock. A persistent lock is
    /// left persistent and reported as extended.
    ///
    /// # Errors
    ///
    /// `LockExpired` if there is no lock at all, store errors otherwise.
    pub async fn extend(&self, item_id: &ItemId, token: &str, extra: Duration) -> Result<bool> {
        if is_degraded_token(token) {
            return Ok(true);
        }
        let key = lock_key(item_id);
        match self
            .store
            .compare_and_expire(&key, token, extra)
            .await
            .map_err(|e| Error::from_store(item_id, e))?
        {
            ExtendOutcome::Extended => {
                debug!(item_id = %item_id, token = short(token), extra_ms = extra.as_millis(), "lock extended");
                Ok(true)
            }
            ExtendOutcome::Mismatch => Ok(false),
            ExtendOutcome::Missing => Err(Error::LockExpired {
                item_id: item_id.clone(),
            }),
        }
    }

    /// Current holder of `item_id`, if any.
    ///
    /// Falls back to the item occupant when the lock store is unreachable;
    /// the returned owner then carries a degraded token.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` if neither store answers.
    pub async fn get_owner(&self, item_id: &ItemId) -> Result<Option<LockOwner>> {
        let key = lock_key(item_id);
        match self.store.get(&key).await {
            Ok(None) => Ok(None),
            Ok(Some(raw)) => {
                let owner = LockValue::parse(&raw).map(LockOwner::from_value);
                if owner.is_none() {
                    warn!(item_id = %item_id, "unparsable lock value");
                }
                Ok(owner)
            }
            Err(StoreError::Unavailable(reason)) => {
                warn!(item_id = %item_id, reason = %reason, "lock store unreachable, reading occupant");
                match self.items.get_by_id(item_id).await {
                    Ok(item) => Ok(item.occupant.map(|o| LockOwner {
                        worker_id: o.worker_id,
                        label: Some(o.label),
                        token: format!("{DEGRADED_TOKEN_PREFIX}occupant"),
                        acquired_at: None,
                    })),
                    Err(err) => Err(Error::StoreUnavailable {
                        item_id: item_id.clone(),
                        reason: format!("lock store: {reason}; item repository: {err}"),
                    }),
                }
            }
            Err(err) => Err(Error::from_store(item_id, err)),
        }
    }

    /// Every live lock, ordered by item id.
    ///
    /// The scan spans all items, so failures are reported as the raw
    /// [`StoreError`] rather than against any one item.
    ///
    /// # Errors
    ///
    /// `Unavailable` / `Transient` from the lock store.
    pub async fn active_locks(&self) -> std::result::Result<Vec<ActiveLock>, StoreError> {
        let keys = self.store.keys(LOCK_KEY_PREFIX).await?;
        let mut locks = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(item_id) = item_from_key(&key) else {
                continue;
            };
            // Locks released between the scan and this read are skipped.
            let raw = self.store.get(&key).await?;
            if let Some(value) = raw.as_deref().and_then(LockValue::parse) {
                locks.push(ActiveLock {
                    item_id,
                    owner: LockOwner::from_value(value),
                });
            }
        }
        Ok(locks)
    }

    /// Health check of the lock store.
    ///
    /// # Errors
    ///
    /// The store's own error.
    pub async fn ping(&self) -> std::result::Result<(), StoreError> {
        self.store.ping().await
    }
}
