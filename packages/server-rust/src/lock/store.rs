//! Lock store port and the stored lock value.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use spoolflow_core::{ItemId, StoreError, WorkerId};

/// Key prefix shared by every occupation lock.
pub const LOCK_KEY_PREFIX: &str = "lock:";

/// Key of the occupation lock for `item_id`.
#[must_use]
pub fn lock_key(item_id: &ItemId) -> String {
    format!("{LOCK_KEY_PREFIX}{item_id}")
}

/// Item id encoded in a lock key, if it is one.
#[must_use]
pub fn item_from_key(key: &str) -> Option<ItemId> {
    key.strip_prefix(LOCK_KEY_PREFIX).map(ItemId::new)
}

/// Result of a token-checked TTL extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendOutcome {
    /// No lock under the key.
    Missing,
    /// The lock is held under a different token.
    Mismatch,
    /// TTL extended (or the lock is persistent and left as is).
    Extended,
}

/// Shared key-value store holding occupation locks.
///
/// Every compare-and-* method must be atomic with respect to every other
/// method on the same key; that is the whole exclusivity guarantee.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Creates `key` only if absent. Returns `false` if it already exists.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Removes the TTL from `key`. Returns `false` if the key is gone.
    async fn persist(&self, key: &str) -> Result<bool, StoreError>;

    /// Deletes `key` only if its value carries `token`.
    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool, StoreError>;

    /// Adds `extra` to the remaining TTL of `key` only if its value carries
    /// `token`.
    async fn compare_and_expire(
        &self,
        key: &str,
        token: &str,
        extra: Duration,
    ) -> Result<ExtendOutcome, StoreError>;

    /// Unconditional delete. Reserved for administrative cleanup.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Live keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Lock value
// ---------------------------------------------------------------------------

/// Decoded lock value: `{owner_id}:{token}:{acquired_at}[:{owner_label}]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockValue {
    pub owner_id: WorkerId,
    pub token: String,
    /// Milliseconds since the Unix epoch.
    pub acquired_at: u64,
    /// Display label of the owner. Absent on values written by older writers.
    pub owner_label: Option<String>,
}

impl LockValue {
    /// Parses a stored value. Returns `None` for anything malformed.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(4, ':');
        let owner_id = parts.next()?.parse::<u32>().ok()?;
        let token = parts.next().filter(|t| !t.is_empty())?.to_string();
        let acquired_at = parts.next()?.parse::<u64>().ok()?;
        let owner_label = parts.next().filter(|l| !l.is_empty()).map(str::to_string);
        Some(Self {
            owner_id: WorkerId(owner_id),
            token,
            acquired_at,
            owner_label,
        })
    }

    /// Whether the raw value was written under `token`.
    #[must_use]
    pub fn carries_token(raw: &str, token: &str) -> bool {
        Self::parse(raw).is_some_and(|v| v.token == token)
    }
}

impl fmt::Display for LockValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.owner_id, self.token, self.acquired_at)?;
        if let Some(label) = &self.owner_label {
            write!(f, ":{label}")?;
        }
        Ok(())
    }
}
