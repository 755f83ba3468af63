//! Work-item schema detection.
//!
//! [`VersionDetector::detect`] never fails: when the lookup cannot be
//! completed the item is treated as legacy, the conservative choice, and the
//! reason is kept in the result.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use spoolflow_core::{ItemId, SchemaVersion, StoreError, WorkItem};
use tracing::{debug, warn};

use crate::config::VersionDetectorConfig;
use crate::traits::ItemRepository;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub version: SchemaVersion,
    /// Sub-unit count read from the item, `None` if the lookup failed.
    pub discriminator: Option<u32>,
    pub explanation: String,
}

impl VersionInfo {
    /// Classifies an already loaded item.
    #[must_use]
    pub fn classify(item: &WorkItem) -> Self {
        let version = item.schema_version();
        let explanation = match version {
            SchemaVersion::Extended => format!("{} sub-unit records", item.sub_unit_count),
            SchemaVersion::Legacy => "no sub-unit records".to_string(),
        };
        Self {
            version,
            discriminator: Some(item.sub_unit_count),
            explanation,
        }
    }

    fn fallback(reason: String) -> Self {
        Self {
            version: SchemaVersion::Legacy,
            discriminator: None,
            explanation: format!("defaulted to legacy: {reason}"),
        }
    }

    /// Whether the version was read rather than defaulted.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.discriminator.is_some()
    }
}

pub struct VersionDetector {
    items: Arc<dyn ItemRepository>,
    config: VersionDetectorConfig,
}

impl VersionDetector {
    #[must_use]
    pub fn new(items: Arc<dyn ItemRepository>, config: VersionDetectorConfig) -> Self {
        Self { items, config }
    }

    /// Looks the item up and classifies it, retrying transient errors with
    /// exponential backoff.
    pub async fn detect(&self, item_id: &ItemId) -> VersionInfo {
        match self.fetch(item_id).await {
            Ok(item) => {
                let info = VersionInfo::classify(&item);
                debug!(item_id = %item_id, version = %info.version, "schema version detected");
                info
            }
            Err(StoreError::Transient(reason)) => VersionInfo::fallback(format!(
                "lookup failed after {} attempts: {reason}",
                self.attempts()
            )),
            Err(err) => VersionInfo::fallback(format!("lookup failed: {err}")),
        }
    }

    /// Reads the item under the retry policy of [`detect`](Self::detect).
    ///
    /// The lifecycle loads items through here so a transient hiccup of the
    /// backing store does not fail an action outright.
    ///
    /// # Errors
    ///
    /// The last transient error once attempts run out, or the first
    /// non-transient one.
    pub async fn fetch(&self, item_id: &ItemId) -> Result<WorkItem, StoreError> {
        let attempts = self.attempts();
        let mut attempt = 1;
        loop {
            match self.items.get_by_id(item_id).await {
                Ok(item) => return Ok(item),
                Err(StoreError::Transient(reason)) if attempt < attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        item_id = %item_id,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        reason = %reason,
                        "item lookup failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        warn!(item_id = %item_id, attempts, error = %err, "item lookup retries exhausted");
                    } else {
                        warn!(item_id = %item_id, error = %err, "item lookup failed");
                    }
                    return Err(err);
                }
            }
        }
    }

    fn attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Delay before retry number `attempt` (1-based): base, 2x base, ...
    /// capped at `max_delay`.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.config
            .base_delay
            .saturating_mul(factor)
            .min(self.config.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;
    use crate::repository::InMemoryItemRepository;
    use crate::testing::FlakyRepository;

    fn extended_item() -> WorkItem {
        let mut item = WorkItem::new("EXT");
        item.sub_unit_count = 4;
        item
    }

    #[tokio::test]
    async fn classifies_by_discriminator() {
        let repo = Arc::new(InMemoryItemRepository::new());
        repo.insert(WorkItem::new("LEG"));
        repo.insert(extended_item());
        let detector = VersionDetector::new(repo, VersionDetectorConfig::default());

        let info = detector.detect(&ItemId::new("EXT")).await;
        assert_eq!(info.version, SchemaVersion::Extended);
        assert_eq!(info.discriminator, Some(4));
        assert!(info.is_confirmed());

        let info = detector.detect(&ItemId::new("LEG")).await;
        assert_eq!(info.version, SchemaVersion::Legacy);
        assert_eq!(info.discriminator, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn three_transient_failures_default_to_legacy() {
        let inner = InMemoryItemRepository::new();
        inner.insert(extended_item());
        let repo = Arc::new(FlakyRepository::new(inner, 3));
        let detector = VersionDetector::new(repo.clone(), VersionDetectorConfig::default());

        let started = Instant::now();
        let info = detector.detect(&ItemId::new("EXT")).await;

        assert_eq!(info.version, SchemaVersion::Legacy);
        assert!(!info.is_confirmed());
        assert!(info.explanation.contains("after 3 attempts"));
        assert_eq!(repo.calls(), 3);
        // 2s + 4s of backoff between the three attempts.
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_within_retry_budget() {
        let inner = InMemoryItemRepository::new();
        inner.insert(extended_item());
        let repo = Arc::new(FlakyRepository::new(inner, 2));
        let detector = VersionDetector::new(repo, VersionDetectorConfig::default());

        let info = detector.detect(&ItemId::new("EXT")).await;
        assert_eq!(info.version, SchemaVersion::Extended);
    }

    #[tokio::test]
    async fn missing_item_is_not_retried() {
        let repo = Arc::new(FlakyRepository::new(InMemoryItemRepository::new(), 0));
        let detector = VersionDetector::new(repo.clone(), VersionDetectorConfig::default());

        let info = detector.detect(&ItemId::new("nope")).await;
        assert_eq!(info.version, SchemaVersion::Legacy);
        assert!(info.explanation.contains("not found"));
        assert_eq!(repo.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_returns_the_item_after_transient_failures() {
        let inner = InMemoryItemRepository::new();
        inner.insert(extended_item());
        let repo = Arc::new(FlakyRepository::new(inner, 2));
        let detector = VersionDetector::new(repo.clone(), VersionDetectorConfig::default());

        let item = detector.fetch(&ItemId::new("EXT")).await.unwrap();
        assert_eq!(item.sub_unit_count, 4);
        assert_eq!(repo.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_gives_up_with_the_last_transient_error() {
        let inner = InMemoryItemRepository::new();
        inner.insert(extended_item());
        let repo = Arc::new(FlakyRepository::new(inner, 5));
        let detector = VersionDetector::new(repo.clone(), VersionDetectorConfig::default());

        let err = detector.fetch(&ItemId::new("EXT")).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(repo.calls(), 3);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let detector = VersionDetector::new(
            Arc::new(InMemoryItemRepository::new()),
            VersionDetectorConfig::default(),
        );
        assert_eq!(detector.backoff(1), Duration::from_secs(2));
        assert_eq!(detector.backoff(2), Duration::from_secs(4));
        assert_eq!(detector.backoff(3), Duration::from_secs(8));
        assert_eq!(detector.backoff(4), Duration::from_secs(10));
    }
}
