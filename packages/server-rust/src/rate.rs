//! Sliding-window monitor of calls made against the rate-limited backing
//! store.
//!
//! One instance is built at startup and shared by reference; the window lives
//! behind a `parking_lot` mutex held only for prune + append/read.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use spoolflow_core::clock::duration_millis;
use spoolflow_core::ClockSource;
use tracing::warn;

use crate::config::RateLimitConfig;

/// Kind of backing-store call being counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Read,
    Write,
    BatchWrite,
}

/// Point-in-time view of the window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateStats {
    pub events_in_window: usize,
    /// Events per minute.
    pub current_rate: f64,
    pub target_rate: f64,
    pub external_quota: u32,
    /// `current_rate` as a share of the external quota, in percent.
    pub usage_percent: f64,
    pub within_limit: bool,
    pub burst_detected: bool,
    pub by_kind: BTreeMap<CallKind, usize>,
}

pub struct RateLimitMonitor {
    config: RateLimitConfig,
    clock: Arc<dyn ClockSource>,
    events: Mutex<VecDeque<(u64, CallKind)>>,
}

impl RateLimitMonitor {
    #[must_use]
    pub fn new(config: RateLimitConfig, clock: Arc<dyn ClockSource>) -> Self {
        Self {
            config,
            clock,
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends a timestamped event.
    pub fn record(&self, kind: CallKind) {
        let now = self.clock.now();
        let mut events = self.events.lock();
        self.prune(&mut events, now);
        events.push_back((now, kind));
    }

    /// Events per minute over the live part of the window. `0.0` when empty.
    #[must_use]
    pub fn current_rate(&self) -> f64 {
        let now = self.clock.now();
        let mut events = self.events.lock();
        self.prune(&mut events, now);
        rate_of(&events)
    }

    /// Whether the current rate is at or under the target.
    #[must_use]
    pub fn within_limit(&self) -> bool {
        self.over_target().is_none()
    }

    /// Logs a warning when the current rate is above target.
    ///
    /// Advisory only: callers check before a write and the write proceeds.
    pub fn warn_if_over_target(&self) {
        if let Some((rate, target)) = self.over_target() {
            warn!(rate, target, "backing store call rate above target");
        }
    }

    /// `(rate, target)` when the rate exceeds the target.
    fn over_target(&self) -> Option<(f64, f64)> {
        let rate = self.current_rate();
        let target = self.config.target_per_minute();
        (rate > target).then_some((rate, target))
    }

    /// More than `burst_threshold` events inside the last `burst_window`.
    #[must_use]
    pub fn burst_detected(&self) -> bool {
        let now = self.clock.now();
        let mut events = self.events.lock();
        self.prune(&mut events, now);
        self.burst_count(&events, now) > self.config.burst_threshold
    }

    #[must_use]
    pub fn stats(&self) -> RateStats {
        let now = self.clock.now();
        let mut events = self.events.lock();
        self.prune(&mut events, now);

        let current_rate = rate_of(&events);
        let target_rate = self.config.target_per_minute();
        let external_quota = self.config.external_quota_per_minute;
        let usage_percent = if external_quota == 0 {
            0.0
        } else {
            current_rate / f64::from(external_quota) * 100.0
        };
        let mut by_kind = BTreeMap::new();
        for (_, kind) in &*events {
            *by_kind.entry(*kind).or_insert(0) += 1;
        }
        RateStats {
            events_in_window: events.len(),
            current_rate,
            target_rate,
            external_quota,
            usage_percent,
            within_limit: current_rate <= target_rate,
            burst_detected: self.burst_count(&events, now) > self.config.burst_threshold,
            by_kind,
        }
    }

    fn prune(&self, events: &mut VecDeque<(u64, CallKind)>, now: u64) {
        let window = duration_millis(self.config.window);
        while events
            .front()
            .is_some_and(|(at, _)| at.saturating_add(window) <= now)
        {
            events.pop_front();
        }
    }

    fn burst_count(&self, events: &VecDeque<(u64, CallKind)>, now: u64) -> usize {
        let burst_window = duration_millis(self.config.burst_window);
        events
            .iter()
            .rev()
            .take_while(|(at, _)| at.saturating_add(burst_window) > now)
            .count()
    }
}

/// Events per minute across the span the live events cover. Events that
/// all share one instant report their raw count.
#[allow(clippy::cast_precision_loss)]
fn rate_of(events: &VecDeque<(u64, CallKind)>) -> f64 {
    let (Some((oldest, _)), Some((newest, _))) = (events.front(), events.back()) else {
        return 0.0;
    };
    let count = events.len() as f64;
    let elapsed_ms = newest.saturating_sub(*oldest);
    if elapsed_ms == 0 {
        return count;
    }
    count / (elapsed_ms as f64 / 1000.0) * 60.0
}
