//! Configuration for the occupation and lifecycle services.
//!
//! Plain structs with production defaults. [`OccupationConfig::from_env`]
//! overrides individual values from `SPOOLFLOW_*` variables.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// How long an acquired lock lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Full lifetime TTL set at creation; expiry is the safety net.
    Ttl,
    /// Created with the short safety TTL, then made persistent until released.
    Persistent,
}

/// Lock acquisition settings.
#[derive(Debug, Clone)]
pub struct LockConfig {
    pub mode: LockMode,
    /// Lifetime of a TTL-mode lock.
    pub ttl: Duration,
    /// Initial TTL of a persistent-mode lock until the TTL is removed.
    pub safety_ttl: Duration,
    /// Extra attempts on pure transport errors before reporting failure.
    pub transport_retries: u32,
    /// TTL of the short lock held while an instant inspection is written.
    pub inspection_ttl: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            mode: LockMode::Persistent,
            ttl: Duration::from_secs(3600),
            safety_ttl: Duration::from_secs(10),
            transport_retries: 2,
            inspection_ttl: Duration::from_secs(30),
        }
    }
}

/// Sliding-window write tracking against the external quota.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window: Duration,
    /// Writes per minute the backing store allows before throttling.
    pub external_quota_per_minute: u32,
    /// Share of the external quota we aim to stay under.
    pub target_ratio: f64,
    pub burst_window: Duration,
    /// More events than this inside `burst_window` counts as a burst.
    pub burst_threshold: usize,
}

impl RateLimitConfig {
    /// Target rate in events per minute.
    #[must_use]
    pub fn target_per_minute(&self) -> f64 {
        f64::from(self.external_quota_per_minute) * self.target_ratio
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            external_quota_per_minute: 60,
            target_ratio: 0.5,
            burst_window: Duration::from_secs(10),
            burst_threshold: 20,
        }
    }
}

/// Retry policy of the schema version lookup.
#[derive(Debug, Clone)]
pub struct VersionDetectorConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for VersionDetectorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct OccupationConfig {
    pub lock: LockConfig,
    pub rate: RateLimitConfig,
    pub version: VersionDetectorConfig,
    /// Deadline callers should apply to a whole lifecycle action.
    pub operation_timeout: Duration,
}

impl Default for OccupationConfig {
    fn default() -> Self {
        Self {
            lock: LockConfig::default(),
            rate: RateLimitConfig::default(),
            version: VersionDetectorConfig::default(),
            operation_timeout: Duration::from_secs(30),
        }
    }
}

/// An environment variable held a value that does not parse.
#[derive(Debug, Error)]
#[error("invalid value {value:?} for {var}")]
pub struct ConfigError {
    pub var: String,
    pub value: String,
}

impl OccupationConfig {
    /// Defaults overridden by any `SPOOLFLOW_*` variable that is set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for the first variable that fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for the first variable that fails to parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup("SPOOLFLOW_LOCK_MODE") {
            config.lock.mode = match raw.to_ascii_lowercase().as_str() {
                "ttl" => LockMode::Ttl,
                "persistent" => LockMode::Persistent,
                _ => {
                    return Err(ConfigError {
                        var: "SPOOLFLOW_LOCK_MODE".into(),
                        value: raw,
                    })
                }
            };
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "SPOOLFLOW_LOCK_TTL_SECS")? {
            config.lock.ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "SPOOLFLOW_LOCK_SAFETY_TTL_SECS")? {
            config.lock.safety_ttl = Duration::from_secs(secs);
        }
        if let Some(n) = parse_var::<u32>(&lookup, "SPOOLFLOW_LOCK_TRANSPORT_RETRIES")? {
            config.lock.transport_retries = n;
        }
        if let Some(quota) = parse_var::<u32>(&lookup, "SPOOLFLOW_RATE_QUOTA_PER_MINUTE")? {
            config.rate.external_quota_per_minute = quota;
        }
        if let Some(ratio) = parse_var::<f64>(&lookup, "SPOOLFLOW_RATE_TARGET_RATIO")? {
            config.rate.target_ratio = ratio;
        }
        if let Some(n) = parse_var::<u32>(&lookup, "SPOOLFLOW_VERSION_MAX_ATTEMPTS")? {
            config.version.max_attempts = n;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "SPOOLFLOW_OPERATION_TIMEOUT_SECS")? {
            config.operation_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| ConfigError {
            var: var.to_string(),
            value: raw,
        }),
    }
}
