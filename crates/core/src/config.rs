//! Runtime configuration.
//!
//! Every knob is overridable from the environment (`TORQUE_*`). Durations
//! are given in milliseconds. `validate()` enforces the cross-field
//! constraints the dispatch core relies on.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::retry::{BackoffStrategy, RetryPolicy};

/// Retry/backoff defaults applied to tasks that do not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// `None` means retry indefinitely on transient errors.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: Some(5),
        }
    }
}

impl BackoffConfig {
    /// The delay policy derived from these defaults.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            strategy: self.strategy,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            jitter: 0.0,
        }
    }
}

/// Process-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorqueConfig {
    /// Whether ingress enforces the shared credential.
    pub authenticate: bool,
    /// The shared credential, carried in an `Authorization: Bearer` header.
    pub auth_token: Option<String>,
    /// Whether ingress advertises HSTS.
    pub enable_hsts: bool,
    pub backoff: BackoffConfig,
    /// Default outbound request deadline per attempt.
    pub task_timeout: Duration,
    /// How long a claim shields a task. Must exceed `task_timeout` with
    /// enough margin to classify and commit the outcome.
    pub claim_duration: Duration,
    /// Poller tick; also the workers' idle fallback interval.
    pub poll_interval: Duration,
    /// Maximum identifiers fetched per due-scan.
    pub poll_batch: usize,
    /// How often terminal rows are swept.
    pub gc_interval: Duration,
    /// How long terminal rows are retained before the sweep removes them.
    pub gc_retention: Duration,
    /// Worker count.
    pub workers: usize,
    /// Retries due sooner than this are announced on the bus; later ones
    /// wait for the poller.
    pub publish_threshold: Duration,
    pub bind_addr: String,
    /// Postgres URL; unset selects the in-memory store.
    pub database_url: Option<String>,
    /// Redis URL; unset selects the in-process bus.
    pub redis_url: Option<String>,
    pub notify_channel: String,
}

impl Default for TorqueConfig {
    fn default() -> Self {
        Self {
            authenticate: true,
            auth_token: None,
            enable_hsts: true,
            backoff: BackoffConfig::default(),
            task_timeout: Duration::from_secs(20),
            claim_duration: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            poll_batch: 100,
            gc_interval: Duration::from_secs(60),
            gc_retention: Duration::from_secs(24 * 60 * 60),
            workers: 4,
            publish_threshold: Duration::from_secs(1),
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: None,
            redis_url: None,
            notify_channel: "torque:notify".to_string(),
        }
    }
}

impl TorqueConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Unset keys keep their defaults; set-but-unparseable values are a
    /// validation error rather than a silent fallback.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> CoreResult<Self> {
        let mut config = Self::default();

        if let Some(v) = parse_var::<bool>(&get, "TORQUE_AUTHENTICATE")? {
            config.authenticate = v;
        }
        if let Some(v) = get("TORQUE_AUTH_TOKEN") {
            config.auth_token = Some(v);
        }
        if let Some(v) = parse_var::<bool>(&get, "TORQUE_ENABLE_HSTS")? {
            config.enable_hsts = v;
        }
        if let Some(v) = get("TORQUE_BACKOFF_STRATEGY") {
            config.backoff.strategy = v.parse()?;
        }
        if let Some(v) = parse_ms(&get, "TORQUE_BACKOFF_BASE_DELAY_MS")? {
            config.backoff.base_delay = v;
        }
        if let Some(v) = parse_ms(&get, "TORQUE_BACKOFF_MAX_DELAY_MS")? {
            config.backoff.max_delay = v;
        }
        if let Some(v) = parse_var::<u32>(&get, "TORQUE_BACKOFF_MAX_ATTEMPTS")? {
            // 0 means unlimited.
            config.backoff.max_attempts = (v > 0).then_some(v);
        }
        if let Some(v) = parse_ms(&get, "TORQUE_TASK_TIMEOUT_MS")? {
            config.task_timeout = v;
        }
        if let Some(v) = parse_ms(&get, "TORQUE_CLAIM_DURATION_MS")? {
            config.claim_duration = v;
        }
        if let Some(v) = parse_ms(&get, "TORQUE_POLL_INTERVAL_MS")? {
            config.poll_interval = v;
        }
        if let Some(v) = parse_var::<usize>(&get, "TORQUE_POLL_BATCH")? {
            config.poll_batch = v;
        }
        if let Some(v) = parse_ms(&get, "TORQUE_GC_INTERVAL_MS")? {
            config.gc_interval = v;
        }
        if let Some(v) = parse_ms(&get, "TORQUE_GC_RETENTION_MS")? {
            config.gc_retention = v;
        }
        if let Some(v) = parse_var::<usize>(&get, "TORQUE_WORKERS")? {
            config.workers = v;
        }
        if let Some(v) = parse_ms(&get, "TORQUE_PUBLISH_THRESHOLD_MS")? {
            config.publish_threshold = v;
        }
        if let Some(v) = get("TORQUE_BIND_ADDR") {
            config.bind_addr = v;
        }
        if let Some(v) = get("TORQUE_DATABASE_URL") {
            config.database_url = Some(v);
        }
        if let Some(v) = get("TORQUE_REDIS_URL") {
            config.redis_url = Some(v);
        }
        if let Some(v) = get("TORQUE_NOTIFY_CHANNEL") {
            config.notify_channel = v;
        }

        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> CoreResult<()> {
        if self.claim_duration <= self.task_timeout {
            return Err(CoreError::validation(format!(
                "claim_duration ({:?}) must exceed task_timeout ({:?}) so a worker can \
                 classify and commit before its claim lapses",
                self.claim_duration, self.task_timeout
            )));
        }
        if self.workers == 0 {
            return Err(CoreError::validation("workers must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(CoreError::validation("poll_interval must be non-zero"));
        }
        if self.backoff.base_delay.is_zero() {
            return Err(CoreError::validation("backoff base_delay must be non-zero"));
        }
        if self.authenticate && self.auth_token.is_none() {
            return Err(CoreError::validation(
                "authenticate is enabled but no auth_token is configured",
            ));
        }
        Ok(())
    }
}

fn parse_var<T: core::str::FromStr>(
    get: impl Fn(&str) -> Option<String>,
    key: &str,
) -> CoreResult<Option<T>> {
    match get(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| CoreError::validation(format!("{}: cannot parse {:?}", key, raw))),
    }
}

fn parse_ms(
    get: impl Fn(&str) -> Option<String>,
    key: &str,
) -> CoreResult<Option<Duration>> {
    Ok(parse_var::<u64>(get, key)?.map(Duration::from_millis))
}
