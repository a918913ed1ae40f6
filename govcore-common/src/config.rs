//! Configuration for the governance core services.
//!
//! All sections have serde defaults so an empty TOML file (or no file at
//! all) yields a fully working configuration. Validation runs at load time;
//! a bad threshold fails fast rather than silently disabling a safety gate.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Governance core configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GovConfig {
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub locks: LockConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Thresholds gating rollout phase advancement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Maximum error rate (0.0-1.0) tolerated since the current phase began.
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,
    /// Maximum blocked rate (0.0-1.0) tolerated since the current phase began.
    #[serde(default = "default_max_blocked_rate")]
    pub max_blocked_rate: f64,
    /// Maximum tolerated performance degradation ratio against the baseline
    /// (1.0 = no slowdown allowed, 2.0 = up to twice the baseline).
    #[serde(default = "default_max_perf_degradation")]
    pub max_perf_degradation: f64,
    /// Baseline operation duration used for the degradation ratio (ms).
    #[serde(default = "default_baseline_duration_ms")]
    pub baseline_duration_ms: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_error_rate: default_max_error_rate(),
            max_blocked_rate: default_max_blocked_rate(),
            max_perf_degradation: default_max_perf_degradation(),
            baseline_duration_ms: default_baseline_duration_ms(),
        }
    }
}

/// Thresholds for the advisory health classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Error rate above which health is critical.
    #[serde(default = "default_critical_error_rate")]
    pub critical_error_rate: f64,
    /// Blocked rate above which health is critical.
    #[serde(default = "default_critical_blocked_rate")]
    pub critical_blocked_rate: f64,
    /// Error rate above which health is at least warning.
    #[serde(default = "default_warning_error_rate")]
    pub warning_error_rate: f64,
    /// Success rate below which health is at least warning.
    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,
    /// Interval between background health samples (seconds).
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            critical_error_rate: default_critical_error_rate(),
            critical_blocked_rate: default_critical_blocked_rate(),
            warning_error_rate: default_warning_error_rate(),
            min_success_rate: default_min_success_rate(),
            sample_interval_secs: default_sample_interval_secs(),
        }
    }
}

impl HealthConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }
}

/// Idempotency record retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// How long completed records are retained (seconds).
    #[serde(default = "default_idempotency_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_idempotency_ttl_secs(),
        }
    }
}

impl IdempotencyConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Bounded-wait settings for lock and in-flight acquisition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Maximum time to wait for a per-stock-row lock (ms).
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl LockConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Metric window and alerting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Retention horizon for metric points (seconds).
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Hard cap on points kept per metric name.
    #[serde(default = "default_max_points")]
    pub max_points_per_metric: usize,
    /// Buffer size for the alert broadcast channel.
    #[serde(default = "default_alert_buffer")]
    pub alert_buffer: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            max_points_per_metric: default_max_points(),
            alert_buffer: default_alert_buffer(),
        }
    }
}

impl MonitorConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl GovConfig {
    /// Load configuration from a TOML file, applying defaults for any
    /// missing section or field.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {:?}", path))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate threshold sanity.
    pub fn validate(&self) -> Result<()> {
        for (name, rate) in [
            ("safety.max_error_rate", self.safety.max_error_rate),
            ("safety.max_blocked_rate", self.safety.max_blocked_rate),
            ("health.critical_error_rate", self.health.critical_error_rate),
            (
                "health.critical_blocked_rate",
                self.health.critical_blocked_rate,
            ),
            ("health.warning_error_rate", self.health.warning_error_rate),
            ("health.min_success_rate", self.health.min_success_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                bail!("{} must be within 0.0..=1.0, got {}", name, rate);
            }
        }
        if self.safety.max_perf_degradation < 1.0 {
            bail!(
                "safety.max_perf_degradation must be >= 1.0, got {}",
                self.safety.max_perf_degradation
            );
        }
        if self.locks.acquire_timeout_ms == 0 {
            bail!("locks.acquire_timeout_ms must be non-zero");
        }
        if self.monitor.max_points_per_metric == 0 {
            bail!("monitor.max_points_per_metric must be non-zero");
        }
        Ok(())
    }
}

fn default_max_error_rate() -> f64 {
    0.05
}

fn default_max_blocked_rate() -> f64 {
    0.10
}

fn default_max_perf_degradation() -> f64 {
    1.5
}

fn default_baseline_duration_ms() -> f64 {
    100.0
}

fn default_critical_error_rate() -> f64 {
    0.10
}

fn default_critical_blocked_rate() -> f64 {
    0.15
}

fn default_warning_error_rate() -> f64 {
    0.05
}

fn default_min_success_rate() -> f64 {
    0.90
}

fn default_sample_interval_secs() -> u64 {
    30
}

fn default_idempotency_ttl_secs() -> u64 {
    86_400
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_retention_secs() -> u64 {
    3_600
}

fn default_max_points() -> usize {
    10_000
}

fn default_alert_buffer() -> usize {
    256
}
