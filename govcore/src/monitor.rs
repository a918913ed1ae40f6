//! Metric recording, rolling-window aggregation, and alert rules.
//!
//! Each metric name owns a bounded, time-ordered window; points older than
//! the retention horizon (or past the per-metric cap) are evicted on
//! write. Alert rules support instant thresholds and trailing-window
//! rates, with a per-rule cooldown to prevent alert storms. Alert
//! delivery rides a broadcast channel and never blocks recording.

use govcore_common::MonitorConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};

/// One recorded metric point.
#[derive(Debug, Clone)]
pub struct MetricPoint {
    pub value: f64,
    pub tags: HashMap<String, String>,
    pub at: Instant,
}

/// Alert rule condition.
#[derive(Debug, Clone)]
pub enum AlertCondition {
    /// Fires when the most recent value is at or above the limit.
    Threshold { limit: f64 },
    /// Fires when the sum of values over the trailing window, divided by
    /// the window length in seconds, is at or above the limit.
    Rate { window: Duration, limit: f64 },
}

/// A named alert rule over one metric.
#[derive(Debug, Clone)]
pub struct AlertRule {
    pub name: String,
    pub metric: String,
    pub condition: AlertCondition,
    /// Firing is suppressed until this much time has passed since the
    /// rule last fired.
    pub cooldown: Duration,
}

/// A fired alert, delivered to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub rule: String,
    pub metric: String,
    pub observed: f64,
    pub limit: f64,
    pub fired_at: DateTime<Utc>,
}

struct RuleState {
    rule: AlertRule,
    last_fired: Option<Instant>,
}

/// Rolling-window metric store with rule evaluation.
pub struct MonitoringService {
    config: MonitorConfig,
    windows: RwLock<HashMap<String, VecDeque<MetricPoint>>>,
    rules: RwLock<Vec<RuleState>>,
    alerts: broadcast::Sender<Alert>,
}

impl MonitoringService {
    pub fn new(config: MonitorConfig) -> Self {
        let (alerts, _) = broadcast::channel(config.alert_buffer.max(16));
        Self {
            config,
            windows: RwLock::new(HashMap::new()),
            rules: RwLock::new(Vec::new()),
            alerts,
        }
    }

    /// Append a point to the metric's window, evicting past the retention
    /// horizon and the per-metric cap.
    pub async fn record(&self, name: &str, value: f64, tags: HashMap<String, String>) {
        let retention = self.config.retention();
        let cap = self.config.max_points_per_metric;
        let now = Instant::now();

        let mut windows = self.windows.write().await;
        let window = windows.entry(name.to_string()).or_default();
        window.push_back(MetricPoint { value, tags, at: now });
        while let Some(front) = window.front() {
            let stale = now.duration_since(front.at) > retention;
            if stale || window.len() > cap {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Most recent value for a metric, if any point is retained.
    pub async fn latest(&self, name: &str) -> Option<f64> {
        let windows = self.windows.read().await;
        windows.get(name).and_then(|w| w.back()).map(|p| p.value)
    }

    /// Sum of values recorded at or after `since`.
    pub async fn sum_since(&self, name: &str, since: Instant) -> f64 {
        let windows = self.windows.read().await;
        windows
            .get(name)
            .map(|w| {
                w.iter()
                    .filter(|p| p.at >= since)
                    .map(|p| p.value)
                    .sum()
            })
            .unwrap_or(0.0)
    }

    /// Number of points recorded at or after `since`.
    pub async fn count_since(&self, name: &str, since: Instant) -> usize {
        let windows = self.windows.read().await;
        windows
            .get(name)
            .map(|w| w.iter().filter(|p| p.at >= since).count())
            .unwrap_or(0)
    }

    /// Mean of values recorded at or after `since`, when any exist.
    pub async fn mean_since(&self, name: &str, since: Instant) -> Option<f64> {
        let count = self.count_since(name, since).await;
        if count == 0 {
            return None;
        }
        Some(self.sum_since(name, since).await / count as f64)
    }

    /// Drop all windows whose metric name starts with `prefix`.
    pub async fn clear_prefix(&self, prefix: &str) {
        let mut windows = self.windows.write().await;
        windows.retain(|name, _| !name.starts_with(prefix));
    }

    /// Register an alert rule.
    pub async fn add_rule(&self, rule: AlertRule) {
        self.rules.write().await.push(RuleState {
            rule,
            last_fired: None,
        });
    }

    /// Subscribe to fired alerts.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.alerts.subscribe()
    }

    /// Evaluate all rules, firing those whose condition holds and whose
    /// cooldown has elapsed. Returns the alerts fired this pass.
    pub async fn evaluate_rules(&self) -> Vec<Alert> {
        let now = Instant::now();
        let mut fired = Vec::new();

        let mut rules = self.rules.write().await;
        for state in rules.iter_mut() {
            if let Some(last) = state.last_fired {
                if now.duration_since(last) < state.rule.cooldown {
                    continue;
                }
            }

            let (observed, limit) = match &state.rule.condition {
                AlertCondition::Threshold { limit } => {
                    match self.latest(&state.rule.metric).await {
                        Some(value) => (value, *limit),
                        None => continue,
                    }
                }
                AlertCondition::Rate { window, limit } => {
                    let since = now.checked_sub(*window).unwrap_or(now);
                    let sum = self.sum_since(&state.rule.metric, since).await;
                    let secs = window.as_secs_f64().max(f64::EPSILON);
                    (sum / secs, *limit)
                }
            };

            if observed >= limit {
                let alert = Alert {
                    rule: state.rule.name.clone(),
                    metric: state.rule.metric.clone(),
                    observed,
                    limit,
                    fired_at: Utc::now(),
                };
                warn!(
                    "alert '{}' fired: {} = {:.4} >= {:.4}",
                    alert.rule, alert.metric, observed, limit
                );
                state.last_fired = Some(now);
                // Delivery must never block or fail recording.
                let _ = self.alerts.send(alert.clone());
                fired.push(alert);
            } else {
                debug!(
                    "rule '{}' quiet: {} = {:.4} < {:.4}",
                    state.rule.name, state.rule.metric, observed, limit
                );
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> MonitoringService {
        MonitoringService::new(MonitorConfig::default())
    }

    fn no_tags() -> HashMap<String, String> {
        HashMap::new()
    }

    #[tokio::test]
    async fn record_and_latest() {
        let monitor = service();
        monitor.record("orders.total", 1.0, no_tags()).await;
        monitor.record("orders.total", 3.0, no_tags()).await;
        assert_eq!(monitor.latest("orders.total").await, Some(3.0));
        assert_eq!(monitor.latest("missing").await, None);
    }

    #[tokio::test]
    async fn window_caps_point_count() {
        let monitor = MonitoringService::new(MonitorConfig {
            max_points_per_metric: 3,
            ..Default::default()
        });
        for i in 0..10 {
            monitor.record("m", i as f64, no_tags()).await;
        }
        let windows = monitor.windows.read().await;
        assert_eq!(windows.get("m").unwrap().len(), 3);
        assert_eq!(windows.get("m").unwrap().back().unwrap().value, 9.0);
    }

    #[tokio::test]
    async fn sum_and_count_since() {
        let monitor = service();
        let before = Instant::now();
        monitor.record("m", 2.0, no_tags()).await;
        monitor.record("m", 5.0, no_tags()).await;
        assert_eq!(monitor.sum_since("m", before).await, 7.0);
        assert_eq!(monitor.count_since("m", before).await, 2);
        assert_eq!(monitor.mean_since("m", before).await, Some(3.5));
        assert_eq!(monitor.mean_since("empty", before).await, None);
    }

    #[tokio::test]
    async fn clear_prefix_drops_matching_windows() {
        let monitor = service();
        monitor.record("rollout.wf.total", 1.0, no_tags()).await;
        monitor.record("rollout.wf.errors", 1.0, no_tags()).await;
        monitor.record("orders.total", 1.0, no_tags()).await;

        monitor.clear_prefix("rollout.wf.").await;
        assert_eq!(monitor.latest("rollout.wf.total").await, None);
        assert_eq!(monitor.latest("orders.total").await, Some(1.0));
    }

    #[tokio::test]
    async fn threshold_rule_fires_at_limit() {
        let monitor = service();
        monitor
            .add_rule(AlertRule {
                name: "queue_depth_high".to_string(),
                metric: "queue.depth".to_string(),
                condition: AlertCondition::Threshold { limit: 10.0 },
                cooldown: Duration::from_secs(60),
            })
            .await;

        monitor.record("queue.depth", 9.0, no_tags()).await;
        assert!(monitor.evaluate_rules().await.is_empty());

        monitor.record("queue.depth", 10.0, no_tags()).await;
        let fired = monitor.evaluate_rules().await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].rule, "queue_depth_high");
        assert_eq!(fired[0].observed, 10.0);
    }

    #[tokio::test]
    async fn cooldown_suppresses_refiring() {
        let monitor = service();
        monitor
            .add_rule(AlertRule {
                name: "hot".to_string(),
                metric: "m".to_string(),
                condition: AlertCondition::Threshold { limit: 1.0 },
                cooldown: Duration::from_secs(3600),
            })
            .await;

        monitor.record("m", 5.0, no_tags()).await;
        assert_eq!(monitor.evaluate_rules().await.len(), 1);
        // Condition still holds, but cooldown suppresses the storm.
        assert!(monitor.evaluate_rules().await.is_empty());
    }

    #[tokio::test]
    async fn rate_rule_uses_trailing_window() {
        let monitor = service();
        monitor
            .add_rule(AlertRule {
                name: "error_rate".to_string(),
                metric: "errors".to_string(),
                condition: AlertCondition::Rate {
                    window: Duration::from_secs(10),
                    limit: 0.5,
                },
                cooldown: Duration::from_secs(60),
            })
            .await;

        // 6 errors over a 10s window = 0.6/s >= 0.5/s.
        for _ in 0..6 {
            monitor.record("errors", 1.0, no_tags()).await;
        }
        let fired = monitor.evaluate_rules().await;
        assert_eq!(fired.len(), 1);
        assert!(fired[0].observed >= 0.5);
    }

    #[tokio::test]
    async fn alerts_reach_subscribers_without_blocking() {
        let monitor = service();
        let mut rx = monitor.subscribe_alerts();
        monitor
            .add_rule(AlertRule {
                name: "a".to_string(),
                metric: "m".to_string(),
                condition: AlertCondition::Threshold { limit: 0.0 },
                cooldown: Duration::from_secs(60),
            })
            .await;
        monitor.record("m", 1.0, no_tags()).await;
        monitor.evaluate_rules().await;

        let alert = tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .expect("timed out")
            .expect("recv failed");
        assert_eq!(alert.rule, "a");
    }

    #[tokio::test]
    async fn rule_with_no_data_stays_quiet() {
        let monitor = service();
        monitor
            .add_rule(AlertRule {
                name: "a".to_string(),
                metric: "never_recorded".to_string(),
                condition: AlertCondition::Threshold { limit: 1.0 },
                cooldown: Duration::from_secs(60),
            })
            .await;
        assert!(monitor.evaluate_rules().await.is_empty());
    }
}
