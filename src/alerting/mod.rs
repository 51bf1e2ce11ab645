//! Alert Router & Aggregator
//!
//! Routes notifications to humans and deduplicates the stream they
//! come from. Fan-out is best-effort and independent per channel: one
//! channel failing is logged and never blocks the others, and partial
//! delivery counts as success. Aggregation clusters alerts by
//! `(kind, source)` into groups that resolve once the stream goes
//! quiet for the configured window; the sweep runs once per
//! control-loop cycle, not per alert.

pub mod channels;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::providers::NotificationChannel;
use crate::storage::StateStore;
use crate::types::{Alert, AlertGroup, GroupStatus, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// A group resolves when no member alert recurs for this long.
    #[serde(with = "humantime_serde")]
    pub resolve_window: Duration,
    /// Per-title notification cap per minute.
    pub rate_limit_per_minute: u32,
    /// How long routed alerts stay in the statistics history.
    #[serde(with = "humantime_serde")]
    pub history_retention: Duration,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            resolve_window: Duration::from_secs(15 * 60),
            rate_limit_per_minute: 10,
            history_retention: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

/// Counts kept for operator triage dashboards.
#[derive(Debug, Clone, Default)]
pub struct AlertStatistics {
    pub total_recorded: usize,
    pub by_severity: HashMap<Severity, usize>,
}

pub struct AlertRouter {
    channels: Vec<Arc<dyn NotificationChannel>>,
    rate_limiter: RateLimiter,
    history: Mutex<AlertHistory>,
}

impl AlertRouter {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>, config: &AlertingConfig) -> Self {
        Self {
            channels,
            rate_limiter: RateLimiter::new(config.rate_limit_per_minute),
            history: Mutex::new(AlertHistory::new(config.history_retention)),
        }
    }

    /// Deliver `alert` to every eligible channel. Never fails: each
    /// channel attempt is isolated and individually logged.
    pub async fn route(&self, alert: &Alert) {
        if !self.rate_limiter.allow(&alert.title, alert.timestamp) {
            debug!(title = %alert.title, "rate limiting notification");
            return;
        }
        self.history.lock().record(alert);

        for channel in &self.channels {
            if alert.severity < channel.min_severity() {
                continue;
            }
            let result = channel
                .send(
                    &alert.source,
                    alert.severity,
                    &alert.title,
                    &alert.body,
                    &alert.metadata,
                )
                .await;
            match result {
                Ok(()) => debug!(channel = channel.name(), title = %alert.title, "alert delivered"),
                Err(err) => warn!(
                    channel = channel.name(),
                    title = %alert.title,
                    error = %err,
                    "alert delivery failed, continuing with remaining channels"
                ),
            }
        }
    }

    pub fn statistics(&self) -> AlertStatistics {
        self.history.lock().statistics()
    }
}

pub struct AlertAggregator {
    store: Arc<dyn StateStore>,
    resolve_window: Duration,
}

impl AlertAggregator {
    pub fn new(store: Arc<dyn StateStore>, config: &AlertingConfig) -> Self {
        Self {
            store,
            resolve_window: config.resolve_window,
        }
    }

    /// Join the alert into its `(kind, source)` group, creating one if
    /// none is active within the window.
    pub async fn record(&self, alert: &Alert) -> Result<AlertGroup> {
        let window = chrono::Duration::from_std(self.resolve_window)
            .unwrap_or(chrono::Duration::zero());

        if let Some(mut group) = self.store.active_group(&alert.kind, &alert.source).await? {
            if alert.timestamp.signed_duration_since(group.last_occurrence) < window {
                group.count += 1;
                group.last_occurrence = group.last_occurrence.max(alert.timestamp);
                group.alert_ids.push(alert.id);
                self.store.upsert_group(group.clone()).await?;
                return Ok(group);
            }
            // Stale group the sweep has not visited yet: close it out
            // before opening a fresh one.
            group.status = GroupStatus::Resolved;
            self.store.upsert_group(group).await?;
        }

        let group = AlertGroup {
            id: Uuid::new_v4(),
            kind: alert.kind.clone(),
            source: alert.source.clone(),
            count: 1,
            first_occurrence: alert.timestamp,
            last_occurrence: alert.timestamp,
            status: GroupStatus::Active,
            alert_ids: vec![alert.id],
        };
        self.store.upsert_group(group.clone()).await?;
        Ok(group)
    }

    /// Resolve groups whose members went quiet for the window and
    /// return them, so the control loop can settle their incidents.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<AlertGroup>> {
        let window = chrono::Duration::from_std(self.resolve_window)
            .unwrap_or(chrono::Duration::zero());
        let mut resolved = Vec::new();

        for mut group in self.store.groups(Some(GroupStatus::Active)).await? {
            if now.signed_duration_since(group.last_occurrence) >= window {
                group.status = GroupStatus::Resolved;
                self.store.upsert_group(group.clone()).await?;
                info!(
                    kind = %group.kind,
                    source = %group.source,
                    count = group.count,
                    "alert group resolved after quiet window"
                );
                resolved.push(group);
            }
        }
        Ok(resolved)
    }
}

/// Per-title per-minute send cap.
struct RateLimiter {
    limit: u32,
    buckets: Mutex<HashMap<String, (i64, u32)>>,
}

impl RateLimiter {
    fn new(limit: u32) -> Self {
        Self {
            limit,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn allow(&self, title: &str, at: DateTime<Utc>) -> bool {
        let minute = at.timestamp() / 60;
        let mut buckets = self.buckets.lock();
        let entry = buckets.entry(title.to_string()).or_insert((minute, 0));
        if entry.0 != minute {
            *entry = (minute, 0);
        }
        if entry.1 >= self.limit {
            return false;
        }
        entry.1 += 1;
        true
    }
}

struct AlertHistory {
    retention: Duration,
    entries: VecDeque<(DateTime<Utc>, Severity)>,
}

impl AlertHistory {
    fn new(retention: Duration) -> Self {
        Self {
            retention,
            entries: VecDeque::new(),
        }
    }

    fn record(&mut self, alert: &Alert) {
        self.entries.push_back((alert.timestamp, alert.severity));
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::zero());
        while self.entries.front().is_some_and(|(t, _)| *t < cutoff) {
            self.entries.pop_front();
        }
    }

    fn statistics(&self) -> AlertStatistics {
        let mut by_severity: HashMap<Severity, usize> = HashMap::new();
        for (_, severity) in &self.entries {
            *by_severity.entry(*severity).or_insert(0) += 1;
        }
        AlertStatistics {
            total_recorded: self.entries.len(),
            by_severity,
        }
    }
}
