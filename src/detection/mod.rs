//! Anomaly Detector
//!
//! Evaluates normalized metric samples against static thresholds and
//! rolling statistical baselines and emits `Incident` records. Two
//! rules firing for the same underlying cause are coalesced: at most
//! one incident per `(service, incident type)` pair inside the
//! configured window. Detection is best-effort per cycle: if the
//! metrics gateway is unreachable the detector logs a degraded-mode
//! warning and returns nothing, healing on the next cycle.

pub mod baseline;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::metrics::MetricsGateway;
use crate::types::{
    Incident, IncidentStatus, IncidentType, MetricSample, Severity, TimeRange,
};
use baseline::RollingBaseline;

/// One monitored metric stream: which incidents it maps to and which
/// rules apply. `warning`/`critical` enable the static threshold rule;
/// `baseline` enables the three-sigma rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRule {
    pub namespace: String,
    pub metric: String,
    /// Service the stream belongs to when samples are not tagged with a
    /// `service` dimension.
    pub service: Option<String>,
    pub incident_type: IncidentType,
    pub warning: Option<f64>,
    pub critical: Option<f64>,
    #[serde(default = "default_true")]
    pub baseline: bool,
}

fn default_true() -> bool {
    true
}

impl StreamRule {
    fn matches(&self, sample: &MetricSample) -> bool {
        self.namespace == sample.namespace && self.metric == sample.name
    }

    fn service_for(&self, sample: &MetricSample) -> String {
        sample
            .service()
            .map(str::to_string)
            .or_else(|| self.service.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub rules: Vec<StreamRule>,
    /// No duplicate incident per `(service, type)` inside this window.
    #[serde(with = "humantime_serde")]
    pub coalesce_window: Duration,
    /// Trailing window the statistical baseline covers.
    #[serde(with = "humantime_serde")]
    pub baseline_window: Duration,
    /// Deviations beyond this many standard deviations are anomalous.
    pub sigma_threshold: f64,
    /// Baseline stays silent until a stream has this many observations.
    pub min_baseline_samples: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            coalesce_window: Duration::from_secs(300),
            baseline_window: Duration::from_secs(14 * 24 * 3600),
            sigma_threshold: 3.0,
            min_baseline_samples: 20,
        }
    }
}

/// Re-check of the metric that triggered an incident, consumed by the
/// executor's plan-level post-check.
#[derive(Debug, Clone)]
pub struct PostCheck {
    pub namespace: String,
    pub metric: String,
    pub dimensions: HashMap<String, String>,
    pub threshold: f64,
    /// Healthy when the value is at or below the threshold; an anomaly
    /// below the baseline flips this.
    pub healthy_below: bool,
}

impl PostCheck {
    pub fn is_healthy(&self, value: f64) -> bool {
        if self.healthy_below {
            value <= self.threshold
        } else {
            value >= self.threshold
        }
    }
}

pub struct AnomalyDetector {
    config: DetectionConfig,
    baseline: RollingBaseline,
    /// Last emission per `(service, type)`, for cross-cycle coalescing.
    recent: Mutex<HashMap<(String, IncidentType), DateTime<Utc>>>,
}

impl AnomalyDetector {
    pub fn new(config: DetectionConfig) -> Self {
        let baseline = RollingBaseline::new(config.baseline_window);
        Self {
            config,
            baseline,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Pull the configured streams for `window` through the gateway and
    /// evaluate them. Gateway unreachable means an empty result, never
    /// an error.
    pub async fn detect_window(
        &self,
        gateway: &MetricsGateway,
        window: TimeRange,
    ) -> Vec<Incident> {
        let mut by_namespace: HashMap<&str, Vec<String>> = HashMap::new();
        for rule in &self.config.rules {
            by_namespace
                .entry(rule.namespace.as_str())
                .or_default()
                .push(rule.metric.clone());
        }

        let mut samples = Vec::new();
        for (namespace, metrics) in by_namespace {
            match gateway
                .collect(namespace, &metrics, &HashMap::new(), window)
                .await
            {
                Ok(batch) => samples.extend(batch),
                Err(err) => {
                    warn!(
                        namespace,
                        error = %err,
                        "metrics gateway unreachable, detection degraded this cycle"
                    );
                    return Vec::new();
                }
            }
        }

        self.detect(&samples, window.end)
    }

    /// Evaluate a batch of samples. Pure over the samples plus stored
    /// rule/baseline state; the only side effects are baseline ingest
    /// and the coalescing memory.
    pub fn detect(&self, samples: &[MetricSample], now: DateTime<Utc>) -> Vec<Incident> {
        let mut incidents = Vec::new();

        for sample in samples {
            let Some(rule) = self.config.rules.iter().find(|r| r.matches(sample)) else {
                continue;
            };

            // Evaluate against history first so the anomalous value
            // cannot absorb itself into the baseline.
            let stats = self.baseline.stats(&sample.namespace, &sample.name);
            self.baseline.observe(sample);

            let candidate = self
                .threshold_violation(rule, sample)
                .or_else(|| self.baseline_violation(rule, sample, stats));

            let Some((severity, threshold, description)) = candidate else {
                continue;
            };

            let service = rule.service_for(sample);
            if self.coalesced(&service, rule.incident_type, now) {
                debug!(
                    service = %service,
                    incident_type = %rule.incident_type,
                    "suppressing duplicate detection inside coalescing window"
                );
                continue;
            }

            incidents.push(build_incident(
                rule,
                sample,
                service,
                severity,
                threshold,
                description,
                now,
            ));
        }

        incidents
    }

    /// Post-check for the metric that triggered `incident`, when the
    /// triggering stream is known.
    pub fn post_check_for(&self, incident: &Incident) -> Option<PostCheck> {
        let (metric, value) = incident.triggering_metric()?;
        let threshold = *incident.metrics.get(Incident::THRESHOLD_KEY)?;
        let rule = self
            .config
            .rules
            .iter()
            .find(|r| r.metric == metric && r.incident_type == incident.incident_type)?;

        let mut dimensions = HashMap::new();
        dimensions.insert("service".to_string(), incident.service.clone());

        Some(PostCheck {
            namespace: rule.namespace.clone(),
            metric: metric.to_string(),
            dimensions,
            threshold,
            healthy_below: value >= threshold,
        })
    }

    fn threshold_violation(
        &self,
        rule: &StreamRule,
        sample: &MetricSample,
    ) -> Option<(Severity, f64, String)> {
        if let Some(critical) = rule.critical {
            if sample.value > critical {
                return Some((
                    Severity::Critical,
                    critical,
                    format!(
                        "{} at {:.2} exceeded critical threshold {:.2}",
                        sample.name, sample.value, critical
                    ),
                ));
            }
        }
        if let Some(warning) = rule.warning {
            if sample.value > warning {
                return Some((
                    Severity::High,
                    warning,
                    format!(
                        "{} at {:.2} exceeded warning threshold {:.2}",
                        sample.name, sample.value, warning
                    ),
                ));
            }
        }
        None
    }

    fn baseline_violation(
        &self,
        rule: &StreamRule,
        sample: &MetricSample,
        stats: Option<baseline::BaselineStats>,
    ) -> Option<(Severity, f64, String)> {
        if !rule.baseline {
            return None;
        }
        let stats = stats?;
        if stats.samples < self.config.min_baseline_samples {
            return None;
        }
        let z = stats.z_score(sample.value)?;
        if z <= self.config.sigma_threshold {
            return None;
        }

        let threshold = if sample.value >= stats.mean {
            stats.mean + self.config.sigma_threshold * stats.stddev
        } else {
            stats.mean - self.config.sigma_threshold * stats.stddev
        };
        Some((
            Severity::High,
            threshold,
            format!(
                "{} at {:.2} deviates {:.1} sigma from rolling mean {:.2}",
                sample.name, sample.value, z, stats.mean
            ),
        ))
    }

    /// True when an incident for the pair was already emitted inside
    /// the coalescing window; otherwise records this emission.
    fn coalesced(&self, service: &str, incident_type: IncidentType, now: DateTime<Utc>) -> bool {
        let window = chrono::Duration::from_std(self.config.coalesce_window)
            .unwrap_or(chrono::Duration::zero());
        let mut recent = self.recent.lock();
        recent.retain(|_, last| now.signed_duration_since(*last) < window);

        let key = (service.to_string(), incident_type);
        if let Some(last) = recent.get(&key) {
            if now.signed_duration_since(*last) < window {
                return true;
            }
        }
        recent.insert(key, now);
        false
    }
}

fn build_incident(
    rule: &StreamRule,
    sample: &MetricSample,
    service: String,
    severity: Severity,
    threshold: f64,
    description: String,
    now: DateTime<Utc>,
) -> Incident {
    let mut metrics = HashMap::new();
    metrics.insert(sample.name.clone(), sample.value);
    metrics.insert(Incident::THRESHOLD_KEY.to_string(), threshold);

    let mut affected: Vec<String> = ["instance", "host", "pod", "resource"]
        .iter()
        .filter_map(|key| sample.dimensions.get(*key).cloned())
        .collect();
    if affected.is_empty() {
        affected.push(service.clone());
    }

    Incident {
        id: Uuid::new_v4(),
        timestamp: now,
        incident_type: rule.incident_type,
        severity,
        service,
        description,
        metrics,
        affected_resources: affected,
        status: IncidentStatus::Detected,
        resolved_at: None,
    }
}
