//! Metrics Gateway
//!
//! Pulls time-series samples from one or more monitoring backends and
//! normalizes them into the single metric schema the detector consumes.
//! Collection is best-effort: a degraded backend is logged and skipped,
//! and the gateway only errors when every backend is unreachable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};
use crate::providers::MetricsProvider;
use crate::resilience::{retry, RetryPolicy};
use crate::types::{MetricSample, TimeRange};

pub struct MetricsGateway {
    providers: Vec<Arc<dyn MetricsProvider>>,
    retry_policy: RetryPolicy,
}

impl MetricsGateway {
    pub fn new(providers: Vec<Arc<dyn MetricsProvider>>) -> Self {
        Self {
            providers,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Query every backend for the requested metrics, merge and
    /// normalize the results, sorted by timestamp.
    ///
    /// Backends that fail after retries are skipped with a warning.
    /// Only when all of them are unreachable does the call return
    /// [`Error::MetricsUnavailable`], which downstream detection treats
    /// as "no data this cycle", not as a failure.
    pub async fn collect(
        &self,
        namespace: &str,
        metric_names: &[String],
        dimensions: &HashMap<String, String>,
        range: TimeRange,
    ) -> Result<Vec<MetricSample>> {
        let mut merged = Vec::new();
        let mut failures = 0usize;

        for provider in &self.providers {
            let result = retry(&self.retry_policy, "metrics_query", || {
                provider.query(namespace, metric_names, dimensions, range)
            })
            .await;

            match result {
                Ok(samples) => {
                    let source = provider.source().to_string();
                    merged.extend(
                        samples
                            .into_iter()
                            .map(|s| normalize(s, &source)),
                    );
                }
                Err(err) => {
                    failures += 1;
                    warn!(
                        source = provider.source(),
                        error = %err,
                        "metrics backend degraded, skipping this cycle"
                    );
                }
            }
        }

        if !self.providers.is_empty() && failures == self.providers.len() {
            return Err(Error::MetricsUnavailable(format!(
                "all {} metrics backends unreachable",
                failures
            )));
        }

        merged.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(merged)
    }

    /// Most recent sample of a single metric within `lookback`, used by
    /// the executor's plan-level post-check.
    pub async fn latest(
        &self,
        namespace: &str,
        metric: &str,
        dimensions: &HashMap<String, String>,
        lookback: Duration,
    ) -> Result<Option<MetricSample>> {
        let range = TimeRange::ending_at(chrono::Utc::now(), lookback);
        let samples = self
            .collect(namespace, &[metric.to_string()], dimensions, range)
            .await?;
        Ok(samples
            .into_iter()
            .filter(|s| s.name == metric)
            .max_by_key(|s| s.timestamp))
    }
}

/// Fold backend-specific spellings into one schema. The backend that
/// produced the sample always wins over whatever `source` it claimed.
fn normalize(mut sample: MetricSample, source: &str) -> MetricSample {
    sample.source = source.to_string();
    sample.unit = canonical_unit(&sample.unit);
    sample
}

fn canonical_unit(unit: &str) -> String {
    match unit.trim().to_ascii_lowercase().as_str() {
        "" | "count" | "1" => "count".to_string(),
        "%" | "percent" | "pct" => "percent".to_string(),
        "ms" | "msec" | "millisecond" | "milliseconds" => "milliseconds".to_string(),
        "s" | "sec" | "second" | "seconds" => "seconds".to_string(),
        "b" | "byte" | "bytes" => "bytes".to_string(),
        "/s" | "per_second" | "persec" | "rate" => "per_second".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;

    struct StaticProvider {
        name: &'static str,
        samples: Vec<MetricSample>,
    }

    #[async_trait]
    impl MetricsProvider for StaticProvider {
        fn source(&self) -> &str {
            self.name
        }

        async fn query(
            &self,
            _namespace: &str,
            _metric_names: &[String],
            _dimensions: &HashMap<String, String>,
            range: TimeRange,
        ) -> Result<Vec<MetricSample>> {
            Ok(self
                .samples
                .iter()
                .filter(|s| range.contains(s.timestamp))
                .cloned()
                .collect())
        }
    }

    struct DownProvider;

    #[async_trait]
    impl MetricsProvider for DownProvider {
        fn source(&self) -> &str {
            "down"
        }

        async fn query(
            &self,
            _namespace: &str,
            _metric_names: &[String],
            _dimensions: &HashMap<String, String>,
            _range: TimeRange,
        ) -> Result<Vec<MetricSample>> {
            Err(Error::Transient("connection refused".into()))
        }
    }

    fn sample(name: &str, value: f64, unit: &str, age_secs: i64) -> MetricSample {
        MetricSample {
            source: "raw".into(),
            namespace: "prod".into(),
            name: name.into(),
            value,
            unit: unit.into(),
            dimensions: HashMap::new(),
            timestamp: Utc::now() - chrono::Duration::seconds(age_secs),
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            jitter_factor: 0.0,
        }
    }

    #[tokio::test]
    async fn collect_normalizes_units_and_source() {
        let provider = StaticProvider {
            name: "prometheus",
            samples: vec![sample("latency", 120.0, "ms", 10)],
        };
        let gateway = MetricsGateway::new(vec![Arc::new(provider)]);

        let range = TimeRange::ending_at(Utc::now(), Duration::from_secs(60));
        let samples = gateway
            .collect("prod", &["latency".into()], &HashMap::new(), range)
            .await
            .unwrap();

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].source, "prometheus");
        assert_eq!(samples[0].unit, "milliseconds");
    }

    #[tokio::test]
    async fn one_degraded_backend_does_not_fail_collection() {
        let good = StaticProvider {
            name: "good",
            samples: vec![sample("cpu", 80.0, "%", 5)],
        };
        let gateway = MetricsGateway::new(vec![Arc::new(DownProvider), Arc::new(good)])
            .with_retry_policy(fast_retry());

        let range = TimeRange::ending_at(Utc::now(), Duration::from_secs(60));
        let samples = gateway
            .collect("prod", &["cpu".into()], &HashMap::new(), range)
            .await
            .unwrap();

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].unit, "percent");
    }

    #[tokio::test]
    async fn all_backends_down_is_metrics_unavailable() {
        let gateway = MetricsGateway::new(vec![Arc::new(DownProvider), Arc::new(DownProvider)])
            .with_retry_policy(fast_retry());

        let range = TimeRange::ending_at(Utc::now(), Duration::from_secs(60));
        let err = gateway
            .collect("prod", &["cpu".into()], &HashMap::new(), range)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MetricsUnavailable(_)));
    }

    #[tokio::test]
    async fn latest_picks_newest_sample() {
        let provider = StaticProvider {
            name: "prometheus",
            samples: vec![
                sample("error_rate", 4.0, "percent", 90),
                sample("error_rate", 2.0, "percent", 5),
            ],
        };
        let gateway = MetricsGateway::new(vec![Arc::new(provider)]);

        let latest = gateway
            .latest("prod", "error_rate", &HashMap::new(), Duration::from_secs(300))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.value, 2.0);
    }
}
