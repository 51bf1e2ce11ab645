//! Rolling statistical baselines
//!
//! Keeps a trailing window of observations per `(namespace, metric)`
//! stream and exposes mean/stddev so the detector can flag three-sigma
//! deviations that static thresholds miss. The window is pruned on
//! ingest, so memory stays bounded by the observation rate.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::types::MetricSample;

#[derive(Debug, Clone, Copy)]
pub struct BaselineStats {
    pub mean: f64,
    pub stddev: f64,
    pub samples: usize,
}

impl BaselineStats {
    /// Standard score of `value` against this baseline. `None` when the
    /// stream is flat (stddev ~ 0), where a z-score is meaningless.
    pub fn z_score(&self, value: f64) -> Option<f64> {
        if self.stddev < f64::EPSILON {
            return None;
        }
        Some((value - self.mean).abs() / self.stddev)
    }
}

pub struct RollingBaseline {
    window: Duration,
    series: RwLock<HashMap<(String, String), VecDeque<(DateTime<Utc>, f64)>>>,
}

impl RollingBaseline {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            series: RwLock::new(HashMap::new()),
        }
    }

    /// Ingest one sample and drop observations older than the trailing
    /// window.
    pub fn observe(&self, sample: &MetricSample) {
        let key = (sample.namespace.clone(), sample.name.clone());
        let cutoff = sample.timestamp
            - chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::zero());

        let mut series = self.series.write();
        let points = series.entry(key).or_default();
        points.push_back((sample.timestamp, sample.value));
        while points
            .front()
            .is_some_and(|(t, _)| *t < cutoff)
        {
            points.pop_front();
        }
    }

    /// Mean and sample standard deviation of the stream, if any
    /// observations exist.
    pub fn stats(&self, namespace: &str, name: &str) -> Option<BaselineStats> {
        let series = self.series.read();
        let points = series.get(&(namespace.to_string(), name.to_string()))?;
        if points.is_empty() {
            return None;
        }

        let n = points.len() as f64;
        let mean = points.iter().map(|(_, v)| v).sum::<f64>() / n;
        let stddev = if points.len() < 2 {
            0.0
        } else {
            let variance =
                points.iter().map(|(_, v)| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            variance.sqrt()
        };

        Some(BaselineStats {
            mean,
            stddev,
            samples: points.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn sample(name: &str, value: f64, age_secs: i64) -> MetricSample {
        MetricSample {
            source: "test".into(),
            namespace: "prod".into(),
            name: name.into(),
            value,
            unit: "count".into(),
            dimensions: Map::new(),
            timestamp: Utc::now() - chrono::Duration::seconds(age_secs),
        }
    }

    #[test]
    fn stats_track_mean_and_spread() {
        let baseline = RollingBaseline::new(Duration::from_secs(3600));
        for v in [95.0, 105.0, 95.0, 105.0, 95.0, 105.0] {
            baseline.observe(&sample("latency", v, 10));
        }

        let stats = baseline.stats("prod", "latency").unwrap();
        assert!((stats.mean - 100.0).abs() < 1e-9);
        assert!(stats.stddev > 4.0 && stats.stddev < 6.0);
        assert_eq!(stats.samples, 6);
    }

    #[test]
    fn old_points_fall_out_of_the_window() {
        let baseline = RollingBaseline::new(Duration::from_secs(60));
        baseline.observe(&sample("latency", 1000.0, 300));
        baseline.observe(&sample("latency", 100.0, 5));

        let stats = baseline.stats("prod", "latency").unwrap();
        assert_eq!(stats.samples, 1);
        assert!((stats.mean - 100.0).abs() < 1e-9);
    }

    #[test]
    fn flat_stream_has_no_z_score() {
        let stats = BaselineStats {
            mean: 50.0,
            stddev: 0.0,
            samples: 100,
        };
        assert!(stats.z_score(80.0).is_none());
    }

    #[test]
    fn z_score_measures_deviation() {
        let stats = BaselineStats {
            mean: 100.0,
            stddev: 5.0,
            samples: 100,
        };
        assert!((stats.z_score(130.0).unwrap() - 6.0).abs() < 1e-9);
        assert!(stats.z_score(101.0).unwrap() < 1.0);
    }
}
