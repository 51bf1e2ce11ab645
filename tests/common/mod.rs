//! Shared test doubles for the integration suite

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use fleetmender::config::OrchestratorConfig;
use fleetmender::detection::{DetectionConfig, StreamRule};
use fleetmender::error::{Error, Result};
use fleetmender::providers::{
    MetricsProvider, NotificationChannel, OperationId, OperationStatus, RuntimePlatform,
};
use fleetmender::types::{IncidentType, MetricSample, Severity, TimeRange};

/// Reports one `error_rate` stream for the `checkout` service with a
/// value the test can change at any point.
pub struct ScriptedMetrics {
    pub value: Arc<Mutex<f64>>,
}

impl ScriptedMetrics {
    pub fn new(initial: f64) -> (Arc<Self>, Arc<Mutex<f64>>) {
        let value = Arc::new(Mutex::new(initial));
        (
            Arc::new(Self {
                value: value.clone(),
            }),
            value,
        )
    }
}

#[async_trait]
impl MetricsProvider for ScriptedMetrics {
    fn source(&self) -> &str {
        "scripted"
    }

    async fn query(
        &self,
        namespace: &str,
        metric_names: &[String],
        _dimensions: &HashMap<String, String>,
        range: TimeRange,
    ) -> Result<Vec<MetricSample>> {
        let value = *self.value.lock();
        Ok(metric_names
            .iter()
            .map(|name| MetricSample {
                source: "scripted".into(),
                namespace: namespace.into(),
                name: name.clone(),
                value,
                unit: "percent".into(),
                dimensions: HashMap::from([("service".to_string(), "checkout".to_string())]),
                timestamp: range.end - chrono::Duration::seconds(1),
            })
            .collect())
    }
}

/// A backend that is always unreachable.
pub struct UnreachableMetrics;

#[async_trait]
impl MetricsProvider for UnreachableMetrics {
    fn source(&self) -> &str {
        "unreachable"
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

/// Records desired state; every operation completes immediately.
#[derive(Default)]
pub struct FakePlatform {
    pub replicas: Mutex<HashMap<String, u32>>,
    pub running: Mutex<Vec<String>>,
    pub routes: Mutex<HashMap<String, String>>,
    ops: Mutex<HashMap<Uuid, OperationStatus>>,
}

impl FakePlatform {
    fn begin(&self) -> OperationId {
        let op = OperationId::new();
        self.ops.lock().insert(op.0, OperationStatus::Succeeded);
        op
    }
}

#[async_trait]
impl RuntimePlatform for FakePlatform {
    async fn ensure_service_running(&self, service: &str) -> Result<OperationId> {
        self.running.lock().push(service.to_string());
        Ok(self.begin())
    }

    async fn scale_service(&self, service: &str, desired: u32) -> Result<OperationId> {
        self.replicas.lock().insert(service.to_string(), desired);
        Ok(self.begin())
    }

    async fn update_traffic_routing(&self, service: &str, target: &str) -> Result<OperationId> {
        self.routes
            .lock()
            .insert(service.to_string(), target.to_string());
        Ok(self.begin())
    }

    async fn restore_from_backup(&self, _resource: &str) -> Result<OperationId> {
        Ok(self.begin())
    }

    async fn get_status(&self, op: OperationId) -> Result<OperationStatus> {
        Ok(self
            .ops
            .lock()
            .get(&op.0)
            .cloned()
            .unwrap_or(OperationStatus::Failed("unknown operation".into())))
    }
}

/// Captures routed alerts for assertions.
#[derive(Default)]
pub struct CapturingChannel {
    pub seen: Mutex<Vec<(Severity, String, HashMap<String, String>)>>,
}

impl CapturingChannel {
    pub fn plan_id(&self) -> Option<Uuid> {
        self.seen
            .lock()
            .iter()
            .find_map(|(_, _, meta)| meta.get("plan_id"))
            .and_then(|id| Uuid::parse_str(id).ok())
    }
}

#[async_trait]
impl NotificationChannel for CapturingChannel {
    fn name(&self) -> &str {
        "capture"
    }

    async fn send(
        &self,
        _target: &str,
        severity: Severity,
        title: &str,
        _body: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        self.seen
            .lock()
            .push((severity, title.to_string(), metadata.clone()));
        Ok(())
    }
}

/// Orchestrator config watching `error_rate` on `checkout`.
pub fn error_rate_config() -> OrchestratorConfig {
    OrchestratorConfig {
        detection: DetectionConfig {
            rules: vec![StreamRule {
                namespace: "prod".into(),
                metric: "error_rate".into(),
                service: Some("checkout".into()),
                incident_type: IncidentType::HighErrorRate,
                warning: Some(5.0),
                critical: Some(10.0),
                baseline: true,
            }],
            ..DetectionConfig::default()
        },
        ..OrchestratorConfig::default()
    }
}

/// Timestamp helper for readable test setup.
pub fn minutes_ago(minutes: i64) -> chrono::DateTime<Utc> {
    Utc::now() - chrono::Duration::minutes(minutes)
}
