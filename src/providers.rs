//! Capability interfaces consumed by the orchestrator
//!
//! The orchestrator never talks to a cloud SDK directly. Monitoring
//! backends, the compute platform and notification transports are
//! injected behind these traits at construction time, so the core
//! pipeline is testable without live infrastructure and no hidden
//! client singletons are shared between workers.

use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{MetricSample, Severity, TimeRange};

/// Handle for a long-running platform operation, polled via
/// [`RuntimePlatform::get_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(pub Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Progress of a platform operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Running,
    Succeeded,
    Failed(String),
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Succeeded | OperationStatus::Failed(_))
    }
}

/// A monitoring backend the metrics gateway can pull samples from.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Backend identifier recorded into each sample's `source`.
    fn source(&self) -> &str;

    async fn query(
        &self,
        namespace: &str,
        metric_names: &[String],
        dimensions: &HashMap<String, String>,
        range: TimeRange,
    ) -> Result<Vec<MetricSample>>;
}

/// The compute/runtime platform remediation steps act against.
///
/// Every mutation is asynchronous on the platform side: the call returns
/// an [`OperationId`] immediately and callers poll `get_status` rather
/// than blocking on completion. Operations are idempotent at the
/// resource level ("ensure replica count = N", not "add one replica").
#[async_trait]
pub trait RuntimePlatform: Send + Sync {
    async fn ensure_service_running(&self, service: &str) -> Result<OperationId>;

    async fn scale_service(&self, service: &str, desired_count: u32) -> Result<OperationId>;

    async fn update_traffic_routing(&self, service: &str, target: &str) -> Result<OperationId>;

    async fn restore_from_backup(&self, resource_ref: &str) -> Result<OperationId>;

    async fn get_status(&self, op: OperationId) -> Result<OperationStatus>;
}

/// One notification transport. The router treats all implementations
/// uniformly and isolates failures per channel.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Alerts below this severity are filtered out before dispatch.
    fn min_severity(&self) -> Severity {
        Severity::Low
    }

    async fn send(
        &self,
        target: &str,
        severity: Severity,
        title: &str,
        body: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()>;
}
