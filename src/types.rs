//! Shared data model for the incident response pipeline
//!
//! Entities here follow strict ownership rules: the control loop is the
//! sole writer of `Incident` status and `RecoveryExecution` records, the
//! alert aggregator is the sole writer of `AlertGroup`, and everything
//! else is write-once after creation. Plans are immutable; live per-step
//! state lives in `StepExecutionRecord`, never in the plan itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Half-open time interval `[start, end)` used for metric queries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Window ending at `end`, reaching `length` into the past.
    pub fn ending_at(end: DateTime<Utc>, length: Duration) -> Self {
        let length = chrono::Duration::from_std(length).unwrap_or(chrono::Duration::zero());
        Self {
            start: end - length,
            end,
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }
}

/// One normalized time-series sample. Immutable, produced only by the
/// metrics gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Which monitoring backend produced this sample.
    pub source: String,
    pub namespace: String,
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub dimensions: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    /// The service a sample belongs to, when the backend tagged one.
    pub fn service(&self) -> Option<&str> {
        self.dimensions.get("service").map(String::as_str)
    }
}

/// Operational anomaly category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    ServiceDown,
    HighErrorRate,
    ResourceExhaustion,
    DataCorruption,
    Network,
}

impl IncidentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentType::ServiceDown => "service_down",
            IncidentType::HighErrorRate => "high_error_rate",
            IncidentType::ResourceExhaustion => "resource_exhaustion",
            IncidentType::DataCorruption => "data_corruption",
            IncidentType::Network => "network",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "service_down" => Some(IncidentType::ServiceDown),
            "high_error_rate" => Some(IncidentType::HighErrorRate),
            "resource_exhaustion" => Some(IncidentType::ResourceExhaustion),
            "data_corruption" => Some(IncidentType::DataCorruption),
            "network" => Some(IncidentType::Network),
            _ => None,
        }
    }
}

impl fmt::Display for IncidentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity scale shared by incidents, classifications and alerts.
///
/// Ordered so channel severity floors and escalation comparisons can use
/// `<`/`>=` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Triage weight used in priority arithmetic.
    pub fn weight(&self) -> u32 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }

    /// One level up, capped at critical.
    pub fn escalate(&self) -> Severity {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Incident lifecycle. Only the control loop moves an incident through
/// these states; `Resolved` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Detected,
    Investigating,
    Mitigating,
    Resolved,
}

/// A detected operational anomaly requiring evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub service: String,
    pub description: String,
    /// Observations that triggered detection, including the triggering
    /// metric value under its own name and the breached level under
    /// [`Incident::THRESHOLD_KEY`].
    pub metrics: HashMap<String, f64>,
    pub affected_resources: Vec<String>,
    pub status: IncidentStatus,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Incident {
    /// Key under which the detector records the breached threshold in
    /// [`Incident::metrics`].
    pub const THRESHOLD_KEY: &'static str = "threshold";

    /// Name and value of the metric that triggered detection.
    pub fn triggering_metric(&self) -> Option<(&str, f64)> {
        self.metrics
            .iter()
            .find(|(name, _)| name.as_str() != Self::THRESHOLD_KEY)
            .map(|(name, value)| (name.as_str(), *value))
    }
}

/// Enriched metadata attached to an incident by the classifier.
/// Write-once; re-classification creates a new record for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub category: String,
    pub root_cause: String,
    pub impact_level: Severity,
    pub required_actions: Vec<String>,
    /// Human triage ordering only; execution order is always plan-step
    /// order.
    pub priority: u32,
    #[serde(with = "humantime_serde")]
    pub estimated_resolution_time: Duration,
}

/// How a step's outcome is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    Metric,
    Log,
    Manual,
}

/// Post-step validation. `Metric` and `Log` criteria are machine-checked
/// expressions of the form `<metric> <op> <value>`; `Manual` pauses the
/// executor for operator sign-off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepValidation {
    pub kind: ValidationKind,
    pub criteria: String,
}

/// Remediation actions, phrased as desired state so re-applying one is a
/// no-op at the resource level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StepAction {
    /// Probe the service through the platform's health path.
    HealthCheck,
    /// Ensure the service process is up, restarting it if needed.
    EnsureRunning,
    /// Ensure the service runs exactly `desired` replicas.
    EnsureReplicas { desired: u32 },
    /// Ensure traffic is routed at `target`.
    EnsureTrafficTarget { target: String },
    /// Restore the referenced resource from its latest verified backup.
    RestoreBackup { resource: String },
    /// Operator-executed work; the executor waits for sign-off.
    Manual { instructions: String },
}

impl StepAction {
    pub fn name(&self) -> &'static str {
        match self {
            StepAction::HealthCheck => "health_check",
            StepAction::EnsureRunning => "service_restart",
            StepAction::EnsureReplicas { .. } => "scale_out",
            StepAction::EnsureTrafficTarget { .. } => "traffic_shift",
            StepAction::RestoreBackup { .. } => "restore_backup",
            StepAction::Manual { .. } => "manual",
        }
    }
}

/// Compensating action attached to a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackProcedure {
    pub action: StepAction,
    pub description: String,
}

/// One ordered step of a recovery plan. Immutable once planned; live
/// status is tracked in the execution's [`StepExecutionRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStep {
    pub order: u32,
    pub action: StepAction,
    pub description: String,
    #[serde(with = "humantime_serde")]
    pub estimated_duration: Duration,
    pub required_resources: Vec<String>,
    pub rollback: Option<RollbackProcedure>,
    pub validation: StepValidation,
    /// Destructive steps may not run before plan approval is recorded.
    pub destructive: bool,
}

impl RecoveryStep {
    /// Implicit execution deadline: twice the planner's estimate.
    pub fn timeout(&self) -> Duration {
        self.estimated_duration * 2
    }
}

/// An ordered, idempotent remediation procedure for a classified
/// incident. Immutable once created; a failed execution produces a new
/// plan rather than mutating this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryPlan {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub steps: Vec<RecoveryStep>,
    /// SLA signal only; timeouts are per-step.
    #[serde(with = "humantime_serde")]
    pub estimated_total_duration: Duration,
    pub required_approvals: Vec<String>,
    pub risks: Vec<String>,
}

impl RecoveryPlan {
    pub fn requires_approval(&self) -> bool {
        !self.required_approvals.is_empty()
    }
}

/// Per-step state within one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Audit record for one step of one execution. Mutated only by the
/// recovery executor, strictly in `order` sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecutionRecord {
    pub order: u32,
    pub action: StepAction,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub rollback_attempted: bool,
    pub rollback_error: Option<String>,
}

impl StepExecutionRecord {
    pub fn pending(step: &RecoveryStep) -> Self {
        Self {
            order: step.order,
            action: step.action.clone(),
            status: StepStatus::Pending,
            started_at: None,
            finished_at: None,
            error: None,
            rollback_attempted: false,
            rollback_error: None,
        }
    }
}

/// Execution lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

/// One concrete run of a plan. Append-only audit entry; a plan retried
/// across invocations produces a fresh execution each time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryExecution {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub steps: Vec<StepExecutionRecord>,
    pub metrics: HashMap<String, f64>,
}

impl RecoveryExecution {
    pub fn begin(plan: &RecoveryPlan, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            plan_id: plan.id,
            start_time: now,
            end_time: None,
            status: ExecutionStatus::InProgress,
            steps: plan.steps.iter().map(StepExecutionRecord::pending).collect(),
            metrics: HashMap::new(),
        }
    }

    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    pub fn rollbacks_attempted(&self) -> usize {
        self.steps.iter().filter(|s| s.rollback_attempted).count()
    }
}

/// Notification destined for humans, emitted on state transitions of
/// interest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub incident_id: Option<Uuid>,
    /// Aggregation kind, normally the incident type.
    pub kind: String,
    /// Aggregation source, normally the service name.
    pub source: String,
    pub severity: Severity,
    pub title: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl Alert {
    pub fn for_incident(incident: &Incident, title: String, body: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            incident_id: Some(incident.id),
            kind: incident.incident_type.as_str().to_string(),
            source: incident.service.clone(),
            severity: incident.severity,
            title,
            body,
            timestamp: incident.timestamp,
            metadata: HashMap::new(),
        }
    }
}

/// Alert group lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Active,
    Resolved,
}

/// A deduplicated cluster of related alerts sharing `(kind, source)`.
/// Mutated only by the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertGroup {
    pub id: Uuid,
    pub kind: String,
    pub source: String,
    pub count: u64,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
    pub status: GroupStatus,
    pub alert_ids: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_and_escalation() {
        assert!(Severity::Low < Severity::Critical);
        assert_eq!(Severity::Low.escalate(), Severity::Medium);
        assert_eq!(Severity::High.escalate(), Severity::Critical);
        assert_eq!(Severity::Critical.escalate(), Severity::Critical);
    }

    #[test]
    fn time_range_contains_is_half_open() {
        let end = Utc::now();
        let range = TimeRange::ending_at(end, Duration::from_secs(60));
        assert!(range.contains(range.start));
        assert!(!range.contains(end));
    }

    #[test]
    fn triggering_metric_skips_threshold_key() {
        let mut metrics = HashMap::new();
        metrics.insert("error_rate".to_string(), 12.0);
        metrics.insert(Incident::THRESHOLD_KEY.to_string(), 5.0);
        let incident = Incident {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            incident_type: IncidentType::HighErrorRate,
            severity: Severity::High,
            service: "checkout".into(),
            description: String::new(),
            metrics,
            affected_resources: vec![],
            status: IncidentStatus::Detected,
            resolved_at: None,
        };
        assert_eq!(incident.triggering_metric(), Some(("error_rate", 12.0)));
    }

    #[test]
    fn step_timeout_doubles_estimate() {
        let step = RecoveryStep {
            order: 1,
            action: StepAction::HealthCheck,
            description: "probe".into(),
            estimated_duration: Duration::from_secs(30),
            required_resources: vec![],
            rollback: None,
            validation: StepValidation {
                kind: ValidationKind::Metric,
                criteria: "availability >= 1".into(),
            },
            destructive: false,
        };
        assert_eq!(step.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn execution_begin_mirrors_plan_steps() {
        let plan = RecoveryPlan {
            id: Uuid::new_v4(),
            incident_id: Uuid::new_v4(),
            steps: vec![],
            estimated_total_duration: Duration::ZERO,
            required_approvals: vec![],
            risks: vec![],
        };
        let exec = RecoveryExecution::begin(&plan, Utc::now());
        assert_eq!(exec.status, ExecutionStatus::InProgress);
        assert!(exec.steps.is_empty());
        assert!(exec.end_time.is_none());
    }

    #[test]
    fn incident_type_serde_is_snake_case() {
        let json = serde_json::to_string(&IncidentType::HighErrorRate).unwrap();
        assert_eq!(json, "\"high_error_rate\"");
    }
}
