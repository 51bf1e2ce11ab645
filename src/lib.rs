//! FleetMender - autonomous incident response for service fleets
//!
//! A pipeline that detects operational anomalies in a running fleet,
//! classifies them, synthesizes a remediation plan, executes it against
//! the runtime platform, validates the outcome and rolls back on
//! failure, while deduplicating and routing alerts to humans:
//! - metrics: pulls and normalizes samples from monitoring backends
//! - detection: thresholds plus rolling three-sigma baselines
//! - classify: category, root-cause guess, impact and triage priority
//! - planning: deterministic step catalog with validation and rollback
//! - execution: the sequential, approval-gated remediation state machine
//! - alerting: dedup/aggregation and best-effort channel fan-out
//! - orchestrator: the periodic control loop owning incident state
//!
//! The three external capabilities (metrics source, compute platform,
//! notifier) are injected as traits; the core runs without any live
//! infrastructure.

pub mod alerting;
pub mod classify;
pub mod config;
pub mod detection;
pub mod error;
pub mod execution;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod planning;
pub mod providers;
pub mod resilience;
pub mod storage;
pub mod types;

// Re-export commonly used types for easy access
pub use config::OrchestratorConfig;
pub use error::{Error, Result};
pub use orchestrator::{LoopConfig, Orchestrator};
pub use providers::{
    MetricsProvider, NotificationChannel, OperationId, OperationStatus, RuntimePlatform,
};
pub use storage::{MemoryStore, OperatorDecision, StateStore};
pub use types::{
    Alert, AlertGroup, Classification, ExecutionStatus, GroupStatus, Incident, IncidentStatus,
    IncidentType, MetricSample, RecoveryExecution, RecoveryPlan, RecoveryStep, Severity,
    StepAction, StepStatus, TimeRange,
};
