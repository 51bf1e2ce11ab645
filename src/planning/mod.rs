//! Recovery Planner
//!
//! Maps a classified incident to an ordered `RecoveryPlan` of
//! idempotent remediation steps, each with validation and rollback
//! procedures. High and critical incidents always produce plans that
//! block on recorded approval before their first destructive step. A
//! catalog miss is never dropped silently: it becomes a single-step
//! manual plan so a human always sees it.

pub mod catalog;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::types::{
    Classification, Incident, IncidentType, RecoveryPlan, RecoveryStep, Severity, StepAction,
    StepValidation, ValidationKind,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningConfig {
    /// Parties whose sign-off unblocks high/critical plans. Must be
    /// non-empty.
    pub approvers: Vec<String>,
    /// Desired replica count for scale-out remediations.
    pub scale_out_replicas: u32,
    /// Replica count scale-out rollbacks return to.
    pub baseline_replicas: u32,
    /// Routing target used when traffic must leave a degraded path.
    pub traffic_fallback_target: String,
    /// Incident types pulled out of automation (change freezes,
    /// flapping remediations). These always get manual plans.
    #[serde(default)]
    pub manual_only_types: Vec<IncidentType>,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            approvers: vec!["sre-oncall".to_string()],
            scale_out_replicas: 4,
            baseline_replicas: 2,
            traffic_fallback_target: "stable".to_string(),
            manual_only_types: Vec::new(),
        }
    }
}

pub struct RecoveryPlanner {
    config: PlanningConfig,
}

impl RecoveryPlanner {
    pub fn new(config: PlanningConfig) -> Self {
        Self { config }
    }

    /// Build an immutable plan for the incident. Deterministic: the
    /// same incident type always yields the same step sequence.
    pub fn plan(&self, incident: &Incident, classification: &Classification) -> RecoveryPlan {
        let steps = match catalog::steps_for(incident, &self.config) {
            Some(steps) => steps,
            None => {
                warn!(
                    incident = %incident.id,
                    incident_type = %incident.incident_type,
                    "no catalog entry, emitting manual plan"
                );
                vec![manual_fallback_step(incident, classification)]
            }
        };

        let estimated_total_duration = steps.iter().map(|s| s.estimated_duration).sum();
        let required_approvals = if incident.severity >= Severity::High {
            self.config.approvers.clone()
        } else {
            Vec::new()
        };

        RecoveryPlan {
            id: Uuid::new_v4(),
            incident_id: incident.id,
            steps,
            estimated_total_duration,
            required_approvals,
            risks: risks(incident.incident_type),
        }
    }
}

/// Single manual step standing in for a missing catalog entry.
fn manual_fallback_step(incident: &Incident, classification: &Classification) -> RecoveryStep {
    RecoveryStep {
        order: 1,
        action: StepAction::Manual {
            instructions: format!(
                "no automated remediation for '{}' on {}; suggested actions: {}",
                incident.incident_type,
                incident.service,
                classification.required_actions.join(", ")
            ),
        },
        description: "operator-driven remediation".into(),
        estimated_duration: Duration::from_secs(30 * 60),
        required_resources: incident.affected_resources.clone(),
        rollback: None,
        validation: StepValidation {
            kind: ValidationKind::Manual,
            criteria: "operator confirms the anomaly is remediated".into(),
        },
        destructive: false,
    }
}

fn risks(kind: IncidentType) -> Vec<String> {
    let risks: &[&str] = match kind {
        IncidentType::ServiceDown => &["restart drops in-flight requests"],
        IncidentType::HighErrorRate => &["scale-out increases spend until rolled back"],
        IncidentType::ResourceExhaustion => &["scale-out may mask a leak rather than fix it"],
        IncidentType::DataCorruption => &[
            "restore loses writes committed after the backup point",
            "traffic diversion degrades dependent services",
        ],
        IncidentType::Network => &["rerouted traffic may overload the fallback path"],
    };
    risks.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IncidentStatus, StepAction};
    use chrono::Utc;
    use std::collections::HashMap;

    fn incident(kind: IncidentType, severity: Severity) -> Incident {
        Incident {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            incident_type: kind,
            severity,
            service: "checkout".into(),
            description: String::new(),
            metrics: HashMap::new(),
            affected_resources: vec!["checkout".into()],
            status: IncidentStatus::Detected,
            resolved_at: None,
        }
    }

    fn classification(incident: &Incident) -> Classification {
        Classification {
            id: Uuid::new_v4(),
            incident_id: incident.id,
            category: "availability".into(),
            root_cause: "unknown".into(),
            impact_level: incident.severity,
            required_actions: vec!["restart service".into()],
            priority: 30,
            estimated_resolution_time: Duration::from_secs(900),
        }
    }

    #[test]
    fn service_down_plan_probes_then_restarts() {
        let planner = RecoveryPlanner::new(PlanningConfig::default());
        let inc = incident(IncidentType::ServiceDown, Severity::Critical);
        let plan = planner.plan(&inc, &classification(&inc));

        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].order, 1);
        assert_eq!(plan.steps[0].action, StepAction::HealthCheck);
        assert!(!plan.steps[0].destructive);
        assert_eq!(plan.steps[1].action, StepAction::EnsureRunning);
        assert!(plan.steps[1].destructive);
        assert_eq!(
            plan.estimated_total_duration,
            plan.steps.iter().map(|s| s.estimated_duration).sum::<Duration>()
        );
    }

    #[test]
    fn high_and_critical_plans_always_require_approval() {
        let planner = RecoveryPlanner::new(PlanningConfig::default());
        for kind in [
            IncidentType::ServiceDown,
            IncidentType::HighErrorRate,
            IncidentType::ResourceExhaustion,
            IncidentType::DataCorruption,
            IncidentType::Network,
        ] {
            for severity in [Severity::High, Severity::Critical] {
                let inc = incident(kind, severity);
                let plan = planner.plan(&inc, &classification(&inc));
                assert!(
                    plan.requires_approval(),
                    "{kind} at {severity} must require approval"
                );
            }
        }
    }

    #[test]
    fn low_severity_plans_skip_approval() {
        let planner = RecoveryPlanner::new(PlanningConfig::default());
        let inc = incident(IncidentType::HighErrorRate, Severity::Medium);
        let plan = planner.plan(&inc, &classification(&inc));
        assert!(!plan.requires_approval());
    }

    #[test]
    fn scale_out_targets_configured_replicas_with_rollback() {
        let config = PlanningConfig {
            scale_out_replicas: 6,
            baseline_replicas: 3,
            ..PlanningConfig::default()
        };
        let planner = RecoveryPlanner::new(config);
        let inc = incident(IncidentType::HighErrorRate, Severity::High);
        let plan = planner.plan(&inc, &classification(&inc));

        assert_eq!(plan.steps.len(), 1);
        assert_eq!(
            plan.steps[0].action,
            StepAction::EnsureReplicas { desired: 6 }
        );
        let rollback = plan.steps[0].rollback.as_ref().unwrap();
        assert_eq!(
            rollback.action,
            StepAction::EnsureReplicas { desired: 3 }
        );
    }

    #[test]
    fn catalog_miss_becomes_a_manual_plan() {
        let config = PlanningConfig {
            manual_only_types: vec![IncidentType::Network],
            ..PlanningConfig::default()
        };
        let planner = RecoveryPlanner::new(config);
        let inc = incident(IncidentType::Network, Severity::High);
        let plan = planner.plan(&inc, &classification(&inc));

        assert_eq!(plan.steps.len(), 1);
        assert!(matches!(plan.steps[0].action, StepAction::Manual { .. }));
        assert_eq!(plan.steps[0].validation.kind, ValidationKind::Manual);
        assert!(plan.requires_approval());
    }

    #[test]
    fn data_corruption_repair_needs_manual_signoff() {
        let planner = RecoveryPlanner::new(PlanningConfig::default());
        let inc = incident(IncidentType::DataCorruption, Severity::Critical);
        let plan = planner.plan(&inc, &classification(&inc));

        let restore = plan
            .steps
            .iter()
            .find(|s| matches!(s.action, StepAction::RestoreBackup { .. }))
            .unwrap();
        assert_eq!(restore.validation.kind, ValidationKind::Manual);
        assert!(!plan.risks.is_empty());
    }
}
