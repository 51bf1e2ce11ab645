//! Static remediation catalog
//!
//! Plans are looked up, not inferred: each incident type maps to a
//! fixed ordered sequence of steps so every generated plan is
//! deterministic and auditable. Steps are phrased as desired state and
//! carry their own validation and rollback procedures.

use std::time::Duration;

use super::PlanningConfig;
use crate::types::{
    Incident, IncidentType, RecoveryStep, RollbackProcedure, StepAction, StepValidation,
    ValidationKind,
};

/// Ordered steps for an incident type, or `None` when the catalog has
/// no entry and the planner must fall back to a manual plan.
pub fn steps_for(
    incident: &Incident,
    config: &PlanningConfig,
) -> Option<Vec<RecoveryStep>> {
    if config.manual_only_types.contains(&incident.incident_type) {
        return None;
    }
    let steps = match incident.incident_type {
        IncidentType::ServiceDown => vec![
            RecoveryStep {
                order: 1,
                action: StepAction::HealthCheck,
                description: format!("probe {} through the platform health path", incident.service),
                estimated_duration: Duration::from_secs(30),
                required_resources: vec![incident.service.clone()],
                rollback: None,
                validation: StepValidation {
                    kind: ValidationKind::Metric,
                    criteria: "availability >= 1".into(),
                },
                destructive: false,
            },
            RecoveryStep {
                order: 2,
                action: StepAction::EnsureRunning,
                description: format!("ensure {} is running, restarting if needed", incident.service),
                estimated_duration: Duration::from_secs(90),
                required_resources: vec![incident.service.clone()],
                rollback: None,
                validation: StepValidation {
                    kind: ValidationKind::Metric,
                    criteria: "availability >= 1".into(),
                },
                destructive: true,
            },
        ],
        IncidentType::HighErrorRate => vec![scale_out_step(1, incident, config, "error_rate <= 5")],
        IncidentType::ResourceExhaustion => {
            vec![scale_out_step(1, incident, config, "cpu_usage_percent <= 85")]
        }
        IncidentType::DataCorruption => {
            let resource = incident
                .affected_resources
                .first()
                .cloned()
                .unwrap_or_else(|| incident.service.clone());
            vec![
                RecoveryStep {
                    order: 1,
                    action: StepAction::EnsureTrafficTarget {
                        target: "maintenance".into(),
                    },
                    description: format!("divert {} traffic while data is repaired", incident.service),
                    estimated_duration: Duration::from_secs(60),
                    required_resources: vec![incident.service.clone()],
                    rollback: Some(RollbackProcedure {
                        action: StepAction::EnsureTrafficTarget {
                            target: config.traffic_fallback_target.clone(),
                        },
                        description: "return traffic to the fallback target".into(),
                    }),
                    validation: StepValidation {
                        kind: ValidationKind::Log,
                        criteria: "write_errors <= 0".into(),
                    },
                    destructive: true,
                },
                RecoveryStep {
                    order: 2,
                    action: StepAction::RestoreBackup { resource },
                    description: "restore the corrupted resource from its last verified backup"
                        .into(),
                    estimated_duration: Duration::from_secs(20 * 60),
                    required_resources: incident.affected_resources.clone(),
                    rollback: None,
                    // Repairs on live data cannot be safely auto-verified.
                    validation: StepValidation {
                        kind: ValidationKind::Manual,
                        criteria: "operator confirms restored data passes integrity checks".into(),
                    },
                    destructive: true,
                },
            ]
        }
        IncidentType::Network => vec![RecoveryStep {
            order: 1,
            action: StepAction::EnsureTrafficTarget {
                target: config.traffic_fallback_target.clone(),
            },
            description: format!(
                "shift {} traffic to {}",
                incident.service, config.traffic_fallback_target
            ),
            estimated_duration: Duration::from_secs(120),
            required_resources: vec![incident.service.clone()],
            rollback: Some(RollbackProcedure {
                action: StepAction::EnsureTrafficTarget {
                    target: "primary".into(),
                },
                description: "route traffic back to the primary target".into(),
            }),
            validation: StepValidation {
                kind: ValidationKind::Metric,
                criteria: "packet_loss <= 1".into(),
            },
            destructive: true,
        }],
    };
    Some(steps)
}

fn scale_out_step(
    order: u32,
    incident: &Incident,
    config: &PlanningConfig,
    criteria: &str,
) -> RecoveryStep {
    RecoveryStep {
        order,
        action: StepAction::EnsureReplicas {
            desired: config.scale_out_replicas,
        },
        description: format!(
            "ensure {} runs {} replicas",
            incident.service, config.scale_out_replicas
        ),
        estimated_duration: Duration::from_secs(180),
        required_resources: vec![incident.service.clone()],
        rollback: Some(RollbackProcedure {
            action: StepAction::EnsureReplicas {
                desired: config.baseline_replicas,
            },
            description: format!("return {} to {} replicas", incident.service, config.baseline_replicas),
        }),
        validation: StepValidation {
            kind: ValidationKind::Metric,
            criteria: criteria.into(),
        },
        destructive: true,
    }
}
