//! Persisted orchestrator state
//!
//! Three append-mostly tables keep the pipeline restart-safe:
//! `incidents`, `recovery_executions` and `alert_groups`, keyed by UUID.
//! Mutation rules match the data-model ownership: incident status and
//! executions are written on behalf of the control loop, alert groups
//! only by the aggregator, everything else write-once. Approval and
//! operator sign-off ledgers live beside the plans and executions they
//! unblock.
//!
//! The in-memory backend is the default; the trait exists so a durable
//! backend can be swapped in without touching the pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{
    AlertGroup, GroupStatus, Incident, IncidentStatus, IncidentType, RecoveryExecution,
};

/// Operator verdict on a manual step or manual validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorDecision {
    Approved,
    Rejected,
}

/// Storage interface for orchestrator state.
#[async_trait]
pub trait StateStore: Send + Sync {
    // ── incidents ───────────────────────────────────────────────────

    async fn insert_incident(&self, incident: Incident) -> Result<()>;

    async fn incident(&self, id: Uuid) -> Result<Option<Incident>>;

    /// Control-loop-only status transition. Setting `Resolved` stamps
    /// `resolved_at`.
    async fn update_incident_status(
        &self,
        id: Uuid,
        status: IncidentStatus,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Most recent incidents for a `(service, type)` pair, newest
    /// first, capped at `limit`.
    async fn recent_incidents(
        &self,
        service: &str,
        incident_type: IncidentType,
        limit: usize,
    ) -> Result<Vec<Incident>>;

    /// Incidents for the pair that have not reached `Resolved`.
    async fn unresolved_incidents(
        &self,
        service: &str,
        incident_type: IncidentType,
    ) -> Result<Vec<Incident>>;

    // ── recovery executions ─────────────────────────────────────────

    async fn insert_execution(&self, execution: RecoveryExecution) -> Result<()>;

    /// Replace the stored record wholesale; executions are append-only
    /// audit entries, so only the record for `execution.id` changes.
    async fn update_execution(&self, execution: RecoveryExecution) -> Result<()>;

    async fn execution(&self, id: Uuid) -> Result<Option<RecoveryExecution>>;

    async fn executions_for_plan(&self, plan_id: Uuid) -> Result<Vec<RecoveryExecution>>;

    // ── alert groups ────────────────────────────────────────────────

    /// The currently-active group for an aggregation key, if any.
    async fn active_group(&self, kind: &str, source: &str) -> Result<Option<AlertGroup>>;

    /// Aggregator-only write.
    async fn upsert_group(&self, group: AlertGroup) -> Result<()>;

    async fn groups(&self, status: Option<GroupStatus>) -> Result<Vec<AlertGroup>>;

    // ── approvals and operator sign-off ─────────────────────────────

    async fn record_approval(&self, plan_id: Uuid, approver: &str) -> Result<()>;

    async fn approvals(&self, plan_id: Uuid) -> Result<Vec<String>>;

    async fn record_step_decision(
        &self,
        execution_id: Uuid,
        step_order: u32,
        decision: OperatorDecision,
    ) -> Result<()>;

    async fn step_decision(
        &self,
        execution_id: Uuid,
        step_order: u32,
    ) -> Result<Option<OperatorDecision>>;
}

/// Concurrent in-memory backend.
#[derive(Default)]
pub struct MemoryStore {
    incidents: DashMap<Uuid, Incident>,
    executions: DashMap<Uuid, RecoveryExecution>,
    groups: DashMap<Uuid, AlertGroup>,
    approvals: DashMap<Uuid, Vec<String>>,
    decisions: DashMap<(Uuid, u32), OperatorDecision>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn insert_incident(&self, incident: Incident) -> Result<()> {
        self.incidents.insert(incident.id, incident);
        Ok(())
    }

    async fn incident(&self, id: Uuid) -> Result<Option<Incident>> {
        Ok(self.incidents.get(&id).map(|i| i.value().clone()))
    }

    async fn update_incident_status(
        &self,
        id: Uuid,
        status: IncidentStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut incident = self
            .incidents
            .get_mut(&id)
            .ok_or_else(|| Error::Storage(format!("unknown incident {id}")))?;
        incident.status = status;
        if status == IncidentStatus::Resolved {
            incident.resolved_at = Some(at);
        }
        Ok(())
    }

    async fn recent_incidents(
        &self,
        service: &str,
        incident_type: IncidentType,
        limit: usize,
    ) -> Result<Vec<Incident>> {
        let mut matching: Vec<Incident> = self
            .incidents
            .iter()
            .filter(|entry| {
                entry.service == service && entry.incident_type == incident_type
            })
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn unresolved_incidents(
        &self,
        service: &str,
        incident_type: IncidentType,
    ) -> Result<Vec<Incident>> {
        Ok(self
            .incidents
            .iter()
            .filter(|entry| {
                entry.service == service
                    && entry.incident_type == incident_type
                    && entry.status != IncidentStatus::Resolved
            })
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn insert_execution(&self, execution: RecoveryExecution) -> Result<()> {
        self.executions.insert(execution.id, execution);
        Ok(())
    }

    async fn update_execution(&self, execution: RecoveryExecution) -> Result<()> {
        if !self.executions.contains_key(&execution.id) {
            return Err(Error::Storage(format!(
                "unknown execution {}",
                execution.id
            )));
        }
        self.executions.insert(execution.id, execution);
        Ok(())
    }

    async fn execution(&self, id: Uuid) -> Result<Option<RecoveryExecution>> {
        Ok(self.executions.get(&id).map(|e| e.value().clone()))
    }

    async fn executions_for_plan(&self, plan_id: Uuid) -> Result<Vec<RecoveryExecution>> {
        let mut matching: Vec<RecoveryExecution> = self
            .executions
            .iter()
            .filter(|entry| entry.plan_id == plan_id)
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(matching)
    }

    async fn active_group(&self, kind: &str, source: &str) -> Result<Option<AlertGroup>> {
        Ok(self
            .groups
            .iter()
            .find(|entry| {
                entry.status == GroupStatus::Active
                    && entry.kind == kind
                    && entry.source == source
            })
            .map(|entry| entry.value().clone()))
    }

    async fn upsert_group(&self, group: AlertGroup) -> Result<()> {
        self.groups.insert(group.id, group);
        Ok(())
    }

    async fn groups(&self, status: Option<GroupStatus>) -> Result<Vec<AlertGroup>> {
        Ok(self
            .groups
            .iter()
            .filter(|entry| status.map_or(true, |s| entry.status == s))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn record_approval(&self, plan_id: Uuid, approver: &str) -> Result<()> {
        self.approvals
            .entry(plan_id)
            .or_default()
            .push(approver.to_string());
        Ok(())
    }

    async fn approvals(&self, plan_id: Uuid) -> Result<Vec<String>> {
        Ok(self
            .approvals
            .get(&plan_id)
            .map(|a| a.value().clone())
            .unwrap_or_default())
    }

    async fn record_step_decision(
        &self,
        execution_id: Uuid,
        step_order: u32,
        decision: OperatorDecision,
    ) -> Result<()> {
        self.decisions.insert((execution_id, step_order), decision);
        Ok(())
    }

    async fn step_decision(
        &self,
        execution_id: Uuid,
        step_order: u32,
    ) -> Result<Option<OperatorDecision>> {
        Ok(self
            .decisions
            .get(&(execution_id, step_order))
            .map(|d| *d))
    }
}
