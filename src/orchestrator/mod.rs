//! Orchestrator Control Loop
//!
//! A single periodic loop drives the pipeline: collect metrics, detect
//! anomalies, then classify, plan, execute and validate each incident
//! concurrently through a bounded worker pool. Concurrency is across
//! incidents, never within a plan. At most one active execution exists
//! per `(service, incident type)` pair; a re-detection for a busy pair
//! coalesces into the running incident instead of spawning a competing
//! remediation. Nothing propagates an error past the tick boundary:
//! every tick completes and persists whatever state was reached.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alerting::{AlertAggregator, AlertRouter, AlertStatistics};
use crate::classify::Classifier;
use crate::config::OrchestratorConfig;
use crate::detection::AnomalyDetector;
use crate::error::Result;
use crate::execution::{cancellation, RecoveryExecutor};
use crate::metrics::MetricsGateway;
use crate::providers::{MetricsProvider, NotificationChannel, RuntimePlatform};
use crate::storage::{OperatorDecision, StateStore};
use crate::types::{
    Alert, ExecutionStatus, Incident, IncidentStatus, IncidentType, Severity, TimeRange,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Cadence of the detection cycle.
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    /// How far back each cycle pulls samples.
    #[serde(with = "humantime_serde")]
    pub detection_window: Duration,
    /// Incidents processed concurrently per tick.
    pub worker_limit: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(120),
            detection_window: Duration::from_secs(300),
            worker_limit: 8,
        }
    }
}

pub struct Orchestrator {
    loop_config: LoopConfig,
    gateway: Arc<MetricsGateway>,
    detector: Arc<AnomalyDetector>,
    classifier: Arc<Classifier>,
    planner: Arc<crate::planning::RecoveryPlanner>,
    executor: Arc<RecoveryExecutor>,
    router: Arc<AlertRouter>,
    aggregator: Arc<AlertAggregator>,
    store: Arc<dyn StateStore>,
    /// `(service, type)` pairs with a remediation in flight.
    active: DashMap<(String, IncidentType), Uuid>,
    /// Cancellation handles per in-flight incident.
    cancels: DashMap<Uuid, watch::Sender<bool>>,
    workers: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        providers: Vec<Arc<dyn MetricsProvider>>,
        platform: Arc<dyn RuntimePlatform>,
        channels: Vec<Arc<dyn NotificationChannel>>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let gateway = Arc::new(MetricsGateway::new(providers));
        let detector = Arc::new(AnomalyDetector::new(config.detection));
        let classifier = Arc::new(Classifier::new(store.clone(), config.classification));
        let planner = Arc::new(crate::planning::RecoveryPlanner::new(config.planning));
        let executor = Arc::new(RecoveryExecutor::new(
            platform,
            gateway.clone(),
            store.clone(),
            config.execution,
        ));
        let router = Arc::new(AlertRouter::new(channels, &config.alerting));
        let aggregator = Arc::new(AlertAggregator::new(store.clone(), &config.alerting));
        let worker_limit = config.control_loop.worker_limit;

        Self {
            loop_config: config.control_loop,
            gateway,
            detector,
            classifier,
            planner,
            executor,
            router,
            aggregator,
            store,
            active: DashMap::new(),
            cancels: DashMap::new(),
            workers: Arc::new(Semaphore::new(worker_limit)),
        }
    }

    /// Drive detection cycles until `shutdown` flips true. The current
    /// cycle always finishes before the loop exits.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.loop_config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval = ?self.loop_config.tick_interval,
            "control loop started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("control loop shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// One full detection cycle. Individual incident failures are
    /// contained; the tick itself never errors.
    pub async fn tick(self: &Arc<Self>, now: DateTime<Utc>) {
        let window = TimeRange::ending_at(now, self.loop_config.detection_window);
        let incidents = self.detector.detect_window(&self.gateway, window).await;
        debug!(count = incidents.len(), "detection cycle complete");

        for incident in incidents {
            let key = (incident.service.clone(), incident.incident_type);

            if let Some(active_id) = self.active.get(&key).map(|entry| *entry.value()) {
                // A remediation is already in flight for this pair:
                // fold the recurrence into the existing incident so the
                // aggregator sees it, but never spawn a second run.
                debug!(
                    service = %incident.service,
                    incident_type = %incident.incident_type,
                    existing = %active_id,
                    "coalescing re-detection into active incident"
                );
                let mut alert = Alert::for_incident(
                    &incident,
                    format!("{} recurring on {}", incident.incident_type, incident.service),
                    incident.description.clone(),
                );
                alert.incident_id = Some(active_id);
                if let Err(err) = self.aggregator.record(&alert).await {
                    warn!(error = %err, "failed to record recurrence alert");
                }
                continue;
            }

            if let Err(err) = self.store.insert_incident(incident.clone()).await {
                error!(incident = %incident.id, error = %err, "failed to persist incident");
                continue;
            }
            self.active.insert(key.clone(), incident.id);

            let this = Arc::clone(self);
            tokio::spawn(async move {
                let _permit = match this.workers.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                if let Err(err) = this.process_incident(&incident).await {
                    error!(
                        incident = %incident.id,
                        service = %incident.service,
                        error = %err,
                        "incident processing failed"
                    );
                    let mut alert = Alert::for_incident(
                        &incident,
                        format!("remediation pipeline error on {}", incident.service),
                        err.to_string(),
                    );
                    alert.severity = Severity::Critical;
                    this.router.route(&alert).await;
                }
                this.active.remove(&key);
                this.cancels.remove(&incident.id);
            });
        }

        // Resolve groups whose alerts stopped recurring, then settle
        // their incidents. Runs once per cycle, not per alert.
        match self.aggregator.sweep(now).await {
            Ok(resolved) => {
                for group in resolved {
                    self.settle_quiet_incidents(&group.source, &group.kind, now).await;
                }
            }
            Err(err) => warn!(error = %err, "alert group sweep failed"),
        }
    }

    /// The per-incident pipeline: classify, plan, alert, execute,
    /// settle. The control loop is the only writer of incident status.
    async fn process_incident(&self, incident: &Incident) -> Result<()> {
        self.store
            .update_incident_status(incident.id, IncidentStatus::Investigating, Utc::now())
            .await?;

        let classification = self.classifier.classify(incident).await?;
        let plan = self.planner.plan(incident, &classification);

        let mut detected = Alert::for_incident(
            incident,
            format!("{} on {}", incident.incident_type, incident.service),
            format!(
                "{} (root cause: {}, priority {})",
                incident.description, classification.root_cause, classification.priority
            ),
        );
        detected
            .metadata
            .insert("plan_id".to_string(), plan.id.to_string());
        detected
            .metadata
            .insert("priority".to_string(), classification.priority.to_string());
        if plan.requires_approval() {
            detected.metadata.insert(
                "approvals_required".to_string(),
                plan.required_approvals.join(","),
            );
        }
        if let Err(err) = self.aggregator.record(&detected).await {
            warn!(error = %err, "failed to record detection alert");
        }
        self.router.route(&detected).await;

        let post_check = self.detector.post_check_for(incident);
        self.store
            .update_incident_status(incident.id, IncidentStatus::Mitigating, Utc::now())
            .await?;

        let (cancel_tx, cancel_rx) = cancellation();
        self.cancels.insert(incident.id, cancel_tx);
        let execution = self
            .executor
            .execute(incident, &plan, post_check.as_ref(), cancel_rx)
            .await;

        if execution.status == ExecutionStatus::Completed {
            self.store
                .update_incident_status(incident.id, IncidentStatus::Resolved, Utc::now())
                .await?;
            info!(
                incident = %incident.id,
                service = %incident.service,
                execution = %execution.id,
                "incident remediated and validated"
            );
            let mut resolved = Alert::for_incident(
                incident,
                format!("{} on {} resolved", incident.incident_type, incident.service),
                format!("remediation completed in {} steps", execution.completed_steps()),
            );
            resolved.severity = Severity::Low;
            self.router.route(&resolved).await;
        } else {
            // Remediation did not stick; the incident stays mitigating
            // and a human is pulled in.
            self.store
                .update_incident_status(incident.id, IncidentStatus::Mitigating, Utc::now())
                .await?;
            let mut escalation = Alert::for_incident(
                incident,
                format!(
                    "remediation {} for {} on {}",
                    match execution.status {
                        ExecutionStatus::RolledBack => "rolled back",
                        _ => "failed",
                    },
                    incident.incident_type,
                    incident.service
                ),
                format!(
                    "execution {} ended {:?} with {} completed steps and {} rollbacks",
                    execution.id,
                    execution.status,
                    execution.completed_steps(),
                    execution.rollbacks_attempted()
                ),
            );
            escalation.severity = Severity::Critical;
            escalation
                .metadata
                .insert("execution_id".to_string(), execution.id.to_string());
            if let Err(err) = self.aggregator.record(&escalation).await {
                warn!(error = %err, "failed to record escalation alert");
            }
            self.router.route(&escalation).await;
        }
        Ok(())
    }

    /// Mark unresolved incidents of a now-quiet group as resolved,
    /// unless a remediation is still in flight for the pair.
    async fn settle_quiet_incidents(&self, service: &str, kind: &str, now: DateTime<Utc>) {
        let Some(incident_type) = IncidentType::parse(kind) else {
            return;
        };
        if self
            .active
            .contains_key(&(service.to_string(), incident_type))
        {
            return;
        }
        match self.store.unresolved_incidents(service, incident_type).await {
            Ok(incidents) => {
                for incident in incidents {
                    if let Err(err) = self
                        .store
                        .update_incident_status(incident.id, IncidentStatus::Resolved, now)
                        .await
                    {
                        warn!(incident = %incident.id, error = %err, "failed to settle incident");
                    } else {
                        info!(
                            incident = %incident.id,
                            service,
                            "incident resolved: no recurrence within window"
                        );
                    }
                }
            }
            Err(err) => warn!(error = %err, "failed to query unresolved incidents"),
        }
    }

    /// Record an approver's sign-off for a plan; unblocks executions
    /// waiting at the approval gate.
    pub async fn approve_plan(&self, plan_id: Uuid, approver: &str) -> Result<()> {
        info!(plan = %plan_id, approver, "plan approval recorded");
        self.store.record_approval(plan_id, approver).await
    }

    /// Record an operator's verdict for a manual step.
    pub async fn record_step_decision(
        &self,
        execution_id: Uuid,
        step_order: u32,
        decision: OperatorDecision,
    ) -> Result<()> {
        self.store
            .record_step_decision(execution_id, step_order, decision)
            .await
    }

    /// Cancel the in-flight execution for an incident. The executor
    /// jumps to its rollback phase from the current step.
    pub fn cancel(&self, incident_id: Uuid) -> bool {
        match self.cancels.get(&incident_id) {
            Some(handle) => {
                info!(incident = %incident_id, "cancellation requested");
                handle.send(true).is_ok()
            }
            None => false,
        }
    }

    pub fn alert_statistics(&self) -> AlertStatistics {
        self.router.statistics()
    }
}
