//! Recovery Executor
//!
//! Runs a plan's steps strictly in order against the runtime platform,
//! tracks per-step status, and owns the failure path: on a failed or
//! timed-out step the execution halts and every previously completed
//! step has its rollback procedure attempted in reverse order, each
//! attempt isolated so one rollback failure never prevents the others.
//! Platform calls are long-running: the executor polls operation status
//! instead of blocking on the call, and suspends without holding any
//! cross-incident lock while waiting on the platform or on a human.
//!
//! Success is never declared from step status alone: a plan-level
//! post-check re-queries the metric that triggered detection, and an
//! execution whose steps are all green but whose anomaly persists is
//! failed and rolled back.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::detection::PostCheck;
use crate::error::{Error, Result};
use crate::metrics::MetricsGateway;
use crate::providers::{OperationStatus, RuntimePlatform};
use crate::resilience::{retry, RetryPolicy};
use crate::storage::{OperatorDecision, StateStore};
use crate::types::{
    ExecutionStatus, Incident, RecoveryExecution, RecoveryPlan, RecoveryStep, StepAction,
    StepStatus, ValidationKind,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// How often platform operation status is polled.
    #[serde(with = "humantime_serde")]
    pub platform_poll_interval: Duration,
    /// How often approval and operator sign-off ledgers are re-read.
    #[serde(with = "humantime_serde")]
    pub approval_poll_interval: Duration,
    /// How far back the post-check looks for a fresh sample.
    #[serde(with = "humantime_serde")]
    pub post_check_lookback: Duration,
    /// Namespace step validation criteria are evaluated against.
    pub validation_namespace: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            platform_poll_interval: Duration::from_secs(2),
            approval_poll_interval: Duration::from_secs(5),
            post_check_lookback: Duration::from_secs(300),
            validation_namespace: "prod".to_string(),
        }
    }
}

/// Creates a paired cancellation handle and receiver for one execution.
pub fn cancellation() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

pub struct RecoveryExecutor {
    platform: Arc<dyn RuntimePlatform>,
    gateway: Arc<MetricsGateway>,
    store: Arc<dyn StateStore>,
    config: ExecutionConfig,
    retry_policy: RetryPolicy,
}

impl RecoveryExecutor {
    pub fn new(
        platform: Arc<dyn RuntimePlatform>,
        gateway: Arc<MetricsGateway>,
        store: Arc<dyn StateStore>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            platform,
            gateway,
            store,
            config,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Run one plan invocation to completion and return its audit
    /// record. Every failure mode ends inside the record; this call
    /// itself never propagates an error past the control loop.
    pub async fn execute(
        &self,
        incident: &Incident,
        plan: &RecoveryPlan,
        post_check: Option<&PostCheck>,
        cancel: watch::Receiver<bool>,
    ) -> RecoveryExecution {
        let mut execution = RecoveryExecution::begin(plan, Utc::now());
        if let Err(err) = self.store.insert_execution(execution.clone()).await {
            warn!(execution = %execution.id, error = %err, "failed to persist new execution");
        }

        let run = self.run_steps(incident, plan, &mut execution, &cancel).await;

        match run {
            Ok(()) => {
                if self.post_check_passes(post_check).await {
                    execution.status = ExecutionStatus::Completed;
                } else {
                    warn!(
                        execution = %execution.id,
                        incident = %incident.id,
                        "all steps green but anomaly persists, failing and rolling back"
                    );
                    self.rollback_completed(incident, plan, &mut execution).await;
                    execution.status = ExecutionStatus::Failed;
                }
            }
            Err(err) => {
                info!(
                    execution = %execution.id,
                    incident = %incident.id,
                    error = %err,
                    "halting plan and rolling back completed steps"
                );
                let clean = self.rollback_completed(incident, plan, &mut execution).await;
                execution.status = if execution.rollbacks_attempted() > 0 && clean {
                    ExecutionStatus::RolledBack
                } else {
                    ExecutionStatus::Failed
                };
            }
        }

        let ended = Utc::now();
        execution.end_time = Some(ended);
        let elapsed = ended - execution.start_time;
        execution.metrics.insert(
            "duration_seconds".to_string(),
            elapsed.num_milliseconds() as f64 / 1000.0,
        );
        execution
            .metrics
            .insert("steps_completed".to_string(), execution.completed_steps() as f64);
        execution.metrics.insert(
            "rollbacks_attempted".to_string(),
            execution.rollbacks_attempted() as f64,
        );
        self.persist(&execution).await;
        execution
    }

    /// Steps run strictly in ascending order; a step starts only once
    /// its predecessor completed. The first error halts the plan.
    async fn run_steps(
        &self,
        incident: &Incident,
        plan: &RecoveryPlan,
        execution: &mut RecoveryExecution,
        cancel: &watch::Receiver<bool>,
    ) -> Result<()> {
        let mut approval_cleared = !plan.requires_approval();

        for idx in 0..plan.steps.len() {
            let step = &plan.steps[idx];

            if *cancel.borrow() {
                execution.steps[idx].status = StepStatus::Failed;
                execution.steps[idx].error = Some("cancelled before start".to_string());
                self.persist(execution).await;
                return Err(Error::Cancelled);
            }

            // Destructive work may not begin until the plan's approval
            // requirement is satisfied.
            if step.destructive && !approval_cleared {
                self.await_approval(plan, cancel).await?;
                approval_cleared = true;
            }

            execution.steps[idx].status = StepStatus::InProgress;
            execution.steps[idx].started_at = Some(Utc::now());
            self.persist(execution).await;

            let outcome = self
                .run_single_step(incident, step, execution.id, cancel)
                .await;

            match outcome {
                Ok(()) => {
                    execution.steps[idx].status = StepStatus::Completed;
                    execution.steps[idx].finished_at = Some(Utc::now());
                    self.persist(execution).await;
                    debug!(
                        execution = %execution.id,
                        step = step.action.name(),
                        order = step.order,
                        "step completed"
                    );
                }
                Err(err) => {
                    execution.steps[idx].status = StepStatus::Failed;
                    execution.steps[idx].finished_at = Some(Utc::now());
                    execution.steps[idx].error = Some(err.to_string());
                    self.persist(execution).await;
                    error!(
                        execution = %execution.id,
                        step = step.action.name(),
                        order = step.order,
                        service = %incident.service,
                        error = %err,
                        "step failed"
                    );
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// One step: platform action under the implicit 2x-estimate
    /// timeout, then validation. Manual work is exempt from the
    /// timeout and waits on a human indefinitely.
    async fn run_single_step(
        &self,
        incident: &Incident,
        step: &RecoveryStep,
        execution_id: uuid::Uuid,
        cancel: &watch::Receiver<bool>,
    ) -> Result<()> {
        match &step.action {
            StepAction::Manual { instructions } => {
                info!(
                    step = step.action.name(),
                    order = step.order,
                    instructions = %instructions,
                    "manual step awaiting operator"
                );
                self.await_operator(step, execution_id, cancel).await?;
            }
            action => {
                let deadline = step.timeout();
                let run = self.apply_action(&incident.service, action, cancel);
                match timeout(deadline, run).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        return Err(step_error(step, err));
                    }
                    Err(_) => {
                        return Err(Error::StepTimeout {
                            step: step.action.name().to_string(),
                            timeout: deadline,
                        });
                    }
                }
            }
        }

        self.validate_step(incident, step, execution_id, cancel).await
    }

    /// Dispatch the platform call for an action and poll the returned
    /// operation until it reaches a terminal state.
    async fn apply_action(
        &self,
        service: &str,
        action: &StepAction,
        cancel: &watch::Receiver<bool>,
    ) -> Result<()> {
        let op = match action {
            StepAction::HealthCheck | StepAction::EnsureRunning => {
                retry(&self.retry_policy, "ensure_service_running", || {
                    self.platform.ensure_service_running(service)
                })
                .await?
            }
            StepAction::EnsureReplicas { desired } => {
                retry(&self.retry_policy, "scale_service", || {
                    self.platform.scale_service(service, *desired)
                })
                .await?
            }
            StepAction::EnsureTrafficTarget { target } => {
                retry(&self.retry_policy, "update_traffic_routing", || {
                    self.platform.update_traffic_routing(service, target)
                })
                .await?
            }
            StepAction::RestoreBackup { resource } => {
                retry(&self.retry_policy, "restore_from_backup", || {
                    self.platform.restore_from_backup(resource)
                })
                .await?
            }
            StepAction::Manual { .. } => return Ok(()),
        };

        loop {
            if *cancel.borrow() {
                return Err(Error::Cancelled);
            }
            let status = retry(&self.retry_policy, "platform_status", || {
                self.platform.get_status(op)
            })
            .await?;
            match status {
                OperationStatus::Succeeded => return Ok(()),
                OperationStatus::Failed(reason) => return Err(Error::Platform(reason)),
                OperationStatus::Pending | OperationStatus::Running => {
                    sleep(self.config.platform_poll_interval).await;
                }
            }
        }
    }

    async fn validate_step(
        &self,
        incident: &Incident,
        step: &RecoveryStep,
        execution_id: uuid::Uuid,
        cancel: &watch::Receiver<bool>,
    ) -> Result<()> {
        match step.validation.kind {
            ValidationKind::Manual => {
                // Already waited if the action itself was manual.
                if matches!(step.action, StepAction::Manual { .. }) {
                    return Ok(());
                }
                self.await_operator(step, execution_id, cancel).await
            }
            ValidationKind::Metric | ValidationKind::Log => {
                let criteria = Criteria::parse(&step.validation.criteria)?;
                let mut dimensions = HashMap::new();
                dimensions.insert("service".to_string(), incident.service.clone());

                let sample = self
                    .gateway
                    .latest(
                        &self.config.validation_namespace,
                        &criteria.metric,
                        &dimensions,
                        self.config.post_check_lookback,
                    )
                    .await;

                match sample {
                    Ok(Some(sample)) if criteria.holds(sample.value) => Ok(()),
                    Ok(Some(sample)) => Err(Error::StepFailed {
                        step: step.action.name().to_string(),
                        reason: format!(
                            "validation '{}' failed with observed value {:.2}",
                            step.validation.criteria, sample.value
                        ),
                    }),
                    Ok(None) => {
                        warn!(
                            step = step.action.name(),
                            criteria = %step.validation.criteria,
                            "no sample available for validation, passing on detection safety net"
                        );
                        Ok(())
                    }
                    Err(err) => {
                        warn!(
                            step = step.action.name(),
                            error = %err,
                            "validation query degraded, passing on detection safety net"
                        );
                        Ok(())
                    }
                }
            }
        }
    }

    /// Block until every required approver has recorded sign-off.
    /// No timeout by design: unapproved plans wait until a human acts
    /// or the execution is cancelled.
    async fn await_approval(
        &self,
        plan: &RecoveryPlan,
        cancel: &watch::Receiver<bool>,
    ) -> Result<()> {
        info!(plan = %plan.id, approvers = ?plan.required_approvals, "awaiting plan approval");
        loop {
            if *cancel.borrow() {
                return Err(Error::Cancelled);
            }
            let recorded = self.store.approvals(plan.id).await.unwrap_or_default();
            let have: HashSet<&str> = recorded.iter().map(String::as_str).collect();
            if plan
                .required_approvals
                .iter()
                .all(|approver| have.contains(approver.as_str()))
            {
                info!(plan = %plan.id, "plan approved");
                return Ok(());
            }
            sleep(self.config.approval_poll_interval).await;
        }
    }

    /// Block until an operator approves or rejects the step. Rejection
    /// is a step failure and triggers the rollback path.
    async fn await_operator(
        &self,
        step: &RecoveryStep,
        execution_id: uuid::Uuid,
        cancel: &watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            if *cancel.borrow() {
                return Err(Error::Cancelled);
            }
            match self
                .store
                .step_decision(execution_id, step.order)
                .await
                .unwrap_or(None)
            {
                Some(OperatorDecision::Approved) => return Ok(()),
                Some(OperatorDecision::Rejected) => {
                    return Err(Error::StepRejected(step.action.name().to_string()));
                }
                None => sleep(self.config.approval_poll_interval).await,
            }
        }
    }

    /// Attempt rollback for every completed step, reverse order, each
    /// attempt isolated and logged individually. Returns whether all
    /// attempted rollbacks succeeded.
    async fn rollback_completed(
        &self,
        incident: &Incident,
        plan: &RecoveryPlan,
        execution: &mut RecoveryExecution,
    ) -> bool {
        let mut clean = true;
        // Rollback must proceed even when triggered by cancellation.
        let (_guard, no_cancel) = cancellation();

        for idx in (0..plan.steps.len()).rev() {
            if execution.steps[idx].status != StepStatus::Completed {
                continue;
            }
            let step = &plan.steps[idx];
            let Some(procedure) = &step.rollback else {
                debug!(
                    step = step.action.name(),
                    order = step.order,
                    "no rollback procedure, skipping"
                );
                continue;
            };

            execution.steps[idx].rollback_attempted = true;
            let deadline = step.timeout();
            let attempt = timeout(
                deadline,
                self.apply_action(&incident.service, &procedure.action, &no_cancel),
            )
            .await;

            match attempt {
                Ok(Ok(())) => {
                    info!(
                        step = step.action.name(),
                        order = step.order,
                        rollback = procedure.action.name(),
                        "rollback succeeded"
                    );
                }
                Ok(Err(err)) => {
                    clean = false;
                    execution.steps[idx].rollback_error = Some(err.to_string());
                    error!(
                        step = step.action.name(),
                        order = step.order,
                        rollback = procedure.action.name(),
                        error = %err,
                        "rollback failed"
                    );
                }
                Err(_) => {
                    clean = false;
                    let err = format!("rollback timed out after {deadline:?}");
                    execution.steps[idx].rollback_error = Some(err.clone());
                    error!(
                        step = step.action.name(),
                        order = step.order,
                        rollback = procedure.action.name(),
                        error = %err,
                        "rollback failed"
                    );
                }
            }
            self.persist(execution).await;
        }
        clean
    }

    /// Re-query the metric that triggered detection. Missing data
    /// passes: detection remains the safety net and will re-raise if
    /// the anomaly persists.
    async fn post_check_passes(&self, post_check: Option<&PostCheck>) -> bool {
        let Some(check) = post_check else {
            return true;
        };
        match self
            .gateway
            .latest(
                &check.namespace,
                &check.metric,
                &check.dimensions,
                self.config.post_check_lookback,
            )
            .await
        {
            Ok(Some(sample)) => {
                let healthy = check.is_healthy(sample.value);
                if !healthy {
                    warn!(
                        metric = %check.metric,
                        value = sample.value,
                        threshold = check.threshold,
                        "post-check still shows the anomaly"
                    );
                }
                healthy
            }
            Ok(None) => {
                warn!(metric = %check.metric, "post-check found no sample, passing");
                true
            }
            Err(err) => {
                warn!(metric = %check.metric, error = %err, "post-check query degraded, passing");
                true
            }
        }
    }

    async fn persist(&self, execution: &RecoveryExecution) {
        if let Err(err) = self.store.update_execution(execution.clone()).await {
            warn!(execution = %execution.id, error = %err, "failed to persist execution state");
        }
    }
}

fn step_error(step: &RecoveryStep, err: Error) -> Error {
    match err {
        Error::Cancelled => Error::Cancelled,
        Error::Platform(reason) => Error::StepFailed {
            step: step.action.name().to_string(),
            reason,
        },
        other => Error::StepFailed {
            step: step.action.name().to_string(),
            reason: other.to_string(),
        },
    }
}

#[derive(Debug, PartialEq)]
enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

/// Machine-checkable validation expression: `<metric> <op> <value>`.
#[derive(Debug)]
struct Criteria {
    metric: String,
    op: CmpOp,
    value: f64,
}

impl Criteria {
    fn parse(input: &str) -> Result<Self> {
        let mut parts = input.split_whitespace();
        let (Some(metric), Some(op), Some(value), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::Criteria(input.to_string()));
        };
        let op = match op {
            "<" => CmpOp::Lt,
            "<=" => CmpOp::Le,
            ">" => CmpOp::Gt,
            ">=" => CmpOp::Ge,
            "==" => CmpOp::Eq,
            _ => return Err(Error::Criteria(input.to_string())),
        };
        let value: f64 = value
            .parse()
            .map_err(|_| Error::Criteria(input.to_string()))?;
        Ok(Self {
            metric: metric.to_string(),
            op,
            value,
        })
    }

    fn holds(&self, observed: f64) -> bool {
        match self.op {
            CmpOp::Lt => observed < self.value,
            CmpOp::Le => observed <= self.value,
            CmpOp::Gt => observed > self.value,
            CmpOp::Ge => observed >= self.value,
            CmpOp::Eq => (observed - self.value).abs() < f64::EPSILON,
        }
    }
}
