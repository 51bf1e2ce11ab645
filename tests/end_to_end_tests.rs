//! End-to-end pipeline tests
//!
//! Drive the orchestrator through its public surface only: scripted
//! metrics in, platform effects and operator notifications out.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use common::{
    error_rate_config, minutes_ago, CapturingChannel, FakePlatform, ScriptedMetrics,
    UnreachableMetrics,
};
use fleetmender::alerting::{AlertAggregator, AlertingConfig};
use fleetmender::storage::{MemoryStore, StateStore};
use fleetmender::types::{
    Alert, ExecutionStatus, GroupStatus, IncidentStatus, IncidentType, Severity,
};
use fleetmender::Orchestrator;

#[tokio::test(start_paused = true)]
async fn breach_flows_through_to_validated_resolution() {
    let (provider, value) = ScriptedMetrics::new(8.0);
    let platform = Arc::new(FakePlatform::default());
    let channel = Arc::new(CapturingChannel::default());
    let store = Arc::new(MemoryStore::new());

    let orchestrator = Arc::new(Orchestrator::new(
        error_rate_config(),
        vec![provider],
        platform.clone(),
        vec![channel.clone()],
        store.clone(),
    ));

    orchestrator.tick(Utc::now()).await;

    // Wait for the detection alert; it carries the plan id to approve.
    let plan_id = loop {
        if let Some(id) = channel.plan_id() {
            break id;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    };

    // Clear the anomaly and approve: the plan is high severity, so the
    // destructive scale step is gated on recorded sign-off.
    *value.lock() = 1.5;
    orchestrator.approve_plan(plan_id, "sre-oncall").await.unwrap();

    let incident = loop {
        let incidents = store
            .recent_incidents("checkout", IncidentType::HighErrorRate, 1)
            .await
            .unwrap();
        match incidents.into_iter().next() {
            Some(i) if i.status == IncidentStatus::Resolved => break i,
            _ => tokio::time::sleep(Duration::from_millis(200)).await,
        }
    };

    assert!(incident.resolved_at.is_some());
    assert_eq!(platform.replicas.lock().get("checkout"), Some(&4));

    // Audit trail: one execution, completed, with its scale step done.
    let executions = store.executions_for_plan(plan_id).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecutionStatus::Completed);
    assert_eq!(executions[0].steps.len(), 1);

    // Operators saw the detection and the all-clear.
    let seen = channel.seen.lock();
    assert!(seen.iter().any(|(s, title, _)| *s == Severity::High
        && title.contains("high_error_rate on checkout")));
    assert!(seen
        .iter()
        .any(|(_, title, _)| title.contains("resolved")));
}

#[tokio::test(start_paused = true)]
async fn unreachable_backends_degrade_the_cycle_without_failing_it() {
    let platform = Arc::new(FakePlatform::default());
    let channel = Arc::new(CapturingChannel::default());
    let store = Arc::new(MemoryStore::new());

    let orchestrator = Arc::new(Orchestrator::new(
        error_rate_config(),
        vec![Arc::new(UnreachableMetrics)],
        platform,
        vec![channel.clone()],
        store.clone(),
    ));

    // The tick must complete and simply produce nothing.
    orchestrator.tick(Utc::now()).await;

    let incidents = store
        .recent_incidents("checkout", IncidentType::HighErrorRate, 10)
        .await
        .unwrap();
    assert!(incidents.is_empty());
    assert!(channel.seen.lock().is_empty());
}

#[tokio::test]
async fn alert_burst_then_silence_collapses_to_one_resolved_group() {
    let store = Arc::new(MemoryStore::new());
    let aggregator = AlertAggregator::new(store.clone(), &AlertingConfig::default());

    // Five alerts of one kind/source within 10 minutes.
    for minute in [30i64, 28, 26, 23, 20] {
        let alert = Alert {
            id: uuid::Uuid::new_v4(),
            incident_id: None,
            kind: "service_down".into(),
            source: "payments".into(),
            severity: Severity::High,
            title: "service_down on payments".into(),
            body: String::new(),
            timestamp: minutes_ago(minute),
            metadata: Default::default(),
        };
        aggregator.record(&alert).await.unwrap();
    }

    // Last alert 20 minutes ago, window 15 minutes: one sweep resolves.
    let resolved = aggregator.sweep(Utc::now()).await.unwrap();
    assert_eq!(resolved.len(), 1);

    let groups = store.groups(None).await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].status, GroupStatus::Resolved);
    assert_eq!(groups[0].count, 5);
}

#[tokio::test(start_paused = true)]
async fn control_loop_honors_shutdown() {
    let (provider, _value) = ScriptedMetrics::new(0.0);
    let platform = Arc::new(FakePlatform::default());
    let channel = Arc::new(CapturingChannel::default());

    let orchestrator = Arc::new(Orchestrator::new(
        error_rate_config(),
        vec![provider],
        platform,
        vec![channel],
        Arc::new(MemoryStore::new()),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(orchestrator.run(shutdown_rx));

    // Let at least one cycle pass, then stop.
    tokio::time::sleep(Duration::from_secs(130)).await;
    shutdown_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run() must exit after shutdown")
        .unwrap();
}
