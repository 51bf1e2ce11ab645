//! Incident Classifier
//!
//! Enriches a detected incident with category, root-cause guess,
//! impact level and triage priority. Root cause comes from historical
//! similarity: when enough recent incidents of the same type on the
//! same service touched overlapping resources, their majority prior
//! label is adopted; otherwise the incident is marked for human
//! investigation. Classifications are write-once; re-classification
//! appends a new record linked to the same incident.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::storage::StateStore;
use crate::types::{Classification, Incident, IncidentType, Severity};

/// Label applied when no historical cohort supports a guess.
pub const UNKNOWN_ROOT_CAUSE: &str = "unknown - requires investigation";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// How many recent same-type/same-service incidents form the
    /// root-cause cohort.
    pub cohort_size: usize,
    /// Fraction of the cohort that must share an affected resource
    /// before the majority label is adopted.
    pub overlap_threshold: f64,
    /// Incidents touching at least this many resources escalate impact
    /// one level.
    pub impact_escalation_resources: usize,
    /// Bounded audit trail of produced classifications.
    pub history_capacity: usize,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            cohort_size: 10,
            overlap_threshold: 0.6,
            impact_escalation_resources: 3,
            history_capacity: 256,
        }
    }
}

pub struct Classifier {
    store: Arc<dyn StateStore>,
    config: ClassificationConfig,
    history: Mutex<VecDeque<Classification>>,
}

impl Classifier {
    pub fn new(store: Arc<dyn StateStore>, config: ClassificationConfig) -> Self {
        Self {
            store,
            config,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Produce a new classification record for `incident`.
    pub async fn classify(&self, incident: &Incident) -> Result<Classification> {
        let cohort = self.cohort(incident).await?;
        let root_cause = self.root_cause(incident, &cohort);
        let impact_level = self.impact_level(incident);
        let priority = incident.severity.weight() * 10 + impact_level.weight();
        let estimated_resolution_time = self.estimate_resolution(incident, &cohort);

        let classification = Classification {
            id: Uuid::new_v4(),
            incident_id: incident.id,
            category: category(incident.incident_type).to_string(),
            root_cause,
            impact_level,
            required_actions: required_actions(incident.incident_type),
            priority,
            estimated_resolution_time,
        };

        debug!(
            incident = %incident.id,
            priority,
            root_cause = %classification.root_cause,
            "classified incident"
        );
        self.remember(classification.clone());
        Ok(classification)
    }

    /// Feed an externally-reviewed classification (e.g. a human-set
    /// root cause) into the similarity history.
    pub fn record_prior(&self, classification: Classification) {
        self.remember(classification);
    }

    async fn cohort(&self, incident: &Incident) -> Result<Vec<Incident>> {
        let mut cohort = self
            .store
            .recent_incidents(
                &incident.service,
                incident.incident_type,
                self.config.cohort_size + 1,
            )
            .await?;
        cohort.retain(|i| i.id != incident.id);
        cohort.truncate(self.config.cohort_size);
        Ok(cohort)
    }

    fn root_cause(&self, incident: &Incident, cohort: &[Incident]) -> String {
        if cohort.is_empty() {
            return UNKNOWN_ROOT_CAUSE.to_string();
        }

        let overlapping: Vec<&Incident> = cohort
            .iter()
            .filter(|prior| {
                prior
                    .affected_resources
                    .iter()
                    .any(|r| incident.affected_resources.contains(r))
            })
            .collect();

        let share = overlapping.len() as f64 / cohort.len() as f64;
        if share < self.config.overlap_threshold {
            return UNKNOWN_ROOT_CAUSE.to_string();
        }

        let history = self.history.lock();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for prior in &overlapping {
            for label in history
                .iter()
                .filter(|c| c.incident_id == prior.id)
                .map(|c| c.root_cause.as_str())
                .filter(|label| *label != UNKNOWN_ROOT_CAUSE)
            {
                *counts.entry(label).or_insert(0) += 1;
            }
        }

        counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(label, _)| label.to_string())
            .unwrap_or_else(|| UNKNOWN_ROOT_CAUSE.to_string())
    }

    fn impact_level(&self, incident: &Incident) -> Severity {
        if incident.affected_resources.len() >= self.config.impact_escalation_resources {
            incident.severity.escalate()
        } else {
            incident.severity
        }
    }

    fn estimate_resolution(&self, incident: &Incident, cohort: &[Incident]) -> Duration {
        let durations: Vec<Duration> = cohort
            .iter()
            .filter_map(|prior| {
                let resolved = prior.resolved_at?;
                resolved
                    .signed_duration_since(prior.timestamp)
                    .to_std()
                    .ok()
            })
            .collect();

        if durations.is_empty() {
            return default_resolution(incident.incident_type);
        }

        let total: Duration = durations.iter().sum();
        total / durations.len() as u32
    }

    fn remember(&self, classification: Classification) {
        let mut history = self.history.lock();
        history.push_back(classification);
        while history.len() > self.config.history_capacity {
            history.pop_front();
        }
    }
}

fn category(kind: IncidentType) -> &'static str {
    match kind {
        IncidentType::ServiceDown => "availability",
        IncidentType::HighErrorRate => "errors",
        IncidentType::ResourceExhaustion => "capacity",
        IncidentType::DataCorruption => "integrity",
        IncidentType::Network => "network",
    }
}

fn required_actions(kind: IncidentType) -> Vec<String> {
    let actions: &[&str] = match kind {
        IncidentType::ServiceDown => &["verify health endpoint", "restart service"],
        IncidentType::HighErrorRate => &["scale out capacity", "inspect recent deploys"],
        IncidentType::ResourceExhaustion => &["scale out capacity", "review resource quotas"],
        IncidentType::DataCorruption => &["freeze writes", "restore from verified backup"],
        IncidentType::Network => &["shift traffic to healthy region", "engage network oncall"],
    };
    actions.iter().map(|s| s.to_string()).collect()
}

fn default_resolution(kind: IncidentType) -> Duration {
    match kind {
        IncidentType::ServiceDown => Duration::from_secs(15 * 60),
        IncidentType::HighErrorRate => Duration::from_secs(10 * 60),
        IncidentType::ResourceExhaustion => Duration::from_secs(20 * 60),
        IncidentType::DataCorruption => Duration::from_secs(60 * 60),
        IncidentType::Network => Duration::from_secs(30 * 60),
    }
}
