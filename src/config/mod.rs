//! Configuration management for FleetMender
//!
//! Centralized configuration composed from per-component sections,
//! with TOML file loading, environment overrides and runtime
//! validation. Every section has sensible defaults so a partial file
//! (or none at all, for tests) is enough to construct a working
//! orchestrator.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

use crate::alerting::AlertingConfig;
use crate::classify::ClassificationConfig;
use crate::detection::DetectionConfig;
use crate::error::{Error, Result};
use crate::execution::ExecutionConfig;
use crate::orchestrator::LoopConfig;
use crate::planning::PlanningConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub control_loop: LoopConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub planning: PlanningConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
}

impl OrchestratorConfig {
    /// Load configuration from a TOML file, apply environment
    /// overrides and validate.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file: {e}")))?;
        let mut config: OrchestratorConfig = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("failed to parse config: {e}")))?;
        config.override_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides for the knobs operators tune most.
    fn override_from_env(&mut self) -> Result<()> {
        if let Ok(value) = env::var("FLEETMENDER_TICK_INTERVAL_SECS") {
            let secs: u64 = value.parse().map_err(|_| {
                Error::Config(format!("invalid FLEETMENDER_TICK_INTERVAL_SECS '{value}'"))
            })?;
            self.control_loop.tick_interval = std::time::Duration::from_secs(secs);
        }
        if let Ok(value) = env::var("FLEETMENDER_WORKER_LIMIT") {
            self.control_loop.worker_limit = value.parse().map_err(|_| {
                Error::Config(format!("invalid FLEETMENDER_WORKER_LIMIT '{value}'"))
            })?;
        }
        if let Ok(value) = env::var("FLEETMENDER_VALIDATION_NAMESPACE") {
            self.execution.validation_namespace = value;
        }
        Ok(())
    }

    /// Reject configurations that would misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.control_loop.tick_interval < std::time::Duration::from_secs(10) {
            return Err(Error::Config(
                "control_loop.tick_interval must be at least 10s".into(),
            ));
        }
        if self.control_loop.worker_limit == 0 {
            return Err(Error::Config(
                "control_loop.worker_limit must be at least 1".into(),
            ));
        }
        if self.planning.approvers.is_empty() {
            return Err(Error::Config(
                "planning.approvers must not be empty: high/critical plans block on approval"
                    .into(),
            ));
        }
        if self.detection.sigma_threshold <= 0.0 {
            return Err(Error::Config(
                "detection.sigma_threshold must be positive".into(),
            ));
        }
        let overlap = self.classification.overlap_threshold;
        if !(0.0..=1.0).contains(&overlap) {
            return Err(Error::Config(
                "classification.overlap_threshold must be within 0..=1".into(),
            ));
        }
        if self.alerting.rate_limit_per_minute == 0 {
            return Err(Error::Config(
                "alerting.rate_limit_per_minute must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
