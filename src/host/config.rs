use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logging::{LogLevel, Logger, METRICS_TARGET};

use super::audit::LifecycleAudit;

/// Configuration knobs for a [`ReactiveHost`](super::ReactiveHost).
#[derive(Clone)]
pub struct HostConfig {
    /// Optional structured logger used by the host and its registries.
    pub logger: Option<Logger>,
    /// Optional audit sink receiving lifecycle checkpoints.
    pub audit: Option<Rc<dyn LifecycleAudit>>,
    /// Minimum time between metrics snapshots, checked when a cycle settles.
    /// Zero disables snapshots.
    pub metrics_interval: Duration,
    /// Target field used when emitting metrics snapshots.
    pub metrics_target: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            logger: None,
            audit: None,
            metrics_interval: Duration::from_secs(5),
            metrics_target: METRICS_TARGET.to_string(),
        }
    }
}

impl HostConfig {
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_audit(mut self, audit: Rc<dyn LifecycleAudit>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn disable_metrics_snapshots(mut self) -> Self {
        self.metrics_interval = Duration::ZERO;
        self
    }

    /// Overlay data-only settings. The logger's level is only adjusted when a
    /// logger is already configured.
    pub fn apply_settings(&mut self, settings: &HostSettings) {
        self.metrics_interval = Duration::from_millis(settings.metrics_interval_ms);
        self.metrics_target = settings.metrics_target.clone();
        if let (Some(level), Some(logger)) = (settings.log_level, self.logger.take()) {
            self.logger = Some(logger.with_min_level(level));
        }
    }
}

/// Serializable subset of [`HostConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    pub metrics_interval_ms: u64,
    pub metrics_target: String,
    pub log_level: Option<LogLevel>,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            metrics_interval_ms: 5_000,
            metrics_target: METRICS_TARGET.to_string(),
            log_level: None,
        }
    }
}

impl HostSettings {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}
