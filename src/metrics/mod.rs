use crate::logging::{LogEvent, LogFields, LogLevel};
use serde_json::json;
use std::time::Duration;

/// Counters maintained by every [`ReactiveHost`](crate::ReactiveHost).
#[derive(Debug, Default, Clone)]
pub struct HostMetrics {
    update_requests: u64,
    coalesced_requests: u64,
    updates: u64,
    updated: u64,
    skipped_cycles: u64,
    connects: u64,
    disconnects: u64,
    controllers_added: u64,
    controllers_removed: u64,
    hook_failures: u64,
}

impl HostMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&mut self, coalesced: bool) {
        self.update_requests = self.update_requests.saturating_add(1);
        if coalesced {
            self.coalesced_requests = self.coalesced_requests.saturating_add(1);
        }
    }

    pub fn record_update(&mut self) {
        self.updates = self.updates.saturating_add(1);
    }

    pub fn record_updated(&mut self) {
        self.updated = self.updated.saturating_add(1);
    }

    pub fn record_skipped(&mut self) {
        self.skipped_cycles = self.skipped_cycles.saturating_add(1);
    }

    pub fn record_connect(&mut self) {
        self.connects = self.connects.saturating_add(1);
    }

    pub fn record_disconnect(&mut self) {
        self.disconnects = self.disconnects.saturating_add(1);
    }

    pub fn record_controller_added(&mut self) {
        self.controllers_added = self.controllers_added.saturating_add(1);
    }

    pub fn record_controller_removed(&mut self) {
        self.controllers_removed = self.controllers_removed.saturating_add(1);
    }

    pub fn record_hook_failures(&mut self, count: usize) {
        if count > 0 {
            self.hook_failures = self.hook_failures.saturating_add(count as u64);
        }
    }

    pub fn snapshot(&self, uptime: Duration) -> MetricSnapshot {
        MetricSnapshot {
            uptime_ms: uptime.as_millis() as u64,
            update_requests: self.update_requests,
            coalesced_requests: self.coalesced_requests,
            updates: self.updates,
            updated: self.updated,
            skipped_cycles: self.skipped_cycles,
            connects: self.connects,
            disconnects: self.disconnects,
            controllers_added: self.controllers_added,
            controllers_removed: self.controllers_removed,
            hook_failures: self.hook_failures,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSnapshot {
    pub uptime_ms: u64,
    pub update_requests: u64,
    pub coalesced_requests: u64,
    pub updates: u64,
    pub updated: u64,
    pub skipped_cycles: u64,
    pub connects: u64,
    pub disconnects: u64,
    pub controllers_added: u64,
    pub controllers_removed: u64,
    pub hook_failures: u64,
}

impl MetricSnapshot {
    pub fn to_log_event(&self, target: &str) -> LogEvent {
        LogEvent::with_fields(LogLevel::Info, target, "host_metrics", self.as_fields())
    }

    pub fn as_fields(&self) -> LogFields {
        let mut map = LogFields::new();
        map.insert("uptime_ms".to_string(), json!(self.uptime_ms));
        map.insert("update_requests".to_string(), json!(self.update_requests));
        map.insert(
            "coalesced_requests".to_string(),
            json!(self.coalesced_requests),
        );
        map.insert("updates".to_string(), json!(self.updates));
        map.insert("updated".to_string(), json!(self.updated));
        map.insert("skipped_cycles".to_string(), json!(self.skipped_cycles));
        map.insert("connects".to_string(), json!(self.connects));
        map.insert("disconnects".to_string(), json!(self.disconnects));
        map.insert(
            "controllers_added".to_string(),
            json!(self.controllers_added),
        );
        map.insert(
            "controllers_removed".to_string(),
            json!(self.controllers_removed),
        );
        map.insert("hook_failures".to_string(), json!(self.hook_failures));
        map
    }
}
