//! Host lifecycle audit utilities.
//!
//! Hooks that let callers observe the major lifecycle transitions of a
//! `ReactiveHost` and its controller registries. Records capture a stage
//! identifier plus structured metadata so downstream code can log, buffer, or
//! assert on the host's progression without touching the cycle itself.

use std::cell::RefCell;
use std::time::SystemTime;

use serde_json::Value;

/// Distinct lifecycle checkpoints emitted by hosts and registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAuditStage {
    /// A new host instance was constructed.
    HostConstructed,
    /// A controller joined a registry (host or nested).
    ControllerRegistered,
    /// A controller left a registry.
    ControllerRemoved,
    /// The host was attached.
    HostConnected,
    /// The host was detached.
    HostDisconnected,
    /// A new update cycle was scheduled (coalesced requests are not recorded).
    UpdateRequested,
    /// An update cycle began running.
    CycleStarted,
    /// `should_update` vetoed the cycle.
    CycleSkipped,
    /// The settle signal for a cycle resolved.
    CycleSettled,
    /// A controller hook failed. Recorded once per failure.
    HookFailed,
}

/// Structured audit entry.
#[derive(Debug, Clone)]
pub struct LifecycleAuditEvent {
    pub timestamp: SystemTime,
    pub stage: LifecycleAuditStage,
    pub details: Vec<(String, Value)>,
}

impl LifecycleAuditEvent {
    fn new(stage: LifecycleAuditStage) -> Self {
        Self {
            timestamp: SystemTime::now(),
            stage,
            details: Vec::new(),
        }
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }
}

/// Builder helper to append fields ergonomically.
pub struct LifecycleAuditEventBuilder {
    event: LifecycleAuditEvent,
}

impl LifecycleAuditEventBuilder {
    pub fn new(stage: LifecycleAuditStage) -> Self {
        Self {
            event: LifecycleAuditEvent::new(stage),
        }
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.event.details.push((key.into(), value.into()));
        self
    }

    pub fn finish(self) -> LifecycleAuditEvent {
        self.event
    }
}

/// Trait implemented by any audit sink.
pub trait LifecycleAudit {
    fn record(&self, event: LifecycleAuditEvent);
}

/// Default no-op implementation used when auditing is disabled.
#[derive(Debug, Default)]
pub struct NullLifecycleAudit;

impl LifecycleAudit for NullLifecycleAudit {
    fn record(&self, _event: LifecycleAuditEvent) {}
}

/// Buffers every audit event in memory.
#[derive(Debug, Default)]
pub struct RecordingAudit {
    events: RefCell<Vec<LifecycleAuditEvent>>,
}

impl RecordingAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleAuditEvent> {
        self.events.borrow().clone()
    }

    pub fn stages(&self) -> Vec<LifecycleAuditStage> {
        self.events.borrow().iter().map(|event| event.stage).collect()
    }

    pub fn count(&self, stage: LifecycleAuditStage) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|event| event.stage == stage)
            .count()
    }
}

impl LifecycleAudit for RecordingAudit {
    fn record(&self, event: LifecycleAuditEvent) {
        self.events.borrow_mut().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recording_audit_keeps_order_and_details() {
        let audit = RecordingAudit::new();
        audit.record(
            LifecycleAuditEventBuilder::new(LifecycleAuditStage::CycleStarted)
                .detail("cycle", 1)
                .finish(),
        );
        audit.record(LifecycleAuditEventBuilder::new(LifecycleAuditStage::CycleSettled).finish());

        assert_eq!(
            audit.stages(),
            vec![
                LifecycleAuditStage::CycleStarted,
                LifecycleAuditStage::CycleSettled
            ]
        );
        assert_eq!(audit.events()[0].detail("cycle"), Some(&json!(1)));
        assert_eq!(audit.count(LifecycleAuditStage::HookFailed), 0);
    }
}
