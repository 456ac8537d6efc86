use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::json;

use crate::controller::{ControllerOwner, ControllerRef, LifecycleEvent, OwnerId, absorb};
use crate::error::{ControllerError, HookFailure, Result};
use crate::host::HostHandle;
use crate::host::audit::{LifecycleAuditEventBuilder, LifecycleAuditStage};
use crate::logging::{LogLevel, REGISTRY_TARGET, json_kv};
use crate::properties::ChangedProperties;

struct RegistryInner {
    owner: OwnerId,
    host: HostHandle,
    members: RefCell<Vec<ControllerRef>>,
    connected: Cell<bool>,
}

/// Ordered set of controllers registered with one host or controller.
///
/// Every fan-out walks a snapshot of the membership taken before the first
/// delivery, so hooks may add or remove controllers while it runs. Members
/// detached during the walk are skipped, members added during it are not
/// visited. A failing hook never stops delivery to its siblings; all failures
/// come back together as [`ControllerError::Fanout`].
#[derive(Clone)]
pub struct ControllerRegistry {
    inner: Rc<RegistryInner>,
}

impl ControllerRegistry {
    pub(crate) fn new(owner: OwnerId, host: HostHandle) -> Self {
        Self {
            inner: Rc::new(RegistryInner {
                owner,
                host,
                members: RefCell::new(Vec::new()),
                connected: Cell::new(false),
            }),
        }
    }

    pub fn owner(&self) -> OwnerId {
        self.inner.owner
    }

    /// Whether the owning object is currently connected.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.get()
    }

    pub fn len(&self) -> usize {
        self.inner.members.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.members.borrow().is_empty()
    }

    pub fn members(&self) -> Vec<ControllerRef> {
        self.inner.members.borrow().clone()
    }

    pub fn contains(&self, controller: &ControllerRef) -> bool {
        self.inner
            .members
            .borrow()
            .iter()
            .any(|member| member == controller)
    }

    pub fn add(&self, controller: ControllerRef) -> Result<()> {
        if let Some(owner) = controller.owner() {
            return Err(ControllerError::AlreadyRegistered {
                id: controller.id(),
                name: controller.name().to_string(),
                owner,
            });
        }

        if self.would_cycle(&controller) {
            return Err(ControllerError::CyclicRegistration {
                id: controller.id(),
                name: controller.name().to_string(),
                owner: self.inner.owner,
            });
        }

        controller.set_owner(Some(self.inner.owner));
        self.inner.members.borrow_mut().push(controller.clone());
        self.inner.host.record(|metrics| metrics.record_controller_added());
        self.trace(LifecycleAuditStage::ControllerRegistered, "controller_registered", &controller);

        if !self.is_connected() {
            return Ok(());
        }
        let outcome = controller.dispatch(LifecycleEvent::Connected);
        self.settle_direct(&controller, LifecycleEvent::Connected, outcome)
    }

    pub fn remove(&self, controller: &ControllerRef) -> Result<bool> {
        if !self.contains(controller) {
            return Ok(false);
        }

        let outcome = if self.is_connected() {
            controller.dispatch(LifecycleEvent::Disconnected)
        } else {
            Ok(())
        };

        self.inner
            .members
            .borrow_mut()
            .retain(|member| member != controller);
        controller.set_owner(None);
        self.inner
            .host
            .record(|metrics| metrics.record_controller_removed());
        self.trace(LifecycleAuditStage::ControllerRemoved, "controller_removed", controller);

        self.settle_direct(controller, LifecycleEvent::Disconnected, outcome)
            .map(|()| true)
    }

    pub fn notify_connected(&self) -> Result<()> {
        self.inner.connected.set(true);
        self.fan_out(LifecycleEvent::Connected)
    }

    pub fn notify_disconnected(&self) -> Result<()> {
        self.inner.connected.set(false);
        self.fan_out(LifecycleEvent::Disconnected)
    }

    pub fn notify_update(&self, changed: &ChangedProperties) -> Result<()> {
        self.fan_out(LifecycleEvent::Update(Rc::new(changed.clone())))
    }

    pub fn notify_updated(&self, changed: &ChangedProperties) -> Result<()> {
        self.fan_out(LifecycleEvent::Updated(Rc::new(changed.clone())))
    }

    /// Whether this registry belongs to `controller` or to one of its nested
    /// controllers, at any depth.
    fn would_cycle(&self, controller: &ControllerRef) -> bool {
        let OwnerId::Controller(owner) = self.inner.owner else {
            return false;
        };
        let mut pending = vec![controller.clone()];
        while let Some(node) = pending.pop() {
            if node.id() == owner {
                return true;
            }
            pending.extend(node.controller_registry().members());
        }
        false
    }

    fn fan_out(&self, event: LifecycleEvent) -> Result<()> {
        let snapshot = self.members();
        let mut failures = Vec::new();
        for member in snapshot {
            if member.owner() != Some(self.inner.owner) {
                continue;
            }
            let outcome = member.dispatch(event.clone());
            absorb(&mut failures, member.id(), member.name(), event.kind(), outcome);
        }
        into_result(failures)
    }

    /// Add and remove are entry points of their own, so their failures are
    /// reported here rather than by a host fan-out.
    fn settle_direct(
        &self,
        controller: &ControllerRef,
        event: LifecycleEvent,
        outcome: Result<()>,
    ) -> Result<()> {
        let mut failures = Vec::new();
        absorb(
            &mut failures,
            controller.id(),
            controller.name(),
            event.kind(),
            outcome,
        );
        self.inner.host.report_failures(REGISTRY_TARGET, &failures);
        into_result(failures)
    }

    fn trace(&self, stage: LifecycleAuditStage, message: &str, controller: &ControllerRef) {
        let host = &self.inner.host;
        host.audit(
            LifecycleAuditEventBuilder::new(stage)
                .detail("controller", controller.id().get())
                .detail("name", controller.name())
                .detail("owner", self.inner.owner.to_string())
                .finish(),
        );
        host.log(
            LogLevel::Debug,
            REGISTRY_TARGET,
            message,
            [
                json_kv("controller", json!(controller.id().to_string())),
                json_kv("name", json!(controller.name())),
                json_kv("owner", json!(self.inner.owner.to_string())),
                json_kv("connected", json!(self.is_connected())),
            ],
        );
    }
}

fn into_result(failures: Vec<HookFailure>) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(ControllerError::Fanout(failures))
    }
}
