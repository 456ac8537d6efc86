use std::cell::{Cell, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::channel::oneshot;
use futures::future::{self, FutureExt, LocalBoxFuture, Shared};
use futures::task::{LocalSpawn, LocalSpawnExt};
use serde_json::{Value, json};

use crate::controller::{ControllerOwner, OwnerId};
use crate::error::{ControllerError, HookFailure, Result};
use crate::logging::{HOST_TARGET, LogLevel, event_with_fields, json_kv};
use crate::metrics::{HostMetrics, MetricSnapshot};
use crate::properties::{ChangedProperties, HasChanged, PropertyStore};
use crate::registry::ControllerRegistry;

use self::audit::{LifecycleAuditEvent, LifecycleAuditEventBuilder, LifecycleAuditStage};

pub mod audit;
mod config;
pub mod diagnostics;

pub use config::{HostConfig, HostSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(u64);

impl HostId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host#{}", self.0)
    }
}

/// Resolves once an update cycle's post-update fan-out has finished. The
/// value is `true` when no further cycle was pending at that point.
pub type SettleFuture = Shared<LocalBoxFuture<'static, Result<bool>>>;

/// The element's own lifecycle, run by the host around controller fan-out.
pub trait HostBehavior {
    fn connected(&mut self, _host: &HostHandle) -> Result<()> {
        Ok(())
    }

    fn disconnected(&mut self, _host: &HostHandle) -> Result<()> {
        Ok(())
    }

    /// Returning `false` skips the cycle: no controller hooks, no update.
    fn should_update(&mut self, _changed: &ChangedProperties) -> bool {
        true
    }

    /// The host's own computation. Runs after `on_update` fan-out and before
    /// `on_updated` fan-out.
    fn update(&mut self, _host: &HostHandle, _changed: &ChangedProperties) -> Result<()> {
        Ok(())
    }

    fn first_updated(&mut self, _host: &HostHandle, _changed: &ChangedProperties) -> Result<()> {
        Ok(())
    }

    fn updated(&mut self, _host: &HostHandle, _changed: &ChangedProperties) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBehavior;

impl HostBehavior for NoopBehavior {}

#[derive(Default)]
struct SettleState {
    sender: Option<oneshot::Sender<Result<bool>>>,
    latest: Option<SettleFuture>,
}

struct HostInner {
    id: HostId,
    name: String,
    config: HostConfig,
    handle: HostHandle,
    properties: RefCell<PropertyStore>,
    registry: ControllerRegistry,
    behavior: RefCell<Box<dyn HostBehavior>>,
    spawner: Box<dyn LocalSpawn>,
    connected: Cell<bool>,
    updating_enabled: Cell<bool>,
    update_pending: Cell<bool>,
    task_scheduled: Cell<bool>,
    has_updated: Cell<bool>,
    cycles: Cell<u64>,
    settle: RefCell<SettleState>,
    metrics: RefCell<HostMetrics>,
    started_at: Instant,
    last_metrics_emit: Cell<Instant>,
}

/// Root element driving the controller lifecycle.
///
/// Owns the reactive properties and the top-level controller registry.
/// Update cycles are batched: every request made before the spawner runs the
/// scheduled task lands in the same cycle. Nothing runs until the first
/// [`connect`](ReactiveHost::connect).
#[derive(Clone)]
pub struct ReactiveHost {
    inner: Rc<HostInner>,
}

impl ReactiveHost {
    pub fn new<S>(name: impl Into<String>, spawner: S) -> Self
    where
        S: LocalSpawn + 'static,
    {
        Self::with_behavior(name, HostConfig::default(), spawner, NoopBehavior)
    }

    pub fn with_config<S>(name: impl Into<String>, config: HostConfig, spawner: S) -> Self
    where
        S: LocalSpawn + 'static,
    {
        Self::with_behavior(name, config, spawner, NoopBehavior)
    }

    pub fn with_behavior<S, B>(
        name: impl Into<String>,
        config: HostConfig,
        spawner: S,
        behavior: B,
    ) -> Self
    where
        S: LocalSpawn + 'static,
        B: HostBehavior + 'static,
    {
        let id = HostId::next();
        let now = Instant::now();
        let inner = Rc::new_cyclic(|weak: &Weak<HostInner>| {
            let handle = HostHandle {
                id,
                inner: weak.clone(),
            };
            HostInner {
                id,
                name: name.into(),
                config,
                registry: ControllerRegistry::new(OwnerId::Host(id), handle.clone()),
                handle,
                properties: RefCell::new(PropertyStore::new()),
                behavior: RefCell::new(Box::new(behavior)),
                spawner: Box::new(spawner),
                connected: Cell::new(false),
                updating_enabled: Cell::new(false),
                update_pending: Cell::new(false),
                task_scheduled: Cell::new(false),
                has_updated: Cell::new(false),
                cycles: Cell::new(0),
                settle: RefCell::new(SettleState::default()),
                metrics: RefCell::new(HostMetrics::new()),
                started_at: now,
                last_metrics_emit: Cell::new(now),
            }
        });

        let host = Self { inner };
        host.inner.audit(
            LifecycleAuditEventBuilder::new(LifecycleAuditStage::HostConstructed)
                .detail("host", host.inner.name.as_str())
                .finish(),
        );
        host.inner.log(
            LogLevel::Info,
            "host_constructed",
            [json_kv("host", json!(host.inner.name))],
        );
        // Scheduling is gated on the first connect, so this cannot fail.
        let _ = host.inner.request_update();
        host
    }

    pub fn id(&self) -> HostId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Weak handle, as held by controllers.
    pub fn handle(&self) -> HostHandle {
        self.inner.handle.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.get()
    }

    pub fn is_update_pending(&self) -> bool {
        self.inner.update_pending.get()
    }

    pub fn has_updated(&self) -> bool {
        self.inner.has_updated.get()
    }

    pub fn metrics(&self) -> MetricSnapshot {
        self.inner
            .metrics
            .borrow()
            .snapshot(self.inner.started_at.elapsed())
    }

    pub fn declare_property(&self, name: impl Into<String>, initial: impl Into<Value>) -> Result<()> {
        self.inner
            .properties
            .borrow_mut()
            .declare(name, initial.into());
        self.inner.request_update()
    }

    pub fn declare_property_with(
        &self,
        name: impl Into<String>,
        initial: impl Into<Value>,
        has_changed: HasChanged,
    ) -> Result<()> {
        self.inner
            .properties
            .borrow_mut()
            .declare_with(name, initial.into(), has_changed);
        self.inner.request_update()
    }

    /// Assign a reactive property. A change schedules an update cycle.
    pub fn set_property(&self, name: &str, value: impl Into<Value>) -> Result<bool> {
        let changed = self
            .inner
            .properties
            .borrow_mut()
            .set(name, value.into())?;
        if changed {
            self.inner.request_update()?;
        }
        Ok(changed)
    }

    pub fn property(&self, name: &str) -> Option<Value> {
        self.inner.properties.borrow().get(name).cloned()
    }

    pub fn properties(&self) -> BTreeMap<String, Value> {
        self.inner.properties.borrow().snapshot()
    }

    pub fn request_update(&self) -> Result<()> {
        self.inner.request_update()
    }

    /// Settle signal of the newest pending or in-flight cycle.
    pub fn update_complete(&self) -> SettleFuture {
        self.inner.update_complete()
    }

    /// Attach the host. Enables updating on first use.
    pub fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.connected.replace(true) {
            return Ok(());
        }
        inner.metrics.borrow_mut().record_connect();
        inner.audit(LifecycleAuditEventBuilder::new(LifecycleAuditStage::HostConnected).finish());
        inner.log(
            LogLevel::Info,
            "host_connected",
            [json_kv("controllers", json!(inner.registry.len()))],
        );

        let behavior = inner
            .behavior_mut()
            .and_then(|mut behavior| behavior.connected(&inner.handle));
        let mut failures = Vec::new();
        collect(&mut failures, inner.registry.notify_connected());
        inner.updating_enabled.set(true);
        let scheduled = inner.schedule();
        inner.report_failures(&failures);
        behavior.and(scheduled).and(into_result(failures))
    }

    /// Detach the host. Cycles already requested still run.
    pub fn disconnect(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.connected.replace(false) {
            return Ok(());
        }
        inner.metrics.borrow_mut().record_disconnect();
        inner.audit(LifecycleAuditEventBuilder::new(LifecycleAuditStage::HostDisconnected).finish());
        inner.log(
            LogLevel::Info,
            "host_disconnected",
            [json_kv("controllers", json!(inner.registry.len()))],
        );

        let behavior = inner
            .behavior_mut()
            .and_then(|mut behavior| behavior.disconnected(&inner.handle));
        let mut failures = Vec::new();
        collect(&mut failures, inner.registry.notify_disconnected());
        inner.report_failures(&failures);
        behavior.and(into_result(failures))
    }
}

impl ControllerOwner for ReactiveHost {
    fn owner_id(&self) -> OwnerId {
        OwnerId::Host(self.inner.id)
    }

    fn host(&self) -> HostHandle {
        self.handle()
    }

    fn controller_registry(&self) -> &ControllerRegistry {
        &self.inner.registry
    }
}

impl fmt::Debug for ReactiveHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveHost")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("connected", &self.inner.connected.get())
            .field("update_pending", &self.inner.update_pending.get())
            .finish()
    }
}

impl HostInner {
    fn behavior_mut(&self) -> Result<RefMut<'_, Box<dyn HostBehavior>>> {
        self.behavior
            .try_borrow_mut()
            .map_err(|_| ControllerError::HostBusy(self.id))
    }

    fn request_update(&self) -> Result<()> {
        let coalesced = self.update_pending.get();
        self.metrics.borrow_mut().record_request(coalesced);
        if coalesced {
            return Ok(());
        }

        self.update_pending.set(true);
        let (sender, receiver) = oneshot::channel();
        let settle: SettleFuture = receiver
            .map(|received| received.unwrap_or_else(|_| Err(ControllerError::Cancelled)))
            .boxed_local()
            .shared();
        {
            let mut state = self.settle.borrow_mut();
            state.sender = Some(sender);
            state.latest = Some(settle);
        }
        self.audit(
            LifecycleAuditEventBuilder::new(LifecycleAuditStage::UpdateRequested)
                .detail("cycle", self.cycles.get() + 1)
                .finish(),
        );
        self.schedule()
    }

    /// Spawn the cycle task if one is due and none is queued yet.
    fn schedule(&self) -> Result<()> {
        if !self.updating_enabled.get() || !self.update_pending.get() || self.task_scheduled.get()
        {
            return Ok(());
        }

        let weak = self.handle.inner.clone();
        let spawned = self.spawner.spawn_local(async move {
            if let Some(inner) = weak.upgrade() {
                inner.perform_update();
            }
        });

        match spawned {
            Ok(()) => {
                self.task_scheduled.set(true);
                Ok(())
            }
            Err(err) => {
                let err = ControllerError::Spawn(err.to_string());
                self.update_pending.set(false);
                self.resolve(Err(err.clone()));
                self.log(
                    LogLevel::Error,
                    "cycle_spawn_failed",
                    [json_kv("error", json!(err.to_string()))],
                );
                Err(err)
            }
        }
    }

    fn update_complete(&self) -> SettleFuture {
        self.settle
            .borrow()
            .latest
            .clone()
            .unwrap_or_else(|| future::ready(Ok(true)).boxed_local().shared())
    }

    fn resolve(&self, outcome: Result<bool>) {
        let sender = self.settle.borrow_mut().sender.take();
        if let Some(sender) = sender {
            let _ = sender.send(outcome);
        }
    }

    fn perform_update(&self) {
        self.task_scheduled.set(false);
        if !self.update_pending.get() {
            return;
        }

        // Requests from here on belong to the next cycle.
        let sender = self.settle.borrow_mut().sender.take();
        let changed = self.properties.borrow_mut().take_changed();
        self.update_pending.set(false);
        let cycle = self.cycles.get() + 1;
        self.cycles.set(cycle);

        let changed_names: Vec<&str> = changed.names().collect();
        self.audit(
            LifecycleAuditEventBuilder::new(LifecycleAuditStage::CycleStarted)
                .detail("cycle", cycle)
                .detail("changed", json!(changed_names))
                .finish(),
        );
        self.log(
            LogLevel::Debug,
            "cycle_started",
            [
                json_kv("cycle", json!(cycle)),
                json_kv("changed", json!(changed_names)),
            ],
        );

        let mut failures = Vec::new();
        let outcome = self.run_cycle(&changed, &mut failures);
        self.report_failures(&failures);
        let outcome = outcome
            .and(into_result(failures))
            .map(|()| !self.update_pending.get());

        self.audit(
            LifecycleAuditEventBuilder::new(LifecycleAuditStage::CycleSettled)
                .detail("cycle", cycle)
                .detail("ok", outcome.is_ok())
                .finish(),
        );
        self.log(
            if outcome.is_ok() {
                LogLevel::Debug
            } else {
                LogLevel::Warn
            },
            "cycle_settled",
            [
                json_kv("cycle", json!(cycle)),
                json_kv("ok", json!(outcome.is_ok())),
                json_kv("pending", json!(self.update_pending.get())),
            ],
        );
        self.maybe_emit_metrics();

        if let Some(sender) = sender {
            let _ = sender.send(outcome);
        }
    }

    /// Controller failures are collected and the cycle carries on; a failure
    /// of the host's own behavior ends the cycle early.
    fn run_cycle(&self, changed: &ChangedProperties, failures: &mut Vec<HookFailure>) -> Result<()> {
        let handle = &self.handle;

        if !self.behavior_mut()?.should_update(changed) {
            self.metrics.borrow_mut().record_skipped();
            self.audit(LifecycleAuditEventBuilder::new(LifecycleAuditStage::CycleSkipped).finish());
            return Ok(());
        }

        collect(failures, self.registry.notify_update(changed));
        self.behavior_mut()?.update(handle, changed)?;
        self.metrics.borrow_mut().record_update();

        collect(failures, self.registry.notify_updated(changed));
        let first = !self.has_updated.replace(true);
        {
            let mut behavior = self.behavior_mut()?;
            if first {
                behavior.first_updated(handle, changed)?;
            }
            behavior.updated(handle, changed)?;
        }
        self.metrics.borrow_mut().record_updated();
        Ok(())
    }

    fn report_failures_to(&self, target: &str, failures: &[HookFailure]) {
        if failures.is_empty() {
            return;
        }
        self.metrics
            .borrow_mut()
            .record_hook_failures(failures.len());
        for failure in failures {
            self.audit(
                LifecycleAuditEventBuilder::new(LifecycleAuditStage::HookFailed)
                    .detail("controller", failure.controller.get())
                    .detail("name", failure.name.as_str())
                    .detail("hook", failure.hook.as_str())
                    .detail("message", failure.message.as_str())
                    .finish(),
            );
            self.log_to(
                LogLevel::Warn,
                target,
                "hook_failed",
                [
                    json_kv("controller", json!(failure.controller.to_string())),
                    json_kv("name", json!(failure.name)),
                    json_kv("hook", json!(failure.hook.as_str())),
                    json_kv("error", json!(failure.message)),
                ],
            );
        }
    }

    fn report_failures(&self, failures: &[HookFailure]) {
        self.report_failures_to(HOST_TARGET, failures);
    }

    fn audit(&self, event: LifecycleAuditEvent) {
        if let Some(audit) = self.config.audit.as_ref() {
            audit.record(event);
        }
    }

    fn log<I>(&self, level: LogLevel, message: &str, fields: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.log_to(level, HOST_TARGET, message, fields);
    }

    fn log_to<I>(&self, level: LogLevel, target: &str, message: &str, fields: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        if let Some(logger) = self.config.logger.as_ref() {
            if !logger.enabled(level) {
                return;
            }
            let mut event = event_with_fields(level, target, message, fields);
            event
                .fields
                .insert("host".to_string(), json!(self.name));
            let _ = logger.log_event(event);
        }
    }

    fn maybe_emit_metrics(&self) {
        let Some(logger) = self.config.logger.as_ref() else {
            return;
        };
        if self.config.metrics_interval == Duration::ZERO {
            return;
        }

        let now = Instant::now();
        if now.duration_since(self.last_metrics_emit.get()) < self.config.metrics_interval {
            return;
        }
        self.last_metrics_emit.set(now);

        let snapshot = self
            .metrics
            .borrow()
            .snapshot(now.duration_since(self.started_at));
        let mut event = snapshot.to_log_event(&self.config.metrics_target);
        event.fields.insert("host".to_string(), json!(self.name));
        let _ = logger.log_event(event);
    }
}

/// Weak reference to a [`ReactiveHost`], fixed for a controller's lifetime.
#[derive(Clone)]
pub struct HostHandle {
    id: HostId,
    inner: Weak<HostInner>,
}

impl HostHandle {
    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    pub fn upgrade(&self) -> Option<ReactiveHost> {
        self.inner.upgrade().map(|inner| ReactiveHost { inner })
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .upgrade()
            .map(|inner| inner.connected.get())
            .unwrap_or(false)
    }

    pub fn property(&self, name: &str) -> Option<Value> {
        let inner = self.inner.upgrade()?;
        let value = inner.properties.borrow().get(name).cloned();
        value
    }

    /// Schedule a cycle on the host, coalescing with any pending request.
    pub fn request_update(&self) -> Result<()> {
        let inner = self
            .inner
            .upgrade()
            .ok_or(ControllerError::HostDropped(self.id))?;
        inner.request_update()
    }

    pub(crate) fn record(&self, apply: impl FnOnce(&mut HostMetrics)) {
        if let Some(inner) = self.inner.upgrade() {
            apply(&mut inner.metrics.borrow_mut());
        }
    }

    pub(crate) fn audit(&self, event: LifecycleAuditEvent) {
        if let Some(inner) = self.inner.upgrade() {
            inner.audit(event);
        }
    }

    pub(crate) fn log<I>(&self, level: LogLevel, target: &str, message: &str, fields: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        if let Some(inner) = self.inner.upgrade() {
            inner.log_to(level, target, message, fields);
        }
    }

    pub(crate) fn report_failures(&self, target: &str, failures: &[HookFailure]) {
        if let Some(inner) = self.inner.upgrade() {
            inner.report_failures_to(target, failures);
        }
    }
}

impl PartialEq for HostHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for HostHandle {}

impl fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostHandle")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Registry fan-out only ever fails with an aggregate.
fn collect(failures: &mut Vec<HookFailure>, outcome: Result<()>) {
    if let Err(err) = outcome {
        failures.extend(err.failures().iter().cloned());
    }
}

fn into_result(failures: Vec<HookFailure>) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(ControllerError::Fanout(failures))
    }
}
