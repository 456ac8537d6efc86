use std::cell::{Cell, OnceCell, Ref, RefCell, RefMut};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ControllerError, HookFailure, HookKind, Result};
use crate::host::{HostHandle, HostId};
use crate::properties::ChangedProperties;
use crate::registry::ControllerRegistry;

use super::ControllerOwner;

const DEFAULT_NAME: &str = "controller";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControllerId(u64);

impl ControllerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "controller#{}", self.0)
    }
}

/// Identity of the immediate owner a controller is registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerId {
    Host(HostId),
    Controller(ControllerId),
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerId::Host(id) => id.fmt(f),
            OwnerId::Controller(id) => id.fmt(f),
        }
    }
}

/// Lifecycle hooks forwarded from the root host.
///
/// Every default implementation is the base step: it forwards the event to the
/// controllers registered with this controller. An override that does not call
/// the matching `cx.forward_*` method cuts its nested controllers off from that
/// event; nothing detects the omission.
///
/// ```ignore
/// fn on_connected(&mut self, cx: &ControllerContext<'_>) -> Result<()> {
///     self.connected += 1;
///     cx.forward_connected()
/// }
/// ```
pub trait ReactiveController {
    fn name(&self) -> &str {
        DEFAULT_NAME
    }

    /// The owner became connected, or this controller was added to a connected owner.
    fn on_connected(&mut self, cx: &ControllerContext<'_>) -> Result<()> {
        cx.forward_connected()
    }

    /// The owner disconnected, or this controller was removed from a connected owner.
    fn on_disconnected(&mut self, cx: &ControllerContext<'_>) -> Result<()> {
        cx.forward_disconnected()
    }

    /// Runs before the host's own update, once per cycle.
    fn on_update(&mut self, changed: &ChangedProperties, cx: &ControllerContext<'_>) -> Result<()> {
        cx.forward_update(changed)
    }

    /// Runs after the host's own update, once per cycle.
    fn on_updated(
        &mut self,
        changed: &ChangedProperties,
        cx: &ControllerContext<'_>,
    ) -> Result<()> {
        cx.forward_updated(changed)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum LifecycleEvent {
    Connected,
    Disconnected,
    Update(Rc<ChangedProperties>),
    Updated(Rc<ChangedProperties>),
}

impl LifecycleEvent {
    pub(crate) fn kind(&self) -> HookKind {
        match self {
            LifecycleEvent::Connected => HookKind::Connected,
            LifecycleEvent::Disconnected => HookKind::Disconnected,
            LifecycleEvent::Update(_) => HookKind::Update,
            LifecycleEvent::Updated(_) => HookKind::Updated,
        }
    }

    fn deliver<C>(&self, state: &mut C, cx: &ControllerContext<'_>) -> Result<()>
    where
        C: ReactiveController + ?Sized,
    {
        match self {
            LifecycleEvent::Connected => state.on_connected(cx),
            LifecycleEvent::Disconnected => state.on_disconnected(cx),
            LifecycleEvent::Update(changed) => state.on_update(changed, cx),
            LifecycleEvent::Updated(changed) => state.on_updated(changed, cx),
        }
    }
}

/// Fold a hook outcome into `failures`, attributing bare errors to `id`.
pub(crate) fn absorb(
    failures: &mut Vec<HookFailure>,
    id: ControllerId,
    name: &str,
    hook: HookKind,
    outcome: Result<()>,
) {
    match outcome {
        Ok(()) => {}
        Err(ControllerError::Fanout(nested)) => failures.extend(nested),
        Err(err) => failures.push(HookFailure {
            controller: id,
            name: name.to_string(),
            hook,
            message: err.to_string(),
        }),
    }
}

struct ControllerMeta {
    id: ControllerId,
    name: OnceCell<String>,
    host: HostHandle,
    owner: Cell<Option<OwnerId>>,
    registry: ControllerRegistry,
    in_hook: Cell<bool>,
    deferred: RefCell<VecDeque<LifecycleEvent>>,
}

impl ControllerMeta {
    fn new(host: HostHandle) -> Self {
        let id = ControllerId::next();
        Self {
            id,
            name: OnceCell::new(),
            registry: ControllerRegistry::new(OwnerId::Controller(id), host.clone()),
            host,
            owner: Cell::new(None),
            in_hook: Cell::new(false),
            deferred: RefCell::new(VecDeque::new()),
        }
    }

    fn name(&self) -> &str {
        self.name.get().map(String::as_str).unwrap_or(DEFAULT_NAME)
    }

    fn pop_deferred(&self) -> Option<LifecycleEvent> {
        self.deferred.borrow_mut().pop_front()
    }
}

struct ControllerNode<C: ?Sized> {
    meta: ControllerMeta,
    state: RefCell<C>,
}

impl<C: ReactiveController + ?Sized> ControllerNode<C> {
    /// Deliver `event`. An event arriving while this controller is inside one
    /// of its own hooks is queued and delivered once that hook returns. State
    /// borrowed from outside a hook fails the delivery with `ControllerBusy`.
    fn dispatch(&self, event: LifecycleEvent) -> Result<()> {
        if self.meta.in_hook.get() {
            self.meta.deferred.borrow_mut().push_back(event);
            return Ok(());
        }

        let mut failures = Vec::new();
        let mut next = Some(event);
        while let Some(event) = next.take() {
            let kind = event.kind();
            let outcome = match self.state.try_borrow_mut() {
                Ok(mut state) => {
                    let cx = ControllerContext { meta: &self.meta };
                    self.meta.in_hook.set(true);
                    let outcome = event.deliver(&mut *state, &cx);
                    self.meta.in_hook.set(false);
                    outcome
                }
                Err(_) => Err(ControllerError::ControllerBusy(self.meta.id)),
            };
            absorb(&mut failures, self.meta.id, self.meta.name(), kind, outcome);
            next = self.meta.pop_deferred();
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ControllerError::Fanout(failures))
        }
    }
}

/// Handle passed to every hook invocation.
pub struct ControllerContext<'a> {
    meta: &'a ControllerMeta,
}

impl ControllerContext<'_> {
    pub fn id(&self) -> ControllerId {
        self.meta.id
    }

    pub fn name(&self) -> &str {
        self.meta.name()
    }

    pub fn owner(&self) -> Option<OwnerId> {
        self.meta.owner.get()
    }

    /// Registry holding this controller's nested controllers.
    pub fn registry(&self) -> &ControllerRegistry {
        &self.meta.registry
    }

    pub fn forward_connected(&self) -> Result<()> {
        self.meta.registry.notify_connected()
    }

    pub fn forward_disconnected(&self) -> Result<()> {
        self.meta.registry.notify_disconnected()
    }

    pub fn forward_update(&self, changed: &ChangedProperties) -> Result<()> {
        self.meta.registry.notify_update(changed)
    }

    pub fn forward_updated(&self, changed: &ChangedProperties) -> Result<()> {
        self.meta.registry.notify_updated(changed)
    }
}

impl ControllerOwner for ControllerContext<'_> {
    fn owner_id(&self) -> OwnerId {
        OwnerId::Controller(self.meta.id)
    }

    fn host(&self) -> HostHandle {
        self.meta.host.clone()
    }

    fn controller_registry(&self) -> &ControllerRegistry {
        &self.meta.registry
    }
}

/// Owner view of a controller that is still being built, so its state can
/// create nested controllers before it exists.
pub struct ControllerScope<'a> {
    meta: &'a ControllerMeta,
}

impl ControllerOwner for ControllerScope<'_> {
    fn owner_id(&self) -> OwnerId {
        OwnerId::Controller(self.meta.id)
    }

    fn host(&self) -> HostHandle {
        self.meta.host.clone()
    }

    fn controller_registry(&self) -> &ControllerRegistry {
        &self.meta.registry
    }
}

/// Typed handle to a registered controller.
pub struct Controller<C> {
    node: Rc<ControllerNode<C>>,
}

impl<C> Clone for Controller<C> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
        }
    }
}

impl<C: ReactiveController + 'static> Controller<C> {
    /// Create a controller and register it with `owner`. Its host is the
    /// owner's root host.
    pub fn new<O>(owner: &O, state: C) -> Result<Self>
    where
        O: ControllerOwner + ?Sized,
    {
        Self::build(owner, |_| Ok(state))
    }

    /// Like [`Controller::new`], but `init` may register nested controllers
    /// through the scope before the state is assembled.
    pub fn build<O, F>(owner: &O, init: F) -> Result<Self>
    where
        O: ControllerOwner + ?Sized,
        F: FnOnce(&ControllerScope<'_>) -> Result<C>,
    {
        let host = owner.host();
        if !host.is_alive() {
            return Err(ControllerError::HostDropped(host.id()));
        }
        let meta = ControllerMeta::new(host);
        let state = init(&ControllerScope { meta: &meta })?;
        let _ = meta.name.set(state.name().to_string());
        let controller = Self {
            node: Rc::new(ControllerNode {
                meta,
                state: RefCell::new(state),
            }),
        };
        owner.controller_registry().add(controller.to_ref())?;
        Ok(controller)
    }

    pub fn to_ref(&self) -> ControllerRef {
        let node: Rc<ControllerNode<dyn ReactiveController>> = self.node.clone();
        ControllerRef { node }
    }
}

impl<C> Controller<C> {
    pub fn id(&self) -> ControllerId {
        self.node.meta.id
    }

    pub fn name(&self) -> &str {
        self.node.meta.name()
    }

    pub fn owner(&self) -> Option<OwnerId> {
        self.node.meta.owner.get()
    }

    /// Panics if the controller is currently inside one of its hooks. While
    /// the returned guard is alive, lifecycle events addressed to this
    /// controller fail with [`ControllerError::ControllerBusy`].
    pub fn borrow(&self) -> Ref<'_, C> {
        self.node.state.borrow()
    }

    /// Panics if the controller is currently inside one of its hooks. Events
    /// arriving while the guard is alive fail with `ControllerBusy`.
    pub fn borrow_mut(&self) -> RefMut<'_, C> {
        self.node.state.borrow_mut()
    }
}

impl<C> ControllerOwner for Controller<C> {
    fn owner_id(&self) -> OwnerId {
        OwnerId::Controller(self.node.meta.id)
    }

    fn host(&self) -> HostHandle {
        self.node.meta.host.clone()
    }

    fn controller_registry(&self) -> &ControllerRegistry {
        &self.node.meta.registry
    }
}

impl<C> PartialEq for Controller<C> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
    }
}

impl<C> fmt::Debug for Controller<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("owner", &self.owner())
            .finish()
    }
}

/// Type-erased controller handle, as stored by registries.
#[derive(Clone)]
pub struct ControllerRef {
    node: Rc<ControllerNode<dyn ReactiveController>>,
}

impl ControllerRef {
    pub fn id(&self) -> ControllerId {
        self.node.meta.id
    }

    pub fn name(&self) -> &str {
        self.node.meta.name()
    }

    pub fn owner(&self) -> Option<OwnerId> {
        self.node.meta.owner.get()
    }

    pub(crate) fn set_owner(&self, owner: Option<OwnerId>) {
        self.node.meta.owner.set(owner);
    }

    pub(crate) fn dispatch(&self, event: LifecycleEvent) -> Result<()> {
        self.node.dispatch(event)
    }
}

impl ControllerOwner for ControllerRef {
    fn owner_id(&self) -> OwnerId {
        OwnerId::Controller(self.node.meta.id)
    }

    fn host(&self) -> HostHandle {
        self.node.meta.host.clone()
    }

    fn controller_registry(&self) -> &ControllerRegistry {
        &self.node.meta.registry
    }
}

impl PartialEq for ControllerRef {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl fmt::Debug for ControllerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerRef")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("owner", &self.owner())
            .finish()
    }
}

impl<C: ReactiveController + 'static> From<&Controller<C>> for ControllerRef {
    fn from(controller: &Controller<C>) -> Self {
        controller.to_ref()
    }
}

impl<C: ReactiveController + 'static> From<Controller<C>> for ControllerRef {
    fn from(controller: Controller<C>) -> Self {
        controller.to_ref()
    }
}

impl From<&ControllerRef> for ControllerRef {
    fn from(controller: &ControllerRef) -> Self {
        controller.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReactiveHost;
    use futures::executor::LocalPool;

    #[derive(Default)]
    struct Probe {
        seen: Vec<HookKind>,
    }

    impl ReactiveController for Probe {
        fn name(&self) -> &str {
            "probe"
        }

        fn on_connected(&mut self, cx: &ControllerContext<'_>) -> Result<()> {
            self.seen.push(HookKind::Connected);
            cx.forward_connected()
        }

        fn on_disconnected(&mut self, cx: &ControllerContext<'_>) -> Result<()> {
            self.seen.push(HookKind::Disconnected);
            cx.forward_disconnected()
        }
    }

    #[test]
    fn ids_are_unique_and_displayed() {
        let first = ControllerId::next();
        let second = ControllerId::next();
        assert_ne!(first, second);
        assert_eq!(ControllerId::from_raw(7).to_string(), "controller#7");
    }

    #[test]
    fn typed_and_erased_handles_share_identity() {
        let pool = LocalPool::new();
        let host = ReactiveHost::new("x-probe", pool.spawner());
        let probe = Controller::new(&host, Probe::default()).unwrap();
        let erased = probe.to_ref();
        assert_eq!(erased.id(), probe.id());
        assert_eq!(erased.name(), "probe");
        assert_eq!(probe.owner(), Some(OwnerId::Host(host.id())));
        assert_eq!(host.controllers(), vec![erased]);
    }

    #[test]
    fn build_registers_nested_controllers_with_the_new_controller() {
        let pool = LocalPool::new();
        let host = ReactiveHost::new("x-probe", pool.spawner());
        let mut nested = None;
        let parent = Controller::build(&host, |scope| {
            nested = Some(Controller::new(scope, Probe::default())?);
            Ok(Probe::default())
        })
        .unwrap();
        let nested = nested.unwrap();
        assert_eq!(nested.owner(), Some(OwnerId::Controller(parent.id())));
        assert_eq!(nested.host(), host.handle());
        assert_eq!(parent.controllers().len(), 1);
    }

    /// Dispatches `Disconnected` to itself from inside `on_connected`.
    #[derive(Default)]
    struct Reentrant {
        me: Option<ControllerRef>,
        seen: Vec<HookKind>,
    }

    impl ReactiveController for Reentrant {
        fn on_connected(&mut self, cx: &ControllerContext<'_>) -> Result<()> {
            self.seen.push(HookKind::Connected);
            if let Some(me) = self.me.take() {
                me.dispatch(LifecycleEvent::Disconnected)?;
                self.seen.push(HookKind::Update);
            }
            cx.forward_connected()
        }

        fn on_disconnected(&mut self, cx: &ControllerContext<'_>) -> Result<()> {
            self.seen.push(HookKind::Disconnected);
            cx.forward_disconnected()
        }
    }

    #[test]
    fn dispatch_while_inside_own_hook_is_deferred() {
        let pool = LocalPool::new();
        let host = ReactiveHost::new("x-probe", pool.spawner());
        let reentrant = Controller::new(&host, Reentrant::default()).unwrap();
        reentrant.borrow_mut().me = Some(reentrant.to_ref());

        reentrant.to_ref().dispatch(LifecycleEvent::Connected).unwrap();
        assert_eq!(
            reentrant.borrow().seen,
            vec![HookKind::Connected, HookKind::Update, HookKind::Disconnected]
        );
    }

    #[test]
    fn outside_borrow_fails_delivery_instead_of_queueing() {
        let pool = LocalPool::new();
        let host = ReactiveHost::new("x-probe", pool.spawner());
        host.controller_registry().notify_connected().unwrap();
        let probe = Controller::new(&host, Probe::default()).unwrap();

        let err = {
            let _held = probe.borrow();
            host.remove_controller(&probe).unwrap_err()
        };
        let failures = err.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].controller, probe.id());
        assert_eq!(failures[0].hook, HookKind::Disconnected);
        assert_eq!(
            failures[0].message,
            ControllerError::ControllerBusy(probe.id()).to_string()
        );
        assert_eq!(probe.owner(), None);

        probe.to_ref().dispatch(LifecycleEvent::Update(Rc::default())).unwrap();
        assert_eq!(probe.borrow().seen, vec![HookKind::Connected]);
    }

    #[test]
    fn absorb_flattens_nested_fanout() {
        let mut failures = Vec::new();
        let id = ControllerId::from_raw(9);
        absorb(&mut failures, id, "outer", HookKind::Update, Ok(()));
        absorb(
            &mut failures,
            id,
            "outer",
            HookKind::Update,
            Err(ControllerError::hook("own")),
        );
        absorb(
            &mut failures,
            id,
            "outer",
            HookKind::Update,
            Err(ControllerError::Fanout(vec![HookFailure {
                controller: ControllerId::from_raw(10),
                name: "inner".into(),
                hook: HookKind::Update,
                message: "nested".into(),
            }])),
        );
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].controller, id);
        assert_eq!(failures[1].name, "inner");
    }
}
