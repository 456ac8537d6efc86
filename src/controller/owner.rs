use crate::error::Result;
use crate::host::HostHandle;
use crate::registry::ControllerRegistry;

use super::{ControllerRef, OwnerId};

/// Implemented by everything controllers can be registered with: hosts,
/// controllers, and the scopes/contexts handed to controller code.
pub trait ControllerOwner {
    fn owner_id(&self) -> OwnerId;

    /// Root host at the top of this owner's lifecycle chain.
    fn host(&self) -> HostHandle;

    fn controller_registry(&self) -> &ControllerRegistry;

    /// Register `controller`. A connected owner delivers `on_connected` immediately.
    fn add_controller(&self, controller: impl Into<ControllerRef>) -> Result<()>
    where
        Self: Sized,
    {
        self.controller_registry().add(controller.into())
    }

    /// Unregister `controller`. A connected owner delivers `on_disconnected`
    /// first. Returns `false` when it was not registered here.
    fn remove_controller(&self, controller: impl Into<ControllerRef>) -> Result<bool>
    where
        Self: Sized,
    {
        self.controller_registry().remove(&controller.into())
    }

    fn controllers(&self) -> Vec<ControllerRef> {
        self.controller_registry().members()
    }

    /// Ask the root host for a new update cycle.
    fn request_update(&self) -> Result<()> {
        self.host().request_update()
    }
}
