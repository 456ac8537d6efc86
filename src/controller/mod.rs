//! Lifecycle-bound controllers that attach to a [`ReactiveHost`](crate::ReactiveHost)
//! directly or through another controller.

mod core;
mod owner;

pub use self::core::{
    Controller, ControllerContext, ControllerId, ControllerRef, ControllerScope, OwnerId,
    ReactiveController,
};
pub use owner::ControllerOwner;

pub(crate) use self::core::{LifecycleEvent, absorb};
