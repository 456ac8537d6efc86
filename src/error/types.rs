use std::fmt;

use thiserror::Error;

use crate::controller::{ControllerId, OwnerId};
use crate::host::HostId;

/// Unified result type for the controllers crate.
pub type Result<T> = std::result::Result<T, ControllerError>;

/// Lifecycle hook that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Connected,
    Disconnected,
    Update,
    Updated,
}

impl HookKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HookKind::Connected => "on_connected",
            HookKind::Disconnected => "on_disconnected",
            HookKind::Update => "on_update",
            HookKind::Updated => "on_updated",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single controller hook that returned an error during fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct HookFailure {
    pub controller: ControllerId,
    pub name: String,
    pub hook: HookKind,
    pub message: String,
}

impl fmt::Display for HookFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} `{}` ({}): {}",
            self.hook, self.name, self.controller, self.message
        )
    }
}

/// Errors surfaced by hosts, registries and controllers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControllerError {
    #[error("controller `{name}` ({id}) is already registered with {owner}")]
    AlreadyRegistered {
        id: ControllerId,
        name: String,
        owner: OwnerId,
    },
    #[error("controller `{name}` ({id}) cannot be registered under itself or its own nested controller {owner}")]
    CyclicRegistration {
        id: ControllerId,
        name: String,
        owner: OwnerId,
    },
    #[error("controller {0} is borrowed outside its hooks")]
    ControllerBusy(ControllerId),
    #[error("host {0} has been dropped")]
    HostDropped(HostId),
    #[error("host {0} is already running a lifecycle callback")]
    HostBusy(HostId),
    #[error("property `{0}` is not declared")]
    UnknownProperty(String),
    #[error("{0}")]
    Hook(String),
    #[error("{} lifecycle hook(s) failed: {}", .0.len(), join_failures(.0))]
    Fanout(Vec<HookFailure>),
    #[error("failed to schedule update cycle: {0}")]
    Spawn(String),
    #[error("update cycle was dropped before it settled")]
    Cancelled,
}

impl ControllerError {
    /// Build a failure from inside a controller or host hook.
    pub fn hook(message: impl Into<String>) -> Self {
        ControllerError::Hook(message.into())
    }

    /// Individual hook failures carried by a fan-out error.
    pub fn failures(&self) -> &[HookFailure] {
        match self {
            ControllerError::Fanout(failures) => failures,
            _ => &[],
        }
    }
}

fn join_failures(failures: &[HookFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
