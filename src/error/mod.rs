mod types;

pub use types::{ControllerError, HookFailure, HookKind, Result};
