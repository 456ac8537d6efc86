//! Reactive controller lifecycle for Room hosts.
//!
//! A [`ReactiveHost`] owns reactive properties and a tree of controllers.
//! Controllers attach to the host directly or nest under other controllers,
//! and receive connect, disconnect and update notifications in registration
//! order, depth-first. Update requests are batched into cycles spawned on a
//! `futures` local executor; [`ReactiveHost::update_complete`] resolves when a
//! cycle has settled.

pub mod controller;
pub mod error;
pub mod host;
pub mod logging;
pub mod metrics;
pub mod properties;
pub mod registry;

pub use controller::{
    Controller, ControllerContext, ControllerId, ControllerOwner, ControllerRef, ControllerScope,
    OwnerId, ReactiveController,
};
pub use error::{ControllerError, HookFailure, HookKind, Result};
pub use host::audit::{
    LifecycleAudit, LifecycleAuditEvent, LifecycleAuditEventBuilder, LifecycleAuditStage,
    NullLifecycleAudit, RecordingAudit,
};
pub use host::diagnostics::LifecycleLoggerController;
pub use host::{
    HostBehavior, HostConfig, HostHandle, HostId, HostSettings, NoopBehavior, ReactiveHost,
    SettleFuture,
};
pub use logging::{
    LogEvent, LogFields, LogLevel, LogSink, Logger, LoggingError, LoggingResult, MemorySink,
    WriterSink,
};
pub use metrics::{HostMetrics, MetricSnapshot};
pub use properties::{ChangedProperties, HasChanged, PropertyStore, not_equal};
pub use registry::ControllerRegistry;
