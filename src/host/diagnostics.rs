use serde_json::json;

use crate::Result;
use crate::controller::{ControllerContext, ControllerOwner, ReactiveController};
use crate::logging::{LIFECYCLE_TARGET, LogLevel, Logger, event_with_fields, json_kv, json_str};
use crate::properties::ChangedProperties;

/// Logs every lifecycle hook it receives, then forwards it to its own nested
/// controllers like any other controller.
pub struct LifecycleLoggerController {
    logger: Logger,
    level: LogLevel,
    log_connections: bool,
    log_updates: bool,
    log_values: bool,
}

impl LifecycleLoggerController {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            level: LogLevel::Debug,
            log_connections: true,
            log_updates: true,
            log_values: false,
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn log_connections(mut self, enabled: bool) -> Self {
        self.log_connections = enabled;
        self
    }

    pub fn log_updates(mut self, enabled: bool) -> Self {
        self.log_updates = enabled;
        self
    }

    /// Include previous property values, not just the changed names.
    pub fn log_values(mut self, enabled: bool) -> Self {
        self.log_values = enabled;
        self
    }

    fn emit(
        &self,
        message: &str,
        cx: &ControllerContext<'_>,
        fields: impl IntoIterator<Item = (String, serde_json::Value)>,
    ) {
        let fields = fields.into_iter().chain([
            json_str("controller", cx.id().to_string()),
            json_str("host", cx.host().id().to_string()),
        ]);
        let event = event_with_fields(self.level, LIFECYCLE_TARGET, message, fields);
        let _ = self.logger.log_event(event);
    }

    fn changed_fields(&self, changed: &ChangedProperties) -> Vec<(String, serde_json::Value)> {
        let names: Vec<&str> = changed.names().collect();
        let mut fields = vec![json_kv("changed", json!(names))];
        if self.log_values {
            let previous: serde_json::Map<String, serde_json::Value> = changed
                .iter()
                .map(|(name, value)| (name.to_string(), value.cloned().unwrap_or_default()))
                .collect();
            fields.push(json_kv("previous", previous));
        }
        fields
    }
}

impl ReactiveController for LifecycleLoggerController {
    fn name(&self) -> &str {
        "diagnostics.lifecycle_logger"
    }

    fn on_connected(&mut self, cx: &ControllerContext<'_>) -> Result<()> {
        if self.log_connections {
            self.emit(
                "controller.connected",
                cx,
                [json_kv("nested", json!(cx.registry().len()))],
            );
        }
        cx.forward_connected()
    }

    fn on_disconnected(&mut self, cx: &ControllerContext<'_>) -> Result<()> {
        if self.log_connections {
            self.emit(
                "controller.disconnected",
                cx,
                [json_kv("nested", json!(cx.registry().len()))],
            );
        }
        cx.forward_disconnected()
    }

    fn on_update(&mut self, changed: &ChangedProperties, cx: &ControllerContext<'_>) -> Result<()> {
        if self.log_updates {
            self.emit("controller.update", cx, self.changed_fields(changed));
        }
        cx.forward_update(changed)
    }

    fn on_updated(
        &mut self,
        changed: &ChangedProperties,
        cx: &ControllerContext<'_>,
    ) -> Result<()> {
        if self.log_updates {
            self.emit("controller.updated", cx, self.changed_fields(changed));
        }
        cx.forward_updated(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Controller;
    use crate::logging::MemorySink;
    use crate::ReactiveHost;
    use futures::executor::LocalPool;

    #[test]
    fn logs_each_hook_and_keeps_forwarding() {
        let mut pool = LocalPool::new();
        let host = ReactiveHost::new("x-diagnostics", pool.spawner());
        host.declare_property("mode", "idle").unwrap();
        let sink = MemorySink::new();
        let mut nested = None;
        let logger_controller = Controller::build(&host, |scope| {
            nested = Some(Controller::new(
                scope,
                LifecycleLoggerController::new(Logger::new(sink.clone())).log_values(true),
            )?);
            Ok(LifecycleLoggerController::new(Logger::new(sink.clone())))
        })
        .unwrap();

        host.connect().unwrap();
        pool.run_until(host.update_complete()).unwrap();
        host.set_property("mode", "busy").unwrap();
        pool.run_until(host.update_complete()).unwrap();
        host.disconnect().unwrap();

        let events = sink.events();
        let messages: Vec<&str> = events.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "controller.connected",
                "controller.connected",
                "controller.update",
                "controller.update",
                "controller.updated",
                "controller.updated",
                "controller.update",
                "controller.update",
                "controller.updated",
                "controller.updated",
                "controller.disconnected",
                "controller.disconnected",
            ]
        );
        assert_eq!(
            events[0].field("controller"),
            Some(&json!(logger_controller.id().to_string()))
        );
        assert_eq!(events[0].field("nested"), Some(&json!(1)));
        assert_eq!(events[0].field("host"), Some(&json!(host.id().to_string())));

        let nested_id = json!(nested.unwrap().id().to_string());
        let nested_update = events
            .iter()
            .filter(|e| e.message == "controller.update" && e.field("controller") == Some(&nested_id))
            .last()
            .unwrap();
        assert_eq!(nested_update.field("changed"), Some(&json!(["mode"])));
        assert_eq!(nested_update.field("previous"), Some(&json!({ "mode": "idle" })));
        assert_eq!(logger_controller.controllers().len(), 1);
    }

    #[test]
    fn toggles_silence_categories() {
        let mut pool = LocalPool::new();
        let host = ReactiveHost::new("x-diagnostics", pool.spawner());
        let sink = MemorySink::new();
        Controller::new(
            &host,
            LifecycleLoggerController::new(Logger::new(sink.clone()))
                .log_updates(false)
                .with_level(LogLevel::Info),
        )
        .unwrap();

        host.connect().unwrap();
        pool.run_until(host.update_complete()).unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "controller.connected");
        assert_eq!(events[0].target, LIFECYCLE_TARGET);
    }
}
