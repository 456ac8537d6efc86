use std::rc::Rc;

use futures::executor::LocalPool;
use room_controllers::{
    ChangedProperties, Controller, ControllerContext, ControllerOwner, HostBehavior, HostConfig,
    HostHandle, LifecycleLoggerController, LogLevel, Logger, ReactiveController, ReactiveHost,
    RecordingAudit, Result, WriterSink,
};

/// Counts clicks and asks for a cycle whenever the count moves.
struct ClickCounter {
    clicks: u32,
}

impl ReactiveController for ClickCounter {
    fn name(&self) -> &str {
        "click_counter"
    }

    fn on_update(&mut self, changed: &ChangedProperties, cx: &ControllerContext<'_>) -> Result<()> {
        if changed.contains("label") {
            self.clicks += 1;
            println!("  click_counter: label changed, {} click(s)", self.clicks);
        }
        cx.forward_update(changed)
    }
}

struct Banner;

impl HostBehavior for Banner {
    fn update(&mut self, host: &HostHandle, _changed: &ChangedProperties) -> Result<()> {
        let label = host.property("label").unwrap_or_default();
        println!("  render: [{label}]");
        Ok(())
    }

    fn first_updated(&mut self, _host: &HostHandle, _changed: &ChangedProperties) -> Result<()> {
        println!("  first render done");
        Ok(())
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mut pool = LocalPool::new();
    let audit = Rc::new(RecordingAudit::new());
    let logger = Logger::new(WriterSink::stderr()).with_min_level(LogLevel::Debug);
    let config = HostConfig::default()
        .with_logger(logger.clone())
        .with_audit(audit.clone());

    let host = ReactiveHost::with_behavior("x-banner", config, pool.spawner(), Banner);
    host.declare_property("label", "hello")?;

    let tracer = Controller::build(&host, |scope| {
        Controller::new(scope, ClickCounter { clicks: 0 })?;
        Ok(LifecycleLoggerController::new(logger.clone()).log_values(true))
    })?;

    println!("connect");
    host.connect()?;
    pool.run_until(host.update_complete())?;

    println!("set label twice in one tick");
    host.set_property("label", "hi")?;
    host.set_property("label", "hey")?;
    pool.run_until(host.update_complete())?;

    println!("nested controller requests a cycle");
    if let Some(nested) = tracer.controllers().first() {
        nested.request_update()?;
    }
    pool.run_until(host.update_complete())?;

    println!("disconnect");
    host.disconnect()?;

    println!("audit trail:");
    for event in audit.events() {
        println!("  {:?} {:?}", event.stage, event.details);
    }
    println!("metrics: {:?}", host.metrics());
    Ok(())
}
