use criterion::{Criterion, black_box, criterion_group, criterion_main};
use futures::executor::LocalPool;
use room_controllers::logging::{LogEvent, LogSink};
use room_controllers::{
    ChangedProperties, Controller, ControllerContext, ControllerOwner, HostConfig, Logger,
    LoggingResult, ReactiveController, ReactiveHost, Result,
};

#[derive(Clone, Default)]
struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _event: &LogEvent) -> LoggingResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Tally {
    updates: u64,
}

impl ReactiveController for Tally {
    fn on_update(&mut self, changed: &ChangedProperties, cx: &ControllerContext<'_>) -> Result<()> {
        self.updates += 1;
        cx.forward_update(changed)
    }
}

/// `width` controllers per level, `depth` levels deep.
fn grow<O: ControllerOwner>(owner: &O, width: usize, depth: usize) -> Result<()> {
    for _ in 0..width {
        Controller::build(owner, |scope| {
            if depth > 1 {
                grow(scope, width, depth - 1)?;
            }
            Ok(Tally::default())
        })?;
    }
    Ok(())
}

fn build_host(pool: &LocalPool, config: HostConfig, width: usize, depth: usize) -> Result<ReactiveHost> {
    let host = ReactiveHost::with_config("x-bench", config, pool.spawner());
    host.declare_property("tick", 0)?;
    grow(&host, width, depth)?;
    host.connect()?;
    Ok(host)
}

fn update_cycle_flat(c: &mut Criterion) {
    let mut pool = LocalPool::new();
    let host = build_host(&pool, HostConfig::default(), 64, 1).expect("host");
    pool.run_until(host.update_complete()).expect("first cycle");
    let mut tick = 0u64;
    c.bench_function("update_cycle_flat_64", |b| {
        b.iter(|| {
            tick += 1;
            host.set_property("tick", black_box(tick)).expect("set");
            pool.run_until(host.update_complete()).expect("cycle");
        });
    });
}

fn update_cycle_nested(c: &mut Criterion) {
    let mut pool = LocalPool::new();
    let host = build_host(&pool, HostConfig::default(), 4, 4).expect("host");
    pool.run_until(host.update_complete()).expect("first cycle");
    let mut tick = 0u64;
    c.bench_function("update_cycle_nested_4x4", |b| {
        b.iter(|| {
            tick += 1;
            host.set_property("tick", black_box(tick)).expect("set");
            pool.run_until(host.update_complete()).expect("cycle");
        });
    });
}

fn update_cycle_logged(c: &mut Criterion) {
    let mut pool = LocalPool::new();
    let config = HostConfig::default().with_logger(Logger::new(NullSink));
    let host = build_host(&pool, config, 4, 4).expect("host");
    pool.run_until(host.update_complete()).expect("first cycle");
    c.bench_function("update_cycle_nested_logged", |b| {
        b.iter(|| {
            host.request_update().expect("request");
            pool.run_until(host.update_complete()).expect("cycle");
        });
    });
}

fn connect_toggle(c: &mut Criterion) {
    let mut pool = LocalPool::new();
    let host = build_host(&pool, HostConfig::default(), 4, 4).expect("host");
    pool.run_until(host.update_complete()).expect("first cycle");
    c.bench_function("connect_toggle_nested_4x4", |b| {
        b.iter(|| {
            host.disconnect().expect("disconnect");
            host.connect().expect("connect");
        });
    });
}

criterion_group!(
    benches,
    update_cycle_flat,
    update_cycle_nested,
    update_cycle_logged,
    connect_toggle
);
criterion_main!(benches);
