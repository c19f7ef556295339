//! Broker fan-out cost: one publish into N subscriber queues.
//!
//! Run with: `cargo bench --bench broker_fanout`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use queuedesk_core::notification::RawNotification;
use queuedesk_runtime::{Broker, Notification};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Benchmark Fixtures
// ============================================================================

fn notification() -> Notification {
    Arc::new(RawNotification::new(
        "ticket_changed",
        r#"{"action":"ticket_called","data":{"id":42,"ticket_number":"A042","status":"invited"}}"#,
    ))
}

// ============================================================================
// Benchmarks
// ============================================================================

/// Synchronous publish with drained subscribers.
fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("broker_publish");
    let message = notification();

    for subscribers in [1usize, 10, 100, 1000] {
        let broker: Broker<Notification> = Broker::new(64);
        let mut subs: Vec<_> = (0..subscribers).map(|_| broker.subscribe()).collect();

        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| {
                    black_box(broker.publish(&message));
                    for sub in &mut subs {
                        black_box(sub.try_recv());
                    }
                });
            },
        );
    }
    group.finish();
}

/// Publish when every subscriber queue is already full (all drops).
fn bench_publish_saturated(c: &mut Criterion) {
    let message = notification();
    let broker: Broker<Notification> = Broker::new(1);
    let _subs: Vec<_> = (0..100).map(|_| broker.subscribe()).collect();
    broker.publish(&message);

    c.bench_function("broker_publish_saturated_100", |b| {
        b.iter(|| black_box(broker.publish(&message)));
    });
}

/// End-to-end through the run loop: inbound send to one subscriber receive.
fn bench_run_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("broker_run_loop");
    group.measurement_time(Duration::from_secs(10));

    let runtime = tokio::runtime::Runtime::new().expect("Failed to create runtime");
    let broker: Broker<Notification> = Broker::new(64);
    let sub = Arc::new(tokio::sync::Mutex::new(broker.subscribe()));
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let _task = runtime.block_on(async { broker.clone().spawn(rx, cancel.child_token()) });
    let message = notification();

    group.bench_function("send_and_receive", |b| {
        b.to_async(&runtime).iter(|| {
            let tx = tx.clone();
            let sub = Arc::clone(&sub);
            let message = Arc::clone(&message);
            async move {
                tx.send(message).await.expect("broker stopped");
                black_box(sub.lock().await.recv().await.expect("subscription closed"));
            }
        });
    });

    group.finish();
    cancel.cancel();
}

criterion_group!(
    benches,
    bench_publish,
    bench_publish_saturated,
    bench_run_loop
);
criterion_main!(benches);
