//! Fan-out broker behavior under the run loop.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use futures::StreamExt;
use queuedesk_runtime::{Broker, Subscription};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Test Fixtures
// ============================================================================

const RECV_TIMEOUT: Duration = Duration::from_secs(1);

async fn next(sub: &mut Subscription<String>) -> Option<String> {
    timeout(RECV_TIMEOUT, sub.recv())
        .await
        .expect("subscriber did not receive in time")
}

fn envelope(action: &str) -> String {
    format!(r#"{{"action":"{action}","data":{{}}}}"#)
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test]
async fn every_subscriber_receives_every_envelope() {
    let broker: Broker<String> = Broker::new(16);
    let mut subs: Vec<_> = (0..3).map(|_| broker.subscribe()).collect();

    let (tx, rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let task = broker.clone().spawn(rx, cancel.child_token());

    tx.send(envelope("ticket_called")).await.unwrap();
    tx.send(envelope("ticket_started")).await.unwrap();

    for sub in &mut subs {
        assert_eq!(next(sub).await, Some(envelope("ticket_called")));
        assert_eq!(next(sub).await, Some(envelope("ticket_started")));
    }

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn unsubscribed_observer_stops_receiving() {
    let broker: Broker<String> = Broker::new(16);
    let mut a = broker.subscribe();
    let mut b = broker.subscribe();
    let mut c = broker.subscribe();

    let (tx, rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let task = broker.clone().spawn(rx, cancel.child_token());

    tx.send(envelope("ticket_created")).await.unwrap();
    for sub in [&mut a, &mut b, &mut c] {
        assert_eq!(next(sub).await, Some(envelope("ticket_created")));
    }

    assert!(broker.unsubscribe(b.id()));
    assert_eq!(broker.subscriber_count(), 2);

    tx.send(envelope("ticket_deleted")).await.unwrap();
    assert_eq!(next(&mut a).await, Some(envelope("ticket_deleted")));
    assert_eq!(next(&mut c).await, Some(envelope("ticket_deleted")));
    assert_eq!(next(&mut b).await, None);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn slow_subscriber_does_not_stall_the_others() {
    let broker: Broker<String> = Broker::new(2);
    let _stalled = broker.subscribe();
    let mut live = broker.subscribe();

    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let task = broker.clone().spawn(rx, cancel.child_token());

    // The stalled queue overflows after two envelopes; the live one keeps draining.
    for i in 0..20 {
        tx.send(format!("n{i}")).await.unwrap();
        assert_eq!(next(&mut live).await, Some(format!("n{i}")));
    }
    assert_eq!(broker.subscriber_count(), 2);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn subscription_is_a_stream() {
    let broker: Broker<String> = Broker::new(8);
    let sub = broker.subscribe();

    let (tx, rx) = mpsc::channel(8);
    let task = broker.clone().spawn(rx, CancellationToken::new());

    tx.send(envelope("slot_created")).await.unwrap();
    tx.send(envelope("slot_deleted")).await.unwrap();
    drop(tx);

    let received: Vec<String> = timeout(RECV_TIMEOUT, sub.collect()).await.unwrap();
    assert_eq!(
        received,
        vec![envelope("slot_created"), envelope("slot_deleted")]
    );
    task.await.unwrap();
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn cancellation_stops_the_loop_and_closes_queues() {
    let broker: Broker<String> = Broker::new(8);
    let mut sub = broker.subscribe();

    let (tx, rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let task = broker.clone().spawn(rx, cancel.child_token());

    cancel.cancel();
    timeout(RECV_TIMEOUT, task).await.unwrap().unwrap();

    assert_eq!(next(&mut sub).await, None);
    assert_eq!(broker.subscriber_count(), 0);
    // Nobody reads the inbound feed any more.
    assert!(tx.send(envelope("ticket_created")).await.is_err());
}

#[tokio::test]
async fn closed_inbound_feed_stops_the_loop() {
    let broker: Broker<String> = Broker::new(8);
    let (tx, rx) = mpsc::channel::<String>(8);
    let task = broker.clone().spawn(rx, CancellationToken::new());

    drop(tx);
    timeout(RECV_TIMEOUT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn dropped_subscription_is_pruned() {
    let broker: Broker<String> = Broker::new(8);
    let keep = broker.subscribe();
    drop(broker.subscribe());

    assert_eq!(broker.subscriber_count(), 1);
    assert_eq!(broker.publish(&envelope("ticket_created")).delivered, 1);
    drop(keep);
    assert_eq!(broker.subscriber_count(), 0);
}
