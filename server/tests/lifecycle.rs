//! Notification pipeline lifecycle against a scripted change feed.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use queuedesk_server::{Config, NotificationPipeline};
use queuedesk_testing::ScriptedFeedConnector;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn config(vars: &[(&str, &str)]) -> Config {
    let vars: Vec<(String, String)> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    Config::from_lookup(|key| {
        vars.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    })
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within 1s");
}

#[tokio::test]
async fn pipeline_fans_feed_notifications_out_to_subscribers() {
    let (connector, script) = ScriptedFeedConnector::new();
    let root = CancellationToken::new();
    let pipeline = NotificationPipeline::spawn(Arc::new(connector), &config(&[]), &root);

    let mut first = pipeline.broker().subscribe();
    let mut second = pipeline.broker().subscribe();
    wait_until(|| script.is_connected()).await;
    assert_eq!(
        script.subscribed_channels(),
        vec!["ticket_changed", "schedule_changed"]
    );

    script.notify("ticket_changed", r#"{"action":"ticket_created","data":{}}"#);

    for sub in [&mut first, &mut second] {
        let received = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.channel, "ticket_changed");
        assert_eq!(received.payload, r#"{"action":"ticket_created","data":{}}"#);
    }

    pipeline.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn pipeline_listens_on_configured_channels() {
    let (connector, script) = ScriptedFeedConnector::new();
    let root = CancellationToken::new();
    let pipeline = NotificationPipeline::spawn(
        Arc::new(connector),
        &config(&[("NOTIFY_CHANNELS", "ticket_changed")]),
        &root,
    );

    wait_until(|| script.is_connected()).await;
    assert_eq!(script.subscribed_channels(), vec!["ticket_changed"]);
    pipeline.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn shutdown_closes_subscribers_and_releases_the_feed() {
    let (connector, script) = ScriptedFeedConnector::new();
    let root = CancellationToken::new();
    let pipeline = NotificationPipeline::spawn(Arc::new(connector), &config(&[]), &root);
    let broker = pipeline.broker().clone();
    let mut sub = broker.subscribe();
    wait_until(|| script.is_connected()).await;

    pipeline.shutdown(Duration::from_secs(1)).await;

    assert!(root.is_cancelled());
    assert!(!script.is_connected());
    assert_eq!(broker.subscriber_count(), 0);
    assert_eq!(sub.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn pipeline_retries_with_configured_delay() {
    let (connector, script) = ScriptedFeedConnector::new();
    script.fail_next_connects(1);
    let root = CancellationToken::new();
    let pipeline = NotificationPipeline::spawn(
        Arc::new(connector),
        &config(&[("NOTIFY_RETRY_DELAY_SECS", "2")]),
        &root,
    );

    tokio::time::sleep(Duration::from_millis(1_900)).await;
    assert_eq!(script.connect_attempts(), 1);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(script.connect_attempts(), 2);
    assert!(script.is_connected());

    pipeline.shutdown(Duration::from_secs(1)).await;
}
