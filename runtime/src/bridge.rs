//! Change notifier bridge: store notifications → broker inbound feed.
//!
//! The bridge owns one change-feed session at a time. It forwards every payload
//! untouched, reconnects after a fixed delay when the session fails, and exits
//! cleanly (dropping the session) when its cancellation token fires or the broker
//! side of the channel goes away.

use crate::metrics::BridgeMetrics;
use crate::retry::RetryPolicy;
use queuedesk_core::change_feed::{ChangeFeed, ChangeFeedConnector, FeedError};
use queuedesk_core::notification::RawNotification;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the broker carries: a shared, uninterpreted store notification.
pub type Notification = Arc<RawNotification>;

/// Default channels the store's triggers notify on.
pub const DEFAULT_CHANNELS: [&str; 2] = ["ticket_changed", "schedule_changed"];

/// Default reconnect delay.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

enum SessionEnd {
    Cancelled,
    BrokerGone,
    Failed(FeedError),
}

/// Forwards change notifications into the broker.
///
/// # Example
///
/// ```rust,ignore
/// let (tx, rx) = mpsc::channel(256);
/// let bridge = NotifierBridge::new(Arc::new(PgChangeFeedConnector::new(pool)), tx)
///     .retry_delay(Duration::from_secs(5));
/// let bridge_task = bridge.spawn(shutdown.child_token());
/// let broker_task = broker.clone().spawn(rx, shutdown.child_token());
/// ```
pub struct NotifierBridge {
    connector: Arc<dyn ChangeFeedConnector>,
    channels: Vec<String>,
    outbound: mpsc::Sender<Notification>,
    retry: RetryPolicy,
}

impl NotifierBridge {
    /// Create a bridge listening on [`DEFAULT_CHANNELS`] with a fixed 5s backoff.
    #[must_use]
    pub fn new(connector: Arc<dyn ChangeFeedConnector>, outbound: mpsc::Sender<Notification>) -> Self {
        Self {
            connector,
            channels: DEFAULT_CHANNELS.iter().map(ToString::to_string).collect(),
            outbound,
            retry: RetryPolicy::fixed(DEFAULT_RETRY_DELAY),
        }
    }

    /// Set the channels to listen on.
    #[must_use]
    pub fn channels(mut self, channels: Vec<String>) -> Self {
        self.channels = channels;
        self
    }

    /// Use a fixed reconnect delay.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry = RetryPolicy::fixed(delay);
        self
    }

    /// Use a custom reconnect policy. Its retry limit is ignored; the bridge
    /// reconnects for as long as it runs.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Spawn [`run`](Self::run) on the Tokio runtime.
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Run until cancelled or until the broker stops reading.
    pub async fn run(self, cancel: CancellationToken) {
        info!(channels = ?self.channels, "Notifier bridge started");
        let mut attempt = 0;

        loop {
            let connected = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = self.connector.connect(&self.channels) => result,
            };

            match connected {
                Ok(mut feed) => {
                    attempt = 0;
                    info!(channels = ?self.channels, "Listening for change notifications");
                    match self.pump(feed.as_mut(), &cancel).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::BrokerGone => {
                            info!("Broker inbound closed, notifier bridge exiting");
                            break;
                        }
                        SessionEnd::Failed(e) => {
                            warn!(error = %e, "Change feed session failed");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to open change feed");
                }
            }

            let delay = self.retry.delay_for_attempt(attempt);
            attempt = attempt.saturating_add(1);
            BridgeMetrics::record_reconnect();
            warn!(delay_ms = delay.as_millis(), attempt, "Reconnecting change feed");

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        info!("Notifier bridge stopped");
    }

    async fn pump(&self, feed: &mut dyn ChangeFeed, cancel: &CancellationToken) -> SessionEnd {
        loop {
            let received = tokio::select! {
                biased;
                () = cancel.cancelled() => return SessionEnd::Cancelled,
                received = feed.recv() => received,
            };

            let notification = match received {
                Ok(notification) => notification,
                Err(e) => return SessionEnd::Failed(e),
            };

            debug!(
                channel = %notification.channel,
                bytes = notification.payload.len(),
                "Forwarding change notification"
            );
            BridgeMetrics::record_notification(&notification.channel);

            tokio::select! {
                biased;
                () = cancel.cancelled() => return SessionEnd::Cancelled,
                sent = self.outbound.send(Arc::new(notification)) => {
                    if sent.is_err() {
                        return SessionEnd::BrokerGone;
                    }
                }
            }
        }
    }
}
