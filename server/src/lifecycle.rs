//! Background task lifecycle and graceful shutdown.
//!
//! The notification pipeline is two long-lived tasks joined by a bounded channel:
//!
//! 1. [`NotifierBridge`] reads the change feed and forwards raw notifications
//! 2. [`Broker`] copies each one into every subscriber queue
//!
//! Both run under child tokens of the application's root token. Shutdown cancels
//! the root, then waits for each task under a timeout.

use crate::config::Config;
use queuedesk_core::change_feed::ChangeFeedConnector;
use queuedesk_runtime::{Broker, Notification, NotifierBridge};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The running bridge and broker tasks.
pub struct NotificationPipeline {
    broker: Broker<Notification>,
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl NotificationPipeline {
    /// Spawn the bridge and broker under children of `root`.
    #[must_use]
    pub fn spawn(
        connector: Arc<dyn ChangeFeedConnector>,
        config: &Config,
        root: &CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.broker.inbound_capacity.max(1));
        let broker = Broker::new(config.broker.subscriber_capacity);

        let bridge = NotifierBridge::new(connector, tx)
            .channels(config.notify.channels.clone())
            .retry_delay(config.notify.retry_delay);

        let tasks = vec![
            ("broker", broker.clone().spawn(rx, root.child_token())),
            ("bridge", bridge.spawn(root.child_token())),
        ];
        info!(
            channels = ?config.notify.channels,
            subscriber_capacity = config.broker.subscriber_capacity,
            "Notification pipeline started"
        );

        Self {
            broker,
            cancel: root.clone(),
            tasks,
        }
    }

    /// Handle to the broker, for registering observers.
    #[must_use]
    pub const fn broker(&self) -> &Broker<Notification> {
        &self.broker
    }

    /// Cancel both tasks and wait up to `timeout` for each to finish.
    pub async fn shutdown(self, timeout: Duration) {
        self.cancel.cancel();
        for (name, handle) in self.tasks {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => info!(task = name, "Task stopped gracefully"),
                Ok(Err(e)) => warn!(task = name, error = %e, "Task failed"),
                Err(_) => warn!(task = name, "Task shutdown timed out"),
            }
        }
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
///
/// A handler that cannot be installed is logged and never fires; the other one
/// still does.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
