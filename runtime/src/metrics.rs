//! Prometheus metrics for the dispatch and notification core.
//!
//! Components record through the small recorder types below ([`DispatchMetrics`],
//! [`BrokerMetrics`], [`BridgeMetrics`]). Recording is a no-op until a recorder is
//! installed, so tests and embedded uses pay nothing.
//!
//! # Example
//!
//! ```rust,no_run
//! use queuedesk_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Prometheus metrics exporter.
///
/// Installs the global recorder and serves `/metrics` on `addr`.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server bound to `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the recorder and start the HTTP listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built. A recorder that is already
    /// installed (e.g. by an earlier test) is not an error.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let (recorder, exporter) = builder
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        register_metrics();
        tokio::spawn(async move {
            // The exporter error type carries no Display or Debug impl.
            if exporter.await.is_err() {
                tracing::warn!("Metrics exporter stopped");
            }
        });
        self.handle = Some(handle);
        tracing::info!(addr = %self.addr, "Metrics exporter listening");
        Ok(())
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    // Dispatch
    describe_counter!("dispatch_tickets_created_total", "Tickets issued, by letter");
    describe_counter!("dispatch_tickets_called_total", "Tickets claimed by a window, by mode");
    describe_counter!("dispatch_empty_queue_total", "Call-next requests that found nobody waiting");
    describe_counter!("dispatch_transitions_total", "Status transitions, by target status");
    describe_counter!(
        "dispatch_integrity_warnings_total",
        "Finalizations that found no open reception log"
    );
    describe_histogram!(
        "dispatch_service_duration_seconds",
        "Time from call to finalization per reception log"
    );

    // Broker
    describe_counter!("broker_envelopes_received_total", "Envelopes read from the inbound feed");
    describe_counter!(
        "broker_envelopes_dropped_total",
        "Envelopes dropped because a subscriber queue was full"
    );
    describe_gauge!("broker_subscribers", "Currently registered subscribers");

    // Bridge
    describe_counter!("bridge_notifications_total", "Notifications forwarded, by channel");
    describe_counter!("bridge_reconnects_total", "Change-feed reconnect attempts");

    // Store
    describe_counter!("store_query_failures_total", "Failed store queries, by operation");
}

/// Dispatch metrics recorder.
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record an issued ticket.
    pub fn record_created(letter: &str) {
        counter!("dispatch_tickets_created_total", "letter" => letter.to_string()).increment(1);
    }

    /// Record a claim; `mode` is `next` or `specific`.
    pub fn record_called(mode: &'static str) {
        counter!("dispatch_tickets_called_total", "mode" => mode).increment(1);
    }

    /// Record a call-next that found nobody waiting.
    pub fn record_empty_queue() {
        counter!("dispatch_empty_queue_total").increment(1);
    }

    /// Record a status transition.
    pub fn record_transition(to: &'static str) {
        counter!("dispatch_transitions_total", "to" => to).increment(1);
    }

    /// Record a finalization without an open reception log.
    pub fn record_integrity_warning() {
        counter!("dispatch_integrity_warnings_total").increment(1);
    }

    /// Record the service duration of a closed reception log.
    pub fn record_service_duration(duration: Duration) {
        histogram!("dispatch_service_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Broker metrics recorder.
pub struct BrokerMetrics;

impl BrokerMetrics {
    /// Record an envelope read from the inbound feed.
    pub fn record_received() {
        counter!("broker_envelopes_received_total").increment(1);
    }

    /// Record an envelope dropped for a full subscriber.
    pub fn record_dropped() {
        counter!("broker_envelopes_dropped_total").increment(1);
    }

    /// Record the current subscriber count.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_subscribers(count: usize) {
        gauge!("broker_subscribers").set(count as f64);
    }
}

/// Bridge metrics recorder.
pub struct BridgeMetrics;

impl BridgeMetrics {
    /// Record a forwarded notification.
    pub fn record_notification(channel: &str) {
        counter!("bridge_notifications_total", "channel" => channel.to_string()).increment(1);
    }

    /// Record a reconnect attempt.
    pub fn record_reconnect() {
        counter!("bridge_reconnects_total").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_without_installed_recorder() {
        DispatchMetrics::record_created("A");
        DispatchMetrics::record_called("next");
        BrokerMetrics::record_subscribers(3);
        BridgeMetrics::record_notification("ticket_changed");
    }

    #[tokio::test]
    async fn metrics_server_renders_recorded_counters() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        DispatchMetrics::record_created("A");
        BrokerMetrics::record_dropped();

        // Another test may have installed the recorder first.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("dispatch_tickets_created_total"));
            assert!(rendered.contains("broker_envelopes_dropped_total"));
        }
    }
}
