//! Refresh-on-signal observer feed.
//!
//! An [`ObserverFeed`] turns one broker subscription into a stream of projection views:
//! a snapshot first, then a fresh view after every notification the projection
//! concerns. Payloads are only decoded to decide whether to refresh; the view itself
//! always comes from the store.

use crate::sse;
use async_stream::stream;
use futures::{Stream, StreamExt};
use queuedesk_core::notification::{DecodeError, Envelope};
use queuedesk_core::projection::Projection;
use queuedesk_runtime::{Notification, Subscription};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One observer: a projection instance bound to a subscription.
pub struct ObserverFeed<P: Projection> {
    projection: Arc<P>,
    key: P::Key,
    subscription: Subscription<Notification>,
    cancel: CancellationToken,
    keepalive: Option<Duration>,
}

enum Next<V> {
    View(Option<V>),
    Keepalive,
}

impl<P> ObserverFeed<P>
where
    P: Projection + 'static,
    P::Key: 'static,
    P::View: 'static,
{
    /// Bind `projection` for `key` to `subscription`.
    #[must_use]
    pub fn new(projection: Arc<P>, key: P::Key, subscription: Subscription<Notification>) -> Self {
        Self {
            projection,
            key,
            subscription,
            cancel: CancellationToken::new(),
            keepalive: None,
        }
    }

    /// End the feed when `cancel` fires, e.g. on client disconnect.
    #[must_use]
    pub fn cancel_on(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Emit a comment frame from [`frames`](Self::frames) after every `period`
    /// without a view, so proxies keep idle connections open.
    #[must_use]
    pub fn keepalive(mut self, period: Duration) -> Self {
        self.keepalive = Some(period);
        self
    }

    /// Views: a snapshot, then one per relevant notification.
    ///
    /// Ends when cancelled or when the subscription is closed. Dropping the stream
    /// drops the subscription, which unsubscribes it.
    pub fn views(self) -> impl Stream<Item = P::View> + Send {
        let Self {
            projection,
            key,
            mut subscription,
            cancel,
            ..
        } = self;

        stream! {
            debug!(
                projection = projection.name(),
                ?key,
                subscriber_id = %subscription.id(),
                "Observer attached"
            );
            match projection.current(&key).await {
                Ok(view) => yield view,
                Err(e) => warn!(projection = projection.name(), ?key, error = %e, "Initial snapshot failed"),
            }

            loop {
                let notification = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    next = subscription.recv() => match next {
                        Some(notification) => notification,
                        None => break,
                    },
                };

                let envelope = match Envelope::decode(&notification.payload) {
                    Ok(envelope) => envelope,
                    Err(DecodeError::UnknownAction(action)) => {
                        debug!(%action, channel = %notification.channel, "Ignoring unknown action");
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, channel = %notification.channel, "Dropping malformed notification");
                        continue;
                    }
                };
                if !projection.concerns(&envelope) {
                    continue;
                }

                match projection.current(&key).await {
                    Ok(view) => yield view,
                    Err(e) => warn!(
                        projection = projection.name(),
                        ?key,
                        action = envelope.action(),
                        error = %e,
                        "Projection refresh failed"
                    ),
                }
            }

            debug!(projection = projection.name(), ?key, "Observer detached");
        }
    }

    /// Server-sent-event frames named after the projection, with keepalive comments
    /// in between when [`keepalive`](Self::keepalive) is set.
    pub fn frames(self) -> impl Stream<Item = String> + Send {
        let event = self.projection.name().to_string();
        let keepalive = self.keepalive;
        let views = self.views();

        stream! {
            let mut views = std::pin::pin!(views);
            let mut ticks = keepalive.map(|period| {
                let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticks
            });

            loop {
                let next = match ticks.as_mut() {
                    Some(ticks) => tokio::select! {
                        biased;
                        view = views.next() => Next::View(view),
                        _ = ticks.tick() => Next::Keepalive,
                    },
                    None => Next::View(views.next().await),
                };

                match next {
                    Next::View(Some(view)) => {
                        if let Some(ticks) = ticks.as_mut() {
                            ticks.reset();
                        }
                        match sse::json_frame(&event, &view) {
                            Ok(frame) => yield frame,
                            Err(e) => warn!(event = %event, error = %e, "Failed to encode view"),
                        }
                    }
                    Next::View(None) => break,
                    Next::Keepalive => yield sse::comment("keepalive"),
                }
            }
        }
    }
}
