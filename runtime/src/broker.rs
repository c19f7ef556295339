//! In-memory fan-out broker.
//!
//! One inbound feed, any number of subscribers. Each subscriber owns a bounded
//! queue; [`Broker::publish`] uses `try_send`, so a full queue loses that one
//! message for that one subscriber and never stalls delivery to the rest.
//!
//! The subscriber registry is a `std::sync::Mutex` held only while registering,
//! unregistering or iterating with non-blocking sends. It is never held across an
//! `.await`.
//!
//! # Example
//!
//! ```rust
//! use queuedesk_runtime::Broker;
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let broker: Broker<String> = Broker::new(16);
//! let mut board = broker.subscribe();
//!
//! let (tx, rx) = mpsc::channel(16);
//! let cancel = CancellationToken::new();
//! let task = broker.clone().spawn(rx, cancel.child_token());
//!
//! tx.send("ticket_called".to_string()).await.ok();
//! assert_eq!(board.recv().await.as_deref(), Some("ticket_called"));
//!
//! cancel.cancel();
//! task.await.ok();
//! # }
//! ```

use crate::metrics::BrokerMetrics;
use futures::Stream;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Identifier of one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of broadcasting one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Subscribers whose queue accepted the message
    pub delivered: usize,
    /// Subscribers whose queue was full
    pub dropped: usize,
    /// Subscribers found closed and removed
    pub disconnected: usize,
}

struct Registry<M> {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<M>>>,
    capacity: usize,
}

impl<M> Registry<M> {
    // A poisoned lock only means another thread panicked mid-operation; the map
    // itself is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, mpsc::Sender<M>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.lock();
        let removed = subscribers.remove(&id).is_some();
        if removed {
            BrokerMetrics::record_subscribers(subscribers.len());
            debug!(subscriber_id = %id, "Subscriber removed");
        }
        removed
    }
}

/// Fan-out broker. Cloning yields another handle to the same registry.
pub struct Broker<M> {
    registry: Arc<Registry<M>>,
}

impl<M> Clone for Broker<M> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<M> fmt::Debug for Broker<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("subscribers", &self.registry.lock().len())
            .field("capacity", &self.registry.capacity)
            .finish()
    }
}

impl<M: Clone + Send + 'static> Broker<M> {
    /// Create a broker whose subscriber queues hold `capacity` messages (at least 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                subscribers: Mutex::new(HashMap::new()),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Register a new subscriber.
    ///
    /// The returned [`Subscription`] unsubscribes itself when dropped.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel(self.registry.capacity);
        let id = SubscriberId::new();
        let count = {
            let mut subscribers = self.registry.lock();
            subscribers.insert(id, tx);
            subscribers.len()
        };
        BrokerMetrics::record_subscribers(count);
        info!(subscriber_id = %id, subscribers = count, "Subscriber registered");

        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Remove a subscriber and close its queue.
    ///
    /// Idempotent: returns `false` if the subscriber was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.registry.remove(id)
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Copy `message` into every subscriber queue without waiting.
    ///
    /// Per-subscriber order follows call order.
    pub fn publish(&self, message: &M) -> Delivery {
        let mut delivery = Delivery::default();
        let mut subscribers = self.registry.lock();
        subscribers.retain(|id, tx| match tx.try_send(message.clone()) {
            Ok(()) => {
                delivery.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                delivery.dropped += 1;
                BrokerMetrics::record_dropped();
                debug!(subscriber_id = %id, "Subscriber queue full, dropping envelope");
                true
            }
            Err(TrySendError::Closed(_)) => {
                delivery.disconnected += 1;
                debug!(subscriber_id = %id, "Subscriber gone, removing");
                false
            }
        });
        if delivery.disconnected > 0 {
            BrokerMetrics::record_subscribers(subscribers.len());
        }
        delivery
    }

    /// Broadcast everything read from `inbound` until cancelled or the feed closes.
    ///
    /// On exit every subscriber queue is closed, so observers see end-of-stream.
    pub async fn run(&self, mut inbound: mpsc::Receiver<M>, cancel: CancellationToken) {
        info!("Broker started");
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("Broker received shutdown signal");
                    break;
                }
                next = inbound.recv() => {
                    let Some(message) = next else {
                        info!("Broker inbound feed closed");
                        break;
                    };
                    BrokerMetrics::record_received();
                    self.publish(&message);
                }
            }
        }
        self.close_all();
        info!("Broker stopped");
    }

    /// Spawn [`run`](Self::run) on the Tokio runtime.
    #[must_use]
    pub fn spawn(self, inbound: mpsc::Receiver<M>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(inbound, cancel).await })
    }

    fn close_all(&self) {
        let mut subscribers = self.registry.lock();
        subscribers.clear();
        BrokerMetrics::record_subscribers(0);
    }
}

/// One subscriber's delivery queue.
///
/// Yields messages in broadcast order and ends when the subscriber is removed or
/// the broker stops. Dropping it unsubscribes.
pub struct Subscription<M> {
    id: SubscriberId,
    rx: mpsc::Receiver<M>,
    registry: Weak<Registry<M>>,
}

impl<M> Subscription<M> {
    /// Identifier to pass to [`Broker::unsubscribe`].
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next message; `None` once the queue is closed and drained.
    pub async fn recv(&mut self) -> Option<M> {
        self.rx.recv().await
    }

    /// Take a queued message without waiting.
    pub fn try_recv(&mut self) -> Option<M> {
        self.rx.try_recv().ok()
    }
}

impl<M> fmt::Debug for Subscription<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish_non_exhaustive()
    }
}

impl<M> Stream for Subscription<M> {
    type Item = M;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<M>> {
        self.rx.poll_recv(cx)
    }
}

impl<M> Drop for Subscription<M> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}
