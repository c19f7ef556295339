//! Scripted change feed for exercising the notifier bridge without a database.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use queuedesk_core::change_feed::{ChangeFeed, ChangeFeedConnector, FeedError, FeedFuture};
use queuedesk_core::notification::RawNotification;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type Item = Result<RawNotification, FeedError>;

#[derive(Debug, Default)]
struct Script {
    failing_connects: usize,
    connects: usize,
    subscribed: Vec<String>,
    live: Option<mpsc::UnboundedSender<Item>>,
    pending: Vec<Item>,
}

/// Connector whose sessions are driven by a [`FeedScript`].
#[derive(Clone, Debug, Default)]
pub struct ScriptedFeedConnector {
    script: Arc<Mutex<Script>>,
}

/// Test-side handle for pushing notifications and failures into the feed.
#[derive(Clone, Debug)]
pub struct FeedScript {
    script: Arc<Mutex<Script>>,
}

impl ScriptedFeedConnector {
    /// Create a connector and its script handle.
    #[must_use]
    pub fn new() -> (Self, FeedScript) {
        let connector = Self::default();
        let script = FeedScript {
            script: Arc::clone(&connector.script),
        };
        (connector, script)
    }
}

impl FeedScript {
    fn push(&self, item: Item) {
        let mut script = self.script.lock().unwrap();
        let undelivered = match &script.live {
            Some(tx) => tx.send(item).err().map(|e| e.0),
            None => Some(item),
        };
        if let Some(item) = undelivered {
            script.live = None;
            script.pending.push(item);
        }
    }

    /// Deliver a notification on the live session, or on the next one if none is open.
    pub fn notify(&self, channel: &str, payload: &str) {
        self.push(Ok(RawNotification::new(channel, payload)));
    }

    /// Break the live session with a receive error.
    pub fn break_connection(&self, reason: &str) {
        self.push(Err(FeedError::Receive(reason.to_string())));
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.script.lock().unwrap().failing_connects = n;
    }

    /// Number of connection attempts so far, failed ones included.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.script.lock().unwrap().connects
    }

    /// Channels the most recent session subscribed to.
    #[must_use]
    pub fn subscribed_channels(&self) -> Vec<String> {
        self.script.lock().unwrap().subscribed.clone()
    }

    /// Whether a session is open and its feed has not been dropped.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.script
            .lock()
            .unwrap()
            .live
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}

struct ScriptedFeed {
    rx: mpsc::UnboundedReceiver<Item>,
}

impl ChangeFeed for ScriptedFeed {
    fn recv(&mut self) -> FeedFuture<'_, RawNotification> {
        Box::pin(async move {
            match self.rx.recv().await {
                Some(item) => item,
                None => Err(FeedError::Receive("script dropped".to_string())),
            }
        })
    }
}

impl ChangeFeedConnector for ScriptedFeedConnector {
    fn connect<'a>(&'a self, channels: &'a [String]) -> FeedFuture<'a, Box<dyn ChangeFeed>> {
        Box::pin(async move {
            let mut script = self.script.lock().unwrap();
            script.connects += 1;
            if script.failing_connects > 0 {
                script.failing_connects -= 1;
                return Err(FeedError::Connection("connection refused".to_string()));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            for item in script.pending.drain(..) {
                let _ = tx.send(item);
            }
            script.subscribed = channels.to_vec();
            script.live = Some(tx);
            Ok(Box::new(ScriptedFeed { rx }) as Box<dyn ChangeFeed>)
        })
    }
}
