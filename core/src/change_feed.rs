//! Change-feed abstraction over the store's native notification mechanism.
//!
//! A [`ChangeFeedConnector`] opens one long-lived session subscribed to a set of
//! channels; the resulting [`ChangeFeed`] yields [`RawNotification`]s until the
//! session fails. Dropping the feed releases the session.
//!
//! # Implementations
//!
//! - `PgChangeFeedConnector` (queuedesk-postgres) - `LISTEN` over a dedicated connection
//! - `ScriptedFeedConnector` (queuedesk-testing) - in-memory, with injectable failures

use crate::notification::RawNotification;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from a change feed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Failed to open the session or subscribe to a channel
    #[error("Failed to connect change feed: {0}")]
    Connection(String),

    /// The session broke while waiting for a notification
    #[error("Failed to receive notification: {0}")]
    Receive(String),
}

/// Boxed future returned by change-feed operations.
pub type FeedFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, FeedError>> + Send + 'a>>;

/// An open change-feed session.
pub trait ChangeFeed: Send {
    /// Wait for the next notification.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Receive`] if the session fails. The session should be
    /// dropped and a new one opened.
    fn recv(&mut self) -> FeedFuture<'_, RawNotification>;
}

/// Opens change-feed sessions.
pub trait ChangeFeedConnector: Send + Sync {
    /// Open a session subscribed to `channels`.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Connection`] if the store is unreachable.
    fn connect<'a>(&'a self, channels: &'a [String]) -> FeedFuture<'a, Box<dyn ChangeFeed>>;
}
