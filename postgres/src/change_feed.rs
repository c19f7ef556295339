//! `LISTEN`-based change feed.

use queuedesk_core::change_feed::{ChangeFeed, ChangeFeedConnector, FeedError, FeedFuture};
use queuedesk_core::notification::RawNotification;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tracing::debug;

/// Opens `LISTEN` sessions on a dedicated connection taken from the pool.
///
/// Each session surfaces a dropped connection as [`FeedError::Receive`] instead of
/// silently reconnecting, so the bridge applies its own backoff and logging.
#[derive(Clone, Debug)]
pub struct PgChangeFeedConnector {
    pool: PgPool,
}

impl PgChangeFeedConnector {
    /// Create a connector over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ChangeFeedConnector for PgChangeFeedConnector {
    fn connect<'a>(&'a self, channels: &'a [String]) -> FeedFuture<'a, Box<dyn ChangeFeed>> {
        Box::pin(async move {
            let mut listener = PgListener::connect_with(&self.pool)
                .await
                .map_err(|e| FeedError::Connection(e.to_string()))?;
            listener
                .listen_all(channels.iter().map(String::as_str))
                .await
                .map_err(|e| FeedError::Connection(e.to_string()))?;
            debug!(?channels, "LISTEN session opened");
            Ok(Box::new(PgChangeFeed { listener }) as Box<dyn ChangeFeed>)
        })
    }
}

struct PgChangeFeed {
    listener: PgListener,
}

impl ChangeFeed for PgChangeFeed {
    fn recv(&mut self) -> FeedFuture<'_, RawNotification> {
        Box::pin(async move {
            match self.listener.try_recv().await {
                Ok(Some(notification)) => Ok(RawNotification::new(
                    notification.channel(),
                    notification.payload(),
                )),
                Ok(None) => Err(FeedError::Receive("connection lost".to_string())),
                Err(e) => Err(FeedError::Receive(e.to_string())),
            }
        })
    }
}
