//! Pull-model projections for observer displays.
//!
//! A projection answers "what should this display show right now?" by querying
//! the store on demand. Observers re-run the query whenever a notification the
//! projection [`concerns`](Projection::concerns) arrives; nothing is maintained
//! incrementally, so there is no second source of truth to keep in sync.
//!
//! ## Example
//!
//! ```ignore
//! struct RoomProjection { /* lookups */ }
//!
//! impl Projection for RoomProjection {
//!     type Key = i32;
//!     type View = RoomState;
//!
//!     fn name(&self) -> &str {
//!         "room_screen"
//!     }
//!
//!     fn current<'a>(&'a self, room: &'a i32) -> ProjectionFuture<'a, RoomState> {
//!         Box::pin(async move { self.current_state(*room).await })
//!     }
//! }
//! ```

use crate::error::StoreError;
use crate::notification::Envelope;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Error type for projection queries.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// Serialization error while rendering a view
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The key cannot select a view, e.g. a malformed category filter
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// Boxed future returned by [`Projection::current`].
pub type ProjectionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A view computed on demand from store state.
pub trait Projection: Send + Sync {
    /// Which display instance the view is for (room number, category prefix, ...).
    type Key: Clone + fmt::Debug + Send + Sync;

    /// The rendered view.
    type View: Serialize + Send;

    /// Name used in logs.
    fn name(&self) -> &str;

    /// Compute the view for `key` as of now.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if a lookup fails.
    fn current<'a>(&'a self, key: &'a Self::Key) -> ProjectionFuture<'a, Self::View>;

    /// Whether `envelope` should trigger a refresh. Defaults to any ticket change.
    fn concerns(&self, envelope: &Envelope) -> bool {
        envelope.concerns_tickets()
    }
}
