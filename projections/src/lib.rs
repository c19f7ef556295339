//! Observer projections for Queuedesk displays.
//!
//! # Overview
//!
//! Displays never receive ticket state from the broker directly. Each observer holds a
//! [`Subscription`](queuedesk_runtime::Subscription) and treats every notification as a
//! signal to re-query its projection:
//!
//! - [`RoomProjection`]: who is being served in a room right now
//! - [`WaitingBoardProjection`]: active tickets for the registrar and waiting-room board
//! - [`RoomQueueProjection`]: the doctor's list of today's patients for one room
//!
//! ```text
//! Broker ──► Subscription ──► ObserverFeed ──► Projection::current ──► sse::frame
//!                              (decode, filter)      (store query)
//! ```
//!
//! The first item of every feed is a full snapshot, so an observer that reconnects
//! resynchronizes without replay.
//!
//! # Example
//!
//! ```ignore
//! use queuedesk_projections::{ObserverFeed, RoomProjection};
//!
//! let projection = Arc::new(RoomProjection::new(tickets, schedule, clock));
//! let frames = ObserverFeed::new(projection, 12, broker.subscribe())
//!     .cancel_on(client_gone)
//!     .frames();
//! ```

pub mod board;
pub mod observer;
pub mod queue;
pub mod room;
pub mod sse;

pub use board::{WaitingBoard, WaitingBoardProjection};
pub use observer::ObserverFeed;
pub use queue::{RoomQueue, RoomQueueProjection};
pub use room::{RoomProjection, RoomState};
