//! # Queuedesk Runtime
//!
//! The moving parts of the dispatch and notification core:
//!
//! - [`dispatch::DispatchService`]: the ticket state machine, the only writer of ticket state
//! - [`broker::Broker`]: in-memory fan-out from one inbound feed to many observers
//! - [`bridge::NotifierBridge`]: forwards store change notifications into the broker
//!
//! ## Task layout
//!
//! ```text
//! ┌──────────────┐  mpsc   ┌──────────┐  try_send  ┌────────────┐
//! │ NotifierBridge├───────►│  Broker  ├───────────►│ observer 1 │
//! └──────────────┘         │ run loop ├──────┐     └────────────┘
//!        ▲                 └──────────┘      │     ┌────────────┐
//!        │ LISTEN                            └────►│ observer N │
//!   Ticket Store ◄──── DispatchService             └────────────┘
//! ```
//!
//! The bridge and broker each run as one task owning a child of the process
//! shutdown token. Dispatch calls run on the caller's task.

pub mod bridge;
pub mod broker;
pub mod dispatch;
pub mod metrics;
pub mod retry;

pub use bridge::{Notification, NotifierBridge};
pub use broker::{Broker, SubscriberId, Subscription};
pub use dispatch::{DispatchConfig, DispatchService};
