//! # Queuedesk Server
//!
//! Process wiring for the ticket dispatch core: configuration from the environment,
//! the Postgres-backed services, and the notification pipeline with graceful
//! shutdown.
//!
//! ```ignore
//! let app = QueuedeskApp::new(Config::from_env()).await?;
//! app.run_until(shutdown_signal()).await;
//! ```

pub mod app;
pub mod config;
pub mod lifecycle;

pub use app::QueuedeskApp;
pub use config::Config;
pub use lifecycle::{NotificationPipeline, shutdown_signal};
