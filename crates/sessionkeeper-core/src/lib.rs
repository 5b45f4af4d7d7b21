//! Core library for sessionkeeper.
//!
//! Keeps a set of cookie-pair sessions for an external service alive by
//! periodically exchanging each session's short-lived secret for a fresh one.
//!
//! - `store`: durable session storage (SQLite via sqlx)
//! - `refresh`: the single-request rotation exchange and its outcome
//! - `scheduler`: the long-running rotation loop
//! - `consumer`: read-only access for services that authenticate with a session
//! - `context`: explicit open/close handle wiring the pieces together

pub mod config;
pub mod consumer;
pub mod context;
pub mod error;
pub mod refresh;
pub mod scheduler;
pub mod session;
pub mod shutdown;
pub mod store;

pub use config::Config;
pub use consumer::{Health, SessionConsumer};
pub use context::KeeperContext;
pub use error::{RefreshError, StorageError};
pub use refresh::{RefreshClient, RefreshOutcome, Refresher};
pub use scheduler::{CycleReport, RotationScheduler, SchedulerConfig};
pub use session::{Session, SessionRecord};
pub use shutdown::{Shutdown, ShutdownListener};
pub use store::SessionStore;
