//! Offline-first local store: a content cache for reading while disconnected
//! and a durable queue of user actions replayed once connectivity returns.
//!
//! Everything hangs off a [`db::Store`] handle passed in explicitly:
//!
//! - [`cache::ContentCache`] mirrors remote content per collection
//! - [`queue::ActionQueue`] records mutations made offline
//! - [`sync::SyncDriver`] replays them through a [`remote::ActionApplier`]
//! - [`connectivity::ConnectivityMonitor`] tells the driver when to run
//! - [`quota::QuotaReporter`] reports storage pressure

pub mod cache;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod content;
pub mod db;
pub mod error;
pub mod logging;
pub mod queue;
pub mod quota;
pub mod remote;
pub mod settings;
pub mod sync;

pub use error::{ApplyError, Error, RemoteError, Result};
