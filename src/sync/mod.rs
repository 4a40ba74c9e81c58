//! Replaying queued actions against the remote.
//!
//! [`SyncDriver::drain`] is one pass over the queue. [`SyncDriver::spawn`]
//! runs passes in the background whenever connectivity returns, a caller
//! triggers one, or a backoff delay elapses.

mod backoff;
mod driver;

pub use backoff::Backoff;
pub use driver::{partition_by_target, DrainReport, SyncDriver, SyncHandle, SyncState};
