//! Pending-action queue: user mutations recorded locally until the remote
//! confirms them.

mod store;
mod types;

pub use store::ActionQueue;
pub use types::{ActionType, PendingAction, SyncMark, TargetType};
