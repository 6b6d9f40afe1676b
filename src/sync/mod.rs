//! Multi-folder collection differential-sync state machine (CORE-C).

pub mod basic_info;
pub mod bus;
pub mod coordinator;
pub mod diff;
pub mod locks;
pub mod release_fetch;

pub use coordinator::{SyncCoordinator, SyncStatusSnapshot};
