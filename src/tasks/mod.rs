//! Background Tasks Module
//!
//! Contains background tasks that run while the cache engine is started.
//!
//! # Tasks
//! - L1 Cleanup: Removes expired L1 entries at the configured interval

mod cleanup;

pub use cleanup::spawn_cleanup_task;
