//! In-process key-value map whose entries expire a fixed time after they were
//! written, with a background task that reclaims expired entries.

pub mod entry;
pub mod events;
pub mod map;
pub mod stats;

pub use entry::Entry;
pub use events::MapEvent;
pub use map::ExpiringMap;
pub use shared::config::MapConfig;
pub use shared::{Error, Result};
pub use stats::MapStats;
