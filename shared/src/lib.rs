// shared/src/lib.rs

use std::time::Duration;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("no tokio runtime available to spawn the sweeper")]
    NoRuntime,
    #[error("cache already closed")]
    AlreadyClosed,
    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TtlMs(pub u64);

impl From<TtlMs> for Duration {
    fn from(ttl: TtlMs) -> Self {
        Duration::from_millis(ttl.0)
    }
}

pub mod config;
