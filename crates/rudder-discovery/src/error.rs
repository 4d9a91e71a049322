use thiserror::Error;

/// Errors raised by discovery and load balancing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("service not found: {0}")]
    NotFound(String),

    #[error("no available instances")]
    NoAvailableInstances,

    #[error("watcher closed")]
    WatcherClosed,

    #[error("discovery is closed")]
    Closed,

    #[error("registry error: {0}")]
    Registry(String),
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
