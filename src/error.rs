//! Crate-level error type

use crate::cluster::ClusterError;
use crate::topic::TopicError;
use crate::udp::AllocError;

/// Convenient result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level relay error
#[derive(Debug)]
pub enum Error {
    /// Socket or file I/O failure
    Io(std::io::Error),
    /// Topic admission or registration failure
    Topic(TopicError),
    /// Cluster configuration failure
    Cluster(ClusterError),
    /// UDP port allocation failure
    Alloc(AllocError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Topic(e) => write!(f, "topic error: {}", e),
            Error::Cluster(e) => write!(f, "cluster error: {}", e),
            Error::Alloc(e) => write!(f, "allocator error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Topic(e) => Some(e),
            Error::Cluster(e) => Some(e),
            Error::Alloc(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<TopicError> for Error {
    fn from(e: TopicError) -> Self {
        Error::Topic(e)
    }
}

impl From<ClusterError> for Error {
    fn from(e: ClusterError) -> Self {
        Error::Cluster(e)
    }
}

impl From<AllocError> for Error {
    fn from(e: AllocError) -> Self {
        Error::Alloc(e)
    }
}
