//! Topic manager error types

/// Error type for topic admission and registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    /// Global publisher cap reached
    MaxPublishers,
    /// Topic already has an active publisher
    TopicHasPublisher,
    /// Per-topic subscriber cap reached
    TopicMaxSubscribers,
    /// Topic does not exist (no publisher ever admitted, or torn down)
    NoActivePublisher,
}

impl std::fmt::Display for TopicError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopicError::MaxPublishers => write!(f, "max publishers reached"),
            TopicError::TopicHasPublisher => write!(f, "topic already has active publisher"),
            TopicError::TopicMaxSubscribers => write!(f, "topic max subscribers reached"),
            TopicError::NoActivePublisher => write!(f, "no active publisher for topic"),
        }
    }
}

impl std::error::Error for TopicError {}
