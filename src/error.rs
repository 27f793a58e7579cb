use thiserror::Error;

/// Rejections raised at ingress; a request failing these never enters the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid priority value: {0}")]
    InvalidPriority(i32),

    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    #[error("At least one channel is required")]
    NoChannels,

    #[error("userId cannot be empty")]
    MissingUserId,

    #[error("Either message or templateName must be provided")]
    MissingContent,
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The consumer or producer cannot continue, e.g. partition assignment was refused.
    #[error("fatal log transport error: {0}")]
    Fatal(String),

    /// A broker hiccup; the next cycle is expected to recover.
    #[error("transient log transport error: {0}")]
    Transient(String),
}

impl TransportError {
    pub fn fatal(message: impl Into<String>) -> Self {
        TransportError::Fatal(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        TransportError::Transient(message.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Fatal(_))
    }
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("failed to serialize notification request: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to publish notification to {topic}: {source}")]
    Publish {
        topic: String,
        #[source]
        source: TransportError,
    },
}
