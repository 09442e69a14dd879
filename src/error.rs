use thiserror::Error;

/// Errors that can occur while connecting, dispatching or completing electrons.
#[derive(Error, Debug)]
pub enum ConductorError {
    /// Broker connection could not be established
    #[error("connection error: {0}")]
    Connection(String),

    /// A required configuration value was not supplied
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// A configuration value was supplied but is unusable
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Broker channel, queue or publish operation failed
    #[error("broker error: {0}")]
    Broker(String),

    /// The caller's context was cancelled before the operation finished
    #[error("operation cancelled")]
    Cancelled,

    /// The conductor has been closed
    #[error("conductor closed")]
    Closed,

    /// The background publisher for a destination queue is no longer running
    #[error("publisher for queue {0} is no longer running")]
    PublisherClosed(String),

    /// A live result slot already exists for this electron
    #[error("electron {0} already has a pending result")]
    DuplicateElectron(String),

    /// The private reply stream ended; no further results can be matched
    #[error("result stream closed unexpectedly")]
    ResultStreamClosed,
}

/// Result type alias for conductor operations
pub type Result<T> = std::result::Result<T, ConductorError>;
