//! Error types for dbchange-relay
//!
//! One enum covers the whole pipeline. Variants fall into two groups:
//! fatal ones (setup, session, configuration) that stop the relay, and local
//! ones (resource exhaustion, transport) that drop a single event and let
//! processing continue. [`RelayError::is_fatal`] encodes that split.

use thiserror::Error;

/// Result type for dbchange-relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors that can occur while relaying change notifications
#[derive(Error, Debug)]
pub enum RelayError {
    /// Trigger installation or `LISTEN` registration failed
    #[error("Listener setup failed during {stage}: {source}")]
    Setup {
        stage: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// The database session reported an error while polling
    #[error("Database session error: {0}")]
    Session(#[source] sqlx::Error),

    /// The database session was lost; listen registrations are gone with it
    #[error("Database session closed by the server")]
    SessionClosed,

    /// Memory could not be obtained while building or enqueueing an event
    #[error("Resource exhausted: {context}")]
    ResourceExhausted { context: String },

    /// Notification payload larger than the configured limit
    #[error("Payload size {size} exceeds limit {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Non-blocking push into a full mailbox under the block policy
    #[error("Mailbox is full (capacity {capacity})")]
    MailboxFull { capacity: usize },

    /// Event lost to a drop-oldest or drop-newest overflow policy
    #[error("Mailbox full, event dropped by overflow policy")]
    Overflow,

    /// HTTP transport failure (connection refused, reset, DNS, ...)
    #[error("Transport error: {0}")]
    Transport(String),

    /// HTTP request did not complete within the client timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Endpoint answered with a non-success status
    #[error("Endpoint returned HTTP {status}")]
    EndpointStatus { status: u16 },

    /// Cancellation was observed while waiting
    #[error("Relay is shutting down")]
    ShuttingDown,

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Configuration sources could not be read or merged
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] config::ConfigError),
}

impl RelayError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a resource exhaustion error
    pub fn resource_exhausted<S: Into<String>>(context: S) -> Self {
        Self::ResourceExhausted {
            context: context.into(),
        }
    }

    /// Create a setup error for the given stage
    pub fn setup(stage: &'static str, source: sqlx::Error) -> Self {
        Self::Setup { stage, source }
    }

    /// Classify a reqwest failure as a timeout or a plain transport error
    pub fn from_transport(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }

    /// Errors that must terminate the relay rather than drop one event
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Setup { .. }
                | Self::Session(_)
                | Self::SessionClosed
                | Self::Configuration { .. }
                | Self::ConfigLoad(_)
        )
    }

    /// Errors a forward attempt may succeed on if tried again
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::EndpointStatus { status } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
