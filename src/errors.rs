use thiserror::Error;

/// Underlying cause attached to an error for diagnostics.
pub type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Transport-level failure: connection errors, read errors, retry
    /// exhaustion, or an unexpected failure while processing a stream.
    /// The only kind eligible for retry, and only for transient conditions.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<BoxedCause>,
    },

    /// Payload-level failure: malformed JSON from the backend, an error
    /// body, or a raw payload that does not match the expected item
    /// variant. Never retried.
    #[error("Model error: {message}")]
    Model {
        message: String,
        #[source]
        source: Option<BoxedCause>,
    },

    /// Invalid provider configuration, raised synchronously at
    /// construction rather than at call time.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ProviderError {
    pub fn network(message: impl Into<String>) -> Self {
        ProviderError::Network {
            message: message.into(),
            source: None,
        }
    }

    pub fn network_with(message: impl Into<String>, source: impl Into<BoxedCause>) -> Self {
        ProviderError::Network {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn model(message: impl Into<String>) -> Self {
        ProviderError::Model {
            message: message.into(),
            source: None,
        }
    }

    pub fn model_with(message: impl Into<String>, source: impl Into<BoxedCause>) -> Self {
        ProviderError::Model {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
