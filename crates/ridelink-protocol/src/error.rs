use thiserror::Error;

/// Failures of the synchronous dispatch API surface.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchApiError {
    #[error("dispatch api configuration error: {0}")]
    Configuration(String),
    #[error("dispatch api request failed: {0}")]
    Request(String),
    #[error("dispatch api rejected the request: {0}")]
    Rejected(String),
    #[error("dispatch api protocol error: {0}")]
    Protocol(String),
}

pub type DispatchApiResult<T> = Result<T, DispatchApiError>;

/// Failures of the push channel transport and its framing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel configuration error: {0}")]
    Configuration(String),
    #[error("channel connect failed: {0}")]
    Connect(String),
    #[error("channel transport error: {0}")]
    Transport(String),
    #[error("channel protocol error: {0}")]
    Protocol(String),
    #[error("channel session closed")]
    Closed,
}

pub type ChannelResult<T> = Result<T, ChannelError>;
