use ramq_codec::error::{DecodeError, EncodeError};

/// Broker-level failures surfaced to sessions and, as a bare `ok=false`,
/// to clients.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The named exchange, queue or channel does not exist
    #[error("{0} not found")]
    NotFound(String),
    /// Malformed name, binding key or declare arguments
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Publish resolved zero target queues
    #[error("no route for routing key '{0}'")]
    NoRoute(String),
    /// Durable log read/write/compaction failure
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
    /// Ack for a message that is not awaiting acknowledgment
    #[error("message '{0}' already acknowledged or unknown")]
    AlreadyAcknowledged(String),
    #[error("decoding error: {0:?}")]
    Decode(#[from] DecodeError),
    #[error("encoding error: {0:?}")]
    Encode(#[from] EncodeError),
    /// Read timeout
    #[error("read timeout")]
    ReadTimeout,
    /// Write timeout
    #[error("write timeout")]
    WriteTimeout,
    /// Flush timeout
    #[error("flush timeout")]
    FlushTimeout,
    /// Close timeout
    #[error("close timeout")]
    CloseTimeout,
    #[error("too many connections")]
    TooManyConnections,
    #[error("service unavailable")]
    ServiceUnavailable,
}
