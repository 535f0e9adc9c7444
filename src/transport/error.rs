use std::io;
use thiserror::Error;

/// Failures reported by the in-process transport.
///
/// `EndOfStream` is the normal terminal signal of a read once the peer has
/// finished writing. All others are abnormal for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid transport configuration: buffer capacity must be positive")]
    InvalidConfiguration,
    #[error("listener closed")]
    ListenerClosed,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("end of stream")]
    EndOfStream,
}

impl TransportError {
    /// Whether this is the normal end-of-stream signal rather than a failure
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, TransportError::EndOfStream)
    }
}

impl From<TransportError> for io::Error {
    fn from(error: TransportError) -> Self {
        let kind = match error {
            TransportError::InvalidConfiguration => io::ErrorKind::InvalidInput,
            TransportError::ListenerClosed => io::ErrorKind::ConnectionRefused,
            TransportError::ConnectionClosed => io::ErrorKind::BrokenPipe,
            TransportError::EndOfStream => io::ErrorKind::UnexpectedEof,
        };
        io::Error::new(kind, error)
    }
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;
