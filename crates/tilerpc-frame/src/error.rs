/// Errors that can occur while exchanging frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// No terminator (or expected control byte) arrived before the
    /// transport's read timeout.
    #[error("transport timeout during {operation}")]
    TransportTimeout { operation: &'static str },

    /// A byte in terminator position was neither ACK nor NACK.
    #[error("invalid terminator byte 0x{0:02x}")]
    InvalidTerminator(u8),

    /// A response that should have been acknowledged ended with NACK.
    #[error("{operation} was rejected (NACK)")]
    Nack { operation: &'static str },

    /// No terminator was found within the configured frame size.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The rpc status byte is not one this protocol defines.
    #[error("unsupported rpc status 0x{0:02x}")]
    UnsupportedStatus(u8),

    /// A command line could not be parsed.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] tilerpc_transport::TransportError),

    /// An I/O error outside a byte transport (async codec).
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether this error is a read timeout on the link.
    pub fn is_timeout(&self) -> bool {
        matches!(self, FrameError::TransportTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
