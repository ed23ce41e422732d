use systek_protocol::CodecError;

/// Errors from the connection layer.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("not connected")]
    NotConnected,

    #[error("connection already initialized")]
    AlreadyInitialized,

    #[error("connection closed")]
    Closed,

    #[error("peer disconnected mid-frame")]
    UnexpectedEof,

    #[error("peer stalled mid-frame")]
    Stalled,

    #[error("connect timed out")]
    ConnectTimeout,
}
