use thiserror::Error;

/// Errors surfaced at the crate's embedder-facing boundary.
///
/// Protocol-level anomalies (bad checksums, RST, unroutable datagrams,
/// capacity overflows) are handled silently inside the core per the
/// error-handling design and never reach this type.
#[derive(Error, Debug)]
pub enum StackError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("port {0} is already bound")]
    PortInUse(u16),

    #[error("no connection for this socket")]
    NotConnected,

    #[error("operation would exceed send queue capacity")]
    WouldBlock,
}

pub type Result<T> = std::result::Result<T, StackError>;
