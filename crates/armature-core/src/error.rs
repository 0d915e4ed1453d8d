use thiserror::Error;

/// Errors produced by the fetch engine and its clients.
///
/// Transport failures mark the event `Failed`; HTTP-status failures leave
/// it `Finished`. Only [`NetError::Timeout`] consumes retry attempts.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("DNS resolution failed for host {host}: {message}")]
    Dns { host: String, message: String },

    #[error("timeout on attempt {attempt}: {message}")]
    Timeout { attempt: u32, message: String },

    #[error("failed to fetch URL: {0}")]
    Transport(String),

    #[error("received non-OK HTTP status: {0}")]
    HttpStatus(u16),

    #[error("{0}")]
    Decode(String),

    #[error("{0}")]
    Verify(String),

    #[error("{0}")]
    Io(String),

    #[error("request cancelled")]
    Cancelled,
}

impl NetError {
    /// Whether this error counts against the timeout retry budget.
    pub fn is_timeout(&self) -> bool {
        matches!(self, NetError::Timeout { .. })
    }
}

impl From<std::io::Error> for NetError {
    fn from(e: std::io::Error) -> Self {
        NetError::Io(e.to_string())
    }
}

/// Errors produced by the debug emitter's enqueue path.
///
/// Both variants are non-fatal to the caller; the envelope is simply lost.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmitError {
    #[error("emitter is not active, message dropped")]
    Inactive,

    #[error("send queue is full, message dropped")]
    QueueFull,

    #[error("failed to serialize envelope: {0}")]
    Serialize(String),
}

/// Errors produced by the logger.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("logger file path is empty")]
    EmptyPath,

    #[error("failed to open log file: {0}")]
    Open(String),

    #[error("failed to write log: {0}")]
    Write(String),

    #[error("failed to call custom logger: {0}")]
    Callable(String),
}
