use std::fmt;

/// Wire-facing error kinds, matching the abstract error taxonomy: every
/// variant's message is used verbatim as the body of an `ACK` reply.
#[derive(Debug, Clone)]
pub enum AppError {
    BadArgument(String),
    NotFound(String),
    UnsupportedCommand(String),
    Conflict(String),
    DecoderFailure(String),
    IoFailure(String),
    NotSeekable,
    Internal(String),
}

impl AppError {
    pub fn bad_argument(msg: impl Into<String>) -> Self {
        Self::BadArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadArgument(m) => write!(f, "{m}"),
            AppError::NotFound(m) => write!(f, "{m}"),
            AppError::UnsupportedCommand(m) => write!(f, "{m}"),
            AppError::Conflict(m) => write!(f, "{m}"),
            AppError::DecoderFailure(m) => write!(f, "{m}"),
            AppError::IoFailure(m) => write!(f, "{m}"),
            AppError::NotSeekable => write!(f, "not seekable"),
            AppError::Internal(m) => write!(f, "{m}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::IoFailure(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
