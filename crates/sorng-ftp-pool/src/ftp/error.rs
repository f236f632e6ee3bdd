//! FTP-specific error type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorised FTP / pool error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpError {
    pub kind: FtpErrorKind,
    pub message: String,
    /// FTP reply code that triggered the error, if any.
    pub code: Option<u16>,
    /// Underlying error when this one wraps another (e.g. `FactoryFailed`).
    #[serde(default)]
    pub source: Option<Box<FtpError>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FtpErrorKind {
    /// TCP / DNS failure or a refused greeting.
    ConnectionFailed,
    /// Wrong username/password.
    AuthFailed,
    /// The pool could not create a connection (wraps the factory error).
    FactoryFailed,
    /// No connection became available within the borrow wait.
    PoolExhausted,
    /// Pool closed, disabled, or acquisition retries used up.
    PoolUnavailable,
    /// Text could not be rendered in the required charset.
    EncodingError,
    /// Server returned a 4xx/5xx for a command.
    CommandRejected,
    /// Data channel could not be established (PASV/PORT failed).
    DataChannelFailed,
    /// Transfer aborted by the server.
    TransferFailed,
    /// Data channel was not fully drained; the session is out of sync.
    StreamIncomplete,
    /// Un-parseable reply or unexpected protocol state.
    ProtocolError,
    /// An I/O error on the local side or the socket.
    IoError,
    /// Operation timed out.
    Timeout,
    /// Session was closed by the server.
    Disconnected,
    /// Permission denied on the server.
    PermissionDenied,
    /// File/directory not found on the server.
    NotFound,
    /// Config / parameter validation error.
    InvalidConfig,
}

pub type FtpResult<T> = Result<T, FtpError>;

// ── Construction helpers ─────────────────────────────────────────────

impl FtpError {
    pub fn new(kind: FtpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn caused_by(mut self, cause: FtpError) -> Self {
        if self.code.is_none() {
            self.code = cause.code;
        }
        self.source = Some(Box::new(cause));
        self
    }

    // ── Convenience constructors ─────────────────────────────────

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ConnectionFailed, msg)
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::AuthFailed, msg)
    }

    pub fn factory_failed(cause: FtpError) -> Self {
        Self::new(
            FtpErrorKind::FactoryFailed,
            format!("could not create connection: {}", cause.message),
        )
        .caused_by(cause)
    }

    pub fn pool_exhausted(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::PoolExhausted, msg)
    }

    pub fn pool_unavailable(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::PoolUnavailable, msg)
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::EncodingError, msg)
    }

    pub fn data_channel(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::DataChannelFailed, msg)
    }

    pub fn stream_incomplete(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::StreamIncomplete, msg)
    }

    pub fn protocol_error(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ProtocolError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::IoError, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Timeout, msg)
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Disconnected, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::NotFound, msg)
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::InvalidConfig, msg)
    }

    /// Classify an FTP reply code into the most appropriate error kind.
    pub fn from_reply(code: u16, text: &str) -> Self {
        let kind = match code {
            421 => FtpErrorKind::Disconnected,
            425 | 426 => FtpErrorKind::DataChannelFailed,
            430 | 530 => FtpErrorKind::AuthFailed,
            450 | 550 => {
                let lower = text.to_lowercase();
                if lower.contains("permission") || lower.contains("denied") {
                    FtpErrorKind::PermissionDenied
                } else if lower.contains("not found") || lower.contains("no such") {
                    FtpErrorKind::NotFound
                } else {
                    FtpErrorKind::CommandRejected
                }
            }
            451 | 452 | 552 => FtpErrorKind::TransferFailed,
            _ if code >= 400 => FtpErrorKind::CommandRejected,
            _ => FtpErrorKind::ProtocolError,
        };
        Self {
            kind,
            message: text.to_string(),
            code: Some(code),
            source: None,
        }
    }

    /// Whether the session that produced this error can no longer be
    /// trusted to be in sync with the server. Such connections must be
    /// invalidated rather than returned to the pool.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self.kind,
            FtpErrorKind::ConnectionFailed
                | FtpErrorKind::StreamIncomplete
                | FtpErrorKind::ProtocolError
                | FtpErrorKind::IoError
                | FtpErrorKind::Timeout
                | FtpErrorKind::Disconnected
                | FtpErrorKind::DataChannelFailed
        )
    }

    /// Errors worth another `borrow()` attempt.
    pub fn is_transient(&self) -> bool {
        match self.kind {
            FtpErrorKind::FactoryFailed => !matches!(
                self.source.as_deref().map(|s| s.kind),
                Some(FtpErrorKind::InvalidConfig)
            ),
            FtpErrorKind::PoolExhausted
            | FtpErrorKind::ConnectionFailed
            | FtpErrorKind::Timeout
            | FtpErrorKind::Disconnected
            | FtpErrorKind::IoError => true,
            _ => false,
        }
    }
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{:?} ({}): {}", self.kind, code, self.message)?,
            None => write!(f, "{:?}: {}", self.kind, self.message)?,
        }
        if let Some(cause) = &self.source {
            write!(f, "; caused by {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for FtpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for FtpError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => Self::timeout(e.to_string()),
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => Self::disconnected(e.to_string()),
            _ => Self::io_error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_from_reply_classification() {
        assert_eq!(FtpError::from_reply(530, "Login incorrect").kind, FtpErrorKind::AuthFailed);
        assert_eq!(
            FtpError::from_reply(550, "Permission denied").kind,
            FtpErrorKind::PermissionDenied
        );
        assert_eq!(
            FtpError::from_reply(550, "No such file or directory").kind,
            FtpErrorKind::NotFound
        );
        assert_eq!(FtpError::from_reply(421, "bye").kind, FtpErrorKind::Disconnected);
        assert_eq!(FtpError::from_reply(500, "?").kind, FtpErrorKind::CommandRejected);
        assert_eq!(FtpError::from_reply(550, "x").code, Some(550));
    }

    #[test]
    fn test_factory_failed_keeps_cause() {
        let cause = FtpError::auth_failed("Login failed").with_code(530);
        let err = FtpError::factory_failed(cause);
        assert_eq!(err.kind, FtpErrorKind::FactoryFailed);
        assert_eq!(err.code, Some(530));
        assert_eq!(err.source.as_ref().map(|s| s.kind), Some(FtpErrorKind::AuthFailed));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_session_fatal_split() {
        assert!(FtpError::stream_incomplete("x").is_session_fatal());
        assert!(FtpError::timeout("x").is_session_fatal());
        assert!(!FtpError::from_reply(550, "nope").is_session_fatal());
        assert!(!FtpError::encoding("x").is_session_fatal());
    }

    #[test]
    fn test_transient() {
        assert!(FtpError::pool_exhausted("full").is_transient());
        assert!(FtpError::factory_failed(FtpError::connection_failed("refused")).is_transient());
        assert!(!FtpError::factory_failed(FtpError::invalid_config("no host")).is_transient());
        assert!(!FtpError::encoding("x").is_transient());
    }

    #[test]
    fn test_io_timeout_maps_to_timeout() {
        let e: FtpError = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow").into();
        assert_eq!(e.kind, FtpErrorKind::Timeout);
        let e: FtpError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert_eq!(e.kind, FtpErrorKind::Disconnected);
    }

    #[test]
    fn test_display_includes_cause() {
        let err = FtpError::pool_unavailable("gave up")
            .caused_by(FtpError::auth_failed("Login failed").with_code(530));
        assert_eq!(
            err.to_string(),
            "PoolUnavailable (530): gave up; caused by AuthFailed (530): Login failed"
        );
    }
}
