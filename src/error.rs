//! Error types for the server, its sessions and the handlers they drive.
//!
//! Only [`ServerError`] ever reaches the caller of [`Server`](crate::Server).
//! [`SessionError`] and [`HandlerError`] stay local to one connection.

use std::io;
use thiserror::Error;

/// Errors surfaced by server construction and the control surface.
#[derive(Debug, Error)]
pub enum ServerError {
    /// No handler factory was configured.
    #[error("no handler provided")]
    NoHandler,

    /// The listen address could not be parsed or resolved.
    #[error("invalid listen address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Binding the listening socket failed.
    #[error("failed to bind '{address}': {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// `start` was called on a server that is already accepting.
    #[error("server already started")]
    AlreadyStarted,

    /// A stop was requested twice.
    #[error("stop already requested")]
    AlreadyStopped,

    /// The drain wait elapsed with sessions still open.
    #[error("drain timed out with {live} live sessions")]
    DrainTimeout { live: usize },
}

/// Why a connection session ended.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Eof,

    /// The idle deadline expired during a read or write.
    #[error("idle timeout")]
    Timeout,

    /// A line exceeded the read limit before its terminator arrived.
    #[error("line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    /// The quit signal was observed.
    #[error("server shutting down")]
    Quit,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The handler ended the session.
    #[error("handler: {0}")]
    Handler(HandlerError),

    /// The handler panicked.
    #[error("handler fault: {0}")]
    Fault(String),
}

impl SessionError {
    /// Returns `true` for endings that are not failures: peer EOF, quit, or a
    /// handler-requested close/stop.
    pub fn is_graceful(&self) -> bool {
        matches!(
            self,
            SessionError::Eof
                | SessionError::Quit
                | SessionError::Handler(HandlerError::Close | HandlerError::Stop)
        )
    }
}

impl From<HandlerError> for SessionError {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::Io(inner) => *inner,
            other => SessionError::Handler(other),
        }
    }
}

/// Errors returned by handler code.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Force-close the connection. Not treated as a failure.
    #[error("close")]
    Close,

    /// Deliberate stop of an iterate-until-error handler.
    #[error("stop")]
    Stop,

    /// Any other handler failure.
    #[error("{0}")]
    Failed(String),

    /// I/O through the session connection failed.
    #[error(transparent)]
    Io(Box<SessionError>),
}

impl From<SessionError> for HandlerError {
    fn from(err: SessionError) -> Self {
        HandlerError::Io(Box::new(err))
    }
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        HandlerError::Failed(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_io_unwraps_to_session_error() {
        let err = SessionError::from(HandlerError::from(SessionError::Timeout));
        assert!(matches!(err, SessionError::Timeout));

        let err = SessionError::from(HandlerError::Close);
        assert!(matches!(err, SessionError::Handler(HandlerError::Close)));
    }

    #[test]
    fn test_graceful_endings() {
        assert!(SessionError::Eof.is_graceful());
        assert!(SessionError::Quit.is_graceful());
        assert!(SessionError::Handler(HandlerError::Close).is_graceful());
        assert!(SessionError::Handler(HandlerError::Stop).is_graceful());
        assert!(!SessionError::Timeout.is_graceful());
        assert!(!SessionError::LineTooLong { limit: 8 }.is_graceful());
        assert!(!SessionError::Fault("boom".into()).is_graceful());
        assert!(!SessionError::Handler(HandlerError::failed("bad")).is_graceful());
    }

    #[test]
    fn test_display() {
        let err = ServerError::DrainTimeout { live: 3 };
        assert_eq!(err.to_string(), "drain timed out with 3 live sessions");
        assert_eq!(ServerError::NoHandler.to_string(), "no handler provided");
    }
}
