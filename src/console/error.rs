//! Console connection error types

use thiserror::Error;
use tokio_util::codec::LinesCodecError;
use uuid::Uuid;

/// Errors that can occur talking to a game-server console
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// No live connection for the server
    #[error("Console for server {0} is not connected")]
    NotConnected(Uuid),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The console rejected the credential
    #[error("Authentication rejected: {0}")]
    AuthFailed(String),

    /// The dial did not complete in time
    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),

    /// No response to a command in time
    #[error("Timed out waiting for command response")]
    CommandTimeout,

    /// The remote side closed the connection
    #[error("Connection closed by remote")]
    Closed,

    /// The connection was torn down or replaced while the operation ran
    #[error("Connection was superseded")]
    Superseded,

    /// Malformed frame from the console
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<LinesCodecError> for ConsoleError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::Io(e) => ConsoleError::Io(e),
            other => ConsoleError::Protocol(other.to_string()),
        }
    }
}

/// Result type alias for console operations
pub type ConsoleResult<T> = Result<T, ConsoleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let id = Uuid::nil();
        let err = ConsoleError::NotConnected(id);
        assert_eq!(
            err.to_string(),
            "Console for server 00000000-0000-0000-0000-000000000000 is not connected"
        );

        let err = ConsoleError::AuthFailed("bad password".to_string());
        assert_eq!(err.to_string(), "Authentication rejected: bad password");
    }

    #[test]
    fn test_codec_error_conversion() {
        let err: ConsoleError = LinesCodecError::MaxLineLengthExceeded.into();
        assert!(matches!(err, ConsoleError::Protocol(_)));

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: ConsoleError = LinesCodecError::Io(io).into();
        assert!(matches!(err, ConsoleError::Io(_)));
    }
}
