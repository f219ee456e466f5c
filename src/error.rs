use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while serving one connection.
///
/// For the client-facing variants the `Display` text is exactly what goes
/// over the wire.
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Unknown command")]
    UnknownCommand,

    #[error("Invalid command syntax. Usage: {0}")]
    Usage(&'static str),

    #[error("Registration Failed. Handle '{handle}' is already in use. Suggestion: '{suggestion}'")]
    HandleTaken { handle: String, suggestion: String },

    #[error("You have not yet registered. Please do /register [name]")]
    NotRegistered,

    #[error("File not found")]
    NotFound,

    #[error("Invalid file name: '{0}'")]
    InvalidFileName(String),

    #[error("Storage error: {0}")]
    Storage(#[source] io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("connection closed by peer")]
    ConnectionClosed,
}

impl ExchangeError {
    /// Whether this error ends the connection it happened on.
    ///
    /// Transport failures always do. Everything else is reported to the
    /// client as text and the session keeps going.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExchangeError::Transport(_) | ExchangeError::ConnectionClosed)
    }
}

/// Problems loading or validating a `ServerConfig`.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_text_matches_protocol() {
        assert_eq!(ExchangeError::UnknownCommand.to_string(), "Unknown command");
        assert_eq!(ExchangeError::NotFound.to_string(), "File not found");
        assert_eq!(
            ExchangeError::NotRegistered.to_string(),
            "You have not yet registered. Please do /register [name]"
        );
        let taken = ExchangeError::HandleTaken {
            handle: "bob".into(),
            suggestion: "bob_1".into(),
        };
        assert!(taken.to_string().contains("'bob_1'"));
    }

    #[test]
    fn only_transport_errors_are_fatal() {
        assert!(ExchangeError::ConnectionClosed.is_fatal());
        assert!(ExchangeError::Transport(io::Error::from(io::ErrorKind::BrokenPipe)).is_fatal());
        assert!(!ExchangeError::Storage(io::Error::from(io::ErrorKind::PermissionDenied)).is_fatal());
        assert!(!ExchangeError::NotRegistered.is_fatal());
        assert!(!ExchangeError::UnknownCommand.is_fatal());
    }
}
