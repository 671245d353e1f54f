//! Common error types for Beacon components.

use std::path::PathBuf;
use thiserror::Error;

/// Common errors across Beacon components
#[derive(Debug, Error)]
pub enum BeaconError {
    /// Local socket setup or send failure
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Envelope could not be serialized for the wire
    #[error("Encode error: {0}")]
    Encode(String),

    /// Inbound datagram could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Worker executable could not be launched
    #[error("Failed to launch {path}: {source}")]
    Launch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Worker executable could not be resolved for a role
    #[error("Resolve error: {0}")]
    Resolve(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BeaconError {
    /// Returns true if this error should abort startup
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Decode(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_errors_are_recoverable() {
        assert!(!BeaconError::Decode("garbage".into()).is_fatal());
        assert!(BeaconError::Resolve("missing".into()).is_fatal());
        assert!(BeaconError::Transport(std::io::Error::other("boom")).is_fatal());
    }

    #[test]
    fn test_launch_error_names_path() {
        let err = BeaconError::Launch {
            path: PathBuf::from("/opt/leader"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.to_string().contains("/opt/leader"));
    }
}
