//! Error types for Tapedeck

use std::io;
use thiserror::Error;

/// Result type for Tapedeck operations
pub type Result<T> = std::result::Result<T, TapedeckError>;

/// Guidance appended to every forbidden-connection error
pub const RECORDING_INSTRUCTIONS: &str = "Insert a cassette with a recording mode that allows \
     new interactions (`new_episodes` or `all`, or `once` on a cassette with no recorded \
     interactions) to record this request and replay it later.";

/// Errors that can occur in Tapedeck
#[derive(Debug, Error)]
pub enum TapedeckError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Matcher name was never registered
    #[error("There is no matcher registered for {0:?}. Did you misspell it?")]
    UnregisteredMatcher(String),

    /// Live request attempted while the recording mode forbids it
    #[error(
        "Real HTTP connections are disabled. Request: {method} {uri}. {}",
        RECORDING_INSTRUCTIONS
    )]
    ConnectionNotAllowed {
        /// Upper-cased HTTP method of the rejected request
        method: String,
        /// URI of the rejected request
        uri: String,
    },

    /// A before_record or before_playback hook failed
    #[error("Hook failed: {0}")]
    Hook(String),

    /// Invalid cassette name
    #[error("Invalid cassette name: {0}")]
    InvalidCassetteName(String),

    /// Parent chain of interaction lists is too deep
    #[error("Cassette nesting too deep: {depth} exceeds limit of {limit}")]
    NestingTooDeep {
        /// Depth the new list would have
        depth: usize,
        /// Maximum allowed depth
        limit: usize,
    },

    /// Cassette not present in the persister
    #[error("Cassette not found: {0}")]
    CassetteNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_not_allowed_message() {
        let error = TapedeckError::ConnectionNotAllowed {
            method: "POST".to_string(),
            uri: "http://example.com/foo".to_string(),
        };
        let message = error.to_string();

        assert!(message.contains("POST http://example.com/foo"));
        assert!(message.contains("Insert a cassette"));
    }

    #[test]
    fn test_unregistered_matcher_message() {
        let error = TapedeckError::UnregisteredMatcher("custom".to_string());
        assert!(error.to_string().contains("\"custom\""));
    }
}
