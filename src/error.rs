// Error handling module
// Defines the failure taxonomy surfaced by the client core

use thiserror::Error;

/// Errors raised by token handling and session management.
///
/// HTTP and transport failures are deliberately absent: the dispatcher
/// reports those inside the response envelope instead of raising them.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Access token is not a dot-delimited base64url + JSON structure
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Decoded payload lacks a required claim
    #[error("Missing claim: {0}")]
    MissingClaim(String),

    /// Authentication endpoint did not hand out the expected tokens
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal client error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ClientError::MalformedToken("expected at least 2 segments".to_string());
        assert_eq!(
            err.to_string(),
            "Malformed token: expected at least 2 segments"
        );

        let err = ClientError::MissingClaim("exp".to_string());
        assert_eq!(err.to_string(), "Missing claim: exp");

        let err = ClientError::AuthError("missing token field".to_string());
        assert_eq!(err.to_string(), "Authentication failed: missing token field");
    }

    #[test]
    fn test_config_error_message() {
        let err = ClientError::ConfigError("host must not be empty".to_string());
        assert_eq!(err.to_string(), "Configuration error: host must not be empty");
    }

    #[test]
    fn test_internal_error_message() {
        let err = ClientError::Internal(anyhow::anyhow!("Something went wrong"));
        assert_eq!(err.to_string(), "Internal error: Something went wrong");
    }
}
