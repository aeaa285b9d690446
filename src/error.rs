//! Error types for IronLink.

use uuid::Uuid;

/// Top-level error type for the gateway core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("Pairing code error: {0}")]
    PairingCode(#[from] PairingCodeError),

    #[error("Permission error: {0}")]
    Permission(#[from] PermissionError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Token verification and lifecycle errors.
///
/// Every variant maps to the same opaque `401 unauthorized` at the HTTP
/// boundary so callers cannot probe which check failed. The variants exist
/// for internal logging only.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token is malformed")]
    Malformed,

    #[error("Token signature does not verify")]
    BadSignature,

    #[error("Token is expired")]
    Expired,

    #[error("Token nonce is revoked")]
    Revoked,

    #[error("Expected a {expected} token, got {got}")]
    WrongKind { expected: String, got: String },
}

/// Device registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Device not found: {device_id}")]
    DeviceNotFound { device_id: Uuid },

    #[error("Failed to persist registry state: {0}")]
    Persist(String),
}

/// Pairing approval errors.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("No approval record for request {request_id}")]
    RequestNotFound { request_id: Uuid },

    #[error("No approval record for nonce {nonce}")]
    NonceNotFound { nonce: Uuid },
}

/// Pairing code errors.
///
/// A single opaque variant: a wrong, expired, or already-used code must all
/// look identical to the caller.
#[derive(Debug, thiserror::Error)]
pub enum PairingCodeError {
    #[error("Invalid pairing code")]
    Invalid,
}

/// Permission bridge errors.
#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("No permission manager is configured")]
    NotConfigured,

    #[error("Permission request {request_id} timed out after {timeout_secs}s")]
    Timeout {
        request_id: String,
        timeout_secs: u64,
    },

    #[error("Failed to publish permission prompt: {reason}")]
    PublishFailed { reason: String },
}

/// Gateway (HTTP shell) errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Gateway failed to start: {reason}")]
    StartupFailed { reason: String },
}

/// Result type alias for the gateway core.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_missing_env_var_display() {
        let err = ConfigError::MissingEnvVar("IRONLINK_BIND".to_string());
        assert!(err.to_string().contains("IRONLINK_BIND"));
    }

    #[test]
    fn test_config_error_invalid_value_display() {
        let err = ConfigError::InvalidValue {
            key: "IRONLINK_ACCESS_TTL_SECS".to_string(),
            message: "must be a number".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("IRONLINK_ACCESS_TTL_SECS"));
        assert!(msg.contains("must be a number"));
    }

    #[test]
    fn test_token_error_variants_never_leak_detail_shape() {
        // All token failures must be expressible without carrying the token.
        for err in [
            TokenError::Malformed,
            TokenError::Expired,
            TokenError::Revoked,
            TokenError::BadSignature,
        ] {
            assert!(!err.to_string().is_empty());
        }
    }

    #[test]
    fn test_registry_error_device_not_found_display() {
        let id = Uuid::new_v4();
        let err = RegistryError::DeviceNotFound { device_id: id };
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_approval_error_request_not_found_display() {
        let id = Uuid::new_v4();
        let err = ApprovalError::RequestNotFound { request_id: id };
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_permission_error_timeout_display() {
        let err = PermissionError::Timeout {
            request_id: "toolu_123".to_string(),
            timeout_secs: 60,
        };
        let msg = err.to_string();
        assert!(msg.contains("toolu_123"));
        assert!(msg.contains("60"));
    }

    #[test]
    fn test_error_from_token_error() {
        let err = Error::from(TokenError::Expired);
        assert!(err.to_string().contains("Token error"));
    }

    #[test]
    fn test_error_from_pairing_code_error() {
        let err = Error::from(PairingCodeError::Invalid);
        assert!(err.to_string().contains("Pairing code error"));
    }
}
