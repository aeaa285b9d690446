//! Token claims and issuance types.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Short-lived, single-use credential exchanged for a device's first
    /// access/refresh pair.
    Pairing,
    /// Short-TTL credential presented on authenticated calls.
    Access,
    /// Long-TTL credential used to mint a new pair; rotates on use.
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Pairing => write!(f, "pairing"),
            TokenKind::Access => write!(f, "access"),
            TokenKind::Refresh => write!(f, "refresh"),
        }
    }
}

/// Signed claims carried inside a wire token.
///
/// The wire form is `base64url(claims_json) . base64url(mac)`. Unknown
/// payload fields round-trip through `extra`; the typed fields above always
/// take precedence when both are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Token kind.
    #[serde(rename = "type")]
    pub kind: TokenKind,
    /// Random per-token identifier; the unit of revocation.
    pub nonce: Uuid,
    /// Device this token is bound to. Pairing tokens carry none; access and
    /// refresh tokens are always issued in pairs sharing one device id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<Uuid>,
    /// Hard expiry; tokens are rejected at or after this instant.
    pub expires_at: DateTime<Utc>,
    /// Forward-compatible open attributes.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A freshly minted token together with the metadata callers need to
/// register or display it.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Encoded wire token.
    pub token: String,
    /// The token's nonce.
    pub nonce: Uuid,
    /// When the token expires.
    pub expires_at: DateTime<Utc>,
}

/// A bound access/refresh pair sharing one device id.
#[derive(Debug, Clone)]
pub struct TokenPair {
    /// Device identity both tokens are bound to.
    pub device_id: Uuid,
    /// Short-TTL access token.
    pub access: IssuedToken,
    /// Long-TTL refresh token.
    pub refresh: IssuedToken,
}
