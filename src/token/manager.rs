//! Token minting, validation, and revocation.
//!
//! Security properties:
//! - Nonces and device ids are random UUIDs; the signing key is 32 bytes
//!   from `OsRng` unless supplied by configuration.
//! - Payloads are signed with HMAC-SHA256 and verified with a constant-time
//!   comparison.
//! - Validation never consults the device registry; revocation is a nonce
//!   set checked on every call, so it takes effect for in-flight requests.
//! - Pairing tokens are single-use and refresh tokens rotate: redemption
//!   consumes the nonce atomically, so a replay loses the race.

use std::collections::HashSet;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretSlice};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::TokenError;

use super::types::{IssuedToken, TokenClaims, TokenKind, TokenPair};

type HmacSha256 = Hmac<Sha256>;

/// Time-to-live for each token kind.
#[derive(Debug, Clone, Copy)]
pub struct TokenTtls {
    /// Pairing tokens: minutes. Long enough to scan a QR, no longer.
    pub pairing: Duration,
    /// Access tokens: short, bounded damage if leaked.
    pub access: Duration,
    /// Refresh tokens: long-lived, rotated on every use.
    pub refresh: Duration,
}

impl Default for TokenTtls {
    fn default() -> Self {
        Self {
            pairing: Duration::minutes(5),
            access: Duration::hours(1),
            refresh: Duration::days(30),
        }
    }
}

/// Mints, validates, and revokes the gateway's bearer tokens.
///
/// Cheap to clone; clones share the signing key and the revocation set.
#[derive(Clone)]
pub struct TokenManager {
    /// HMAC-SHA256 signing key. Never logged, never serialized. Behind a
    /// lock so `revoke_all` can rotate it across every clone at once.
    key: Arc<RwLock<SecretSlice<u8>>>,
    /// Revoked (or consumed) nonces, checked on every validation.
    revoked: Arc<RwLock<HashSet<Uuid>>>,
    ttls: TokenTtls,
}

impl TokenManager {
    /// Create a manager with the given 32-byte signing key and default TTLs.
    pub fn new(key: Vec<u8>) -> Self {
        Self::with_ttls(key, TokenTtls::default())
    }

    /// Create a manager with custom TTLs.
    pub fn with_ttls(key: Vec<u8>, ttls: TokenTtls) -> Self {
        Self {
            key: Arc::new(RwLock::new(SecretSlice::from(key))),
            revoked: Arc::new(RwLock::new(HashSet::new())),
            ttls,
        }
    }

    /// Generate a fresh random signing key using `OsRng`.
    pub fn generate_key() -> Vec<u8> {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        bytes.to_vec()
    }

    /// Mint a short-lived pairing token with no device association.
    pub async fn generate_pairing_token(&self) -> IssuedToken {
        self.mint(TokenKind::Pairing, None, self.ttls.pairing).await
    }

    /// Redeem a pairing token for a new device's first access/refresh pair.
    ///
    /// Single use: the pairing nonce is consumed atomically, so exchanging
    /// the same token twice succeeds exactly once.
    pub async fn exchange_pairing_token(&self, token: &str) -> Result<TokenPair, TokenError> {
        let claims = self.decode_and_verify(token).await?;
        expect_kind(&claims, TokenKind::Pairing)?;
        self.consume_nonce(claims.nonce).await?;

        let device_id = Uuid::new_v4();
        tracing::info!(%device_id, "pairing token exchanged, new device registered");
        Ok(self.mint_pair(device_id).await)
    }

    /// Rotate a refresh token into a new access/refresh pair for the same
    /// device. The old refresh nonce is consumed, which blocks replay.
    pub async fn refresh_token_pair(&self, token: &str) -> Result<TokenPair, TokenError> {
        let claims = self.decode_and_verify(token).await?;
        expect_kind(&claims, TokenKind::Refresh)?;
        let device_id = claims.device_id.ok_or(TokenError::Malformed)?;
        self.consume_nonce(claims.nonce).await?;

        tracing::debug!(%device_id, "refresh token rotated");
        Ok(self.mint_pair(device_id).await)
    }

    /// Verify a token and return its claims.
    ///
    /// Checks signature, expiry, and the revocation set; never consults the
    /// device registry.
    pub async fn validate(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let claims = self.decode_and_verify(token).await?;
        if self.revoked.read().await.contains(&claims.nonce) {
            return Err(TokenError::Revoked);
        }
        Ok(claims)
    }

    /// Verify a token and additionally require a specific kind.
    pub async fn validate_expected(
        &self,
        token: &str,
        kind: TokenKind,
    ) -> Result<TokenClaims, TokenError> {
        let claims = self.validate(token).await?;
        expect_kind(&claims, kind)?;
        Ok(claims)
    }

    /// Revoke a single nonce. Effective immediately for in-flight requests.
    pub async fn revoke_nonce(&self, nonce: Uuid) {
        self.revoked.write().await.insert(nonce);
        tracing::info!(%nonce, "token nonce revoked");
    }

    /// Revoke every outstanding token at once.
    ///
    /// Enumerating all live nonces would require the registry, so this
    /// rotates the signing key instead: no previously issued token verifies
    /// afterwards, and the consumed-nonce set can be dropped.
    pub async fn revoke_all(&self) {
        *self.key.write().await = SecretSlice::from(Self::generate_key());
        self.revoked.write().await.clear();
        tracing::warn!("signing key rotated, all outstanding tokens invalidated");
    }

    async fn mint(&self, kind: TokenKind, device_id: Option<Uuid>, ttl: Duration) -> IssuedToken {
        let claims = TokenClaims {
            kind,
            nonce: Uuid::new_v4(),
            device_id,
            expires_at: Utc::now() + ttl,
            extra: Default::default(),
        };
        // Claims are built from plain types; serialization cannot fail.
        let payload = serde_json::to_vec(&claims).expect("claims serialize");
        let mac = self.sign(&payload).await;
        let token = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(mac)
        );
        IssuedToken {
            token,
            nonce: claims.nonce,
            expires_at: claims.expires_at,
        }
    }

    async fn mint_pair(&self, device_id: Uuid) -> TokenPair {
        TokenPair {
            device_id,
            access: self
                .mint(TokenKind::Access, Some(device_id), self.ttls.access)
                .await,
            refresh: self
                .mint(TokenKind::Refresh, Some(device_id), self.ttls.refresh)
                .await,
        }
    }

    async fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let key = self.key.read().await;
        let mut mac =
            HmacSha256::new_from_slice(key.expose_secret()).expect("HMAC key can be any length");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }

    /// Decode, verify the MAC in constant time, and check expiry.
    ///
    /// Revocation is checked separately so redemption paths can consume the
    /// nonce atomically instead of racing a read.
    async fn decode_and_verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let (payload_b64, mac_b64) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenError::Malformed)?;
        let mac = URL_SAFE_NO_PAD
            .decode(mac_b64)
            .map_err(|_| TokenError::Malformed)?;

        let expected = self.sign(&payload).await;
        if !bool::from(expected.as_slice().ct_eq(mac.as_slice())) {
            return Err(TokenError::BadSignature);
        }

        let claims: TokenClaims =
            serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;
        if Utc::now() >= claims.expires_at {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    /// Mark a nonce consumed. Errors if it already was, so concurrent
    /// redemptions of the same token cannot both succeed.
    async fn consume_nonce(&self, nonce: Uuid) -> Result<(), TokenError> {
        if self.revoked.write().await.insert(nonce) {
            Ok(())
        } else {
            Err(TokenError::Revoked)
        }
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("key", &"[REDACTED]")
            .field("ttls", &self.ttls)
            .finish()
    }
}

fn expect_kind(claims: &TokenClaims, expected: TokenKind) -> Result<(), TokenError> {
    if claims.kind == expected {
        Ok(())
    } else {
        Err(TokenError::WrongKind {
            expected: expected.to_string(),
            got: claims.kind.to_string(),
        })
    }
}
