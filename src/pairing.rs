//! Pairing code and pairing-info payload.
//!
//! The 6-digit code is the low-friction alternative to scanning a QR: the
//! gateway keeps at most one live code, regenerates it lazily once expired,
//! and burns it on first successful use. Generation-if-stale and
//! consume-with-constant-time-compare each run entirely under the issuer
//! lock, which closes both the double-issue race and the timing
//! side-channel.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use url::Url;

use crate::error::PairingCodeError;

/// Default lifetime of a pairing code.
const DEFAULT_CODE_TTL_MINUTES: i64 = 10;

/// A live 6-digit pairing code.
#[derive(Debug, Clone, Serialize)]
pub struct PairingCode {
    /// Six decimal digits.
    pub value: String,
    /// When the code stops being accepted.
    pub expires_at: DateTime<Utc>,
}

impl PairingCode {
    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Issues and redeems the single live pairing code.
///
/// Cheap to clone; clones share the slot.
#[derive(Clone)]
pub struct PairingCodeIssuer {
    current: Arc<Mutex<Option<PairingCode>>>,
    ttl: Duration,
}

impl PairingCodeIssuer {
    /// Issuer with the default 10-minute TTL.
    pub fn new() -> Self {
        Self::with_ttl(Duration::minutes(DEFAULT_CODE_TTL_MINUTES))
    }

    /// Issuer with a custom TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            current: Arc::new(Mutex::new(None)),
            ttl,
        }
    }

    /// The live code, minting a fresh one if none exists or the previous one
    /// expired or was used.
    pub async fn current(&self) -> PairingCode {
        let mut slot = self.current.lock().await;
        match slot.as_ref() {
            Some(code) if !code.is_expired() => code.clone(),
            _ => {
                let code = PairingCode {
                    value: generate_code(),
                    expires_at: Utc::now() + self.ttl,
                };
                *slot = Some(code.clone());
                tracing::info!(expires_at = %code.expires_at, "pairing code issued");
                code
            }
        }
    }

    /// Redeem a candidate code.
    ///
    /// Single use: the live code is burned on success. Wrong, expired, and
    /// already-used candidates are indistinguishable to the caller.
    pub async fn consume(&self, candidate: &str) -> Result<(), PairingCodeError> {
        let mut slot = self.current.lock().await;
        let matches = match slot.as_ref() {
            Some(code) if !code.is_expired() => bool::from(
                code.value.as_bytes().ct_eq(candidate.as_bytes()),
            ),
            _ => false,
        };
        if matches {
            *slot = None;
            tracing::info!("pairing code redeemed");
            Ok(())
        } else {
            tracing::warn!("pairing code rejected");
            Err(PairingCodeError::Invalid)
        }
    }
}

impl Default for PairingCodeIssuer {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a random 6-digit code using `OsRng`.
fn generate_code() -> String {
    let code: u32 = OsRng.gen_range(100_000..1_000_000);
    code.to_string()
}

/// Payload a pairing QR or page carries: everything the companion app needs
/// to connect and authenticate.
///
/// Unknown fields round-trip through `extra` so newer apps and older
/// gateways can disagree about the payload without breaking each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingInfo {
    /// WebSocket endpoint of the gateway.
    pub ws: String,
    /// HTTP endpoint of the gateway.
    pub http: String,
    /// Display name of this session (defaults to the host name).
    pub session: String,
    /// Repository the agent is working in, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    /// Whether the gateway requires bearer authentication.
    pub auth_required: bool,
    /// Fresh pairing token, present when authentication is required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Expiry of `token`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<DateTime<Utc>>,
    /// Forward-compatible open attributes.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl PairingInfo {
    /// Build the payload from the gateway's public base URL.
    pub fn new(base: &Url, session: String, repo: Option<String>, auth_required: bool) -> Self {
        let mut ws = base.clone();
        // http -> ws, https -> wss; other schemes are left alone.
        let scheme = match base.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        let _ = ws.set_scheme(scheme);

        Self {
            ws: ws.to_string(),
            http: base.to_string(),
            session,
            repo,
            auth_required,
            token: None,
            token_expires_at: None,
            extra: HashMap::new(),
        }
    }

    /// Attach a freshly minted pairing token.
    pub fn with_token(mut self, token: String, expires_at: DateTime<Utc>) -> Self {
        self.token = Some(token);
        self.token_expires_at = Some(expires_at);
        self
    }
}
