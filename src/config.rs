//! Gateway configuration.
//!
//! Everything is read from `IRONLINK_*` environment variables (with `.env`
//! support in the binary) and can be overridden by CLI flags. Defaults are
//! chosen for a single developer machine: loopback bind, auth on, approval
//! gating off.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;

/// Default bind address for the gateway.
const DEFAULT_BIND: &str = "127.0.0.1:8787";

/// Runtime configuration for the gateway.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP listener binds to.
    pub bind_addr: SocketAddr,
    /// Public base URL advertised in pairing info (defaults to the bind
    /// address over http).
    pub public_url: Url,
    /// Registry persistence path; `None` keeps sessions in memory only.
    pub state_path: Option<PathBuf>,
    /// 32-byte token signing key; `None` generates a fresh one at startup,
    /// invalidating tokens across restarts.
    pub signing_key: Option<Vec<u8>>,
    /// Whether authenticated endpoints require a bearer token.
    pub auth_required: bool,
    /// Whether pairing exchanges wait for operator approval.
    pub require_approval: bool,
    /// Session display name shown in pairing info.
    pub session_name: String,
    /// Repository display name shown in pairing info.
    pub repo: Option<String>,
    /// Pairing token TTL.
    pub pairing_ttl: Duration,
    /// Access token TTL.
    pub access_ttl: Duration,
    /// Refresh token TTL.
    pub refresh_ttl: Duration,
    /// Pairing code TTL.
    pub pairing_code_ttl: Duration,
    /// How long the bridge waits for a remote permission decision.
    pub permission_timeout: Duration,
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr: SocketAddr = parse_env("IRONLINK_BIND", DEFAULT_BIND)?;
        let public_url = match std::env::var("IRONLINK_PUBLIC_URL") {
            Ok(raw) => Url::parse(&raw).map_err(|e| ConfigError::InvalidValue {
                key: "IRONLINK_PUBLIC_URL".to_string(),
                message: e.to_string(),
            })?,
            Err(_) => Url::parse(&format!("http://{bind_addr}/")).map_err(|e| {
                ConfigError::InvalidValue {
                    key: "IRONLINK_BIND".to_string(),
                    message: e.to_string(),
                }
            })?,
        };

        let signing_key = match std::env::var("IRONLINK_SIGNING_KEY") {
            Ok(raw) => Some(parse_signing_key(&raw)?),
            Err(_) => None,
        };

        let state_path = match std::env::var("IRONLINK_STATE_PATH") {
            Ok(raw) if raw.is_empty() => None,
            Ok(raw) => Some(PathBuf::from(raw)),
            Err(_) => default_state_path(),
        };

        Ok(Self {
            bind_addr,
            public_url,
            state_path,
            signing_key,
            auth_required: parse_env("IRONLINK_AUTH_REQUIRED", "true")?,
            require_approval: parse_env("IRONLINK_REQUIRE_APPROVAL", "false")?,
            session_name: session_name(),
            repo: std::env::var("IRONLINK_REPO").ok(),
            pairing_ttl: secs_env("IRONLINK_PAIRING_TTL_SECS", 5 * 60)?,
            access_ttl: secs_env("IRONLINK_ACCESS_TTL_SECS", 60 * 60)?,
            refresh_ttl: secs_env("IRONLINK_REFRESH_TTL_SECS", 30 * 24 * 60 * 60)?,
            pairing_code_ttl: secs_env("IRONLINK_PAIRING_CODE_TTL_SECS", 10 * 60)?,
            permission_timeout: secs_env("IRONLINK_PERMISSION_TIMEOUT_SECS", 60)?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND.parse().expect("default bind parses"),
            public_url: Url::parse(&format!("http://{DEFAULT_BIND}/"))
                .expect("default url parses"),
            state_path: None,
            signing_key: None,
            auth_required: true,
            require_approval: false,
            session_name: session_name(),
            repo: None,
            pairing_ttl: Duration::from_secs(5 * 60),
            access_ttl: Duration::from_secs(60 * 60),
            refresh_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            pairing_code_ttl: Duration::from_secs(10 * 60),
            permission_timeout: Duration::from_secs(60),
        }
    }
}

/// Hex-decode the signing key and insist on 32 bytes.
fn parse_signing_key(raw: &str) -> Result<Vec<u8>, ConfigError> {
    let key = hex::decode(raw.trim()).map_err(|e| ConfigError::InvalidValue {
        key: "IRONLINK_SIGNING_KEY".to_string(),
        message: e.to_string(),
    })?;
    if key.len() != 32 {
        return Err(ConfigError::InvalidValue {
            key: "IRONLINK_SIGNING_KEY".to_string(),
            message: format!("expected 32 bytes, got {}", key.len()),
        });
    }
    Ok(key)
}

fn default_state_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("ironlink").join("registry.json"))
}

fn session_name() -> String {
    if let Ok(name) = std::env::var("IRONLINK_SESSION") {
        return name;
    }
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "ironlink".to_string())
}

fn parse_env<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn secs_env(key: &str, default_secs: u64) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_env(key, &default_secs.to_string())?;
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_loopback_and_authed() {
        let config = Config::default();
        assert!(config.bind_addr.ip().is_loopback());
        assert!(config.auth_required);
        assert!(!config.require_approval);
        assert_eq!(config.pairing_ttl, Duration::from_secs(300));
        assert_eq!(config.pairing_code_ttl, Duration::from_secs(600));
        assert_eq!(config.permission_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_signing_key_must_be_32_bytes() {
        let key = parse_signing_key(&"ab".repeat(32)).unwrap();
        assert_eq!(key.len(), 32);

        let err = parse_signing_key("abcd").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = parse_signing_key("not hex").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_session_name_has_fallback() {
        // Whatever the host returns, the name is never empty.
        assert!(!session_name().is_empty());
    }
}
