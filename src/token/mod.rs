//! Bearer token minting, validation, and revocation.
//!
//! Three token kinds flow through the gateway: short-lived single-use
//! pairing tokens, short-TTL access tokens, and long-TTL rotating refresh
//! tokens. Each token is bound to a random nonce, which is the unit of
//! revocation.

mod manager;
mod types;

pub use manager::{TokenManager, TokenTtls};
pub use types::{IssuedToken, TokenClaims, TokenKind, TokenPair};
