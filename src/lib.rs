//! IronLink: the trust boundary of a remote-control backend for a local
//! coding agent.
//!
//! A mobile companion app pairs with the gateway by redeeming a short-lived
//! pairing token (carried by a QR payload or a 6-digit code) for an
//! access/refresh pair, authenticates subsequent calls with the access
//! token, and answers permission prompts when the agent is about to run a
//! sensitive tool.
//!
//! The cores are explicit, injectable stores constructed once at startup,
//! never ambient singletons:
//! - [`token::TokenManager`]: mints, validates, and revokes bearer tokens.
//! - [`registry::AuthRegistry`]: device sessions and workspace bindings.
//! - [`approval::PairingApprovalManager`]: operator gate on pairing.
//! - [`permission::PermissionBridge`]: blocking tool-permission requests
//!   answered by the paired device, with pattern memory and a timeout
//!   fallback.
//! - [`gateway`]: the axum shell exposing them over HTTP.

pub mod approval;
pub mod config;
pub mod error;
pub mod gateway;
pub mod pairing;
pub mod permission;
pub mod registry;
pub mod token;

pub use config::Config;
pub use error::{Error, Result};
