//! Wire types for the gateway's HTTP surface.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApprovalError, Error, RegistryError};
use crate::token::TokenPair;

/// Request body for `POST /auth/exchange`.
#[derive(Debug, Deserialize)]
pub struct ExchangeRequest {
    pub pairing_token: String,
}

/// Request body for `POST /auth/refresh`.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Request body for `POST /auth/revoke`.
#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub refresh_token: String,
}

/// Successful exchange/refresh response.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
    pub token_type: String,
    /// Seconds until the access token expires.
    pub expires_in: i64,
}

impl From<&TokenPair> for TokenPairResponse {
    fn from(pair: &TokenPair) -> Self {
        Self {
            access_token: pair.access.token.clone(),
            access_token_expires_at: pair.access.expires_at,
            refresh_token: pair.refresh.token.clone(),
            refresh_token_expires_at: pair.refresh.expires_at,
            token_type: "Bearer".to_string(),
            expires_in: (pair.access.expires_at - Utc::now()).num_seconds().max(0),
        }
    }
}

/// `202` body while a gated exchange waits for the operator.
#[derive(Debug, Serialize, Deserialize)]
pub struct PendingApprovalResponse {
    pub status: String,
    pub request_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Response for `POST /auth/revoke`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RevokeResponse {
    pub success: bool,
    pub orphaned_workspaces: Vec<String>,
}

/// Response for the local-only pairing code issuance endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct PairingCodeResponse {
    pub pairing_code: String,
    pub expires_at: DateTime<Utc>,
}

/// Request body for `POST /pairing/code/exchange`.
#[derive(Debug, Deserialize)]
pub struct CodeExchangeRequest {
    pub code: String,
}

/// Response for `POST /pairing/code/exchange`: a fresh pairing token to feed
/// into the normal exchange flow.
#[derive(Debug, Serialize, Deserialize)]
pub struct CodeExchangeResponse {
    pub pairing_token: String,
    pub expires_at: DateTime<Utc>,
}

/// `POST /hooks/permission-request` body, sent by the local agent.
#[derive(Debug, Deserialize)]
pub struct PermissionHookRequest {
    pub session_id: String,
    pub tool_name: String,
    pub tool_use_id: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub tool_input: serde_json::Value,
}

/// Response for `POST /permissions/{id}/respond`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeliveredResponse {
    pub delivered: bool,
}

/// Uniform error body. `error` is a coarse machine-readable label.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Error wrapper that maps core errors onto the HTTP surface.
///
/// Every token and pairing-code failure collapses to the same opaque `401`
/// so the wire never reveals which check failed; the specific reason goes to
/// the log only.
pub struct ApiError(pub Error);

impl<E> From<E> for ApiError
where
    E: Into<Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, label) = match &self.0 {
            Error::Token(e) => {
                tracing::warn!(error = %e, "token rejected");
                (StatusCode::UNAUTHORIZED, "unauthorized")
            }
            Error::PairingCode(e) => {
                tracing::warn!(error = %e, "pairing code rejected");
                (StatusCode::UNAUTHORIZED, "unauthorized")
            }
            Error::Registry(RegistryError::DeviceNotFound { .. })
            | Error::Approval(ApprovalError::RequestNotFound { .. })
            | Error::Approval(ApprovalError::NonceNotFound { .. }) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            e => {
                tracing::error!(error = %e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };
        (
            status,
            Json(ErrorBody {
                error: label.to_string(),
            }),
        )
            .into_response()
    }
}

/// `403` with a short machine-readable label.
pub fn forbidden(label: &str) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(ErrorBody {
            error: label.to_string(),
        }),
    )
        .into_response()
}

/// The opaque `401` used for every authentication failure.
pub fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorBody {
            error: "unauthorized".to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TokenError;

    #[test]
    fn test_token_errors_collapse_to_one_status() {
        for err in [
            TokenError::Malformed,
            TokenError::Expired,
            TokenError::Revoked,
            TokenError::BadSignature,
        ] {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn test_unknown_device_maps_to_not_found() {
        let err = RegistryError::DeviceNotFound {
            device_id: Uuid::new_v4(),
        };
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_token_pair_response_shape() {
        let value = serde_json::to_value(TokenPairResponse {
            access_token: "a".to_string(),
            access_token_expires_at: Utc::now(),
            refresh_token: "r".to_string(),
            refresh_token_expires_at: Utc::now(),
            token_type: "Bearer".to_string(),
            expires_in: 3600,
        })
        .unwrap();
        assert_eq!(value["token_type"], "Bearer");
        assert_eq!(value["expires_in"], 3600);
    }
}
