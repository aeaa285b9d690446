//! HTTP handlers for the gateway surface.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::Json;
use axum::extract::{ConnectInfo, FromRequestParts, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use futures::StreamExt as _;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::approval::{ApprovalDecision, PairingApproval};
use crate::error::TokenError;
use crate::pairing::PairingInfo;
use crate::permission::{PermissionRequest, PermissionResponse};
use crate::token::{TokenKind, TokenPair};

use super::AppState;
use super::types::{
    ApiError, CodeExchangeRequest, CodeExchangeResponse, DeliveredResponse, ErrorBody,
    ExchangeRequest, PairingCodeResponse, PendingApprovalResponse, PermissionHookRequest,
    RefreshRequest, RevokeRequest, RevokeResponse, TokenPairResponse, forbidden,
};

/// Peer address of the connection, when the server was built with connect
/// info. Extracted manually so handlers keep working in in-process tests.
pub struct PeerAddr(pub Option<SocketAddr>);

impl<S: Send + Sync> FromRequestParts<S> for PeerAddr {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0),
        ))
    }
}

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `POST /auth/exchange`
///
/// With approval gating enabled this is a three-state handshake: the first
/// call parks the request as pending and returns `202`; once the operator
/// approves, a retry redeems the token. Expiry is checked before the
/// approval record is consulted, so a stale approval never revives an
/// expired token.
pub async fn exchange(
    State(state): State<AppState>,
    peer: PeerAddr,
    headers: HeaderMap,
    Json(body): Json<ExchangeRequest>,
) -> Result<Response, ApiError> {
    let claims = state
        .tokens
        .validate_expected(&body.pairing_token, TokenKind::Pairing)
        .await?;

    if state.require_approval {
        match state.approvals.status(claims.nonce).await {
            Some(ApprovalDecision::Approved) => {}
            Some(ApprovalDecision::Rejected) => {
                tracing::warn!(nonce = %claims.nonce, "pairing exchange rejected by operator");
                return Ok(forbidden("pairing_rejected"));
            }
            Some(ApprovalDecision::Pending) | None => {
                let remote_addr = peer
                    .0
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                let user_agent = headers
                    .get(header::USER_AGENT)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let approval = state
                    .approvals
                    .ensure_pending(claims.nonce, remote_addr, user_agent, claims.expires_at)
                    .await;
                return Ok((
                    StatusCode::ACCEPTED,
                    Json(PendingApprovalResponse {
                        status: "pending_approval".to_string(),
                        request_id: approval.request_id,
                        expires_at: approval.expires_at,
                    }),
                )
                    .into_response());
            }
        }
    }

    let pair = state
        .tokens
        .exchange_pairing_token(&body.pairing_token)
        .await?;
    state.approvals.clear(claims.nonce).await;
    register_pair(&state, &pair).await;

    Ok(Json(TokenPairResponse::from(&pair)).into_response())
}

/// `POST /auth/refresh`
pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<TokenPairResponse>, ApiError> {
    let pair = state.tokens.refresh_token_pair(&body.refresh_token).await?;
    register_pair(&state, &pair).await;
    Ok(Json(TokenPairResponse::from(&pair)))
}

/// `POST /auth/revoke`
///
/// Revokes the refresh nonce and the device's current access nonce, removes
/// the device session, and forwards any orphaned workspaces to the cleanup
/// collaborator. Registry trouble after the nonce revocations is logged and
/// swallowed; the revocation itself already happened.
pub async fn revoke(
    State(state): State<AppState>,
    Json(body): Json<RevokeRequest>,
) -> Result<Json<RevokeResponse>, ApiError> {
    let claims = state
        .tokens
        .validate_expected(&body.refresh_token, TokenKind::Refresh)
        .await?;
    let device_id = claims.device_id.ok_or(TokenError::Malformed)?;

    state.tokens.revoke_nonce(claims.nonce).await;

    let mut orphaned = Vec::new();
    if let Some(session) = state.registry.get_device(device_id).await {
        state.tokens.revoke_nonce(session.access_nonce).await;
        state.tokens.revoke_nonce(session.refresh_nonce).await;
        match state.registry.remove_device(device_id).await {
            Ok(ids) => orphaned = ids,
            Err(e) => {
                tracing::warn!(%device_id, error = %e, "device removal failed after revocation")
            }
        }
    }

    state.cleanup.workspaces_orphaned(&orphaned).await;
    Ok(Json(RevokeResponse {
        success: true,
        orphaned_workspaces: orphaned,
    }))
}

/// `GET /pairing/info`
///
/// The JSON payload a pairing QR or page encodes. When auth is on, a fresh
/// pairing token rides along so scanning is a one-step pairing.
pub async fn pairing_info(State(state): State<AppState>) -> Json<PairingInfo> {
    let mut info = PairingInfo::new(
        &state.public_url,
        state.session_name.clone(),
        state.repo.clone(),
        state.auth_required,
    );
    if state.auth_required {
        let issued = state.tokens.generate_pairing_token().await;
        info = info.with_token(issued.token, issued.expires_at);
    }
    Json(info)
}

/// `POST /pairing/code` (local-only): surface the live 6-digit code so the
/// CLI can display it.
pub async fn issue_pairing_code(State(state): State<AppState>) -> Json<PairingCodeResponse> {
    let code = state.pairing_code.current().await;
    Json(PairingCodeResponse {
        pairing_code: code.value,
        expires_at: code.expires_at,
    })
}

/// `POST /pairing/code/exchange`: burn the code for a pairing token.
pub async fn exchange_pairing_code(
    State(state): State<AppState>,
    Json(body): Json<CodeExchangeRequest>,
) -> Result<Json<CodeExchangeResponse>, ApiError> {
    state.pairing_code.consume(&body.code).await?;
    let issued = state.tokens.generate_pairing_token().await;
    Ok(Json(CodeExchangeResponse {
        pairing_token: issued.token,
        expires_at: issued.expires_at,
    }))
}

/// `GET /approvals` (local-only)
pub async fn list_approvals(State(state): State<AppState>) -> Json<Vec<PairingApproval>> {
    Json(state.approvals.list_pending().await)
}

/// `POST /approvals/{request_id}/approve` (local-only)
pub async fn approve_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<PairingApproval>, ApiError> {
    Ok(Json(state.approvals.approve_request(request_id).await?))
}

/// `POST /approvals/{request_id}/reject` (local-only)
pub async fn reject_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<PairingApproval>, ApiError> {
    Ok(Json(state.approvals.reject_request(request_id).await?))
}

/// `POST /hooks/permission-request` (local-only, called by the agent)
///
/// Blocks until a decision exists. Never errors: timeout and missing
/// collaborators both come back as an `ask` fallback so the tool invocation
/// can proceed through the local prompt.
pub async fn permission_request(
    State(state): State<AppState>,
    Json(body): Json<PermissionHookRequest>,
) -> Response {
    let request = PermissionRequest::new(
        body.tool_use_id,
        body.session_id,
        body.workspace_id,
        body.tool_name,
        body.tool_input,
    );
    Json(state.bridge.request(request).await).into_response()
}

/// `POST /permissions/{id}/respond` (bearer-authenticated)
///
/// Delivery of the device's decision. A late or duplicate response is
/// reported as `delivered: false`, never an error.
pub async fn respond_permission(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    Json(body): Json<PermissionResponse>,
) -> Json<DeliveredResponse> {
    let delivered = state.bridge.respond(&request_id, body).await;
    Json(DeliveredResponse { delivered })
}

/// `GET /events` (bearer-authenticated): SSE stream of permission prompts.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.prompts.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| async move {
        match item {
            Ok(prompt) => Event::default()
                .event("permission_request")
                .json_data(&prompt)
                .ok()
                .map(Ok),
            // A lagged subscriber just misses the dropped prompts.
            Err(e) => {
                tracing::warn!(error = %e, "event stream subscriber lagged");
                None
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Fallback for unknown routes.
pub async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: "not_found".to_string(),
        }),
    )
        .into_response()
}

/// Record the pair's nonces in the registry. Best-effort: the tokens are
/// already issued, so registry trouble must not fail the exchange.
async fn register_pair(state: &AppState, pair: &TokenPair) {
    state
        .registry
        .register_device(
            pair.device_id,
            pair.refresh.nonce,
            pair.refresh.expires_at,
            pair.access.nonce,
            pair.access.expires_at,
        )
        .await;
}
