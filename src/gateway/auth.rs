//! Bearer token authentication and local-network guard middleware.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::token::TokenKind;

use super::AppState;
use super::types::{forbidden, unauthorized};

/// Authenticated device identity, inserted into request extensions by
/// [`require_bearer`] for downstream handlers.
#[derive(Debug, Clone)]
pub struct DeviceContext {
    pub device_id: Option<Uuid>,
    pub nonce: Uuid,
}

/// Middleware validating an access token on every request.
///
/// Tokens are accepted from the `Authorization: Bearer` header or, because
/// `EventSource` cannot set headers, from a `?token=` query parameter.
/// Validation goes through the token manager each time, so a revoked nonce
/// is rejected immediately. All failures share one opaque `401`.
pub async fn require_bearer(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    if !state.auth_required {
        return next.run(request).await;
    }

    let Some(token) = bearer_token(&headers, request.uri().query()) else {
        return unauthorized();
    };

    match state
        .tokens
        .validate_expected(&token, TokenKind::Access)
        .await
    {
        Ok(claims) => {
            request.extensions_mut().insert(DeviceContext {
                device_id: claims.device_id,
                nonce: claims.nonce,
            });
            next.run(request).await
        }
        Err(e) => {
            tracing::warn!(error = %e, path = %request.uri().path(), "bearer auth rejected");
            unauthorized()
        }
    }
}

/// Middleware restricting operator endpoints to loopback peers.
///
/// A request without peer information (misconfigured server) is rejected
/// rather than assumed local.
pub async fn require_local(request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    match peer {
        Some(addr) if addr.ip().is_loopback() => next.run(request).await,
        Some(addr) => {
            tracing::warn!(peer = %addr, path = %request.uri().path(), "non-local caller rejected");
            forbidden("local_only").into_response()
        }
        None => forbidden("local_only").into_response(),
    }
}

/// Pull the token out of the `Authorization` header, falling back to the
/// `token` query parameter (URL-decoded).
fn bearer_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get("authorization")
        && let Ok(value) = value.to_str()
        && let Some(token) = value.strip_prefix("Bearer ")
    {
        return Some(token.to_string());
    }

    for pair in query?.split('&') {
        if let Some(raw) = pair.strip_prefix("token=") {
            let decoded = urlencoding::decode(raw).unwrap_or(std::borrow::Cow::Borrowed(raw));
            return Some(decoded.into_owned());
        }
    }
    None
}
