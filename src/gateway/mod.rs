//! HTTP shell around the pairing, token, approval, and permission cores.
//!
//! The router is the only place the cores meet the wire. Open endpoints
//! (health, pairing info, exchange/refresh/revoke) validate their own
//! tokens; operator endpoints are loopback-only; everything else sits
//! behind the bearer middleware.

pub mod auth;
pub mod routes;
pub mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use chrono::Duration as ChronoDuration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use url::Url;

use crate::approval::PairingApprovalManager;
use crate::config::Config;
use crate::error::GatewayError;
use crate::pairing::PairingCodeIssuer;
use crate::permission::{BroadcastPublisher, InMemoryDecisionMemory, PermissionBridge};
use crate::registry::{AuthRegistry, LoggingCleanup, WorkspaceCleanup};
use crate::token::{TokenManager, TokenTtls};

/// Shared state behind every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub tokens: TokenManager,
    pub registry: AuthRegistry,
    pub approvals: PairingApprovalManager,
    pub pairing_code: PairingCodeIssuer,
    pub bridge: PermissionBridge,
    pub prompts: Arc<BroadcastPublisher>,
    pub cleanup: Arc<dyn WorkspaceCleanup>,
    pub public_url: Url,
    pub session_name: String,
    pub repo: Option<String>,
    pub auth_required: bool,
    pub require_approval: bool,
}

impl AppState {
    /// Assemble the cores from configuration with the default collaborators
    /// (in-memory pattern store, broadcast prompt stream, logging cleanup).
    pub fn from_config(config: &Config) -> Self {
        let key = config.signing_key.clone().unwrap_or_else(|| {
            tracing::warn!("no signing key configured, tokens will not survive a restart");
            TokenManager::generate_key()
        });
        let ttls = TokenTtls {
            pairing: ChronoDuration::seconds(config.pairing_ttl.as_secs() as i64),
            access: ChronoDuration::seconds(config.access_ttl.as_secs() as i64),
            refresh: ChronoDuration::seconds(config.refresh_ttl.as_secs() as i64),
        };

        let registry = match &config.state_path {
            Some(path) => AuthRegistry::with_persistence(path.clone()),
            None => AuthRegistry::in_memory(),
        };

        let prompts = Arc::new(BroadcastPublisher::default());
        let bridge = PermissionBridge::new()
            .with_memory(Arc::new(InMemoryDecisionMemory::new()))
            .with_publisher(prompts.clone())
            .with_wait(config.permission_timeout);

        Self {
            tokens: TokenManager::with_ttls(key, ttls),
            registry,
            approvals: PairingApprovalManager::new(),
            pairing_code: PairingCodeIssuer::with_ttl(ChronoDuration::seconds(
                config.pairing_code_ttl.as_secs() as i64,
            )),
            bridge,
            prompts,
            cleanup: Arc::new(LoggingCleanup),
            public_url: config.public_url.clone(),
            session_name: config.session_name.clone(),
            repo: config.repo.clone(),
            auth_required: config.auth_required,
            require_approval: config.require_approval,
        }
    }

    /// Swap in a different orphaned-workspace collaborator.
    pub fn with_cleanup(mut self, cleanup: Arc<dyn WorkspaceCleanup>) -> Self {
        self.cleanup = cleanup;
        self
    }
}

/// Build the gateway router.
pub fn router(state: AppState) -> Router {
    let open = Router::new()
        .route("/health", get(routes::health))
        .route("/auth/exchange", post(routes::exchange))
        .route("/auth/refresh", post(routes::refresh))
        .route("/auth/revoke", post(routes::revoke))
        .route("/pairing/info", get(routes::pairing_info))
        .route("/pairing/code/exchange", post(routes::exchange_pairing_code));

    let local_only = Router::new()
        .route("/pairing/code", post(routes::issue_pairing_code))
        .route("/approvals", get(routes::list_approvals))
        .route(
            "/approvals/{request_id}/approve",
            post(routes::approve_request),
        )
        .route(
            "/approvals/{request_id}/reject",
            post(routes::reject_request),
        )
        .route(
            "/hooks/permission-request",
            post(routes::permission_request),
        )
        .layer(middleware::from_fn(auth::require_local));

    let authenticated = Router::new()
        .route(
            "/permissions/{request_id}/respond",
            post(routes::respond_permission),
        )
        .route("/events", get(routes::events))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    Router::new()
        .merge(open)
        .merge(local_only)
        .merge(authenticated)
        .fallback(routes::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// The HTTP server hosting the gateway router.
///
/// Bind, spawn, and shut down follow the same lifecycle as the rest of the
/// stack: `start()` binds the listener and spawns the serve task; a oneshot
/// triggers graceful shutdown.
pub struct Gateway {
    addr: SocketAddr,
    router: Router,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Gateway {
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self {
            addr,
            router,
            local_addr: None,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Bind the listener and spawn the server task. Returns the bound
    /// address (useful with port 0).
    pub async fn start(&mut self) -> Result<SocketAddr, GatewayError> {
        let listener = tokio::net::TcpListener::bind(self.addr).await.map_err(|e| {
            GatewayError::StartupFailed {
                reason: format!("failed to bind to {}: {}", self.addr, e),
            }
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| GatewayError::StartupFailed {
                reason: e.to_string(),
            })?;

        tracing::info!("gateway listening on {local_addr}");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let app = self
            .router
            .clone()
            .into_make_service_with_connect_info::<SocketAddr>();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                    tracing::info!("gateway shutting down");
                })
                .await
            {
                tracing::error!("gateway server error: {e}");
            }
        });

        self.handle = Some(handle);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Address the server is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Signal graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
