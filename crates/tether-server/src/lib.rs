//! Tether server library logic.

pub mod api;
pub mod api_admin;
pub mod api_exchange;
pub mod config;

use axum::{
    extract::{DefaultBodyLimit, Extension},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tether_db::DbPool;
use tether_exchange::{
    remote::{DECISION_PATH, REGISTER_PATH, STREAM_UPDATE_PATH},
    HandshakeCoordinator, InstanceIdentity, RemoteClient, StreamActivationManager,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection request state machine.
    pub handshake: HandshakeCoordinator,
    /// Stream pause/resume state machine.
    pub streams: StreamActivationManager,
}

impl AppState {
    /// Wires both state machines to one pool and one outbound client.
    pub fn new(pool: DbPool, identity: InstanceIdentity, remote: RemoteClient) -> Self {
        Self {
            streams: StreamActivationManager::new(pool.clone(), remote.clone(), identity.clone()),
            handshake: HandshakeCoordinator::new(pool, remote, identity),
        }
    }
}

/// Maximum request body size (256 KiB). Every payload here is a small JSON
/// document.
const MAX_REQUEST_BODY_BYTES: usize = 256 * 1024;

/// Health check handler. Also tells operators which instance answered.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let identity = state.handshake.identity();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "instanceId": identity.instance_id,
        "publicUrl": identity.public_url
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let exchange_routes = Router::new()
        .route(REGISTER_PATH, post(api_exchange::register_request_handler))
        .route(DECISION_PATH, post(api_exchange::decision_handler))
        .route(STREAM_UPDATE_PATH, post(api_exchange::stream_update_handler));

    let admin_routes = Router::new()
        .route(
            "/api/connection-requests",
            post(api_admin::create_connection_request_handler)
                .get(api_admin::list_connection_requests_handler),
        )
        .route(
            "/api/connection-requests/{direction}/{id}",
            get(api_admin::get_connection_request_handler),
        )
        .route(
            "/api/connection-requests/incoming/{id}/decision",
            post(api_admin::decide_handler),
        )
        .route("/api/connections", get(api_admin::list_connections_handler))
        .route("/api/streams", get(api_admin::list_streams_handler))
        .route(
            "/api/streams/status",
            put(api_admin::set_stream_status_handler),
        )
        .route("/api/streams/gate", get(api_admin::stream_gate_handler));

    Router::new()
        .route("/health", get(health))
        .merge(exchange_routes)
        .merge(admin_routes)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
