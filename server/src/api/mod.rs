//! API Router and Application State
//!
//! Central routing configuration and shared state.

use std::sync::Arc;

use axum::{extract::State, http::HeaderValue, middleware::from_fn_with_state, routing::get, Json, Router};
use serde::Serialize;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::{auth, bridge, bridge::Bridge, config::Config, signaling, signaling::Hub};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// Presence and signaling hub
    pub hub: Hub,
    /// Call bridge
    pub bridge: Bridge,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(config: Config, hub: Hub, bridge: Bridge) -> Self {
        Self {
            config: Arc::new(config),
            hub,
            bridge,
        }
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(state.config.allowed_origins.as_deref());

    // Token, ICE and room management routes need a primary session
    let protected_routes = Router::new()
        .nest("/signaling", signaling::router())
        .nest("/calls", bridge::router())
        .layer(from_fn_with_state(state.clone(), auth::require_auth));

    Router::new()
        // Health check
        .route("/health", get(health_check))
        .merge(protected_routes)
        // WebSockets authenticate with their one-time tokens
        .nest("/signaling", signaling::ws_router())
        .nest("/calls", bridge::join_router())
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // State
        .with_state(state)
}

fn cors_layer(allowed: Option<&[String]>) -> CorsLayer {
    let origin = match allowed {
        None => AllowOrigin::from(Any),
        Some(origins) => AllowOrigin::list(origins.iter().filter_map(|o| {
            HeaderValue::from_str(o)
                .inspect_err(|_| warn!(origin = %o, "Ignoring invalid allowed origin"))
                .ok()
        })),
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    /// Service status
    status: &'static str,
    /// Users subscribed to the hub
    peers: usize,
    /// Active call rooms
    rooms: usize,
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        peers: state.hub.peer_count().await,
        rooms: state.bridge.room_count().await,
    })
}
