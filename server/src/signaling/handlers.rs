//! Signaling HTTP Handlers

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, warn};

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::transport::{
    configure_upgrade, origin_allowed, serve, Connection, ConnectionSettings, TokenError,
    TokenResponse,
};

/// Issue the token the client presents in its `subscribe` message.
///
/// GET /signaling/token
pub async fn get_token(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<TokenResponse>, TokenError> {
    let token = state.hub.token(&auth.username)?;
    debug!(username = %auth.username, "Issued signaling token");
    Ok(Json(TokenResponse { token }))
}

/// Upgrade to a hub connection. Authentication happens in-band.
///
/// GET /signaling/ws
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    if !origin_allowed(&headers, state.config.allowed_origins.as_deref()) {
        warn!("Rejected signaling upgrade from disallowed origin");
        return StatusCode::FORBIDDEN.into_response();
    }

    let settings = ConnectionSettings::from_config(&state.config);
    let hub = state.hub.clone();
    configure_upgrade(ws, &settings).on_upgrade(move |socket| async move {
        let (conn, outbox) = Connection::new(&settings);
        hub.register(conn.clone()).await;
        serve(conn, outbox, socket, Arc::new(hub), settings).await;
    })
}
