//! Call HTTP Handlers

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::BridgeError;
use super::media;
use crate::api::AppState;
use crate::auth::AuthUser;
use crate::transport::{
    configure_upgrade, origin_allowed, ConnectionSettings, TokenError, TokenResponse,
};

/// Credentials presented when joining a call.
#[derive(Debug, Deserialize)]
pub struct JoinQuery {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub token: String,
}

/// One ICE server as handed to clients.
#[derive(Debug, Serialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IceServersResponse {
    pub ice_servers: Vec<IceServer>,
}

/// Issue the token the client presents when joining a call.
///
/// GET /calls/token
pub async fn get_token(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<TokenResponse>, TokenError> {
    let token = state.bridge.token(&auth.username)?;
    debug!(username = %auth.username, "Issued call token");
    Ok(Json(TokenResponse { token }))
}

/// ICE servers a client should use for its call session.
///
/// GET /calls/ice-servers
pub async fn get_ice_servers(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Json<IceServersResponse> {
    let ice_servers = media::ice_servers(&state.config)
        .into_iter()
        .map(|server| IceServer {
            urls: server.urls,
            username: Some(server.username).filter(|u| !u.is_empty()),
            credential: Some(server.credential).filter(|c| !c.is_empty()),
        })
        .collect();

    Json(IceServersResponse { ice_servers })
}

/// Join a call room.
///
/// The token is checked before the upgrade, so bad credentials get a plain
/// 401 instead of a socket.
///
/// GET /calls/join/{room_hash}?username=..&token=..
pub async fn join(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(room_hash): Path<String>,
    Query(query): Query<JoinQuery>,
    headers: HeaderMap,
) -> Response {
    if !origin_allowed(&headers, state.config.allowed_origins.as_deref()) {
        warn!(room = %room_hash, "Rejected call upgrade from disallowed origin");
        return StatusCode::FORBIDDEN.into_response();
    }

    if query.username.is_empty() || !state.bridge.verify(&query.username, &query.token) {
        warn!(username = %query.username, room = %room_hash, "Rejected call join with invalid token");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let settings = ConnectionSettings::from_config(&state.config);
    let bridge = state.bridge.clone();
    let username = query.username;
    configure_upgrade(ws, &settings).on_upgrade(move |socket| async move {
        bridge.connect(username, room_hash, socket, settings).await;
    })
}

/// Tear down a call room.
///
/// DELETE /calls/{room_hash}
pub async fn remove_room(
    State(state): State<AppState>,
    Path(room_hash): Path<String>,
    auth: AuthUser,
) -> Result<StatusCode, BridgeError> {
    state.bridge.remove_room(&room_hash).await?;
    debug!(username = %auth.username, room = %room_hash, "Call room removed on request");
    Ok(StatusCode::NO_CONTENT)
}
