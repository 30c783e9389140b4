//! Real-time Transport
//!
//! Connection lifecycle and the token handshake shared by the signaling hub
//! and the call bridge.

pub mod connection;
pub mod token;

use axum::extract::ws::WebSocketUpgrade;
use axum::http::{header::ORIGIN, HeaderMap};

pub use connection::{serve, Connection, ConnectionOwner, ConnectionSettings, Outbox};
pub use token::{TokenError, TokenRegistry, TokenResponse};

/// Apply inbound size limits to an upgrade.
#[must_use]
pub fn configure_upgrade(ws: WebSocketUpgrade, settings: &ConnectionSettings) -> WebSocketUpgrade {
    ws.max_message_size(settings.max_message_size)
        .max_frame_size(settings.max_message_size)
}

/// Whether the request's `Origin` is acceptable.
///
/// No allow-list means every origin is accepted. Requests without an `Origin`
/// header come from native clients and are accepted.
#[must_use]
pub fn origin_allowed(headers: &HeaderMap, allowed: Option<&[String]>) -> bool {
    let Some(allowed) = allowed else {
        return true;
    };
    match headers.get(ORIGIN).and_then(|v| v.to_str().ok()) {
        None => true,
        Some(origin) => allowed.iter().any(|a| a == origin),
    }
}
