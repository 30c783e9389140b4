//! Signaling Hub
//!
//! Presence and peer-to-peer signaling between authenticated users. A client
//! fetches a token over HTTP, opens `/signaling/ws` and sends `subscribe`;
//! afterwards its addressed messages are relayed to the named recipients.

mod handlers;
pub mod hub;
pub mod message;
pub mod peer;

use axum::{routing::get, Router};

use crate::api::AppState;

pub use hub::{Hub, Inbound};
pub use message::{Availability, HubMessage, Recipients, TypingState};
pub use peer::Peer;

/// Routes that need a primary session.
pub fn router() -> Router<AppState> {
    Router::new().route("/token", get(handlers::get_token))
}

/// The upgrade route. Clients authenticate after connecting.
pub fn ws_router() -> Router<AppState> {
    Router::new().route("/ws", get(handlers::ws_handler))
}
