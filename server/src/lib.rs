//! Chapper Server
//!
//! Real-time backend of the Chapper chat client: presence and peer signaling,
//! a selective-forwarding call bridge and a TURN relay.

pub mod api;
pub mod auth;
pub mod bridge;
pub mod config;
pub mod signaling;
pub mod transport;
pub mod turn;
