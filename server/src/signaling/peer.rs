//! Authenticated hub participants.

use std::sync::Arc;

use crate::transport::Connection;

/// An identity bound to one open connection.
#[derive(Debug, Clone)]
pub struct Peer {
    pub username: String,
    pub token: String,
    pub connection: Arc<Connection>,
}

impl Peer {
    /// Whether this peer is bound to `conn`.
    #[must_use]
    pub fn owns(&self, conn: &Connection) -> bool {
        self.connection.id() == conn.id()
    }
}
