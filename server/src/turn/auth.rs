//! Long-term credential authentication for relay allocations.

use std::net::SocketAddr;

use tracing::debug;
use webrtc::turn::auth::{generate_auth_key, AuthHandler};
use webrtc::turn::Error;

/// Accepts the single configured username/password pair.
pub struct StaticAuth {
    credentials: Option<(String, String)>,
}

impl StaticAuth {
    /// Without credentials every allocation is rejected.
    #[must_use]
    pub const fn new(credentials: Option<(String, String)>) -> Self {
        Self { credentials }
    }
}

impl AuthHandler for StaticAuth {
    fn auth_handle(
        &self,
        username: &str,
        realm: &str,
        src_addr: SocketAddr,
    ) -> Result<Vec<u8>, Error> {
        match &self.credentials {
            Some((user, password)) if user == username => {
                Ok(generate_auth_key(username, realm, password))
            }
            _ => {
                debug!(username, %src_addr, "Rejected relay allocation");
                Err(Error::ErrFakeErr)
            }
        }
    }
}
