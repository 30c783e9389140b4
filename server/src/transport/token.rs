//! Real-time Connection Tokens
//!
//! Short-lived, single-use tokens bridging an authenticated HTTP session to a
//! WebSocket. The token is requested over HTTP and presented again once the
//! socket is open.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use dashmap::{mapref::entry::Entry, DashMap};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;

/// Random bytes per token before encoding.
pub const TOKEN_BYTES: usize = 16;

const MIN_PURGE_PERIOD: Duration = Duration::from_millis(10);

/// Token issuance errors.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The OS entropy source failed.
    #[error("failed to generate token: {0}")]
    Entropy(#[from] rand::Error),
}

impl IntoResponse for TokenError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "Token issuance failed");
        let body = Json(serde_json::json!({
            "error": "Internal server error",
            "code": "TOKEN_UNAVAILABLE",
        }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

/// Body of the token endpoints.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Clone)]
struct Issued {
    token: String,
    expires_at: Instant,
}

impl Issued {
    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Per-identity token store.
///
/// Each identity has at most one outstanding token. Verification consumes it.
#[derive(Debug)]
pub struct TokenRegistry {
    tokens: DashMap<String, Issued>,
    ttl: Duration,
}

impl TokenRegistry {
    /// Create an empty registry whose tokens live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: DashMap::new(),
            ttl,
        }
    }

    /// Return the outstanding token for `identity`, or issue a new one.
    pub fn issue_or_get(&self, identity: &str) -> Result<String, TokenError> {
        match self.tokens.entry(identity.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_live() {
                    return Ok(entry.get().token.clone());
                }
                let issued = self.fresh()?;
                let token = issued.token.clone();
                entry.insert(issued);
                Ok(token)
            }
            Entry::Vacant(entry) => {
                let issued = self.fresh()?;
                let token = issued.token.clone();
                entry.insert(issued);
                Ok(token)
            }
        }
    }

    /// Check `token` against the outstanding token for `identity`.
    ///
    /// Unknown identity, mismatch and expiry all return `false`. A match
    /// consumes the token.
    pub fn verify(&self, identity: &str, token: &str) -> bool {
        if identity.is_empty() || token.is_empty() {
            return false;
        }
        self.tokens
            .remove_if(identity, |_, issued| {
                issued.is_live() && constant_time_eq(issued.token.as_bytes(), token.as_bytes())
            })
            .is_some()
    }

    /// Drop every expired token. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|_, issued| issued.is_live());
        before.saturating_sub(self.tokens.len())
    }

    /// Purge expired tokens every `period` until the registry is dropped.
    pub fn spawn_purger(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = period.max(MIN_PURGE_PERIOD);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(tokens) = weak.upgrade() else {
                    break;
                };
                let purged = tokens.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = tokens.len(), "Purged expired tokens");
                }
            }
        })
    }

    /// Number of outstanding tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn fresh(&self) -> Result<Issued, TokenError> {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.try_fill_bytes(&mut bytes)?;
        Ok(Issued {
            token: URL_SAFE_NO_PAD.encode(bytes),
            expires_at: Instant::now() + self.ttl,
        })
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TokenRegistry {
        TokenRegistry::new(Duration::from_secs(60))
    }

    #[test]
    fn issue_reuses_outstanding_token() {
        let tokens = registry();
        let first = tokens.issue_or_get("alice").unwrap();
        let second = tokens.issue_or_get("alice").unwrap();

        assert_eq!(first, second);
        // 16 bytes, base64url without padding
        assert_eq!(first.len(), 22);
        assert!(!first.contains('='));
    }

    #[test]
    fn identities_get_distinct_tokens() {
        let tokens = registry();
        let alice = tokens.issue_or_get("alice").unwrap();
        let bob = tokens.issue_or_get("bob").unwrap();

        assert_ne!(alice, bob);
        assert!(!tokens.verify("bob", &alice));
    }

    #[test]
    fn verify_succeeds_exactly_once() {
        let tokens = registry();
        let token = tokens.issue_or_get("alice").unwrap();

        assert!(tokens.verify("alice", &token));
        assert!(!tokens.verify("alice", &token));

        let next = tokens.issue_or_get("alice").unwrap();
        assert_ne!(next, token);
        assert!(tokens.verify("alice", &next));
    }

    #[test]
    fn verify_rejects_unknown_and_wrong() {
        let tokens = registry();
        assert!(!tokens.verify("alice", "anything"));

        let token = tokens.issue_or_get("alice").unwrap();
        assert!(!tokens.verify("alice", "wrong"));
        assert!(!tokens.verify("alice", ""));
        assert!(!tokens.verify("", &token));

        // A failed attempt does not burn the real token.
        assert!(tokens.verify("alice", &token));
    }

    #[test]
    fn expired_tokens_are_rejected_and_replaced() {
        let tokens = TokenRegistry::new(Duration::ZERO);
        let token = tokens.issue_or_get("alice").unwrap();

        assert!(!tokens.verify("alice", &token));

        let replacement = tokens.issue_or_get("alice").unwrap();
        assert_ne!(replacement, token);

        assert_eq!(tokens.purge_expired(), 1);
        assert!(tokens.is_empty());
    }

    #[tokio::test]
    async fn purger_drops_unclaimed_tokens() {
        let tokens = Arc::new(TokenRegistry::new(Duration::from_millis(20)));
        let _ = tokens.issue_or_get("alice").unwrap();
        let _ = tokens.issue_or_get("bob").unwrap();
        let purger = tokens.spawn_purger(Duration::from_millis(20));

        tokio::time::timeout(Duration::from_secs(2), async {
            while !tokens.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("expired tokens were never purged");

        drop(tokens);
        tokio::time::timeout(Duration::from_secs(2), purger)
            .await
            .expect("purger outlived its registry")
            .unwrap();
    }
}
