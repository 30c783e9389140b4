//! Signaling Hub
//!
//! All hub state lives in one task. Connections, the HTTP layer and tests talk
//! to it through [`Hub`], which only enqueues commands, so every registration,
//! authentication and routing decision is applied in arrival order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::message::{AvailabilityChange, Availability, HubEvent, HubMessage, Routed, TypingChange};
use super::peer::Peer;
use crate::transport::connection::CLOSE_POLICY_VIOLATION;
use crate::transport::{Connection, ConnectionOwner, TokenError, TokenRegistry};

const COMMAND_CAPACITY: usize = 1024;

/// A decoded client frame together with its original text.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub raw: String,
    pub message: HubMessage,
}

impl Inbound {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            raw: text.to_string(),
            message: serde_json::from_str(text)?,
        })
    }
}

enum Command {
    Register(Arc<Connection>),
    Unregister(Arc<Connection>),
    Dispatch {
        conn: Arc<Connection>,
        inbound: Inbound,
    },
    IsOnline {
        username: String,
        reply: oneshot::Sender<bool>,
    },
    PeerCount(oneshot::Sender<usize>),
}

/// Handle to the signaling hub. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::Sender<Command>,
    tokens: Arc<TokenRegistry>,
}

impl Hub {
    /// Start the hub loop and its token purger. Must be called from within a
    /// Tokio runtime.
    #[must_use]
    pub fn new(token_ttl: Duration) -> Self {
        let tokens = Arc::new(TokenRegistry::new(token_ttl));
        tokens.spawn_purger(token_ttl);
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let state = HubState {
            tokens: tokens.clone(),
            clients: HashMap::new(),
            peers: HashMap::new(),
        };
        tokio::spawn(state.run(rx));
        Self { tx, tokens }
    }

    /// Token a client must present in its `subscribe` message.
    pub fn token(&self, username: &str) -> Result<String, TokenError> {
        self.tokens.issue_or_get(username)
    }

    pub async fn register(&self, conn: Arc<Connection>) {
        self.submit(Command::Register(conn)).await;
    }

    /// Forget `conn` and its peer binding. Safe to call more than once.
    pub async fn unregister(&self, conn: Arc<Connection>) {
        self.submit(Command::Unregister(conn)).await;
    }

    pub async fn dispatch(&self, conn: Arc<Connection>, inbound: Inbound) {
        self.submit(Command::Dispatch { conn, inbound }).await;
    }

    /// Whether `username` currently has an authenticated connection.
    pub async fn is_online(&self, username: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::IsOnline {
            username: username.to_string(),
            reply,
        })
        .await;
        rx.await.unwrap_or(false)
    }

    pub async fn peer_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::PeerCount(reply)).await;
        rx.await.unwrap_or(0)
    }

    async fn submit(&self, command: Command) {
        if self.tx.send(command).await.is_err() {
            warn!("Signaling hub loop is gone");
        }
    }
}

#[async_trait]
impl ConnectionOwner for Hub {
    type Message = Inbound;

    fn decode(text: &str) -> Result<Inbound, serde_json::Error> {
        Inbound::parse(text)
    }

    async fn dispatch(&self, conn: &Arc<Connection>, message: Inbound) {
        Self::dispatch(self, conn.clone(), message).await;
    }

    async fn unregister(&self, conn: &Arc<Connection>) {
        Self::unregister(self, conn.clone()).await;
    }
}

/// A registered connection and, once subscribed, its identity.
struct Client {
    conn: Arc<Connection>,
    username: Option<String>,
}

struct HubState {
    tokens: Arc<TokenRegistry>,
    clients: HashMap<Uuid, Client>,
    peers: HashMap<String, Peer>,
}

impl HubState {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Register(conn) => {
                    debug!(conn_id = %conn.id(), "Connection registered");
                    self.clients.insert(
                        conn.id(),
                        Client {
                            conn,
                            username: None,
                        },
                    );
                }
                Command::Unregister(conn) => self.unregister(&conn),
                Command::Dispatch { conn, inbound } => self.dispatch(&conn, inbound),
                Command::IsOnline { username, reply } => {
                    let _ = reply.send(self.peers.contains_key(&username));
                }
                Command::PeerCount(reply) => {
                    let _ = reply.send(self.peers.len());
                }
            }
        }
        debug!("Signaling hub loop stopped");
    }

    fn unregister(&mut self, conn: &Arc<Connection>) {
        conn.close();
        let Some(client) = self.clients.remove(&conn.id()) else {
            return;
        };
        let Some(username) = client.username else {
            return;
        };
        if self.peers.get(&username).is_some_and(|p| p.owns(conn)) {
            self.peers.remove(&username);
            info!(username = %username, "Peer went offline");
            self.publish_availability(&username, Availability::Offline);
        }
    }

    fn dispatch(&mut self, conn: &Arc<Connection>, inbound: Inbound) {
        let Some(sender) = self.clients.get(&conn.id()).map(|c| c.username.clone()) else {
            debug!(conn_id = %conn.id(), "Dropping message from unregistered connection");
            return;
        };

        if let HubMessage::Subscribe { username, token } = &inbound.message {
            self.subscribe(conn, username.clone(), token.clone());
            return;
        }

        let Some(sender) = sender else {
            debug!(
                conn_id = %conn.id(),
                kind = inbound.message.kind(),
                "Dropping message from unauthenticated connection"
            );
            return;
        };

        match &inbound.message {
            HubMessage::NewChatOffer(routed) | HubMessage::NewChatAnswer(routed) => {
                if !routed.is_addressed() || !sent_by(routed, &sender) {
                    debug!(from = %sender, kind = inbound.message.kind(), "Dropping unaddressed message");
                    return;
                }
                self.forward(&inbound.raw, routed.to.iter());
            }
            HubMessage::TextOffer(routed)
            | HubMessage::TextAnswer(routed)
            | HubMessage::NewIceCandidate(routed) => {
                if !routed.has_valid_sdp() || !sent_by(routed, &sender) {
                    debug!(from = %sender, kind = inbound.message.kind(), "Dropping message with invalid SDP");
                    return;
                }
                self.forward(&inbound.raw, routed.to.iter());
            }
            HubMessage::TypingChange(typing) => {
                if typing.to.is_empty() {
                    return;
                }
                let event = HubEvent::TypingChange(TypingChange {
                    username: sender,
                    ..typing.clone()
                });
                match serde_json::to_string(&event) {
                    Ok(text) => self.forward(&text, typing.to.iter()),
                    Err(e) => warn!(error = %e, "Failed to serialize typing change"),
                }
            }
            HubMessage::AvailabilityChange(change) => {
                self.publish_availability(&sender, change.state);
            }
            HubMessage::Subscribe { .. } => {}
            HubMessage::Unknown => {
                debug!(from = %sender, "Dropping message of unknown type");
            }
        }
    }

    fn subscribe(&mut self, conn: &Arc<Connection>, username: String, token: String) {
        let already = self
            .clients
            .get(&conn.id())
            .and_then(|c| c.username.as_deref());
        if let Some(current) = already {
            debug!(username = %current, "Ignoring repeated subscribe");
            return;
        }

        if username.is_empty() || token.is_empty() || !self.tokens.verify(&username, &token) {
            warn!(conn_id = %conn.id(), username = %username, "Subscribe rejected");
            self.clients.remove(&conn.id());
            conn.close_with(CLOSE_POLICY_VIOLATION, "authentication failed");
            return;
        }

        if let Some(previous) = self.peers.remove(&username) {
            if !previous.owns(conn) {
                debug!(username = %username, "Replacing previous connection");
                if let Some(stale) = self.clients.remove(&previous.connection.id()) {
                    stale.conn.close();
                }
            }
        }

        if let Some(client) = self.clients.get_mut(&conn.id()) {
            client.username = Some(username.clone());
        }
        self.peers.insert(
            username.clone(),
            Peer {
                username: username.clone(),
                token,
                connection: conn.clone(),
            },
        );
        info!(username = %username, "Peer subscribed");
        self.publish_availability(&username, Availability::Online);
    }

    /// Deliver `text` to each known recipient. Unknown recipients are skipped.
    fn forward<'a>(&self, text: &str, recipients: impl Iterator<Item = &'a str>) {
        for name in recipients {
            match self.peers.get(name) {
                Some(peer) => peer.connection.offer(text.to_string()),
                None => debug!(to = %name, "Recipient not connected, dropping"),
            }
        }
    }

    fn publish_availability(&self, username: &str, state: Availability) {
        let event = HubEvent::AvailabilityChange(AvailabilityChange {
            username: username.to_string(),
            state: state.published(),
        });
        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to serialize availability change");
                return;
            }
        };
        for peer in self.peers.values().filter(|p| p.username != username) {
            peer.connection.offer(text.clone());
        }
    }
}

/// A routed message may name its sender, but only as the authenticated one.
fn sent_by(routed: &Routed, sender: &str) -> bool {
    routed.from.is_empty() || routed.from == sender
}
