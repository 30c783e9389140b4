//! Call Bridge
//!
//! Selective forwarding of call audio. Every participant holds one WebRTC
//! session with the bridge; each track a participant sends is forwarded to
//! every other participant of the same room.

pub mod error;
pub mod event;
mod handlers;
pub mod media;
pub mod room;
pub mod session;
pub mod track;
pub mod user;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::WebSocket;
use axum::{
    routing::{delete, get},
    Router,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

use crate::api::AppState;
use crate::transport::{
    serve, Connection, ConnectionOwner, ConnectionSettings, TokenError, TokenRegistry,
};

pub use error::BridgeError;
pub use event::{Event, PublicUser};
pub use media::{WebRtcFactory, WebRtcSession};
pub use room::Room;
pub use session::{InboundTrack, MediaSession, OutboundTrack, SessionFactory, SessionState};
pub use user::User;

/// Routes that need a primary session.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/token", get(handlers::get_token))
        .route("/ice-servers", get(handlers::get_ice_servers))
        .route("/{room_hash}", delete(handlers::remove_room))
}

/// The join route. Authenticated by the token in its query.
pub fn join_router() -> Router<AppState> {
    Router::new().route("/join/{room_hash}", get(handlers::join))
}

/// Pool of call rooms keyed by room hash.
#[derive(Clone)]
pub struct Bridge {
    rooms: Arc<RwLock<HashMap<String, Room>>>,
    sessions: Arc<dyn SessionFactory>,
    tokens: Arc<TokenRegistry>,
}

impl Bridge {
    /// Must be called from within a Tokio runtime, which runs the token purger.
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionFactory>, token_ttl: Duration) -> Self {
        let tokens = Arc::new(TokenRegistry::new(token_ttl));
        tokens.spawn_purger(token_ttl);
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            sessions,
            tokens,
        }
    }

    /// Token a client must present when joining a call.
    pub fn token(&self, username: &str) -> Result<String, TokenError> {
        self.tokens.issue_or_get(username)
    }

    /// Check and consume a join token.
    pub fn verify(&self, username: &str, token: &str) -> bool {
        self.tokens.verify(username, token)
    }

    /// Get the room for `hash`, creating it if needed.
    pub async fn get_or_create_room(&self, hash: &str) -> Room {
        let mut rooms = self.rooms.write().await;
        Self::room_entry(&mut rooms, hash)
    }

    fn room_entry(rooms: &mut HashMap<String, Room>, hash: &str) -> Room {
        rooms
            .entry(hash.to_string())
            .or_insert_with(|| Room::new(hash))
            .clone()
    }

    pub async fn get_room(&self, hash: &str) -> Result<Room, BridgeError> {
        self.rooms
            .read()
            .await
            .get(hash)
            .cloned()
            .ok_or_else(|| BridgeError::NoSuchRoom(hash.to_string()))
    }

    /// Create a room that must not exist yet.
    pub async fn add_room(&self, hash: &str) -> Result<Room, BridgeError> {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(hash) {
            return Err(BridgeError::DuplicateRoom(hash.to_string()));
        }
        Ok(Self::room_entry(&mut rooms, hash))
    }

    /// Tear down a room and disconnect its participants.
    pub async fn remove_room(&self, hash: &str) -> Result<(), BridgeError> {
        let room = self
            .rooms
            .write()
            .await
            .remove(hash)
            .ok_or_else(|| BridgeError::NoSuchRoom(hash.to_string()))?;
        room.close().await;
        info!(room = %hash, "Removed call room");
        Ok(())
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Remove `room` if it is still registered and has no participants.
    pub async fn cleanup_room_if_empty(&self, room: &Room) {
        let mut rooms = self.rooms.write().await;
        let registered = rooms.get(room.name()).is_some_and(|r| r.same(room));
        if registered && room.is_empty().await {
            rooms.remove(room.name());
            room.close().await;
            debug!(room = %room.name(), "Removed empty call room");
        }
    }

    /// Create a participant for `username` in room `hash` on `connection`.
    ///
    /// The participant is joined, told its own identity and wired to its
    /// session's callbacks. Its relay task is running on return.
    pub async fn admit(
        &self,
        username: &str,
        hash: &str,
        connection: Arc<Connection>,
    ) -> Result<Arc<User>, BridgeError> {
        let session = self.sessions.create().await?;

        let (user, packets) = {
            let mut rooms = self.rooms.write().await;
            let room = Self::room_entry(&mut rooms, hash);
            let (user, packets) =
                User::new(username.to_string(), room.clone(), connection, session);
            // Joining under the lock keeps a concurrent reap from closing this room.
            room.join(user.clone()).await;
            (user, packets)
        };

        track::spawn_relay(&user, packets);
        self.attach_listeners(&user);
        user.send_event(&Event::User {
            user: user.public(),
        })
        .await;

        info!(user_id = %user.id, username = %username, room = %hash, "User joined call");
        Ok(user)
    }

    /// Serve a call connection until it ends.
    pub async fn connect(
        &self,
        username: String,
        hash: String,
        socket: WebSocket,
        settings: ConnectionSettings,
    ) {
        let (conn, outbox) = Connection::new(&settings);
        let user = match self.admit(&username, &hash, conn.clone()).await {
            Ok(user) => user,
            Err(e) => {
                warn!(username = %username, room = %hash, error = %e, "Failed to admit user");
                return;
            }
        };

        let owner = Arc::new(CallConnection {
            bridge: self.clone(),
            user,
        });
        serve(conn, outbox, socket, owner, settings).await;
    }

    /// Remove `user` from its call. Only the first call has effect.
    ///
    /// Tracks it was sending are withdrawn from everyone else, who then get a
    /// fresh offer.
    pub async fn disconnect(&self, user: &Arc<User>) {
        if !user.stop() {
            return;
        }

        let ssrcs = user.inbound().ssrcs().await;
        let others = user.room().participants(Some(user.id)).await;
        for other in others {
            let mut changed = false;
            for ssrc in &ssrcs {
                match other.detach(*ssrc).await {
                    Ok(removed) => changed |= removed,
                    Err(e) => {
                        warn!(user_id = %other.id, ssrc, error = %e, "Failed to remove track");
                    }
                }
            }
            if changed {
                renegotiate(&other).await;
            }
        }

        user.room().leave(user.clone()).await;
        user.connection().close();
        if let Err(e) = user.session().close().await {
            debug!(user_id = %user.id, error = %e, "Session close failed");
        }
        self.cleanup_room_if_empty(user.room()).await;

        info!(user_id = %user.id, room = %user.room().name(), "User left call");
    }

    fn attach_listeners(&self, user: &Arc<User>) {
        let weak = Arc::downgrade(user);
        user.session().on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidateInit>| {
            let weak = weak.clone();
            Box::pin(async move {
                let (Some(user), Some(candidate)) = (weak.upgrade(), candidate) else {
                    return;
                };
                user.send_event(&Event::Candidate {
                    candidate: Some(candidate),
                })
                .await;
            })
        }));

        let weak = Arc::downgrade(user);
        let bridge = self.clone();
        user.session().on_state_change(Box::new(move |state: SessionState| {
            let weak = weak.clone();
            let bridge = bridge.clone();
            Box::pin(async move {
                let Some(user) = weak.upgrade() else {
                    return;
                };
                debug!(user_id = %user.id, state = ?state, "Session state changed");
                if state == SessionState::Connected {
                    on_connected(&user).await;
                } else if state.is_terminal() {
                    // Closing the session re-enters this callback, so it must
                    // not run inside it.
                    tokio::spawn(async move { bridge.disconnect(&user).await });
                }
            })
        }));

        let weak = Arc::downgrade(user);
        user.session().on_track(Box::new(move |track: Arc<dyn InboundTrack>| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(user) = weak.upgrade() {
                    on_track(&user, track).await;
                }
            })
        }));
    }
}

/// Forward every other participant's tracks to `user`, then offer.
async fn on_connected(user: &Arc<User>) {
    if user.is_stopped() {
        return;
    }
    for other in user.room().participants(Some(user.id)).await {
        for (ssrc, track) in other.inbound().snapshot().await {
            if let Err(e) = forward(&other, user, ssrc, track.codec()).await {
                warn!(user_id = %user.id, ssrc, error = %e, "Failed to attach track");
            }
        }
    }
    renegotiate(user).await;
}

/// Register a new track from `user` and forward it to everyone else.
async fn on_track(user: &Arc<User>, track: Arc<dyn InboundTrack>) {
    if user.is_stopped() {
        return;
    }
    let ssrc = track.ssrc();
    if !user.inbound().add(ssrc, track.clone()).await {
        debug!(user_id = %user.id, ssrc, "Ignoring duplicate track");
        return;
    }
    info!(user_id = %user.id, ssrc, "Received track");

    for other in user.room().participants(Some(user.id)).await {
        match forward(user, &other, ssrc, track.codec()).await {
            Ok(true) => renegotiate(&other).await,
            Ok(false) => {}
            Err(e) => warn!(user_id = %other.id, ssrc, error = %e, "Failed to attach track"),
        }
    }

    track::spawn_inbound_reader(user, track);
}

/// Forward `source`'s track `ssrc` to `target`. Returns whether `target`
/// gained a track.
///
/// Neither side may be leaving. A source that stops while the track is being
/// attached has already pruned, so the track is withdrawn again.
async fn forward(
    source: &User,
    target: &User,
    ssrc: u32,
    codec: RTCRtpCodecCapability,
) -> Result<bool, BridgeError> {
    if source.is_stopped() || target.is_stopped() {
        return Ok(false);
    }
    if !target.attach(ssrc, codec).await? {
        return Ok(false);
    }
    if source.is_stopped() {
        target.detach(ssrc).await?;
        return Ok(false);
    }
    Ok(true)
}

/// Send `user` a fresh offer. A failure ends only that user's call.
async fn renegotiate(user: &Arc<User>) {
    if let Err(e) = user.send_offer().await {
        warn!(user_id = %user.id, error = %e, "Renegotiation failed, closing connection");
        user.connection().close();
    }
}

/// Connection owner for one call participant.
struct CallConnection {
    bridge: Bridge,
    user: Arc<User>,
}

#[async_trait]
impl ConnectionOwner for CallConnection {
    type Message = Event;

    fn decode(text: &str) -> Result<Event, serde_json::Error> {
        serde_json::from_str(text)
    }

    async fn dispatch(&self, conn: &Arc<Connection>, event: Event) {
        let kind = event.kind();
        if let Err(e) = self.user.handle_event(event).await {
            if e.is_negotiation_failure() {
                warn!(user_id = %self.user.id, kind, error = %e, "Negotiation failed, closing connection");
                conn.close();
            } else {
                warn!(user_id = %self.user.id, kind, error = %e, "Failed to handle event");
            }
        }
    }

    async fn unregister(&self, _conn: &Arc<Connection>) {
        self.bridge.disconnect(&self.user).await;
    }
}
