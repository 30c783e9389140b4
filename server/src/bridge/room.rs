//! Call Rooms
//!
//! A room's participant map is owned by its loop task. Joins, leaves and
//! broadcasts are applied in the order they are submitted.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use super::event::Event;
use super::user::User;

const ROOM_COMMAND_CAPACITY: usize = 256;

/// Current participants, published after every membership change.
pub type Members = Arc<Vec<Arc<User>>>;

enum RoomCommand {
    Join(Arc<User>),
    Leave(Arc<User>),
    Broadcast { text: String, exclude: Option<Uuid> },
    Participants {
        exclude: Option<Uuid>,
        reply: oneshot::Sender<Vec<Arc<User>>>,
    },
    Len(oneshot::Sender<usize>),
    Close,
}

/// Handle to one call room. Cheap to clone.
#[derive(Clone)]
pub struct Room {
    id: Uuid,
    name: Arc<str>,
    tx: mpsc::Sender<RoomCommand>,
    members: watch::Receiver<Members>,
}

impl Room {
    /// Create a room and start its loop.
    #[must_use]
    pub fn new(name: &str) -> Self {
        let (tx, rx) = mpsc::channel(ROOM_COMMAND_CAPACITY);
        let (members_tx, members) = watch::channel(Arc::new(Vec::new()));
        let name: Arc<str> = Arc::from(name);

        let state = RoomState {
            name: name.clone(),
            participants: HashMap::new(),
            members: members_tx,
        };
        tokio::spawn(state.run(rx));

        debug!(room = %name, "Created call room");

        Self {
            id: Uuid::new_v4(),
            name,
            tx,
            members,
        }
    }

    /// The room hash.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether both handles refer to the same room instance.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        self.id == other.id
    }

    /// Add `user` and announce it to everyone else.
    pub async fn join(&self, user: Arc<User>) {
        self.submit(RoomCommand::Join(user)).await;
    }

    /// Remove `user`, close its connection and announce the departure.
    /// No-op if it is not a participant.
    pub async fn leave(&self, user: Arc<User>) {
        self.submit(RoomCommand::Leave(user)).await;
    }

    /// Send `event` to every participant except `exclude`.
    pub async fn broadcast(&self, event: &Event, exclude: Option<Uuid>) {
        match serde_json::to_string(event) {
            Ok(text) => self.submit(RoomCommand::Broadcast { text, exclude }).await,
            Err(e) => warn!(room = %self.name, error = %e, "Failed to serialize room event"),
        }
    }

    /// Every participant except `exclude`.
    pub async fn participants(&self, exclude: Option<Uuid>) -> Vec<Arc<User>> {
        let (reply, rx) = oneshot::channel();
        self.submit(RoomCommand::Participants { exclude, reply })
            .await;
        rx.await.unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.submit(RoomCommand::Len(reply)).await;
        rx.await.unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Latest published membership, without a round trip to the loop.
    #[must_use]
    pub fn snapshot(&self) -> Members {
        self.members.borrow().clone()
    }

    /// Close every participant's connection and stop the loop.
    pub async fn close(&self) {
        self.submit(RoomCommand::Close).await;
    }

    async fn submit(&self, command: RoomCommand) {
        if self.tx.send(command).await.is_err() {
            debug!(room = %self.name, "Room loop has stopped");
        }
    }
}

struct RoomState {
    name: Arc<str>,
    participants: HashMap<Uuid, Arc<User>>,
    members: watch::Sender<Members>,
}

impl RoomState {
    async fn run(mut self, mut rx: mpsc::Receiver<RoomCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                RoomCommand::Join(user) => {
                    debug!(room = %self.name, user_id = %user.id, "User joined");
                    let event = Event::Join {
                        user: user.public(),
                    };
                    let id = user.id;
                    self.participants.insert(id, user);
                    self.publish();
                    self.broadcast_event(&event, Some(id));
                }
                RoomCommand::Leave(user) => {
                    let Some(user) = self.participants.remove(&user.id) else {
                        continue;
                    };
                    debug!(room = %self.name, user_id = %user.id, "User left");
                    user.connection().close();
                    self.publish();
                    let event = Event::Leave {
                        user: user.public(),
                    };
                    self.broadcast_event(&event, Some(user.id));
                }
                RoomCommand::Broadcast { text, exclude } => {
                    self.broadcast(&text, exclude);
                }
                RoomCommand::Participants { exclude, reply } => {
                    let _ = reply.send(self.others(exclude));
                }
                RoomCommand::Len(reply) => {
                    let _ = reply.send(self.participants.len());
                }
                RoomCommand::Close => {
                    for user in self.participants.values() {
                        user.connection().close();
                    }
                    self.participants.clear();
                    self.publish();
                    break;
                }
            }
        }
        debug!(room = %self.name, "Room loop stopped");
    }

    fn others(&self, exclude: Option<Uuid>) -> Vec<Arc<User>> {
        self.participants
            .values()
            .filter(|u| Some(u.id) != exclude)
            .cloned()
            .collect()
    }

    fn publish(&self) {
        let _ = self.members.send(Arc::new(self.others(None)));
    }

    fn broadcast_event(&self, event: &Event, exclude: Option<Uuid>) {
        match serde_json::to_string(event) {
            Ok(text) => self.broadcast(&text, exclude),
            Err(e) => warn!(room = %self.name, error = %e, "Failed to serialize room event"),
        }
    }

    fn broadcast(&self, text: &str, exclude: Option<Uuid>) {
        for user in self.participants.values().filter(|u| Some(u.id) != exclude) {
            user.connection().offer(text.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use crate::bridge::testing::{drain_events, test_user, FakeSession};
    use crate::transport::{Connection, ConnectionSettings};

    #[tokio::test]
    async fn participants_excludes_the_asking_user() {
        let room = Room::new("r");
        let (alice, _a) = test_user("alice", &room);
        let (bob, _b) = test_user("bob", &room);
        room.join(alice.clone()).await;
        room.join(bob.clone()).await;

        let others = room.participants(Some(alice.id)).await;
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].id, bob.id);
        assert_eq!(room.participants(None).await.len(), 2);
        assert_eq!(room.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn join_is_announced_to_others_only() {
        let room = Room::new("r");
        let (alice, mut alice_out) = test_user("alice", &room);
        let (bob, mut bob_out) = test_user("bob", &room);
        room.join(alice.clone()).await;
        room.join(bob.clone()).await;
        room.len().await;

        let seen = drain_events(&mut alice_out);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["type"], "join");
        assert_eq!(seen[0]["user"]["username"], "bob");
        assert!(drain_events(&mut bob_out).is_empty());
    }

    #[tokio::test]
    async fn leave_of_absent_user_is_noop() {
        let room = Room::new("r");
        let (alice, mut alice_out) = test_user("alice", &room);
        let (stranger, _s) = test_user("stranger", &room);
        room.join(alice.clone()).await;

        room.leave(stranger.clone()).await;
        assert_eq!(room.len().await, 1);
        assert!(drain_events(&mut alice_out).is_empty());
        assert!(!stranger.connection().is_closed());
    }

    #[tokio::test]
    async fn leave_closes_connection_and_announces() {
        let room = Room::new("r");
        let (alice, mut alice_out) = test_user("alice", &room);
        let (bob, _b) = test_user("bob", &room);
        room.join(alice.clone()).await;
        room.join(bob.clone()).await;

        room.leave(bob.clone()).await;
        room.leave(bob.clone()).await;
        assert_eq!(room.len().await, 1);
        assert!(bob.connection().is_closed());

        let kinds: Vec<_> = drain_events(&mut alice_out)
            .into_iter()
            .map(|e| e["type"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(kinds, vec!["join", "leave"]);
    }

    #[tokio::test]
    async fn broadcast_skips_excluded_user() {
        let room = Room::new("r");
        let (alice, mut alice_out) = test_user("alice", &room);
        let (bob, mut bob_out) = test_user("bob", &room);
        room.join(alice.clone()).await;
        room.join(bob.clone()).await;
        drain_events(&mut alice_out);

        room.broadcast(&Event::Mute { user: Some(alice.public()) }, Some(alice.id))
            .await;
        room.len().await;

        assert!(drain_events(&mut alice_out).is_empty());
        let seen = drain_events(&mut bob_out);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["type"], "mute");
    }

    #[tokio::test]
    async fn close_disconnects_everyone() {
        let room = Room::new("r");
        let (alice, _a) = test_user("alice", &room);
        room.join(alice.clone()).await;

        room.close().await;
        alice.connection().closed().await;
        assert_eq!(room.len().await, 0);
        assert!(room.snapshot().is_empty());
    }

    #[tokio::test]
    async fn slow_participant_is_dropped_without_stalling_the_room() {
        let room = Room::new("r");
        let (conn, _undrained) = Connection::new(&ConnectionSettings {
            send_queue_capacity: 1,
            write_wait: Duration::from_secs(10),
            ..ConnectionSettings::default()
        });
        let (slow, _packets) = User::new(
            "slow".into(),
            room.clone(),
            conn,
            Arc::new(FakeSession::default()),
        );
        room.join(slow.clone()).await;

        let started = Instant::now();
        let mut outboxes = Vec::new();
        for name in ["alice", "bob"] {
            let (user, outbox) = test_user(name, &room);
            room.join(user).await;
            outboxes.push(outbox);
        }

        assert_eq!(room.len().await, 3);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(slow.connection().is_closed());
    }
}
