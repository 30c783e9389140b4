//! Track Tables and RTP Relay
//!
//! Each participant keeps the tracks it sends (inbound) and the tracks the
//! bridge forwards to it (outbound), both keyed by SSRC. Packets read from an
//! inbound track go through the participant's bounded packet queue to a single
//! relay task that writes them to the matching outbound track of every other
//! participant.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, trace};
use webrtc::rtp::packet::Packet;

use super::session::InboundTrack;
use super::user::User;

/// Packets buffered per participant between its readers and its relay.
pub const PACKET_QUEUE_CAPACITY: usize = 100;

/// Tracks keyed by SSRC.
pub struct TrackTable<T> {
    tracks: RwLock<HashMap<u32, T>>,
}

impl<T: Clone> TrackTable<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tracks: RwLock::new(HashMap::new()),
        }
    }

    /// Insert `track` unless `ssrc` is already present. Returns whether it was added.
    pub async fn add(&self, ssrc: u32, track: T) -> bool {
        let mut tracks = self.tracks.write().await;
        if tracks.contains_key(&ssrc) {
            return false;
        }
        tracks.insert(ssrc, track);
        true
    }

    /// Insert the track built by `make` unless `ssrc` is already present.
    ///
    /// The table stays write-locked while `make` runs, so concurrent callers
    /// for the same SSRC never build two tracks.
    pub async fn insert_with<F, Fut, E>(&self, ssrc: u32, make: F) -> Result<bool, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut tracks = self.tracks.write().await;
        if tracks.contains_key(&ssrc) {
            return Ok(false);
        }
        let track = make().await?;
        tracks.insert(ssrc, track);
        Ok(true)
    }

    /// Remove `ssrc` and run `release` under the same write lock. `release`
    /// only runs when the entry existed.
    pub async fn remove_with<F, Fut, E>(&self, ssrc: u32, release: F) -> Result<bool, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let mut tracks = self.tracks.write().await;
        if tracks.remove(&ssrc).is_none() {
            return Ok(false);
        }
        release().await?;
        Ok(true)
    }

    pub async fn get(&self, ssrc: u32) -> Option<T> {
        self.tracks.read().await.get(&ssrc).cloned()
    }

    pub async fn contains(&self, ssrc: u32) -> bool {
        self.tracks.read().await.contains_key(&ssrc)
    }

    /// Copy of every entry, so callers never hold the lock across I/O.
    pub async fn snapshot(&self) -> Vec<(u32, T)> {
        self.tracks
            .read()
            .await
            .iter()
            .map(|(ssrc, track)| (*ssrc, track.clone()))
            .collect()
    }

    pub async fn ssrcs(&self) -> Vec<u32> {
        self.tracks.read().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.tracks.read().await.len()
    }
}

impl<T: Clone> Default for TrackTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a task draining `track` into `user`'s packet queue.
///
/// Packets are dropped when the queue is full. The task ends when the track
/// ends or the user stops.
pub fn spawn_inbound_reader(user: &Arc<User>, track: Arc<dyn InboundTrack>) {
    let weak = Arc::downgrade(user);
    let packets = user.packet_sender();
    let user_id = user.id;
    let ssrc = track.ssrc();

    tokio::spawn(async move {
        loop {
            let packet = match track.read_rtp().await {
                Ok(packet) => packet,
                Err(e) => {
                    debug!(user_id = %user_id, ssrc, error = %e, "Inbound track ended");
                    break;
                }
            };

            if !weak.upgrade().is_some_and(|u| !u.is_stopped()) {
                break;
            }

            match packets.try_send(packet) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    trace!(user_id = %user_id, ssrc, "Packet queue full, dropping packet");
                }
                Err(TrySendError::Closed(_)) => break,
            }
        }
        debug!(user_id = %user_id, ssrc, "Inbound reader stopped");
    });
}

/// Spawn the relay task for one user's packet queue.
pub fn spawn_relay(user: &Arc<User>, packets: mpsc::Receiver<Packet>) {
    tokio::spawn(relay(Arc::downgrade(user), packets));
}

async fn relay(user: Weak<User>, mut packets: mpsc::Receiver<Packet>) {
    while let Some(packet) = packets.recv().await {
        let Some(source) = user.upgrade() else {
            break;
        };
        if source.is_stopped() {
            break;
        }

        let ssrc = packet.header.ssrc;
        let members = source.room().snapshot();
        for target in members.iter().filter(|u| u.id != source.id) {
            match target.outbound().get(ssrc).await {
                Some(track) => {
                    if let Err(e) = track.write_rtp(&packet).await {
                        debug!(source = %source.id, target = %target.id, ssrc, error = %e, "Failed to forward RTP packet");
                    }
                }
                None => {
                    trace!(source = %source.id, target = %target.id, ssrc, "No outbound track for packet");
                }
            }
        }
    }
}
