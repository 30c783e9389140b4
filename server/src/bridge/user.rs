//! Call Participants

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

use super::error::BridgeError;
use super::event::{Event, PublicUser};
use super::room::Room;
use super::session::{InboundTrack, MediaSession, OutboundTrack};
use super::track::{TrackTable, PACKET_QUEUE_CAPACITY};
use crate::transport::Connection;

/// One participant of a call.
pub struct User {
    /// Participant ID, unique per join.
    pub id: Uuid,
    /// Account username.
    pub username: String,
    room: Room,
    connection: Arc<Connection>,
    session: Arc<dyn MediaSession>,
    /// Tracks this user sends, keyed by SSRC.
    inbound: TrackTable<Arc<dyn InboundTrack>>,
    /// Other participants' tracks forwarded to this user, keyed by SSRC.
    outbound: TrackTable<Arc<dyn OutboundTrack>>,
    muted: AtomicBool,
    stopped: AtomicBool,
    packets: mpsc::Sender<Packet>,
}

impl User {
    /// Create a user. The returned receiver feeds the user's relay task.
    #[must_use]
    pub fn new(
        username: String,
        room: Room,
        connection: Arc<Connection>,
        session: Arc<dyn MediaSession>,
    ) -> (Arc<Self>, mpsc::Receiver<Packet>) {
        let (packets, rx) = mpsc::channel(PACKET_QUEUE_CAPACITY);
        let user = Arc::new(Self {
            id: Uuid::new_v4(),
            username,
            room,
            connection,
            session,
            inbound: TrackTable::new(),
            outbound: TrackTable::new(),
            muted: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            packets,
        });
        (user, rx)
    }

    #[must_use]
    pub fn public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            username: self.username.clone(),
            mute: self.is_muted(),
        }
    }

    #[must_use]
    pub const fn room(&self) -> &Room {
        &self.room
    }

    #[must_use]
    pub const fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    #[must_use]
    pub fn session(&self) -> &Arc<dyn MediaSession> {
        &self.session
    }

    #[must_use]
    pub const fn inbound(&self) -> &TrackTable<Arc<dyn InboundTrack>> {
        &self.inbound
    }

    #[must_use]
    pub const fn outbound(&self) -> &TrackTable<Arc<dyn OutboundTrack>> {
        &self.outbound
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Mark the user stopped. Returns `true` only for the first call.
    pub fn stop(&self) -> bool {
        !self.stopped.swap(true, Ordering::AcqRel)
    }

    #[must_use]
    pub fn packet_sender(&self) -> mpsc::Sender<Packet> {
        self.packets.clone()
    }

    pub async fn send_event(&self, event: &Event) {
        self.connection.send_json(event).await;
    }

    /// Forward the track `ssrc` to this user. Returns `false` if already forwarded.
    pub async fn attach(&self, ssrc: u32, codec: RTCRtpCodecCapability) -> Result<bool, BridgeError> {
        self.outbound
            .insert_with(ssrc, || self.session.add_track(ssrc, codec))
            .await
    }

    /// Stop forwarding the track `ssrc`. Returns `false` if it was not forwarded.
    pub async fn detach(&self, ssrc: u32) -> Result<bool, BridgeError> {
        self.outbound
            .remove_with(ssrc, || self.session.remove_track(ssrc))
            .await
    }

    /// Create a fresh offer and send it to the client.
    pub async fn send_offer(&self) -> Result<(), BridgeError> {
        let offer = self.session.create_offer().await?;
        debug!(user_id = %self.id, "Sending offer");
        self.send_event(&Event::Offer { offer: Some(offer) }).await;
        Ok(())
    }

    /// Apply one signaling event from the client.
    pub async fn handle_event(&self, event: Event) -> Result<(), BridgeError> {
        match event {
            Event::Offer { offer } => {
                let offer = offer.ok_or(BridgeError::MissingPayload("offer"))?;
                self.session.ensure_receive_transceiver().await?;
                self.session.set_remote_description(offer).await?;
                let answer = self.session.create_answer().await?;
                self.send_event(&Event::Answer {
                    answer: Some(answer),
                })
                .await;
                Ok(())
            }
            Event::Answer { answer } => {
                let answer = answer.ok_or(BridgeError::MissingPayload("answer"))?;
                self.session.set_remote_description(answer).await
            }
            Event::Candidate { candidate } => {
                let candidate = candidate.ok_or(BridgeError::MissingPayload("candidate"))?;
                self.session.add_ice_candidate(candidate).await
            }
            Event::Mute { .. } => {
                self.muted.store(true, Ordering::Release);
                self.room
                    .broadcast(&Event::Mute { user: Some(self.public()) }, Some(self.id))
                    .await;
                Ok(())
            }
            Event::Unmute { .. } => {
                self.muted.store(false, Ordering::Release);
                self.room
                    .broadcast(&Event::Unmute { user: Some(self.public()) }, Some(self.id))
                    .await;
                Ok(())
            }
            other @ (Event::User { .. } | Event::Join { .. } | Event::Leave { .. } | Event::Unknown) => {
                Err(BridgeError::NoSuchEvent(other.kind()))
            }
        }
    }
}
