//! Media Session Capability
//!
//! The bridge drives each participant's WebRTC connection through
//! [`MediaSession`]. Production uses [`super::media::WebRtcSession`]; tests use
//! an in-memory fake.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

use super::error::BridgeError;

/// Connection state as far as the bridge cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl SessionState {
    /// The session can no longer carry media.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

impl From<RTCPeerConnectionState> for SessionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => Self::New,
            RTCPeerConnectionState::Connecting => Self::Connecting,
            RTCPeerConnectionState::Connected => Self::Connected,
            RTCPeerConnectionState::Disconnected => Self::Disconnected,
            RTCPeerConnectionState::Failed => Self::Failed,
            RTCPeerConnectionState::Closed => Self::Closed,
        }
    }
}

pub type CandidateHandler =
    Box<dyn Fn(Option<RTCIceCandidateInit>) -> BoxFuture<'static, ()> + Send + Sync>;
pub type StateHandler = Box<dyn Fn(SessionState) -> BoxFuture<'static, ()> + Send + Sync>;
pub type TrackHandler = Box<dyn Fn(Arc<dyn InboundTrack>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Media a participant sends to the bridge.
#[async_trait]
pub trait InboundTrack: Send + Sync {
    fn ssrc(&self) -> u32;
    fn codec(&self) -> RTCRtpCodecCapability;
    /// Next RTP packet. Errors once the track has ended.
    async fn read_rtp(&self) -> Result<Packet, BridgeError>;
}

/// Media the bridge forwards to a participant.
#[async_trait]
pub trait OutboundTrack: Send + Sync {
    async fn write_rtp(&self, packet: &Packet) -> Result<(), BridgeError>;
}

/// One participant's WebRTC session.
#[async_trait]
pub trait MediaSession: Send + Sync {
    /// Create an offer and make it the local description.
    async fn create_offer(&self) -> Result<RTCSessionDescription, BridgeError>;
    /// Create an answer and make it the local description.
    async fn create_answer(&self) -> Result<RTCSessionDescription, BridgeError>;
    async fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<(), BridgeError>;
    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<(), BridgeError>;
    /// Add a receive-only audio transceiver unless one exists.
    async fn ensure_receive_transceiver(&self) -> Result<(), BridgeError>;
    /// Start sending a track identified by `ssrc` to this participant.
    async fn add_track(
        &self,
        ssrc: u32,
        codec: RTCRtpCodecCapability,
    ) -> Result<Arc<dyn OutboundTrack>, BridgeError>;
    /// Stop sending the track identified by `ssrc`. Unknown tracks are ignored.
    async fn remove_track(&self, ssrc: u32) -> Result<(), BridgeError>;
    fn on_ice_candidate(&self, handler: CandidateHandler);
    fn on_state_change(&self, handler: StateHandler);
    fn on_track(&self, handler: TrackHandler);
    async fn close(&self) -> Result<(), BridgeError>;
}

/// Creates sessions for joining participants.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn MediaSession>, BridgeError>;
}
