//! Call Signaling Events
//!
//! JSON frames exchanged on a call connection. The `type` tag selects the
//! variant; payload fields sit next to it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// What other participants may know about a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub mute: bool,
}

/// A call signaling event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Event {
    Offer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offer: Option<RTCSessionDescription>,
    },
    Answer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        answer: Option<RTCSessionDescription>,
    },
    Candidate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        candidate: Option<RTCIceCandidateInit>,
    },
    /// Client: "I muted". Server: "this user muted".
    Mute {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<PublicUser>,
    },
    Unmute {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<PublicUser>,
    },
    /// Sent once to a participant after joining: its own identity.
    User { user: PublicUser },
    Join { user: PublicUser },
    Leave { user: PublicUser },
    #[serde(other)]
    Unknown,
}

impl Event {
    /// Wire name of this event.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
            Self::Mute { .. } => "mute",
            Self::Unmute { .. } => "unmute",
            Self::User { .. } => "user",
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Unknown => "unknown",
        }
    }
}
