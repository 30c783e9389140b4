//! Signaling Hub Messages
//!
//! Every frame is a JSON object with a `type` tag. Routed messages are
//! forwarded to their recipients exactly as received.

use serde::{Deserialize, Serialize};

/// Messages a client may send to the hub.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HubMessage {
    /// Bind this connection to `username` using a token from `/signaling/token`.
    Subscribe {
        #[serde(default)]
        username: String,
        #[serde(default)]
        token: String,
    },
    /// Invite recipients to a new chat.
    NewChatOffer(Routed),
    /// Reply to a chat invite.
    NewChatAnswer(Routed),
    /// Session description offer for a peer-to-peer text channel.
    TextOffer(Routed),
    /// Session description answer for a peer-to-peer text channel.
    TextAnswer(Routed),
    /// ICE candidate for a peer-to-peer text channel.
    NewIceCandidate(Routed),
    /// Typing indicator for a chat.
    TypingChange(TypingChange),
    /// Presence update from the sender.
    AvailabilityChange(AvailabilityChange),
    /// Anything else. Dropped.
    #[serde(other)]
    Unknown,
}

impl HubMessage {
    /// Wire name of this message.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::NewChatOffer(_) => "new-chat-offer",
            Self::NewChatAnswer(_) => "new-chat-answer",
            Self::TextOffer(_) => "text-offer",
            Self::TextAnswer(_) => "text-answer",
            Self::NewIceCandidate(_) => "new-ice-candidate",
            Self::TypingChange(_) => "typing-change",
            Self::AvailabilityChange(_) => "availability-change",
            Self::Unknown => "unknown",
        }
    }
}

/// Addressing shared by routed messages. Payload fields are forwarded untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Routed {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: Recipients,
    #[serde(default)]
    pub sdp: String,
}

impl Routed {
    /// `from` and at least one recipient are present.
    #[must_use]
    pub fn is_addressed(&self) -> bool {
        !self.from.is_empty() && !self.to.is_empty()
    }

    /// A recipient and a session description are present.
    #[must_use]
    pub fn has_valid_sdp(&self) -> bool {
        !self.to.is_empty() && !self.sdp.is_empty()
    }
}

/// One or more recipient usernames. Accepts a string or an array on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RecipientsRepr")]
pub struct Recipients(Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum RecipientsRepr {
    One(String),
    Many(Vec<String>),
}

impl From<RecipientsRepr> for Recipients {
    fn from(repr: RecipientsRepr) -> Self {
        let names = match repr {
            RecipientsRepr::One(name) => vec![name],
            RecipientsRepr::Many(names) => names,
        };
        Self(names.into_iter().filter(|n| !n.is_empty()).collect())
    }
}

impl Recipients {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for Recipients {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).filter(|n: &String| !n.is_empty()).collect())
    }
}

/// Typing state of a user in a chat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypingState {
    Typing,
    #[default]
    Default,
}

/// Typing indicator, forwarded to `to` with the sender's username stamped in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypingChange {
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub state: TypingState,
    #[serde(default, skip_serializing)]
    pub to: Recipients,
}

/// Availability of a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    #[default]
    Online,
    Busy,
    Away,
    Offline,
    Invisible,
}

impl Availability {
    /// State shown to other users. Invisible users appear offline.
    #[must_use]
    pub const fn published(self) -> Self {
        match self {
            Self::Invisible => Self::Offline,
            other => other,
        }
    }
}

/// Presence update. Fanned out to every other authenticated peer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AvailabilityChange {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub state: Availability,
}

/// Frames the hub itself emits.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HubEvent {
    TypingChange(TypingChange),
    AvailabilityChange(AvailabilityChange),
}
