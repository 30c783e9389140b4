//! Call Bridge Errors

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Errors that can occur during call operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No room with this hash exists.
    #[error("No such room: {0}")]
    NoSuchRoom(String),

    /// A room with this hash already exists.
    #[error("Room already exists: {0}")]
    DuplicateRoom(String),

    /// The client sent an event the bridge does not handle.
    #[error("No such event: {0}")]
    NoSuchEvent(&'static str),

    /// The event is missing its payload.
    #[error("Event '{0}' is missing its payload")]
    MissingPayload(&'static str),

    /// WebRTC error.
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// Reading from an inbound track failed or the track ended.
    #[error("Track closed: {0}")]
    TrackClosed(String),
}

impl BridgeError {
    /// Whether the error came from session negotiation.
    ///
    /// Such errors end the participant's call. Protocol errors only get logged.
    #[must_use]
    pub const fn is_negotiation_failure(&self) -> bool {
        matches!(self, Self::WebRtc(_))
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Self::NoSuchRoom(_) => (StatusCode::NOT_FOUND, "NO_SUCH_ROOM", self.to_string()),
            Self::DuplicateRoom(_) => (StatusCode::CONFLICT, "DUPLICATE_ROOM", self.to_string()),
            Self::NoSuchEvent(_) | Self::MissingPayload(_) => {
                (StatusCode::BAD_REQUEST, "INVALID_EVENT", self.to_string())
            }
            Self::WebRtc(_) | Self::TrackClosed(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "WEBRTC_ERROR",
                "WebRTC operation failed".to_string(),
            ),
        };

        let body = Json(serde_json::json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

impl From<webrtc::Error> for BridgeError {
    fn from(err: webrtc::Error) -> Self {
        Self::WebRtc(err.to_string())
    }
}
