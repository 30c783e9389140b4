//! TURN Relay Errors

use thiserror::Error;

/// Errors raised while configuring or running the relay.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Public IP empty")]
    PublicIpEmpty,

    #[error("Protocol unsupported: {0}")]
    UnsupportedProtocol(String),

    #[error("Public IP is not an IPv4 address: {0}")]
    InvalidPublicIp(String),

    /// The relay primitive has no listener for this transport.
    #[error("Transport not supported by the relay: {0}")]
    UnsupportedTransport(&'static str),

    #[error("Failed to bind relay listener: {0}")]
    Bind(#[from] std::io::Error),

    #[error("Relay error: {0}")]
    Relay(#[from] webrtc::turn::Error),

    #[error("Relay is not running")]
    NotRunning,
}
