//! Server Configuration
//!
//! Loads configuration from environment variables.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080")
    pub bind_address: String,

    /// JWT verification secret for primary sessions
    pub jwt_secret: String,

    /// Origins allowed to open real-time connections (None = any)
    pub allowed_origins: Option<Vec<String>>,

    /// WebRTC STUN server advertised to clients
    pub stun_server: String,

    /// Whether the embedded TURN relay is started
    pub turn_enabled: bool,

    /// Public IPv4 address advertised by the TURN relay
    pub turn_public_ip: String,

    /// TURN realm (empty = relay default)
    pub turn_realm: String,

    /// TURN transport: "udp4" or "tcp4"
    pub turn_protocol: String,

    /// TURN listen port (0 = relay default)
    pub turn_port: u16,

    /// TURN long-term credential username (optional)
    pub turn_username: Option<String>,

    /// TURN long-term credential password (optional)
    pub turn_credential: Option<String>,

    /// Deadline for a single socket write
    pub write_wait: Duration,

    /// Maximum idle read time before the peer is considered gone
    pub pong_wait: Duration,

    /// Maximum inbound frame size in bytes
    pub max_message_size: usize,

    /// Outbound queue capacity per connection
    pub send_queue_capacity: usize,

    /// Lifetime of an issued real-time token
    pub token_ttl: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            allowed_origins: env::var("ALLOWED_ORIGINS").ok().map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            }),
            stun_server: env::var("STUN_SERVER")
                .unwrap_or_else(|_| "stun:stun.l.google.com:19302".into()),
            turn_enabled: env::var("TURN_ENABLED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
            turn_public_ip: env::var("TURN_PUBLIC_IP").unwrap_or_default(),
            turn_realm: env::var("TURN_REALM").unwrap_or_default(),
            turn_protocol: env::var("TURN_PROTOCOL").unwrap_or_else(|_| "udp4".into()),
            turn_port: env::var("TURN_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            turn_username: env::var("TURN_USERNAME").ok(),
            turn_credential: env::var("TURN_CREDENTIAL").ok(),
            write_wait: secs_from_env("WS_WRITE_WAIT_SECS", 10),
            pong_wait: secs_from_env("WS_PONG_WAIT_SECS", 60),
            max_message_size: env::var("WS_MAX_MESSAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(64 * 1024),
            send_queue_capacity: env::var("WS_SEND_QUEUE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(256),
            token_ttl: secs_from_env("SIGNALING_TOKEN_TTL", 300),
        })
    }

    /// Ping period derived from the pong deadline (nine tenths of it).
    #[must_use]
    pub fn ping_period(&self) -> Duration {
        self.pong_wait * 9 / 10
    }

    /// Check if TURN credentials are configured.
    #[must_use]
    pub const fn has_turn_credentials(&self) -> bool {
        self.turn_username.is_some() && self.turn_credential.is_some()
    }

    /// Create a default configuration for testing.
    ///
    /// TURN is disabled so tests never bind a public relay port.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:0".into(),
            jwt_secret: "test-secret".into(),
            allowed_origins: None,
            stun_server: "stun:stun.l.google.com:19302".into(),
            turn_enabled: false,
            turn_public_ip: String::new(),
            turn_realm: String::new(),
            turn_protocol: "udp4".into(),
            turn_port: 0,
            turn_username: None,
            turn_credential: None,
            write_wait: Duration::from_secs(10),
            pong_wait: Duration::from_secs(60),
            max_message_size: 64 * 1024,
            send_queue_capacity: 256,
            token_ttl: Duration::from_secs(300),
        }
    }
}

fn secs_from_env(key: &str, default: u64) -> Duration {
    let secs = env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&s: &u64| s > 0)
        .unwrap_or(default);
    Duration::from_secs(secs)
}
