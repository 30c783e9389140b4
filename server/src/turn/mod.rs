//! TURN Relay
//!
//! NAT-traversal relay advertised to clients next to the STUN server. The
//! relay listens on every interface and hands out relay addresses on the
//! configured public IP.

mod auth;
pub mod error;

use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::info;
use webrtc::turn::relay::relay_static::RelayAddressGeneratorStatic;
use webrtc::turn::server::config::{ConnConfig, ServerConfig};
use webrtc::turn::server::Server;
use webrtc::util::vnet::net::Net;

use crate::config::Config;

pub use auth::StaticAuth;
pub use error::TurnError;

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 50554;
/// Realm used when none is configured.
pub const DEFAULT_REALM: &str = "chapper.dev";

/// Listener transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Udp4,
    Tcp4,
}

impl Protocol {
    /// Value of the `transport` parameter in a TURN URL.
    #[must_use]
    pub const fn transport(self) -> &'static str {
        match self {
            Self::Udp4 => "udp",
            Self::Tcp4 => "tcp",
        }
    }
}

impl FromStr for Protocol {
    type Err = TurnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "udp4" => Ok(Self::Udp4),
            "tcp4" => Ok(Self::Tcp4),
            other => Err(TurnError::UnsupportedProtocol(other.to_string())),
        }
    }
}

/// A TURN relay bound to a public address.
pub struct TurnServer {
    public_ip: Ipv4Addr,
    realm: String,
    protocol: Protocol,
    port: u16,
    credentials: Option<(String, String)>,
    server: Mutex<Option<Server>>,
}

impl TurnServer {
    /// Validate the relay settings. Port 0 and an empty realm fall back to
    /// [`DEFAULT_PORT`] and [`DEFAULT_REALM`].
    pub fn new(public_ip: &str, realm: &str, protocol: &str, port: u16) -> Result<Self, TurnError> {
        if public_ip.is_empty() {
            return Err(TurnError::PublicIpEmpty);
        }
        let protocol = protocol.parse()?;
        let public_ip = public_ip
            .parse()
            .map_err(|_| TurnError::InvalidPublicIp(public_ip.to_string()))?;

        Ok(Self {
            public_ip,
            realm: if realm.is_empty() {
                DEFAULT_REALM.to_string()
            } else {
                realm.to_string()
            },
            protocol,
            port: if port == 0 { DEFAULT_PORT } else { port },
            credentials: None,
            server: Mutex::new(None),
        })
    }

    /// Build from configuration, including the long-term credentials.
    pub fn from_config(config: &Config) -> Result<Self, TurnError> {
        let mut server = Self::new(
            &config.turn_public_ip,
            &config.turn_realm,
            &config.turn_protocol,
            config.turn_port,
        )?;
        server.credentials = config
            .turn_username
            .clone()
            .zip(config.turn_credential.clone());
        Ok(server)
    }

    #[must_use]
    pub const fn public_ip(&self) -> Ipv4Addr {
        self.public_ip
    }

    #[must_use]
    pub fn realm(&self) -> &str {
        &self.realm
    }

    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Bind the listener and start relaying.
    pub async fn run(&self) -> Result<(), TurnError> {
        if self.protocol == Protocol::Tcp4 {
            return Err(TurnError::UnsupportedTransport("tcp4"));
        }

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.port)).await?;
        let server = Server::new(ServerConfig {
            conn_configs: vec![ConnConfig {
                conn: Arc::new(socket),
                relay_addr_generator: Box::new(RelayAddressGeneratorStatic {
                    relay_address: IpAddr::V4(self.public_ip),
                    address: Ipv4Addr::UNSPECIFIED.to_string(),
                    net: Arc::new(Net::new(None)),
                }),
            }],
            realm: self.realm.clone(),
            auth_handler: Arc::new(StaticAuth::new(self.credentials.clone())),
            channel_bind_timeout: Duration::from_secs(0),
            alloc_close_notify: None,
        })
        .await?;

        *self.server.lock().await = Some(server);
        info!(
            public_ip = %self.public_ip,
            port = self.port,
            realm = %self.realm,
            "TURN relay started"
        );
        Ok(())
    }

    /// Stop relaying.
    pub async fn close(&self) -> Result<(), TurnError> {
        let server = self.server.lock().await.take().ok_or(TurnError::NotRunning)?;
        server.close().await?;
        info!("TURN relay stopped");
        Ok(())
    }
}

/// TURN URL advertised to clients, if the relay is enabled.
#[must_use]
pub fn relay_url(config: &Config) -> Option<String> {
    if !config.turn_enabled || config.turn_public_ip.is_empty() {
        return None;
    }
    let port = if config.turn_port == 0 {
        DEFAULT_PORT
    } else {
        config.turn_port
    };
    let transport = config
        .turn_protocol
        .parse::<Protocol>()
        .map_or("udp", Protocol::transport);
    Some(format!(
        "turn:{}:{port}?transport={transport}",
        config.turn_public_ip
    ))
}
