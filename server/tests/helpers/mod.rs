//! Reusable helpers for end-to-end tests.
//!
//! [`spawn_test_server`] runs the full router on an ephemeral port so tests
//! can talk to it over real HTTP and WebSocket connections.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chapper_server::api::{create_router, AppState};
use chapper_server::auth::jwt;
use chapper_server::bridge::{Bridge, WebRtcFactory};
use chapper_server::config::Config;
use chapper_server::signaling::Hub;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a test waits for any single frame.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// A server running on a local ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub url: String,
    pub state: AppState,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// `ws://` URL for `path`.
    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{path}", self.addr)
    }

    /// Bearer token for `username` signed with the server's secret.
    pub fn bearer(&self, username: &str) -> String {
        jwt::generate_access_token(username, &self.state.config.jwt_secret, 900)
            .expect("Failed to sign test token")
    }

    /// Fetch a one-time token from `path` (`/signaling/token` or `/calls/token`).
    pub async fn fetch_token(&self, path: &str, username: &str) -> String {
        let body: serde_json::Value = reqwest::Client::new()
            .get(format!("{}{path}", self.url))
            .bearer_auth(self.bearer(username))
            .send()
            .await
            .expect("Token request failed")
            .json()
            .await
            .expect("Token response is not JSON");
        body["token"]
            .as_str()
            .expect("Token response has no token")
            .to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn spawn_test_server() -> TestServer {
    spawn_test_server_with(Config::default_for_test()).await
}

pub async fn spawn_test_server_with(config: Config) -> TestServer {
    let _ =
        rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider());

    let sessions = WebRtcFactory::new(&config).expect("Failed to build WebRTC factory");
    let hub = Hub::new(config.token_ttl);
    let bridge = Bridge::new(Arc::new(sessions), config.token_ttl);
    let state = AppState::new(config, hub, bridge);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local addr");
    let router = create_router(state.clone());

    let handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .expect("Test server failed");
    });

    TestServer {
        addr,
        url: format!("http://{addr}"),
        state,
        handle,
    }
}

pub async fn send_json(socket: &mut Socket, value: serde_json::Value) {
    socket
        .send(Message::text(value.to_string()))
        .await
        .expect("Failed to send frame");
}

/// Next text frame as JSON, skipping control frames.
pub async fn next_json(socket: &mut Socket) -> serde_json::Value {
    loop {
        let message = tokio::time::timeout(FRAME_TIMEOUT, socket.next())
            .await
            .expect("Timed out waiting for a frame")
            .expect("Socket ended")
            .expect("Socket error");
        match message {
            Message::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("Frame is not JSON")
            }
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("Unexpected frame: {other:?}"),
        }
    }
}

/// Close code sent by the server, skipping any data still in flight.
pub async fn close_code(socket: &mut Socket) -> Option<u16> {
    loop {
        let message = tokio::time::timeout(FRAME_TIMEOUT, socket.next())
            .await
            .expect("Timed out waiting for close")?;
        match message {
            Ok(Message::Close(frame)) => return frame.map(|f| u16::from(f.code)),
            Ok(_) => {}
            Err(_) => return None,
        }
    }
}
