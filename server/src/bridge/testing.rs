//! In-memory media sessions for bridge tests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

use super::error::BridgeError;
use super::room::Room;
use super::session::{
    CandidateHandler, InboundTrack, MediaSession, OutboundTrack, SessionFactory, SessionState,
    StateHandler, TrackHandler,
};
use super::user::User;
use crate::transport::{Connection, ConnectionSettings, Outbox};

pub fn opus() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "audio/opus".into(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".into(),
        rtcp_feedback: vec![],
    }
}

pub fn description(kind: &str, sdp: &str) -> RTCSessionDescription {
    serde_json::from_value(serde_json::json!({"type": kind, "sdp": sdp})).unwrap()
}

pub fn packet(ssrc: u32, sequence_number: u16) -> Packet {
    Packet {
        header: Header {
            version: 2,
            payload_type: 111,
            sequence_number,
            ssrc,
            ..Default::default()
        },
        payload: Bytes::from_static(b"opus-frame"),
    }
}

pub fn drain_events(outbox: &mut Outbox) -> Vec<serde_json::Value> {
    let mut events = Vec::new();
    while let Ok(text) = outbox.try_recv() {
        events.push(serde_json::from_str(&text).unwrap());
    }
    events
}

/// Poll `check` until it holds. Fails the test after two seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// A user backed by a fake session, not yet joined to `room`.
pub fn fake_user(name: &str, room: &Room) -> (Arc<User>, Outbox, Arc<FakeSession>) {
    let (conn, outbox) = Connection::new(&ConnectionSettings::default());
    let session = Arc::new(FakeSession::default());
    let (user, _packets) = User::new(name.to_string(), room.clone(), conn, session.clone());
    (user, outbox, session)
}

pub fn test_user(name: &str, room: &Room) -> (Arc<User>, Outbox) {
    let (user, outbox, _session) = fake_user(name, room);
    (user, outbox)
}

#[derive(Default)]
struct Recorded {
    receive_transceiver: bool,
    remote: Vec<String>,
    candidates: usize,
    offers: usize,
    added: Vec<u32>,
    removed: Vec<u32>,
    closed: bool,
    written: HashMap<u32, mpsc::UnboundedReceiver<Packet>>,
}

/// Records every call and lets tests fire session callbacks.
///
/// Like the real engine, a state callback runs under a lock that `close`
/// also takes, because closing reports `Closed` through the same callback.
#[derive(Default)]
pub struct FakeSession {
    recorded: Mutex<Recorded>,
    fail_offers: AtomicBool,
    on_candidate: Mutex<Option<CandidateHandler>>,
    on_state: Mutex<Option<StateHandler>>,
    state_lock: tokio::sync::Mutex<()>,
    on_track: Mutex<Option<TrackHandler>>,
}

impl FakeSession {
    pub fn has_receive_transceiver(&self) -> bool {
        self.recorded.lock().unwrap().receive_transceiver
    }

    pub fn remote_descriptions(&self) -> Vec<String> {
        self.recorded.lock().unwrap().remote.clone()
    }

    pub fn candidates(&self) -> usize {
        self.recorded.lock().unwrap().candidates
    }

    pub fn offers(&self) -> usize {
        self.recorded.lock().unwrap().offers
    }

    pub fn added_tracks(&self) -> Vec<u32> {
        self.recorded.lock().unwrap().added.clone()
    }

    pub fn removed_tracks(&self) -> Vec<u32> {
        self.recorded.lock().unwrap().removed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.recorded.lock().unwrap().closed
    }

    /// Packets the bridge wrote to the outbound track `ssrc`.
    pub fn take_written(&self, ssrc: u32) -> mpsc::UnboundedReceiver<Packet> {
        self.recorded.lock().unwrap().written.remove(&ssrc).unwrap()
    }

    pub fn fail_offers(&self) {
        self.fail_offers.store(true, Ordering::SeqCst);
    }

    pub async fn fire_state(&self, state: SessionState) {
        let _running = self.state_lock.lock().await;
        let fut = self.on_state.lock().unwrap().as_ref().map(|h| h(state));
        if let Some(fut) = fut {
            fut.await;
        }
    }

    pub async fn fire_track(&self, track: Arc<dyn InboundTrack>) {
        let fut = self.on_track.lock().unwrap().as_ref().map(|h| h(track));
        if let Some(fut) = fut {
            fut.await;
        }
    }

    pub async fn fire_candidate(&self, candidate: RTCIceCandidateInit) {
        let fut = self
            .on_candidate
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| h(Some(candidate)));
        if let Some(fut) = fut {
            fut.await;
        }
    }
}

#[async_trait]
impl MediaSession for FakeSession {
    async fn create_offer(&self) -> Result<RTCSessionDescription, BridgeError> {
        if self.fail_offers.load(Ordering::SeqCst) {
            return Err(BridgeError::WebRtc("offer rejected".into()));
        }
        let mut recorded = self.recorded.lock().unwrap();
        recorded.offers += 1;
        Ok(description("offer", &format!("server-offer-{}", recorded.offers)))
    }

    async fn create_answer(&self) -> Result<RTCSessionDescription, BridgeError> {
        Ok(description("answer", "server-answer"))
    }

    async fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<(), BridgeError> {
        self.recorded.lock().unwrap().remote.push(desc.sdp);
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: RTCIceCandidateInit) -> Result<(), BridgeError> {
        self.recorded.lock().unwrap().candidates += 1;
        Ok(())
    }

    async fn ensure_receive_transceiver(&self) -> Result<(), BridgeError> {
        self.recorded.lock().unwrap().receive_transceiver = true;
        Ok(())
    }

    async fn add_track(
        &self,
        ssrc: u32,
        _codec: RTCRtpCodecCapability,
    ) -> Result<Arc<dyn OutboundTrack>, BridgeError> {
        // Creating a real track suspends, so let other tasks interleave.
        tokio::task::yield_now().await;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut recorded = self.recorded.lock().unwrap();
        recorded.added.push(ssrc);
        recorded.written.insert(ssrc, rx);
        Ok(Arc::new(FakeOutbound(tx)))
    }

    async fn remove_track(&self, ssrc: u32) -> Result<(), BridgeError> {
        self.recorded.lock().unwrap().removed.push(ssrc);
        Ok(())
    }

    fn on_ice_candidate(&self, handler: CandidateHandler) {
        *self.on_candidate.lock().unwrap() = Some(handler);
    }

    fn on_state_change(&self, handler: StateHandler) {
        *self.on_state.lock().unwrap() = Some(handler);
    }

    fn on_track(&self, handler: TrackHandler) {
        *self.on_track.lock().unwrap() = Some(handler);
    }

    async fn close(&self) -> Result<(), BridgeError> {
        let first = !std::mem::replace(&mut self.recorded.lock().unwrap().closed, true);
        if first {
            self.fire_state(SessionState::Closed).await;
        }
        Ok(())
    }
}

/// Hands out fake sessions and remembers them in creation order.
#[derive(Default)]
pub struct FakeFactory {
    sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeFactory {
    pub fn session(&self, index: usize) -> Arc<FakeSession> {
        self.sessions.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn create(&self) -> Result<Arc<dyn MediaSession>, BridgeError> {
        let session = Arc::new(FakeSession::default());
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }
}

/// Inbound track fed by the test through the returned sender.
pub struct FakeInbound {
    ssrc: u32,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Packet>>,
}

impl FakeInbound {
    pub fn new(ssrc: u32) -> (Arc<Self>, mpsc::UnboundedSender<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let track = Arc::new(Self {
            ssrc,
            rx: tokio::sync::Mutex::new(rx),
        });
        (track, tx)
    }
}

#[async_trait]
impl InboundTrack for FakeInbound {
    fn ssrc(&self) -> u32 {
        self.ssrc
    }

    fn codec(&self) -> RTCRtpCodecCapability {
        opus()
    }

    async fn read_rtp(&self) -> Result<Packet, BridgeError> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| BridgeError::TrackClosed(format!("fake track {}", self.ssrc)))
    }
}

struct FakeOutbound(mpsc::UnboundedSender<Packet>);

#[async_trait]
impl OutboundTrack for FakeOutbound {
    async fn write_rtp(&self, packet: &Packet) -> Result<(), BridgeError> {
        let _ = self.0.send(packet.clone());
        Ok(())
    }
}
