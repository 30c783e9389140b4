//! WebRTC Media Sessions
//!
//! [`MediaSession`] backed by an `RTCPeerConnection` from the `webrtc` crate.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;

use super::error::BridgeError;
use super::session::{
    CandidateHandler, InboundTrack, MediaSession, OutboundTrack, SessionFactory, StateHandler,
    TrackHandler,
};
use crate::config::Config;
use crate::turn;

/// Opus as negotiated with browsers.
const OPUS_PAYLOAD_TYPE: u8 = 111;

/// ICE servers handed to both the bridge's sessions and clients.
#[must_use]
pub fn ice_servers(config: &Config) -> Vec<RTCIceServer> {
    let mut ice_servers = vec![RTCIceServer {
        urls: vec![config.stun_server.clone()],
        ..Default::default()
    }];

    if let Some(url) = turn::relay_url(config) {
        ice_servers.push(RTCIceServer {
            urls: vec![url],
            username: config.turn_username.clone().unwrap_or_default(),
            credential: config.turn_credential.clone().unwrap_or_default(),
            ..Default::default()
        });
    }

    ice_servers
}

/// Builds peer connections sharing one WebRTC API instance.
pub struct WebRtcFactory {
    api: Arc<API>,
    rtc_config: RTCConfiguration,
}

impl WebRtcFactory {
    /// Register Opus and the default interceptors.
    pub fn new(config: &Config) -> Result<Self, BridgeError> {
        let mut media_engine = MediaEngine::default();

        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: "audio/opus".to_string(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                    rtcp_feedback: vec![],
                },
                payload_type: OPUS_PAYLOAD_TYPE,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        info!("WebRTC media engine initialized");

        Ok(Self {
            api: Arc::new(api),
            rtc_config: RTCConfiguration {
                ice_servers: ice_servers(config),
                ..Default::default()
            },
        })
    }
}

#[async_trait]
impl SessionFactory for WebRtcFactory {
    async fn create(&self) -> Result<Arc<dyn MediaSession>, BridgeError> {
        let pc = self.api.new_peer_connection(self.rtc_config.clone()).await?;
        Ok(Arc::new(WebRtcSession {
            pc: Arc::new(pc),
            senders: Mutex::new(HashMap::new()),
        }))
    }
}

/// A participant's peer connection plus the senders the bridge attached to it.
pub struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<u32, Arc<RTCRtpSender>>>,
}

#[async_trait]
impl MediaSession for WebRtcSession {
    async fn create_offer(&self) -> Result<RTCSessionDescription, BridgeError> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;
        Ok(offer)
    }

    async fn create_answer(&self) -> Result<RTCSessionDescription, BridgeError> {
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        Ok(answer)
    }

    async fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<(), BridgeError> {
        self.pc.set_remote_description(desc).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<(), BridgeError> {
        self.pc.add_ice_candidate(candidate).await?;
        Ok(())
    }

    async fn ensure_receive_transceiver(&self) -> Result<(), BridgeError> {
        if !self.pc.get_transceivers().await.is_empty() {
            return Ok(());
        }
        self.pc
            .add_transceiver_from_kind(
                RTPCodecType::Audio,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await?;
        Ok(())
    }

    async fn add_track(
        &self,
        ssrc: u32,
        codec: RTCRtpCodecCapability,
    ) -> Result<Arc<dyn OutboundTrack>, BridgeError> {
        let track = Arc::new(TrackLocalStaticRTP::new(
            codec,
            ssrc.to_string(),
            format!("chapper-{ssrc}"),
        ));
        let sender = self
            .pc
            .add_track(track.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // RTCP from the receiver must be drained for interceptors to work.
        let rtcp_sender = sender.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
            debug!(ssrc, "RTCP reader finished");
        });

        self.senders.lock().await.insert(ssrc, sender);
        Ok(Arc::new(LocalTrack(track)))
    }

    async fn remove_track(&self, ssrc: u32) -> Result<(), BridgeError> {
        let sender = self.senders.lock().await.remove(&ssrc);
        if let Some(sender) = sender {
            self.pc.remove_track(&sender).await?;
        }
        Ok(())
    }

    fn on_ice_candidate(&self, handler: CandidateHandler) {
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let init = candidate.and_then(|c| c.to_json().ok());
                handler(init)
            }));
    }

    fn on_state_change(&self, handler: StateHandler) {
        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                handler(state.into())
            }));
    }

    fn on_track(&self, handler: TrackHandler) {
        self.pc
            .on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
                handler(Arc::new(RemoteTrack(track)))
            }));
    }

    async fn close(&self) -> Result<(), BridgeError> {
        self.pc.close().await?;
        Ok(())
    }
}

struct RemoteTrack(Arc<TrackRemote>);

#[async_trait]
impl InboundTrack for RemoteTrack {
    fn ssrc(&self) -> u32 {
        self.0.ssrc()
    }

    fn codec(&self) -> RTCRtpCodecCapability {
        self.0.codec().capability
    }

    async fn read_rtp(&self) -> Result<Packet, BridgeError> {
        let (packet, _attributes) = self
            .0
            .read_rtp()
            .await
            .map_err(|e| BridgeError::TrackClosed(e.to_string()))?;
        Ok(packet)
    }
}

struct LocalTrack(Arc<TrackLocalStaticRTP>);

#[async_trait]
impl OutboundTrack for LocalTrack {
    async fn write_rtp(&self, packet: &Packet) -> Result<(), BridgeError> {
        self.0.write_rtp(packet).await?;
        Ok(())
    }
}
