//! [`PeerTransport`] backed by a `webrtc` peer connection.

use crate::error::TransportError;
use crate::logger::dump_candidate;
use crate::peer::connection::{PeerTransport, TransportEvent, TransportEvents, TransportFactory};
use crate::peer::media::LocalMedia;
use crate::peer::types::{
    ConnectionState, IceCandidate, RemoteAudio, SdpType, ServerConfig, SessionDescription,
};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

/// Builds one peer connection per call from the configured ICE servers.
#[derive(Debug, Clone)]
pub struct RtcTransportFactory {
    ice_servers: Vec<ServerConfig>,
}

impl RtcTransportFactory {
    pub fn new(ice_servers: Vec<ServerConfig>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(&self) -> Result<(Box<dyn PeerTransport>, TransportEvents), TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(&self.ice_servers)).await?);
        let (tx, rx) = mpsc::unbounded_channel();
        attach_handlers(&pc, tx);

        debug!(ice_servers = self.ice_servers.len(), "peer connection created");
        Ok((Box::new(RtcTransport { pc }), rx))
    }
}

pub fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

fn attach_handlers(pc: &Arc<RTCPeerConnection>, tx: mpsc::UnboundedSender<TransportEvent>) {
    let candidates = tx.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let tx = candidates.clone();
        Box::pin(async move {
            let Some(c) = cand else {
                debug!("ICE candidate gathering completed");
                return;
            };
            match c.to_json() {
                Ok(init) => {
                    let candidate = IceCandidate::from(init);
                    dump_candidate("LOCAL", &candidate);
                    let _ = tx.send(TransportEvent::LocalCandidate(candidate));
                }
                Err(e) => warn!(error = %e, "failed to serialize local candidate"),
            }
        })
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!(?state, "ICE gathering state changed");
        Box::pin(async {})
    }));

    let states = tx.clone();
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!(state = ?st, "peer connection state changed");
        if let Some(state) = connection_state(st) {
            let _ = states.send(TransportEvent::ConnectionState(state));
        }
        Box::pin(async {})
    }));

    let tracks = tx;
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        if track.kind() == RTPCodecType::Audio {
            let audio = RemoteAudio {
                track_id: track.id(),
                stream_id: track.stream_id(),
                track: Some(track),
            };
            info!(track = %audio.track_id, stream = %audio.stream_id, "remote audio track");
            let _ = tracks.send(TransportEvent::RemoteTrack(audio));
        } else {
            debug!(kind = ?track.kind(), "ignoring non-audio remote track");
        }
        Box::pin(async {})
    }));
}

fn connection_state(st: RTCPeerConnectionState) -> Option<ConnectionState> {
    match st {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(c: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: c.candidate,
            sdp_mid: c.sdp_mid,
            sdp_mline_index: c.sdp_mline_index,
            username_fragment: c.username_fragment,
        }
    }
}

impl TryFrom<SessionDescription> for RTCSessionDescription {
    type Error = TransportError;

    fn try_from(desc: SessionDescription) -> Result<Self, Self::Error> {
        let parsed = match desc.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
            SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp)?,
            SdpType::Rollback => {
                return Err(TransportError::InvalidDescription(
                    "rollback is not supported".into(),
                ))
            }
        };
        Ok(parsed)
    }
}

impl TryFrom<RTCSessionDescription> for SessionDescription {
    type Error = TransportError;

    fn try_from(desc: RTCSessionDescription) -> Result<Self, Self::Error> {
        let sdp_type = match desc.sdp_type {
            RTCSdpType::Offer => SdpType::Offer,
            RTCSdpType::Answer => SdpType::Answer,
            RTCSdpType::Pranswer => SdpType::Pranswer,
            RTCSdpType::Rollback => SdpType::Rollback,
            RTCSdpType::Unspecified => {
                return Err(TransportError::InvalidDescription(
                    "unspecified description type".into(),
                ))
            }
        };
        Ok(SessionDescription {
            sdp_type,
            sdp: desc.sdp,
        })
    }
}

pub struct RtcTransport {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn add_local_tracks(&self, media: &LocalMedia) -> Result<(), TransportError> {
        for track in media.tracks() {
            let sender = self.pc.add_track(track.rtc_track()).await?;
            debug!(track = track.id(), "local track attached");

            // RTCP must be drained for interceptors to run.
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while sender.read(&mut rtcp_buf).await.is_ok() {}
            });
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.pc.create_offer(None).await?.try_into()
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        self.pc.create_answer(None).await?.try_into()
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.pc.set_local_description(desc.try_into()?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        if self.pc.remote_description().await.is_some() {
            return Err(TransportError::Rejected(
                "remote description already set".into(),
            ));
        }
        self.pc.set_remote_description(desc.try_into()?).await?;
        Ok(())
    }

    async fn current_remote_description(&self) -> Option<SessionDescription> {
        let desc = self.pc.remote_description().await?;
        desc.try_into().ok()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.pc.add_ice_candidate(candidate.into()).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.pc.close().await?;
        Ok(())
    }
}
