//! Peer transport boundary.
//!
//! A transport is built by a [`TransportFactory`] and owned by exactly one
//! controller. Its callbacks arrive as [`TransportEvent`]s on the channel
//! returned alongside it.

use crate::error::TransportError;
use crate::peer::media::LocalMedia;
use crate::peer::types::{ConnectionState, IceCandidate, RemoteAudio, SessionDescription};
use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A locally gathered candidate to publish to the remote peer.
    LocalCandidate(IceCandidate),
    RemoteTrack(RemoteAudio),
    ConnectionState(ConnectionState),
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn add_local_tracks(&self, media: &LocalMedia) -> Result<(), TransportError>;

    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    /// Illegal to call twice on one transport.
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    async fn current_remote_description(&self) -> Option<SessionDescription>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self) -> Result<(Box<dyn PeerTransport>, TransportEvents), TransportError>;
}
