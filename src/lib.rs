//! Two-party audio call signaling over a shared document store.
//!
//! The caller creates a call session, publishes an offer and trickles its
//! candidates; the callee fetches the offer, publishes an answer and trickles
//! its own. [`SignalingController`] drives either side against any
//! [`SignalingStore`] and [`TransportFactory`].

pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod store;
pub mod utils;

pub use config::{CallConfig, LateJoinPolicy, LogConfig};
pub use error::{CallError, ConfigError, MediaError, StoreError, TransportError};
pub use peer::{
    CallState, CallStats, ConnectionState, IceCandidate, LocalMedia, MediaSource, PeerTransport,
    RemoteAudio, Role, RtcTransportFactory, SessionDescription, SilenceSource, TransportEvent,
    TransportFactory,
};
pub use session::{CallId, CallSession, CallSessions, CandidateSide};
pub use signaling::SignalingController;
pub use store::{MemoryStore, SignalingStore, Subscription};
