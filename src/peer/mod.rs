pub mod connection;
pub mod ice;
pub mod media;
pub mod rtc;
pub mod state;
pub mod types;

pub use connection::{PeerTransport, TransportEvent, TransportEvents, TransportFactory};
pub use media::{CaptureTrack, LocalMedia, MediaSource, SilenceSource};
pub use rtc::RtcTransportFactory;
pub use state::{CallState, CallStats, Role};
pub use types::{
    CandidateKind, ConnectionState, IceCandidate, RemoteAudio, SdpType, ServerConfig,
    SessionDescription,
};
