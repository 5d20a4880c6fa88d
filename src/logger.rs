use crate::config::LogConfig;
use crate::peer::types::{CandidateKind, IceCandidate};
use tracing::{debug, info, warn};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Install the global subscriber. Safe to call more than once; later calls
/// leave the first subscriber in place.
pub fn init(config: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()));

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if installed.is_err() {
        debug!("tracing subscriber already installed");
    }
}

/// Trickle ICE: log a candidate as it appears.
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    debug!(
        label,
        candidate = %cand.candidate,
        sdp_mid = ?cand.sdp_mid,
        sdp_mline_index = ?cand.sdp_mline_index,
        "trickle candidate"
    );
}

/// Count gathered candidates by type and warn when no relay was found.
pub fn log_candidate_summary(label: &str, candidates: &[IceCandidate]) {
    let mut host_count = 0;
    let mut srflx_count = 0;
    let mut relay_count = 0;

    for candidate in candidates {
        match candidate.kind() {
            CandidateKind::Host => host_count += 1,
            CandidateKind::ServerReflexive | CandidateKind::PeerReflexive => srflx_count += 1,
            CandidateKind::Relay => relay_count += 1,
            CandidateKind::Unknown => {}
        }
    }

    info!(
        label,
        host = host_count,
        srflx = srflx_count,
        relay = relay_count,
        "candidate summary"
    );

    if !candidates.is_empty() && relay_count == 0 {
        warn!(label, "no TURN relay candidates gathered; calls through strict NAT may fail");
    }
}
