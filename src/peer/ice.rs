use crate::peer::connection::PeerTransport;
use crate::peer::types::IceCandidate;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Remote candidates received before the remote description was applied.
#[derive(Debug, Default)]
pub struct PendingCandidates {
    queue: VecDeque<IceCandidate>,
}

impl PendingCandidates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: IceCandidate) {
        self.queue.push_back(candidate);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Feed every queued candidate to the transport in arrival order.
    /// Returns how many the transport accepted.
    pub async fn flush(&mut self, transport: &dyn PeerTransport) -> usize {
        let mut applied = 0;
        while let Some(candidate) = self.queue.pop_front() {
            if apply_candidate(transport, candidate).await {
                applied += 1;
            }
        }
        applied
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Hand one remote candidate to the transport. A rejected candidate is
/// logged; the call keeps going on the remaining ones.
pub async fn apply_candidate(transport: &dyn PeerTransport, candidate: IceCandidate) -> bool {
    debug!(candidate = %candidate.candidate, "applying remote candidate");
    match transport.add_ice_candidate(candidate.clone()).await {
        Ok(()) => true,
        Err(e) => {
            warn!(candidate = %candidate.candidate, error = %e, "transport rejected remote candidate");
            false
        }
    }
}
