use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Caller,
    Callee,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Caller => f.write_str("caller"),
            Role::Callee => f.write_str("callee"),
        }
    }
}

/// Lifecycle of one call as seen by its controller.
///
/// Caller: `Idle → AwaitingLocalMedia → SessionCreated → OfferPublished →
/// AwaitingAnswer → Connected → Closed`.
/// Callee: `Idle → AwaitingLocalMedia → OfferFetched → AnswerPublished →
/// Connected → Closed`. Either may end in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    AwaitingLocalMedia,
    SessionCreated,
    OfferPublished,
    AwaitingAnswer,
    OfferFetched,
    AnswerPublished,
    Connected,
    Closed,
    Failed,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Closed | CallState::Failed)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-call counters, shared between a controller and its event loop.
#[derive(Debug, Default)]
pub struct CallCounters {
    remote_descriptions_applied: AtomicU64,
    candidates_buffered: AtomicU64,
    candidates_applied: AtomicU64,
    local_candidates_published: AtomicU64,
    local_candidates_failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallStats {
    pub remote_descriptions_applied: u64,
    /// Remote candidates that had to wait for the remote description.
    pub candidates_buffered: u64,
    pub candidates_applied: u64,
    pub local_candidates_published: u64,
    pub local_candidates_failed: u64,
}

impl CallCounters {
    pub fn remote_description_applied(&self) {
        self.remote_descriptions_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn candidate_buffered(&self) {
        self.candidates_buffered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn candidates_applied(&self, n: usize) {
        self.candidates_applied.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn local_candidate_published(&self) {
        self.local_candidates_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn local_candidate_failed(&self) {
        self.local_candidates_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CallStats {
        CallStats {
            remote_descriptions_applied: self.remote_descriptions_applied.load(Ordering::Relaxed),
            candidates_buffered: self.candidates_buffered.load(Ordering::Relaxed),
            candidates_applied: self.candidates_applied.load(Ordering::Relaxed),
            local_candidates_published: self.local_candidates_published.load(Ordering::Relaxed),
            local_candidates_failed: self.local_candidates_failed.load(Ordering::Relaxed),
        }
    }
}
