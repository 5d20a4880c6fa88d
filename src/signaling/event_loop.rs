//! Per-call event loop.
//!
//! One task owns the transport, the capture tracks and the store
//! subscriptions of a running call. Session snapshots, remote candidates and
//! transport events are handled one at a time, in whatever order they arrive.

use crate::error::CallError;
use crate::logger::log_candidate_summary;
use crate::peer::connection::{PeerTransport, TransportEvent, TransportEvents};
use crate::peer::ice::{apply_candidate, PendingCandidates};
use crate::peer::media::LocalMedia;
use crate::peer::state::{CallCounters, CallState, Role};
use crate::peer::types::{ConnectionState, IceCandidate, RemoteAudio};
use crate::session::{from_document, CallId, CallSession, CallSessions, CandidateSide};
use crate::store::{CollectionSnapshot, DocumentSnapshot, Subscription};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Move to `next`. A closed call stays closed; a failed one can only close.
pub(crate) fn transition(state: &watch::Sender<CallState>, next: CallState) {
    state.send_if_modified(|current| {
        if *current == next || *current == CallState::Closed {
            return false;
        }
        if current.is_terminal() && next != CallState::Closed {
            return false;
        }
        info!(from = %current, to = %next, "call state changed");
        *current = next;
        true
    });
}

/// Close the transport, then release capture. Subscriptions must already be
/// cancelled by the caller.
pub(crate) async fn release(transport: Option<&dyn PeerTransport>, media: &LocalMedia) {
    if let Some(transport) = transport {
        if let Err(e) = transport.close().await {
            warn!(error = %e, "failed to close transport");
        }
    }
    media.stop_all();
}

enum Outcome {
    Stopped,
    Failed(CallError),
}

pub(crate) struct CallLoop {
    pub role: Role,
    pub call_id: CallId,
    pub sessions: CallSessions,
    pub transport: Box<dyn PeerTransport>,
    pub events: TransportEvents,
    pub media: LocalMedia,
    /// Caller only: the session document, watched for the answer.
    pub session_updates: Option<Subscription<DocumentSnapshot>>,
    pub remote_candidates: Option<Subscription<CollectionSnapshot>>,
    pub state: Arc<watch::Sender<CallState>>,
    pub counters: Arc<CallCounters>,
    pub remote_audio: mpsc::UnboundedSender<RemoteAudio>,
    pub grace_period: Duration,
}

async fn next_or_pending<T>(sub: &mut Option<Subscription<T>>) -> Option<T> {
    match sub {
        Some(sub) => sub.next().await,
        None => std::future::pending().await,
    }
}

impl CallLoop {
    fn local_side(&self) -> CandidateSide {
        match self.role {
            Role::Caller => CandidateSide::Offer,
            Role::Callee => CandidateSide::Answer,
        }
    }

    pub(crate) async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let mut pending = PendingCandidates::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut published: Vec<IceCandidate> = Vec::new();
        let mut remote_applied = self.transport.current_remote_description().await.is_some();
        let mut grace_deadline: Option<Instant> = None;
        let mut transport_state = ConnectionState::New;
        let mut events_open = true;

        let outcome = loop {
            tokio::select! {
                _ = &mut shutdown => break Outcome::Stopped,

                snapshot = next_or_pending(&mut self.session_updates) => match snapshot {
                    Some(snapshot) => {
                        match self
                            .on_session_snapshot(snapshot, &mut pending, &mut remote_applied)
                            .await
                        {
                            Ok(true) if transport_state == ConnectionState::Connected => {
                                transition(&self.state, CallState::Connected);
                            }
                            Ok(_) => {}
                            Err(e) => break Outcome::Failed(e),
                        }
                    }
                    None => {
                        warn!("session subscription ended by the store");
                        self.session_updates = None;
                    }
                },

                snapshot = next_or_pending(&mut self.remote_candidates) => match snapshot {
                    Some(snapshot) => {
                        self.on_remote_candidates(snapshot, &mut seen, &mut pending, remote_applied)
                            .await;
                    }
                    None => {
                        warn!("candidate subscription ended by the store");
                        self.remote_candidates = None;
                    }
                },

                event = self.events.recv(), if events_open => match event {
                    Some(TransportEvent::LocalCandidate(candidate)) => {
                        self.publish_local_candidate(&candidate).await;
                        published.push(candidate);
                    }
                    Some(TransportEvent::RemoteTrack(audio)) => {
                        if self.remote_audio.send(audio).is_err() {
                            debug!("remote audio receiver dropped");
                        }
                    }
                    Some(TransportEvent::ConnectionState(st)) => {
                        transport_state = st;
                        if let Err(e) = self.on_connection_state(st, remote_applied, &mut grace_deadline) {
                            break Outcome::Failed(e);
                        }
                    }
                    None => {
                        debug!("transport event channel closed");
                        events_open = false;
                    }
                },

                _ = tokio::time::sleep_until(grace_deadline.unwrap_or_else(Instant::now)),
                    if grace_deadline.is_some() =>
                {
                    break Outcome::Failed(CallError::Signaling(format!(
                        "connection not recovered within {:?}",
                        self.grace_period
                    )));
                }
            }
        };

        if !pending.is_empty() {
            debug!(count = pending.len(), "discarding buffered candidates at teardown");
            pending.clear();
        }
        if let Some(sub) = self.session_updates.as_mut() {
            sub.unsubscribe();
        }
        if let Some(sub) = self.remote_candidates.as_mut() {
            sub.unsubscribe();
        }
        release(Some(self.transport.as_ref()), &self.media).await;
        log_candidate_summary(&self.role.to_string(), &published);

        match outcome {
            Outcome::Stopped => debug!("call loop stopped"),
            Outcome::Failed(e) => {
                error!(error = %e, "call failed");
                transition(&self.state, CallState::Failed);
            }
        }
    }

    /// Apply the answer carried by `snapshot`, if any and not yet applied.
    /// Returns whether it was applied now.
    async fn on_session_snapshot(
        &self,
        snapshot: DocumentSnapshot,
        pending: &mut PendingCandidates,
        remote_applied: &mut bool,
    ) -> Result<bool, CallError> {
        let Some(data) = snapshot.data else {
            warn!("call session document is missing");
            return Ok(false);
        };
        let session = match CallSession::from_document(&snapshot.id, data) {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "ignoring malformed session snapshot");
                return Ok(false);
            }
        };
        let Some(answer) = session.answer else {
            trace!("no answer yet");
            return Ok(false);
        };
        if self.transport.current_remote_description().await.is_some() {
            trace!("answer already applied");
            return Ok(false);
        }

        self.transport.set_remote_description(answer).await?;
        self.counters.remote_description_applied();
        *remote_applied = true;
        info!("answer applied as remote description");

        let buffered = pending.len();
        let applied = pending.flush(self.transport.as_ref()).await;
        self.counters.candidates_applied(applied);
        if buffered > 0 {
            debug!(buffered, applied, "flushed buffered remote candidates");
        }
        Ok(true)
    }

    async fn on_remote_candidates(
        &self,
        snapshot: CollectionSnapshot,
        seen: &mut HashSet<String>,
        pending: &mut PendingCandidates,
        remote_applied: bool,
    ) {
        for change in snapshot.added() {
            if !seen.insert(change.id.clone()) {
                trace!(doc = %change.id, "candidate already handled");
                continue;
            }
            let candidate: IceCandidate = match from_document(change.data.clone()) {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!(doc = %change.id, error = %e, "ignoring malformed remote candidate");
                    continue;
                }
            };

            if remote_applied {
                if apply_candidate(self.transport.as_ref(), candidate).await {
                    self.counters.candidates_applied(1);
                }
            } else {
                debug!(candidate = %candidate.candidate, "remote description not set yet, queuing candidate");
                pending.push(candidate);
                self.counters.candidate_buffered();
            }
        }
    }

    /// The append is awaited on the loop, so a slow store delays the next
    /// event. Failure is logged and counted, never fatal.
    async fn publish_local_candidate(&self, candidate: &IceCandidate) {
        match self
            .sessions
            .add_candidate(&self.call_id, self.local_side(), candidate)
            .await
        {
            Ok(()) => {
                self.counters.local_candidate_published();
                trace!(candidate = %candidate.candidate, "local candidate published");
            }
            Err(e) => {
                self.counters.local_candidate_failed();
                warn!(candidate = %candidate.candidate, error = %e, "failed to publish local candidate");
            }
        }
    }

    fn on_connection_state(
        &self,
        st: ConnectionState,
        remote_applied: bool,
        grace_deadline: &mut Option<Instant>,
    ) -> Result<(), CallError> {
        match st {
            ConnectionState::Connected => {
                if grace_deadline.take().is_some() {
                    info!("connection recovered");
                }
                if remote_applied {
                    transition(&self.state, CallState::Connected);
                }
            }
            ConnectionState::Disconnected => {
                if grace_deadline.is_none() {
                    warn!(grace = ?self.grace_period, "connection interrupted, waiting for recovery");
                    *grace_deadline = Some(Instant::now() + self.grace_period);
                }
            }
            ConnectionState::Failed => {
                return Err(CallError::Signaling("transport connection failed".into()));
            }
            other => debug!(state = %other, "transport state"),
        }
        Ok(())
    }
}
