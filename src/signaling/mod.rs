//! Call signaling controller.
//!
//! A [`SignalingController`] drives one call, either as the caller
//! ([`SignalingController::start_call`]) or as the callee
//! ([`SignalingController::join_call`]). Once the descriptions are exchanged
//! the call is handed to a spawned event loop that owns the transport, the
//! capture tracks and the store subscriptions until [`SignalingController::stop`].

mod callee;
mod caller;
mod event_loop;

use crate::config::CallConfig;
use crate::error::{CallError, Result};
use crate::peer::connection::{PeerTransport, TransportEvents, TransportFactory};
use crate::peer::media::{LocalMedia, MediaSource};
use crate::peer::state::{CallCounters, CallState, CallStats, Role};
use crate::peer::types::RemoteAudio;
use crate::session::{CallId, CallSessions};
use crate::store::{CollectionSnapshot, DocumentSnapshot, SignalingStore, Subscription};
use event_loop::{release, transition, CallLoop};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

struct ActiveCall {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Drop for ActiveCall {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub struct SignalingController {
    sessions: CallSessions,
    transports: Arc<dyn TransportFactory>,
    media: Arc<dyn MediaSource>,
    config: CallConfig,
    state: Arc<watch::Sender<CallState>>,
    counters: Arc<CallCounters>,
    remote_audio_tx: mpsc::UnboundedSender<RemoteAudio>,
    remote_audio_rx: Option<mpsc::UnboundedReceiver<RemoteAudio>>,
    role: Option<Role>,
    call_id: Option<CallId>,
    active: Option<ActiveCall>,
}

impl SignalingController {
    pub fn new(
        store: Arc<dyn SignalingStore>,
        transports: Arc<dyn TransportFactory>,
        media: Arc<dyn MediaSource>,
        config: CallConfig,
    ) -> Self {
        let (state, _) = watch::channel(CallState::Idle);
        let (remote_audio_tx, remote_audio_rx) = mpsc::unbounded_channel();
        Self {
            sessions: CallSessions::new(store, &config.calls_collection),
            transports,
            media,
            config,
            state: Arc::new(state),
            counters: Arc::new(CallCounters::default()),
            remote_audio_tx,
            remote_audio_rx: Some(remote_audio_rx),
            role: None,
            call_id: None,
            active: None,
        }
    }

    /// Start a call as the caller and return the id to share with the callee.
    pub async fn start_call(&mut self) -> Result<CallId> {
        self.begin(Role::Caller)?;
        match caller::start(self).await {
            Ok(call) => {
                let id = call.call_id.clone();
                self.call_id = Some(id.clone());
                self.launch(call);
                Ok(id)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Join the call with the given id as the callee.
    pub async fn join_call(&mut self, call_id: &str) -> Result<()> {
        self.begin(Role::Callee)?;
        match callee::join(self, call_id).await {
            Ok(call) => {
                self.call_id = Some(call.call_id.clone());
                self.launch(call);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Tear the call down. Safe from any state and on repeated calls.
    pub async fn stop(&mut self) {
        if let Some(mut active) = self.active.take() {
            if let Some(tx) = active.shutdown.take() {
                let _ = tx.send(());
            }
            if let Err(e) = (&mut active.task).await {
                warn!(error = %e, "call loop ended abnormally");
            }
        }
        if self.state() != CallState::Closed {
            transition(&self.state, CallState::Closed);
            info!(call_id = ?self.call_id.as_ref().map(CallId::as_str), "call stopped");
        } else {
            debug!("stop on a closed call");
        }
    }

    pub fn state(&self) -> CallState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<CallState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> CallStats {
        self.counters.snapshot()
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn call_id(&self) -> Option<&CallId> {
        self.call_id.as_ref()
    }

    /// Remote audio tracks of this call. Can be taken once.
    pub fn take_remote_audio(&mut self) -> Option<mpsc::UnboundedReceiver<RemoteAudio>> {
        self.remote_audio_rx.take()
    }

    fn begin(&mut self, role: Role) -> Result<()> {
        let current = self.state();
        if current != CallState::Idle {
            return Err(CallError::InvalidState(current.to_string()));
        }
        self.role = Some(role);
        Ok(())
    }

    fn set_state(&self, next: CallState) {
        transition(&self.state, next);
    }

    fn fail(&self, err: CallError) -> CallError {
        warn!(role = ?self.role, error = %err, "call setup failed");
        transition(&self.state, CallState::Failed);
        err
    }

    async fn acquire_media(&self) -> Result<LocalMedia> {
        self.set_state(CallState::AwaitingLocalMedia);
        let media = self.media.acquire_audio().await?;
        debug!(tracks = media.tracks().len(), "local audio acquired");
        Ok(media)
    }

    fn launch(&mut self, call: CallLoop) {
        let span = info_span!("call", role = %call.role, call_id = %call.call_id);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(call.run(shutdown_rx).instrument(span));
        self.active = Some(ActiveCall {
            shutdown: Some(shutdown_tx),
            task,
        });
    }

    /// Hand the negotiated call over to its event loop.
    fn finish(&self, role: Role, setup: Setup, negotiated: Negotiated) -> Result<CallLoop> {
        let Some(transport) = setup.transport else {
            setup.media.stop_all();
            return Err(CallError::Signaling("transport not created".into()));
        };
        Ok(CallLoop {
            role,
            call_id: negotiated.call_id,
            sessions: self.sessions.clone(),
            transport,
            events: negotiated.events,
            media: setup.media,
            session_updates: negotiated.session_updates,
            remote_candidates: Some(negotiated.remote_candidates),
            state: self.state.clone(),
            counters: self.counters.clone(),
            remote_audio: self.remote_audio_tx.clone(),
            grace_period: self.config.grace_period(),
        })
    }
}

/// Outcome of a successful offer/answer exchange.
struct Negotiated {
    call_id: CallId,
    events: TransportEvents,
    session_updates: Option<Subscription<DocumentSnapshot>>,
    remote_candidates: Subscription<CollectionSnapshot>,
}

/// Resources acquired while a call is being set up.
struct Setup {
    media: LocalMedia,
    transport: Option<Box<dyn PeerTransport>>,
}

impl Setup {
    fn new(media: LocalMedia) -> Self {
        Self {
            media,
            transport: None,
        }
    }

    /// Build the transport and attach the local tracks to it.
    async fn connect(&mut self, factory: &dyn TransportFactory) -> Result<TransportEvents> {
        let (transport, events) = factory.create().await?;
        let transport = self.transport.insert(transport);
        transport.add_local_tracks(&self.media).await?;
        Ok(events)
    }

    fn transport(&self) -> Result<&dyn PeerTransport> {
        self.transport
            .as_deref()
            .ok_or_else(|| CallError::Signaling("transport not created".into()))
    }

    async fn abort(self) {
        release(self.transport.as_deref(), &self.media).await;
    }
}
