#![allow(dead_code)]

use async_trait::async_trait;
use duocall::peer::media::{opus_track, CaptureTrack};
use duocall::peer::{TransportEvents, TransportFactory};
use duocall::store::{
    CollectionPath, CollectionSnapshot, Document, DocumentPath, DocumentSnapshot,
};
use duocall::{
    CallConfig, CallId, CallSessions, CandidateSide, ConnectionState, IceCandidate, LocalMedia,
    MediaError, MediaSource, MemoryStore, PeerTransport, RemoteAudio, SessionDescription,
    SignalingController, SignalingStore, StoreError, Subscription, TransportError,
    TransportEvent,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use webrtc::track::track_local::TrackLocal;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    AddTracks(usize),
    CreateOffer,
    CreateAnswer,
    SetLocal(SessionDescription),
    SetRemote(SessionDescription),
    AddCandidate(String),
    Close,
}

type CloseHook = Arc<dyn Fn() -> usize + Send + Sync>;

#[derive(Default)]
struct TransportLog {
    calls: Mutex<Vec<Call>>,
    remote: Mutex<Option<SessionDescription>>,
    closed: AtomicBool,
    on_close: Option<CloseHook>,
    sampled_at_close: Mutex<Option<usize>>,
}

impl TransportLog {
    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Test-side view of one mock transport.
#[derive(Clone)]
pub struct TransportHandle {
    log: Arc<TransportLog>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportHandle {
    pub fn calls(&self) -> Vec<Call> {
        self.log.calls.lock().unwrap().clone()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::SetRemote(desc) => Some(desc),
                _ => None,
            })
            .collect()
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::AddCandidate(candidate) => Some(candidate),
                _ => None,
            })
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Close).count()
    }

    pub fn is_closed(&self) -> bool {
        self.log.closed.load(Ordering::SeqCst)
    }

    /// Value of the factory close hook when the transport was closed.
    pub fn sampled_at_close(&self) -> Option<usize> {
        *self.log.sampled_at_close.lock().unwrap()
    }

    pub fn emit(&self, event: TransportEvent) {
        self.events.send(event).unwrap();
    }

    pub fn emit_local_candidate(&self, candidate: &str) {
        self.emit(TransportEvent::LocalCandidate(IceCandidate::new(candidate)));
    }

    pub fn emit_state(&self, state: ConnectionState) {
        self.emit(TransportEvent::ConnectionState(state));
    }

    pub fn emit_remote_audio(&self, track_id: &str) {
        self.emit(TransportEvent::RemoteTrack(RemoteAudio {
            track_id: track_id.to_string(),
            stream_id: format!("stream-{track_id}"),
            track: None,
        }));
    }
}

/// Transport that records every call and behaves like a browser peer
/// connection: a second remote description and candidates before any remote
/// description are rejected.
pub struct MockTransport {
    log: Arc<TransportLog>,
    offer: String,
    answer: String,
    fail_offer: bool,
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn add_local_tracks(&self, media: &LocalMedia) -> Result<(), TransportError> {
        self.log.record(Call::AddTracks(media.tracks().len()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.log.record(Call::CreateOffer);
        if self.fail_offer {
            return Err(TransportError::Rejected("offer generation failed".into()));
        }
        Ok(SessionDescription::offer(self.offer.clone()))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        self.log.record(Call::CreateAnswer);
        Ok(SessionDescription::answer(self.answer.clone()))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.log.record(Call::SetLocal(desc));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        let mut remote = self.log.remote.lock().unwrap();
        if remote.is_some() {
            return Err(TransportError::Rejected("remote description already set".into()));
        }
        *remote = Some(desc.clone());
        drop(remote);
        self.log.record(Call::SetRemote(desc));
        Ok(())
    }

    async fn current_remote_description(&self) -> Option<SessionDescription> {
        self.log.remote.lock().unwrap().clone()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        if self.log.remote.lock().unwrap().is_none() {
            return Err(TransportError::Rejected("no remote description".into()));
        }
        self.log.record(Call::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if let Some(hook) = &self.log.on_close {
            *self.log.sampled_at_close.lock().unwrap() = Some(hook());
        }
        self.log.closed.store(true, Ordering::SeqCst);
        self.log.record(Call::Close);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockTransportFactory {
    offer: String,
    answer: String,
    fail_offer: bool,
    on_close: Option<CloseHook>,
    handles: Mutex<Vec<TransportHandle>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
            .with_offer("offer-sdp")
            .with_answer("answer-sdp")
    }

    pub fn with_offer(mut self, sdp: &str) -> Self {
        self.offer = sdp.to_string();
        self
    }

    pub fn with_answer(mut self, sdp: &str) -> Self {
        self.answer = sdp.to_string();
        self
    }

    pub fn failing_offer(mut self) -> Self {
        self.fail_offer = true;
        self
    }

    /// Sample `hook` whenever a transport is closed.
    pub fn sample_on_close(mut self, hook: impl Fn() -> usize + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(hook));
        self
    }

    pub fn created(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    pub fn transport(&self, index: usize) -> TransportHandle {
        self.handles.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create(&self) -> Result<(Box<dyn PeerTransport>, TransportEvents), TransportError> {
        let log = Arc::new(TransportLog {
            on_close: self.on_close.clone(),
            ..TransportLog::default()
        });
        let (tx, rx) = mpsc::unbounded_channel();
        self.handles.lock().unwrap().push(TransportHandle {
            log: log.clone(),
            events: tx,
        });
        let transport = MockTransport {
            log,
            offer: self.offer.clone(),
            answer: self.answer.clone(),
            fail_offer: self.fail_offer,
        };
        Ok((Box::new(transport), rx))
    }
}

pub struct MockTrack {
    id: String,
    stopped: AtomicBool,
}

impl CaptureTrack for MockTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn rtc_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        opus_track(&self.id, "mock-stream")
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Media source handing out one mock audio track per acquisition.
#[derive(Default)]
pub struct StaticMedia {
    tracks: Mutex<Vec<Arc<MockTrack>>>,
}

impl StaticMedia {
    pub fn acquisitions(&self) -> usize {
        self.tracks.lock().unwrap().len()
    }

    pub fn all_stopped(&self) -> bool {
        self.tracks.lock().unwrap().iter().all(|t| t.is_stopped())
    }

    pub fn track(&self, index: usize) -> Arc<MockTrack> {
        self.tracks.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl MediaSource for StaticMedia {
    async fn acquire_audio(&self) -> Result<LocalMedia, MediaError> {
        let mut tracks = self.tracks.lock().unwrap();
        let track = Arc::new(MockTrack {
            id: format!("mic-{}", tracks.len()),
            stopped: AtomicBool::new(false),
        });
        tracks.push(track.clone());
        Ok(LocalMedia::new(vec![track]))
    }
}

pub struct FailingMedia(pub MediaError);

#[async_trait]
impl MediaSource for FailingMedia {
    async fn acquire_audio(&self) -> Result<LocalMedia, MediaError> {
        Err(self.0.clone())
    }
}

/// `MemoryStore` whose field writes can be made to fail. Reads, appends and
/// subscriptions always go through.
#[derive(Clone)]
pub struct FlakyWrites {
    inner: MemoryStore,
    failing: Arc<AtomicBool>,
}

impl FlakyWrites {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl SignalingStore for FlakyWrites {
    async fn create_document(
        &self,
        collection: &CollectionPath,
        fields: Document,
    ) -> Result<DocumentPath, StoreError> {
        self.inner.create_document(collection, fields).await
    }

    async fn get_document(&self, doc: &DocumentPath) -> Result<Option<Document>, StoreError> {
        self.inner.get_document(doc).await
    }

    async fn set_fields(&self, doc: &DocumentPath, fields: Document) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("write to {doc} rejected")));
        }
        self.inner.set_fields(doc, fields).await
    }

    async fn add_document(
        &self,
        collection: &CollectionPath,
        fields: Document,
    ) -> Result<DocumentPath, StoreError> {
        self.inner.add_document(collection, fields).await
    }

    async fn subscribe_document(
        &self,
        doc: &DocumentPath,
    ) -> Result<Subscription<DocumentSnapshot>, StoreError> {
        self.inner.subscribe_document(doc).await
    }

    async fn subscribe_collection(
        &self,
        collection: &CollectionPath,
    ) -> Result<Subscription<CollectionSnapshot>, StoreError> {
        self.inner.subscribe_collection(collection).await
    }
}

pub fn test_config() -> CallConfig {
    CallConfig {
        ice_servers: Vec::new(),
        grace_period_secs: 2,
        ..CallConfig::default()
    }
}

pub fn controller(
    store: &MemoryStore,
    transports: &Arc<MockTransportFactory>,
    media: Arc<dyn MediaSource>,
    config: CallConfig,
) -> SignalingController {
    SignalingController::new(Arc::new(store.clone()), transports.clone(), media, config)
}

pub fn controller_over(
    store: Arc<dyn SignalingStore>,
    transports: &Arc<MockTransportFactory>,
    media: Arc<dyn MediaSource>,
    config: CallConfig,
) -> SignalingController {
    SignalingController::new(store, transports.clone(), media, config)
}

pub fn sessions(store: &MemoryStore) -> CallSessions {
    CallSessions::new(Arc::new(store.clone()), "calls")
}

pub fn candidates(store: &MemoryStore, id: &str, side: CandidateSide) -> Vec<String> {
    let path = CollectionPath::root("calls")
        .doc(id)
        .collection(side.collection_name());
    store
        .documents(&path)
        .into_iter()
        .filter_map(|doc| doc.get("candidate").and_then(|v| v.as_str()).map(String::from))
        .collect()
}

pub fn call_id(raw: &str) -> CallId {
    CallId::parse(raw).unwrap()
}

pub fn host_candidate(n: u8) -> String {
    format!("candidate:{n} 1 udp 2122260223 192.168.1.{n} 5000{n} typ host")
}

/// Poll `cond` until it holds, failing the test after five seconds.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Give spawned call loops a chance to drain their queues.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}
