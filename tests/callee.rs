mod common;

use common::*;
use duocall::store::CollectionPath;
use duocall::{
    CallConfig, CallError, CallState, CandidateSide, IceCandidate, LateJoinPolicy, MediaError,
    MemoryStore, SessionDescription,
};
use serde_json::json;
use std::sync::Arc;

/// Session `abc123` carrying offer `O1`, as a caller would leave it.
async fn offered_session(store: &MemoryStore) {
    let sessions = sessions(store);
    let id = sessions.create_session().await.unwrap();
    assert_eq!(id.as_str(), "abc123");
    sessions
        .write_offer(&id, &SessionDescription::offer("O1"))
        .await
        .unwrap();
}

fn session_doc(store: &MemoryStore) -> duocall::store::Document {
    store
        .document(&CollectionPath::root("calls").doc("abc123"))
        .unwrap()
}

#[tokio::test]
async fn join_applies_offer_and_publishes_answer() {
    let store = MemoryStore::with_id_sequence(["abc123"]);
    offered_session(&store).await;
    let transports = Arc::new(MockTransportFactory::new().with_answer("A1"));
    let mut callee = controller(&store, &transports, Arc::new(StaticMedia::default()), test_config());

    callee.join_call("abc123").await.unwrap();
    assert_eq!(callee.state(), CallState::AnswerPublished);
    assert_eq!(callee.call_id().map(|id| id.as_str()), Some("abc123"));

    let doc = session_doc(&store);
    assert_eq!(doc["offer"], json!({"type": "offer", "sdp": "O1"}));
    assert_eq!(doc["answer"], json!({"type": "answer", "sdp": "A1"}));

    let transport = transports.transport(0);
    assert_eq!(
        transport.calls(),
        vec![
            Call::AddTracks(1),
            Call::SetRemote(SessionDescription::offer("O1")),
            Call::CreateAnswer,
            Call::SetLocal(SessionDescription::answer("A1")),
        ]
    );
    assert_eq!(callee.stats().remote_descriptions_applied, 1);
    // offer candidates only
    assert_eq!(store.active_subscriptions(), 1);

    callee.stop().await;
}

#[tokio::test]
async fn join_trims_the_call_id() {
    let store = MemoryStore::with_id_sequence(["abc123"]);
    offered_session(&store).await;
    let transports = Arc::new(MockTransportFactory::new());
    let mut callee = controller(&store, &transports, Arc::new(StaticMedia::default()), test_config());

    callee.join_call("  abc123\n").await.unwrap();
    assert_eq!(callee.call_id().map(|id| id.as_str()), Some("abc123"));
    callee.stop().await;
}

#[tokio::test]
async fn offer_candidates_are_applied_without_buffering() {
    let store = MemoryStore::with_id_sequence(["abc123"]);
    offered_session(&store).await;
    let sessions = sessions(&store);
    let id = call_id("abc123");
    for n in 1..=2 {
        sessions
            .add_candidate(&id, CandidateSide::Offer, &IceCandidate::new(host_candidate(n)))
            .await
            .unwrap();
    }

    let transports = Arc::new(MockTransportFactory::new());
    let mut callee = controller(&store, &transports, Arc::new(StaticMedia::default()), test_config());
    callee.join_call("abc123").await.unwrap();
    let transport = transports.transport(0);

    wait_until("existing candidates", || transport.applied_candidates().len() == 2).await;
    sessions
        .add_candidate(&id, CandidateSide::Offer, &IceCandidate::new(host_candidate(3)))
        .await
        .unwrap();
    wait_until("new candidate", || transport.applied_candidates().len() == 3).await;

    assert_eq!(
        transport.applied_candidates(),
        vec![host_candidate(1), host_candidate(2), host_candidate(3)]
    );
    assert_eq!(callee.stats().candidates_buffered, 0);
    assert_eq!(callee.stats().candidates_applied, 3);

    callee.stop().await;
}

#[tokio::test]
async fn local_candidates_go_to_answer_candidates() {
    let store = MemoryStore::with_id_sequence(["abc123"]);
    offered_session(&store).await;
    let transports = Arc::new(MockTransportFactory::new());
    let mut callee = controller(&store, &transports, Arc::new(StaticMedia::default()), test_config());
    callee.join_call("abc123").await.unwrap();

    transports.transport(0).emit_local_candidate(&host_candidate(7));
    wait_until("answer candidate", || {
        !candidates(&store, "abc123", CandidateSide::Answer).is_empty()
    })
    .await;
    assert_eq!(
        candidates(&store, "abc123", CandidateSide::Answer),
        vec![host_candidate(7)]
    );
    assert!(candidates(&store, "abc123", CandidateSide::Offer).is_empty());

    callee.stop().await;
}

#[tokio::test]
async fn unknown_call_fails_without_side_effects() {
    let store = MemoryStore::new();
    let transports = Arc::new(MockTransportFactory::new());
    let media = Arc::new(StaticMedia::default());
    let mut callee = controller(&store, &transports, media.clone(), test_config());

    let err = callee.join_call("nope").await.unwrap_err();
    assert!(matches!(err, CallError::SessionNotFound(_)));
    assert_eq!(callee.state(), CallState::Failed);
    assert_eq!(store.write_count(), 0);
    assert_eq!(media.acquisitions(), 0);
    assert_eq!(transports.created(), 0);

    callee.stop().await;
    assert_eq!(callee.state(), CallState::Closed);
}

#[tokio::test]
async fn blank_call_id_is_rejected() {
    let store = MemoryStore::new();
    let transports = Arc::new(MockTransportFactory::new());
    let mut callee = controller(&store, &transports, Arc::new(StaticMedia::default()), test_config());

    assert!(matches!(
        callee.join_call("   ").await,
        Err(CallError::InvalidCallId)
    ));
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn session_without_offer_cannot_be_joined() {
    let store = MemoryStore::with_id_sequence(["abc123"]);
    sessions(&store).create_session().await.unwrap();
    let writes = store.write_count();
    let transports = Arc::new(MockTransportFactory::new());
    let media = Arc::new(StaticMedia::default());
    let mut callee = controller(&store, &transports, media.clone(), test_config());

    let err = callee.join_call("abc123").await.unwrap_err();
    assert!(matches!(err, CallError::Signaling(_)));
    assert_eq!(store.write_count(), writes);
    assert_eq!(media.acquisitions(), 0);
}

#[tokio::test]
async fn late_joiner_overwrites_answer_by_default() {
    let store = MemoryStore::with_id_sequence(["abc123"]);
    offered_session(&store).await;
    sessions(&store)
        .write_answer(&call_id("abc123"), &SessionDescription::answer("A0"))
        .await
        .unwrap();

    let transports = Arc::new(MockTransportFactory::new().with_answer("A1"));
    let mut callee = controller(&store, &transports, Arc::new(StaticMedia::default()), test_config());
    callee.join_call("abc123").await.unwrap();

    assert_eq!(
        session_doc(&store)["answer"],
        json!({"type": "answer", "sdp": "A1"})
    );
    callee.stop().await;
}

#[tokio::test]
async fn late_joiner_is_rejected_when_configured() {
    let store = MemoryStore::with_id_sequence(["abc123"]);
    offered_session(&store).await;
    sessions(&store)
        .write_answer(&call_id("abc123"), &SessionDescription::answer("A0"))
        .await
        .unwrap();
    let writes = store.write_count();

    let config = CallConfig {
        late_join: LateJoinPolicy::Reject,
        ..test_config()
    };
    let transports = Arc::new(MockTransportFactory::new().with_answer("A1"));
    let media = Arc::new(StaticMedia::default());
    let mut callee = controller(&store, &transports, media.clone(), config);

    let err = callee.join_call("abc123").await.unwrap_err();
    assert!(matches!(err, CallError::AlreadyAnswered(ref id) if id == "abc123"));
    assert_eq!(store.write_count(), writes);
    assert_eq!(media.acquisitions(), 0);
    assert_eq!(
        session_doc(&store)["answer"],
        json!({"type": "answer", "sdp": "A0"})
    );
}

#[tokio::test]
async fn rejected_answer_write_releases_everything() {
    let store = MemoryStore::with_id_sequence(["abc123"]);
    offered_session(&store).await;
    let flaky = FlakyWrites::new(store.clone());
    flaky.fail_writes(true);
    let transports = Arc::new(MockTransportFactory::new().with_answer("A1"));
    let media = Arc::new(StaticMedia::default());
    let mut callee = controller_over(Arc::new(flaky), &transports, media.clone(), test_config());

    let err = callee.join_call("abc123").await.unwrap_err();
    assert!(matches!(err, CallError::StoreUnavailable(_)));
    assert_eq!(callee.state(), CallState::Failed);

    let transport = transports.transport(0);
    let calls = transport.calls();
    assert_eq!(calls.last(), Some(&Call::Close));
    let applied = calls
        .iter()
        .position(|c| *c == Call::SetRemote(SessionDescription::offer("O1")))
        .unwrap();
    assert!(applied < calls.len() - 1);
    assert_eq!(transport.close_count(), 1);
    assert!(media.all_stopped());
    assert_eq!(store.active_subscriptions(), 0);
    assert!(!session_doc(&store).contains_key("answer"));

    callee.stop().await;
    assert_eq!(callee.state(), CallState::Closed);
}

#[tokio::test]
async fn media_failure_leaves_the_session_untouched() {
    let store = MemoryStore::with_id_sequence(["abc123"]);
    offered_session(&store).await;
    let writes = store.write_count();
    let transports = Arc::new(MockTransportFactory::new());
    let mut callee = controller(
        &store,
        &transports,
        Arc::new(FailingMedia(MediaError::PermissionDenied)),
        test_config(),
    );

    let err = callee.join_call("abc123").await.unwrap_err();
    assert!(matches!(
        err,
        CallError::MediaAcquisition(MediaError::PermissionDenied)
    ));
    assert_eq!(callee.state(), CallState::Failed);
    assert!(!session_doc(&store).contains_key("answer"));
    assert_eq!(transports.created(), 0);
    assert_eq!(store.write_count(), writes);
    assert_eq!(store.active_subscriptions(), 0);

    callee.stop().await;
    assert_eq!(callee.state(), CallState::Closed);
}
