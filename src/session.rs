use crate::error::{CallError, StoreError};
use crate::peer::types::{IceCandidate, SessionDescription};
use crate::store::{
    CollectionPath, CollectionSnapshot, Document, DocumentPath, DocumentSnapshot, SignalingStore,
    Subscription,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

const OFFER_CANDIDATES: &str = "offerCandidates";
const ANSWER_CANDIDATES: &str = "answerCandidates";

/// Identifier of a call session, shared out-of-band by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallId(String);

impl CallId {
    /// Accepts any non-blank string; surrounding whitespace from copy/paste is trimmed.
    pub fn parse(raw: &str) -> Result<Self, CallError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CallError::InvalidCallId);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which peer contributed a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSide {
    Offer,
    Answer,
}

impl CandidateSide {
    pub fn collection_name(self) -> &'static str {
        match self {
            CandidateSide::Offer => OFFER_CANDIDATES,
            CandidateSide::Answer => ANSWER_CANDIDATES,
        }
    }
}

/// The shared call record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    #[serde(skip)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn from_document(id: &str, doc: Document) -> Result<Self, StoreError> {
        let mut session: CallSession = from_document(doc)?;
        session.id = id.to_string();
        Ok(session)
    }
}

pub fn to_document<T: Serialize>(value: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(StoreError::Malformed(format!(
            "expected an object, got {other}"
        ))),
        Err(e) => Err(StoreError::Malformed(e.to_string())),
    }
}

pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T, StoreError> {
    serde_json::from_value(Value::Object(doc)).map_err(|e| StoreError::Malformed(e.to_string()))
}

/// Typed access to call sessions kept in a signaling store.
#[derive(Clone)]
pub struct CallSessions {
    store: Arc<dyn SignalingStore>,
    calls: CollectionPath,
}

impl CallSessions {
    pub fn new(store: Arc<dyn SignalingStore>, collection: &str) -> Self {
        Self {
            store,
            calls: CollectionPath::root(collection),
        }
    }

    pub fn session_path(&self, id: &CallId) -> DocumentPath {
        self.calls.doc(id.as_str())
    }

    pub fn candidates_path(&self, id: &CallId, side: CandidateSide) -> CollectionPath {
        self.session_path(id).collection(side.collection_name())
    }

    pub async fn create_session(&self) -> Result<CallId, StoreError> {
        let record = CallSession {
            created_at: Some(Utc::now()),
            ..CallSession::default()
        };
        let path = self
            .store
            .create_document(&self.calls, to_document(&record)?)
            .await?;
        debug!(call_id = %path.id(), "call session created");
        Ok(CallId(path.id().to_string()))
    }

    pub async fn get_session(&self, id: &CallId) -> Result<CallSession, StoreError> {
        let path = self.session_path(id);
        match self.store.get_document(&path).await? {
            Some(doc) => CallSession::from_document(id.as_str(), doc),
            None => Err(StoreError::NotFound(path.to_string())),
        }
    }

    pub async fn write_offer(&self, id: &CallId, offer: &SessionDescription) -> Result<(), StoreError> {
        self.write_description(id, "offer", offer).await
    }

    pub async fn write_answer(&self, id: &CallId, answer: &SessionDescription) -> Result<(), StoreError> {
        self.write_description(id, "answer", answer).await
    }

    async fn write_description(
        &self,
        id: &CallId,
        field: &str,
        desc: &SessionDescription,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(desc).map_err(|e| StoreError::Malformed(e.to_string()))?;
        let mut fields = Document::new();
        fields.insert(field.to_string(), value);
        self.store.set_fields(&self.session_path(id), fields).await?;
        debug!(call_id = %id, field, "session description written");
        Ok(())
    }

    pub async fn add_candidate(
        &self,
        id: &CallId,
        side: CandidateSide,
        candidate: &IceCandidate,
    ) -> Result<(), StoreError> {
        self.store
            .add_document(&self.candidates_path(id, side), to_document(candidate)?)
            .await?;
        Ok(())
    }

    pub async fn subscribe_session(
        &self,
        id: &CallId,
    ) -> Result<Subscription<DocumentSnapshot>, StoreError> {
        self.store.subscribe_document(&self.session_path(id)).await
    }

    pub async fn subscribe_candidates(
        &self,
        id: &CallId,
        side: CandidateSide,
    ) -> Result<Subscription<CollectionSnapshot>, StoreError> {
        self.store
            .subscribe_collection(&self.candidates_path(id, side))
            .await
    }
}
