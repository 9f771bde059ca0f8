//! The session store: owns the conversation collection and persists it.

use crate::error::SessionError;
use crate::export::{export_json, parse_import};
use crate::search::{SearchHit, search_sessions};
use crate::types::{Session, SessionSummary};
use pedia_storage::{Storage, StorageError, read_json, slot, write_json};
use pedia_types::{MedicalContext, Message, MessagePatch};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// How many messages per session survive a save by default.
pub const DEFAULT_MESSAGE_CAP: usize = 100;

/// Shape of the `session-store` slot.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedState {
    sessions: Vec<Session>,
    #[serde(default)]
    current_session_id: Option<Uuid>,
}

/// Owns the session collection, the current-session pointer, and the
/// response-pending indicator.
///
/// Every mutation is written back to the `session-store` slot. Storage
/// failures are absorbed: the operation completes in memory and the
/// failure is logged, never surfaced.
pub struct SessionStore {
    storage: Arc<dyn Storage>,
    sessions: Vec<Session>,
    current_session_id: Option<Uuid>,
    pending: bool,
    message_cap: usize,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            sessions: Vec::new(),
            current_session_id: None,
            pending: false,
            message_cap: DEFAULT_MESSAGE_CAP,
        }
    }

    /// Override how many messages per session survive a save.
    pub fn with_message_cap(mut self, cap: usize) -> Self {
        self.message_cap = cap;
        self
    }

    /// Create a store hydrated from the `session-store` slot.
    ///
    /// A missing, unreadable, or corrupt slot degrades to an empty store.
    pub async fn load(storage: Arc<dyn Storage>) -> Self {
        let mut store = Self::new(storage);
        match read_json::<PersistedState>(store.storage.as_ref(), slot::SESSIONS).await {
            Ok(Some(state)) => {
                store.sessions = state.sessions;
                // The pointer must reference a session we actually have.
                store.current_session_id = state
                    .current_session_id
                    .filter(|id| store.sessions.iter().any(|s| s.id == *id));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Failed to load session store, starting empty: {e}");
            }
        }
        store
    }

    // ---- Collection access ----

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn session(&self, id: Uuid) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn current_session_id(&self) -> Option<Uuid> {
        self.current_session_id
    }

    pub fn current_session(&self) -> Option<&Session> {
        self.current_session_id.and_then(|id| self.session(id))
    }

    /// Summaries for listing: pinned sessions first, then most recently
    /// updated.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> =
            self.sessions.iter().map(Session::to_summary).collect();
        summaries.sort_by(|a, b| {
            b.is_pinned
                .cmp(&a.is_pinned)
                .then(b.updated_at.cmp(&a.updated_at))
        });
        summaries
    }

    // ---- Pending indicator ----

    /// Whether a response is pending.
    ///
    /// The flag is shared across the whole store, not scoped per session:
    /// two interleaved sends will see and clear each other's indicator.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn set_pending(&mut self, pending: bool) {
        self.pending = pending;
    }

    // ---- Mutations ----

    /// Create a session at the head of the collection and make it current.
    pub async fn create_session(
        &mut self,
        title: Option<String>,
        medical_context: Option<MedicalContext>,
    ) -> Uuid {
        let session = Session::new(title, medical_context);
        let id = session.id;
        self.sessions.insert(0, session);
        self.current_session_id = Some(id);
        self.persist_best_effort().await;
        id
    }

    /// Remove a session. Clears the current pointer when it was current.
    /// No-op if the id is unknown.
    pub async fn delete_session(&mut self, id: Uuid) {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id != id);
        if self.sessions.len() == before {
            tracing::debug!(%id, "delete_session: unknown id, ignoring");
            return;
        }
        if self.current_session_id == Some(id) {
            self.current_session_id = None;
        }
        self.persist_best_effort().await;
    }

    /// Remove every session and clear the current pointer.
    pub async fn clear_sessions(&mut self) {
        self.sessions.clear();
        self.current_session_id = None;
        self.persist_best_effort().await;
    }

    /// Make an existing session current.
    pub async fn select_session(&mut self, id: Uuid) -> Result<(), SessionError> {
        if self.session(id).is_none() {
            return Err(SessionError::NotFound { id });
        }
        self.current_session_id = Some(id);
        self.persist_best_effort().await;
        Ok(())
    }

    /// Append a message, stamping its timestamp at append time.
    ///
    /// The first user message also becomes the session title. An unknown
    /// session id is a tolerated no-op.
    pub async fn add_message(&mut self, session_id: Uuid, mut message: Message) {
        let Some(session) = self.find_mut(session_id) else {
            tracing::debug!(%session_id, "add_message: unknown session, dropping message");
            return;
        };
        message.timestamp = chrono::Utc::now();
        session.messages.push(message);
        session.auto_title();
        session.touch();
        self.persist_best_effort().await;
    }

    /// Apply a partial update to a message.
    pub async fn update_message(
        &mut self,
        session_id: Uuid,
        message_id: Uuid,
        patch: MessagePatch,
    ) -> Result<(), SessionError> {
        let Some(session) = self.find_mut(session_id) else {
            return Err(SessionError::NotFound { id: session_id });
        };
        let Some(message) = session.messages.iter_mut().find(|m| m.id == message_id) else {
            return Err(SessionError::MessageNotFound {
                session_id,
                message_id,
            });
        };
        message.apply(patch);
        session.touch();
        self.persist_best_effort().await;
        Ok(())
    }

    /// Remove a message. Unknown session or message ids are tolerated
    /// no-ops.
    pub async fn delete_message(&mut self, session_id: Uuid, message_id: Uuid) {
        let Some(session) = self.find_mut(session_id) else {
            tracing::debug!(%session_id, "delete_message: unknown session, ignoring");
            return;
        };
        let before = session.messages.len();
        session.messages.retain(|m| m.id != message_id);
        if session.messages.len() == before {
            tracing::debug!(%message_id, "delete_message: unknown message, ignoring");
            return;
        }
        session.touch();
        self.persist_best_effort().await;
    }

    /// Pin or unpin a session.
    pub async fn pin_session(&mut self, id: Uuid, pinned: bool) -> Result<(), SessionError> {
        let session = self
            .find_mut(id)
            .ok_or(SessionError::NotFound { id })?;
        session.is_pinned = pinned;
        session.touch();
        self.persist_best_effort().await;
        Ok(())
    }

    /// Replace a session's title.
    pub async fn rename_session(
        &mut self,
        id: Uuid,
        title: impl Into<String>,
    ) -> Result<(), SessionError> {
        let session = self
            .find_mut(id)
            .ok_or(SessionError::NotFound { id })?;
        session.title = title.into();
        session.touch();
        self.persist_best_effort().await;
        Ok(())
    }

    /// Add a tag to a session. Adding an existing tag is a no-op.
    pub async fn add_tag(
        &mut self,
        id: Uuid,
        tag: impl Into<String>,
    ) -> Result<(), SessionError> {
        let session = self
            .find_mut(id)
            .ok_or(SessionError::NotFound { id })?;
        session.tags.insert(tag.into());
        session.touch();
        self.persist_best_effort().await;
        Ok(())
    }

    /// Remove a tag from a session.
    pub async fn remove_tag(&mut self, id: Uuid, tag: &str) -> Result<(), SessionError> {
        let session = self
            .find_mut(id)
            .ok_or(SessionError::NotFound { id })?;
        session.tags.remove(tag);
        session.touch();
        self.persist_best_effort().await;
        Ok(())
    }

    // ---- Search ----

    /// Scan message content and citations for a substring.
    pub fn search_messages(&self, query: &str) -> Vec<SearchHit> {
        search_sessions(&self.sessions, query)
    }

    // ---- Export / import ----

    /// Serialize a session for export.
    pub fn export_session(&self, id: Uuid) -> Result<String, SessionError> {
        let session = self.session(id).ok_or(SessionError::NotFound { id })?;
        export_json(session)
    }

    /// Import a previously exported session under a new identity.
    /// The imported session lands at the head and becomes current.
    pub async fn import_session(&mut self, payload: &str) -> Result<Uuid, SessionError> {
        let session = parse_import(payload)?;
        let id = session.id;
        self.sessions.insert(0, session);
        self.current_session_id = Some(id);
        self.persist_best_effort().await;
        Ok(id)
    }

    // ---- Persistence ----

    /// Write the current state to the `session-store` slot.
    ///
    /// Each session's messages are truncated to the most recent
    /// `message_cap` entries in the persisted form only; in-memory
    /// history is untouched.
    pub async fn persist(&self) -> Result<(), StorageError> {
        let state = self.snapshot();
        write_json(self.storage.as_ref(), slot::SESSIONS, &state).await
    }

    async fn persist_best_effort(&self) {
        if let Err(e) = self.persist().await {
            tracing::warn!("Failed to persist session store, continuing in memory: {e}");
        }
    }

    fn snapshot(&self) -> PersistedState {
        let sessions = self
            .sessions
            .iter()
            .map(|session| {
                let mut s = session.clone();
                if s.messages.len() > self.message_cap {
                    s.messages = s.messages[s.messages.len() - self.message_cap..].to_vec();
                }
                s
            })
            .collect();
        PersistedState {
            sessions,
            current_session_id: self.current_session_id,
        }
    }

    fn find_mut(&mut self, id: Uuid) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }
}
