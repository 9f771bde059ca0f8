//! The chat service: session store, offline queue, idle guard, and audit
//! log wired to the chat-completion collaborator behind one interface.

use pedia_guard::{ActivityKind, AuditAction, AuditLog, GuardConfig, GuardSignal, SessionGuard};
use pedia_queue::{DeliveryError, DrainReport, OfflineQueue, QueueItem, QueueItemKind};
use pedia_session::{SearchHit, SessionStore, SessionSummary};
use pedia_storage::Storage;
use pedia_types::{
    ChatCompletion, ChatRequest, MedicalContext, MedicalUnit, Message, MessagePatch, PediaError,
    ResponseStyle,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Assistant-side note recorded when a send is queued while offline.
const OFFLINE_NOTICE: &str =
    "You appear to be offline. Your question was saved and will be sent when the connection returns.";

/// Options applied to every outgoing request.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    pub include_evidence: Option<bool>,
    pub response_style: Option<ResponseStyle>,
}

/// Construction tunables. A `None` field keeps the owning component's
/// own default.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub message_cap: Option<usize>,
    pub queue_max_retries: Option<u32>,
    pub guard: Option<GuardConfig>,
    pub audit_capacity: Option<usize>,
}

/// What a completed send did.
///
/// Collaborator failures are absorbed into session state and reported
/// here rather than returned as `Err`; only cancellation escapes as an
/// error from [`ChatService::send_message`].
#[derive(Debug)]
pub enum SendOutcome {
    /// The collaborator answered and the reply was appended.
    Delivered(ChatReply),
    /// Offline: the request was queued for later delivery.
    QueuedOffline,
    /// The collaborator failed; an error-bearing assistant message was
    /// appended and, for transient failures, a retry was queued.
    Failed { error: String },
}

/// The assistant's reply, split into the stored message and the
/// presentation-only extras that are not part of the transcript.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub message: Message,
    pub suggestions: Vec<String>,
    pub medical_units: Vec<MedicalUnit>,
}

/// Wire form of a queued chat delivery.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatPayload {
    session_id: Uuid,
    request: ChatRequest,
}

/// Coordinates every state-bearing subsystem of the application.
///
/// One instance owns the store, queue, guard, and audit log, and all
/// methods take `&mut self`. That exclusivity is the whole concurrency
/// story: a drain pass, a send, and a session mutation can never
/// interleave, matching the single-threaded model the state was designed
/// for.
pub struct ChatService {
    storage: Arc<dyn Storage>,
    store: SessionStore,
    queue: OfflineQueue,
    guard: SessionGuard,
    audit: AuditLog,
    client: Arc<dyn ChatCompletion>,
    online: bool,
    send_options: SendOptions,
    queue_max_retries: Option<u32>,
}

impl ChatService {
    /// Build a service hydrated from storage. Missing or corrupt slots
    /// degrade to empty state; construction itself cannot fail.
    pub async fn load(
        storage: Arc<dyn Storage>,
        client: Arc<dyn ChatCompletion>,
        config: ServiceConfig,
    ) -> Self {
        let mut store = SessionStore::load(storage.clone()).await;
        if let Some(cap) = config.message_cap {
            store = store.with_message_cap(cap);
        }
        let queue = OfflineQueue::load(storage.clone()).await;
        let audit = AuditLog::load(
            storage.as_ref(),
            config
                .audit_capacity
                .unwrap_or(pedia_guard::DEFAULT_AUDIT_CAPACITY),
        )
        .await;
        let guard = SessionGuard::new(config.guard.unwrap_or_default());

        Self {
            storage,
            store,
            queue,
            guard,
            audit,
            client,
            online: true,
            send_options: SendOptions::default(),
            queue_max_retries: config.queue_max_retries,
        }
    }

    // ---- Read access ----

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn guard(&self) -> &SessionGuard {
        &self.guard
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Store-wide in-flight indicator.
    pub fn is_pending(&self) -> bool {
        self.store.is_pending()
    }

    pub fn send_options(&self) -> SendOptions {
        self.send_options
    }

    pub fn set_send_options(&mut self, options: SendOptions) {
        self.send_options = options;
    }

    // ---- Sessions ----

    /// Create a session, make it current, and audit the creation.
    pub async fn create_session(
        &mut self,
        title: Option<String>,
        medical_context: Option<MedicalContext>,
    ) -> Uuid {
        let id = self.store.create_session(title, medical_context).await;
        self.audit.record(AuditAction::SessionCreated, Some(id));
        self.flush_audit().await;
        id
    }

    /// Delete a session. Unknown ids are tolerated and leave no audit
    /// entry.
    pub async fn delete_session(&mut self, id: Uuid) {
        let before = self.store.sessions().len();
        self.store.delete_session(id).await;
        if self.store.sessions().len() != before {
            self.audit.record(AuditAction::SessionDeleted, Some(id));
            self.flush_audit().await;
        }
    }

    /// Remove every session.
    pub async fn clear_sessions(&mut self) {
        self.store.clear_sessions().await;
        self.audit.record(AuditAction::SessionsCleared, None);
        self.flush_audit().await;
    }

    pub async fn select_session(&mut self, id: Uuid) -> Result<(), PediaError> {
        Ok(self.store.select_session(id).await?)
    }

    pub async fn pin_session(&mut self, id: Uuid, pinned: bool) -> Result<(), PediaError> {
        Ok(self.store.pin_session(id, pinned).await?)
    }

    pub async fn rename_session(
        &mut self,
        id: Uuid,
        title: impl Into<String>,
    ) -> Result<(), PediaError> {
        Ok(self.store.rename_session(id, title).await?)
    }

    pub async fn add_tag(&mut self, id: Uuid, tag: impl Into<String>) -> Result<(), PediaError> {
        Ok(self.store.add_tag(id, tag).await?)
    }

    pub async fn remove_tag(&mut self, id: Uuid, tag: &str) -> Result<(), PediaError> {
        Ok(self.store.remove_tag(id, tag).await?)
    }

    pub async fn update_message(
        &mut self,
        session_id: Uuid,
        message_id: Uuid,
        patch: MessagePatch,
    ) -> Result<(), PediaError> {
        Ok(self.store.update_message(session_id, message_id, patch).await?)
    }

    pub async fn delete_message(&mut self, session_id: Uuid, message_id: Uuid) {
        self.store.delete_message(session_id, message_id).await;
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        self.store.summaries()
    }

    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        self.store.search_messages(query)
    }

    /// Serialize a session for export and audit the export.
    pub async fn export_session(&mut self, id: Uuid) -> Result<String, PediaError> {
        let payload = self.store.export_session(id)?;
        self.audit.record(AuditAction::SessionExported, Some(id));
        self.flush_audit().await;
        Ok(payload)
    }

    /// Import a previously exported session under a new identity.
    pub async fn import_session(&mut self, payload: &str) -> Result<Uuid, PediaError> {
        let id = self.store.import_session(payload).await?;
        self.audit.record(AuditAction::SessionImported, Some(id));
        self.flush_audit().await;
        Ok(id)
    }

    // ---- Sending ----

    /// Send a user message through the full protocol.
    ///
    /// Ensures a current session, appends the user message, and raises
    /// the pending indicator before anything can fail. Offline, the
    /// request is queued and an explanatory assistant message appended.
    /// Online, the collaborator is invoked: success appends its reply,
    /// failure appends an error-bearing assistant message and queues a
    /// retry when the failure was transient. The pending indicator is
    /// cleared on every path.
    ///
    /// Only cancellation surfaces as `Err`; everything else is reported
    /// through [`SendOutcome`].
    pub async fn send_message(
        &mut self,
        text: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<SendOutcome, PediaError> {
        let text = text.into();

        let session_id = match self.store.current_session_id() {
            Some(id) => id,
            None => self.create_session(None, None).await,
        };

        self.store
            .add_message(session_id, Message::user(text.as_str()))
            .await;
        self.audit.record(AuditAction::MessageSent, Some(session_id));
        self.store.set_pending(true);

        let request = self.build_request(session_id, &text);

        if !self.online {
            self.enqueue_chat(session_id, request).await;
            self.store
                .add_message(session_id, Message::failed(OFFLINE_NOTICE))
                .await;
            self.store.set_pending(false);
            self.flush_audit().await;
            return Ok(SendOutcome::QueuedOffline);
        }

        // Local clone so the in-flight future borrows no part of self and
        // the cancellation arm is free to mutate state.
        let client = Arc::clone(&self.client);
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(%session_id, "send cancelled in flight");
                self.store.set_pending(false);
                self.flush_audit().await;
                return Err(PediaError::Cancelled);
            }
            result = client.complete(&request) => result,
        };

        match result {
            Ok(response) => {
                let message = response.to_message();
                self.store.add_message(session_id, message.clone()).await;
                self.store.set_pending(false);
                self.audit
                    .record(AuditAction::ResponseReceived, Some(session_id));
                self.flush_audit().await;
                Ok(SendOutcome::Delivered(ChatReply {
                    message,
                    suggestions: response.suggestions,
                    medical_units: response.medical_units,
                }))
            }
            Err(e) => {
                let error = e.to_string();
                tracing::warn!(%session_id, "chat completion failed: {error}");
                self.store
                    .add_message(session_id, Message::failed(error.clone()))
                    .await;
                if e.is_transient() {
                    self.enqueue_chat(session_id, request).await;
                }
                self.store.set_pending(false);
                self.audit
                    .record(AuditAction::ResponseFailed, Some(session_id));
                self.flush_audit().await;
                Ok(SendOutcome::Failed { error })
            }
        }
    }

    fn build_request(&self, session_id: Uuid, text: &str) -> ChatRequest {
        ChatRequest {
            message: text.to_string(),
            session_id: Some(session_id),
            context: self
                .store
                .session(session_id)
                .and_then(|s| s.medical_context.clone()),
            include_evidence: self.send_options.include_evidence,
            response_style: self.send_options.response_style,
        }
    }

    async fn enqueue_chat(&mut self, session_id: Uuid, request: ChatRequest) {
        let payload = ChatPayload {
            session_id,
            request,
        };
        let payload = match serde_json::to_value(&payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Failed to encode queued request, dropping it: {e}");
                return;
            }
        };
        let mut item = QueueItem::new(QueueItemKind::Chat, payload);
        if let Some(max) = self.queue_max_retries {
            item = item.with_max_retries(max);
        }
        self.queue.enqueue(item).await;
        self.audit
            .record(AuditAction::OfflineEnqueued, Some(session_id));
    }

    // ---- Connectivity ----

    /// Change the connectivity state. Coming back online drains the
    /// queue and returns the drain report; every other transition
    /// returns `None`.
    pub async fn set_online(&mut self, online: bool) -> Option<DrainReport> {
        let was_online = std::mem::replace(&mut self.online, online);
        if online && !was_online {
            Some(self.drain_queue().await)
        } else {
            None
        }
    }

    /// Replay queued items against the collaborator in enqueue order.
    pub async fn drain_queue(&mut self) -> DrainReport {
        let store = &mut self.store;
        let client = self.client.as_ref();
        let report = self
            .queue
            .drain(async |item| deliver_item(store, client, item).await)
            .await;
        if report.attempted() > 0 {
            self.audit.record_with(
                AuditAction::QueueDrained,
                None,
                serde_json::json!({
                    "delivered": report.delivered,
                    "requeued": report.requeued,
                    "dropped": report.dropped,
                }),
            );
            self.flush_audit().await;
        }
        report
    }

    /// Persist the session snapshot now. A failed write queues a sync
    /// action so the snapshot is retried on the next drain.
    pub async fn sync_now(&mut self) {
        if let Err(e) = self.store.persist().await {
            tracing::warn!("Sync failed, queueing a retry: {e}");
            let mut item = QueueItem::new(QueueItemKind::Sync, serde_json::Value::Null);
            if let Some(max) = self.queue_max_retries {
                item = item.with_max_retries(max);
            }
            self.queue.enqueue(item).await;
            self.audit.record(AuditAction::OfflineEnqueued, None);
            self.flush_audit().await;
        }
    }

    // ---- Idle guard ----

    /// Record user activity, first collecting any signal the idle clock
    /// has raised since the last interaction. Each signal is audited
    /// here, exactly once.
    pub async fn note_activity(&mut self, kind: ActivityKind) -> Option<GuardSignal> {
        let signal = self.poll_guard().await;
        self.guard.record_activity(kind);
        signal
    }

    /// Check the idle clock without recording activity.
    pub async fn poll_guard(&mut self) -> Option<GuardSignal> {
        let signal = self.guard.evaluate();
        match signal {
            Some(GuardSignal::TimeoutWarning) => {
                self.audit.record(AuditAction::TimeoutWarning, None);
                self.flush_audit().await;
            }
            Some(GuardSignal::ForcedLogout) => {
                self.audit.record(AuditAction::ForcedLogout, None);
                self.flush_audit().await;
            }
            None => {}
        }
        signal
    }

    /// Start a fresh guard episode, typically after a forced logout has
    /// been handled.
    pub fn reset_guard(&mut self) {
        self.guard.reset();
    }

    async fn flush_audit(&self) {
        self.audit.flush(self.storage.as_ref()).await;
    }
}

/// Deliver one queued item.
///
/// Chat and calculation items re-invoke the collaborator and append the
/// reply to the originating session; when that session has since been
/// deleted the reply is dropped and the delivery still counts as a
/// success. Sync items re-persist the session snapshot.
async fn deliver_item(
    store: &mut SessionStore,
    client: &dyn ChatCompletion,
    item: QueueItem,
) -> Result<(), DeliveryError> {
    match item.kind {
        QueueItemKind::Chat | QueueItemKind::Calculation => {
            let payload: ChatPayload = serde_json::from_value(item.payload)
                .map_err(|e| DeliveryError(format!("undeliverable payload: {e}")))?;
            let response = client
                .complete(&payload.request)
                .await
                .map_err(|e| DeliveryError(e.to_string()))?;
            if store.session(payload.session_id).is_some() {
                store
                    .add_message(payload.session_id, response.to_message())
                    .await;
            } else {
                tracing::warn!(
                    session_id = %payload.session_id,
                    "queued reply arrived for a deleted session, dropping"
                );
            }
            Ok(())
        }
        QueueItemKind::Sync => store
            .persist()
            .await
            .map_err(|e| DeliveryError(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pedia_session::DEFAULT_TITLE;
    use pedia_storage::{MemoryStorage, StorageError};
    use pedia_types::{ApiError, ChatResponse, Citation, EvidenceLevel, Role};
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Collaborator double that pops scripted outcomes in order. An
    /// exhausted script answers with a network error.
    struct ScriptedClient {
        outcomes: Mutex<VecDeque<Result<ChatResponse, ApiError>>>,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl ScriptedClient {
        fn new(outcomes: Vec<Result<ChatResponse, ApiError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
                delay: None,
            })
        }

        fn with_delay(outcomes: Vec<Result<ChatResponse, ApiError>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
                delay: Some(delay),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ChatCompletion for ScriptedClient {
        fn complete<'a>(
            &'a self,
            _request: &'a ChatRequest,
        ) -> Pin<Box<dyn Future<Output = Result<ChatResponse, ApiError>> + Send + 'a>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                self.outcomes
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| Err(ApiError::Network("no scripted response".into())))
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    /// Storage whose writes can be switched to fail.
    struct FlakyStorage {
        inner: MemoryStorage,
        fail_writes: AtomicBool,
    }

    impl FlakyStorage {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: MemoryStorage::new(),
                fail_writes: AtomicBool::new(false),
            })
        }

        fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }
    }

    impl Storage for FlakyStorage {
        fn get<'a>(
            &'a self,
            slot: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<Option<String>, StorageError>> + Send + 'a>>
        {
            self.inner.get(slot)
        }

        fn put<'a>(
            &'a self,
            slot: &'a str,
            value: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + 'a>> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Box::pin(async {
                    Err(StorageError::Io(std::io::Error::other("disk full")))
                });
            }
            self.inner.put(slot, value)
        }

        fn remove<'a>(
            &'a self,
            slot: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + 'a>> {
            self.inner.remove(slot)
        }
    }

    fn reply(text: &str) -> ChatResponse {
        ChatResponse {
            message: text.into(),
            citations: Vec::new(),
            evidence_level: None,
            medical_units: Vec::new(),
            session_id: Uuid::new_v4(),
            suggestions: Vec::new(),
        }
    }

    async fn service_with(client: Arc<ScriptedClient>) -> ChatService {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        ChatService::load(storage, client, ServiceConfig::default()).await
    }

    #[tokio::test]
    async fn send_creates_session_and_appends_exchange() {
        let client = ScriptedClient::new(vec![Ok(reply("Offer fluids in small sips."))]);
        let mut service = service_with(client).await;

        let outcome = service
            .send_message("What are signs of dehydration?", &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, SendOutcome::Delivered(_)));
        let session = service.store().current_session().unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].role, Role::User);
        assert_eq!(session.messages[1].role, Role::Assistant);
        assert_eq!(session.title, "What are signs of dehydration?");
        assert!(!service.is_pending());
    }

    #[tokio::test]
    async fn send_reuses_the_current_session() {
        let client = ScriptedClient::new(vec![Ok(reply("first")), Ok(reply("second"))]);
        let mut service = service_with(client).await;
        let cancel = CancellationToken::new();

        service.send_message("one", &cancel).await.unwrap();
        service.send_message("two", &cancel).await.unwrap();

        assert_eq!(service.store().sessions().len(), 1);
        assert_eq!(service.store().current_session().unwrap().messages.len(), 4);
    }

    #[tokio::test]
    async fn delivered_reply_carries_citations_and_extras() {
        let mut response = reply("Watch for dry lips and fewer wet diapers.");
        response.citations.push(Citation {
            id: "c1".into(),
            source: "nelson".into(),
            title: "Fluid Balance".into(),
            excerpt: "Early signs of dehydration include dry mucous membranes.".into(),
            relevance_score: 0.9,
            chapter: None,
            page: None,
            url: None,
        });
        response.evidence_level = Some(EvidenceLevel::High);
        response.suggestions.push("How much fluid per hour?".into());
        let client = ScriptedClient::new(vec![Ok(response)]);
        let mut service = service_with(client).await;

        let outcome = service
            .send_message("What are signs of dehydration?", &CancellationToken::new())
            .await
            .unwrap();

        let SendOutcome::Delivered(reply) = outcome else {
            panic!("expected a delivered outcome");
        };
        assert_eq!(reply.message.citations[0].title, "Fluid Balance");
        assert_eq!(reply.message.evidence_level, Some(EvidenceLevel::High));
        assert_eq!(reply.suggestions, ["How much fluid per hour?"]);
        // The stored copy matches what was handed back.
        let stored = service.store().current_session().unwrap();
        assert_eq!(stored.messages[1].id, reply.message.id);
    }

    #[tokio::test]
    async fn request_carries_session_context_and_options() {
        let client = ScriptedClient::new(vec![Ok(reply("ok"))]);
        let mut service = service_with(client).await;
        let context = MedicalContext {
            age_months: Some(18),
            weight_kg: Some(11.2),
            ..MedicalContext::default()
        };
        let id = service.create_session(None, Some(context)).await;
        service.set_send_options(SendOptions {
            include_evidence: Some(true),
            response_style: Some(ResponseStyle::Concise),
        });

        service
            .send_message("fever dose?", &CancellationToken::new())
            .await
            .unwrap();

        // The queue is empty, so inspect the request indirectly through a
        // second offline send whose payload snapshots the same fields.
        service.set_online(false).await;
        service
            .send_message("again?", &CancellationToken::new())
            .await
            .unwrap();
        let item = service.queue().items().next().unwrap();
        let request = item.payload.get("request").unwrap();
        assert_eq!(request["sessionId"], serde_json::json!(id));
        assert_eq!(request["context"]["ageMonths"], 18);
        assert_eq!(request["includeEvidence"], true);
        assert_eq!(request["responseStyle"], "concise");
    }

    #[tokio::test]
    async fn transient_failure_records_error_and_queues_retry() {
        let client = ScriptedClient::new(vec![Err(ApiError::Network("connection reset".into()))]);
        let mut service = service_with(client).await;

        let outcome = service
            .send_message("Is this fever dangerous?", &CancellationToken::new())
            .await
            .unwrap();

        let SendOutcome::Failed { error } = outcome else {
            panic!("expected a failed outcome");
        };
        assert!(error.contains("connection reset"));
        let session = service.store().current_session().unwrap();
        assert_eq!(session.messages.len(), 2);
        assert!(session.messages[1].error.is_some());
        assert_eq!(service.queue().len(), 1);
        assert!(!service.is_pending());
    }

    #[tokio::test]
    async fn permanent_failure_is_not_queued() {
        let client = ScriptedClient::new(vec![Err(ApiError::BadRequest {
            message: "message must not be empty".into(),
        })]);
        let mut service = service_with(client).await;

        let outcome = service
            .send_message("   ", &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, SendOutcome::Failed { .. }));
        assert!(service.queue().is_empty());
        let session = service.store().current_session().unwrap();
        assert!(session.messages[1].error.is_some());
    }

    #[tokio::test]
    async fn offline_send_queues_without_calling_the_client() {
        let client = ScriptedClient::new(Vec::new());
        let mut service = service_with(client.clone()).await;
        service.set_online(false).await;

        let outcome = service
            .send_message("How much ibuprofen?", &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, SendOutcome::QueuedOffline));
        assert_eq!(client.calls(), 0);
        assert_eq!(service.queue().len(), 1);
        let session = service.store().current_session().unwrap();
        assert_eq!(session.messages.len(), 2);
        assert!(session.messages[1].error.is_some());
        assert!(!service.is_pending());
    }

    #[tokio::test]
    async fn coming_back_online_drains_to_the_originating_session() {
        let client = ScriptedClient::new(vec![Ok(reply("A typical dose is 10 mg/kg."))]);
        let mut service = service_with(client.clone()).await;
        service.set_online(false).await;
        service
            .send_message("How much ibuprofen?", &CancellationToken::new())
            .await
            .unwrap();
        let session_id = service.store().current_session_id().unwrap();

        let report = service.set_online(true).await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(client.calls(), 1);
        assert!(service.queue().is_empty());
        let session = service.store().session(session_id).unwrap();
        assert_eq!(session.messages.len(), 3);
        assert_eq!(
            session.messages[2].first_text(),
            Some("A typical dose is 10 mg/kg.")
        );
    }

    #[tokio::test]
    async fn drain_runs_only_on_the_offline_to_online_transition() {
        let client = ScriptedClient::new(Vec::new());
        let mut service = service_with(client).await;

        assert!(service.set_online(true).await.is_none());
        service.set_online(false).await;
        assert!(service.set_online(false).await.is_none());
        let report = service.set_online(true).await.unwrap();
        assert_eq!(report.attempted(), 0);
    }

    #[tokio::test]
    async fn drain_tolerates_a_deleted_session() {
        let client = ScriptedClient::new(vec![Ok(reply("too late"))]);
        let mut service = service_with(client).await;
        service.set_online(false).await;
        service
            .send_message("short question", &CancellationToken::new())
            .await
            .unwrap();
        let session_id = service.store().current_session_id().unwrap();
        service.delete_session(session_id).await;

        let report = service.set_online(true).await.unwrap();

        assert_eq!(report.delivered, 1);
        assert!(service.queue().is_empty());
        assert!(service.store().sessions().is_empty());
    }

    #[tokio::test]
    async fn failed_delivery_requeues_until_the_budget_is_exhausted() {
        // An empty script fails every delivery attempt.
        let client = ScriptedClient::new(Vec::new());
        let mut service = service_with(client).await;
        service.set_online(false).await;
        service
            .send_message("will not go through", &CancellationToken::new())
            .await
            .unwrap();

        let first = service.set_online(true).await.unwrap();
        assert_eq!(first.requeued, 1);
        assert_eq!(service.queue().len(), 1);
        assert_eq!(service.queue().items().next().unwrap().retry_count, 1);

        let second = service.drain_queue().await;
        assert_eq!(second.requeued, 1);
        let third = service.drain_queue().await;
        assert_eq!(third.dropped, 1);
        assert!(service.queue().is_empty());
    }

    #[tokio::test]
    async fn queue_retry_budget_is_configurable() {
        let client = ScriptedClient::new(Vec::new());
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let config = ServiceConfig {
            queue_max_retries: Some(1),
            ..ServiceConfig::default()
        };
        let mut service = ChatService::load(storage, client, config).await;
        service.set_online(false).await;
        service
            .send_message("one shot", &CancellationToken::new())
            .await
            .unwrap();

        let report = service.set_online(true).await.unwrap();

        assert_eq!(report.dropped, 1);
        assert!(service.queue().is_empty());
    }

    #[tokio::test]
    async fn cancel_clears_pending_and_keeps_the_user_message() {
        let client =
            ScriptedClient::with_delay(vec![Ok(reply("late"))], Duration::from_secs(30));
        let mut service = service_with(client).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = service.send_message("still there?", &cancel).await;

        assert!(matches!(result, Err(PediaError::Cancelled)));
        let session = service.store().current_session().unwrap();
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].role, Role::User);
        assert!(!service.is_pending());
    }

    #[tokio::test]
    async fn send_audits_the_whole_exchange() {
        let client = ScriptedClient::new(vec![Ok(reply("noted"))]);
        let mut service = service_with(client).await;

        service
            .send_message("audit me", &CancellationToken::new())
            .await
            .unwrap();

        let actions: Vec<AuditAction> =
            service.audit_log().entries().map(|e| e.action).collect();
        assert!(actions.contains(&AuditAction::SessionCreated));
        assert!(actions.contains(&AuditAction::MessageSent));
        assert!(actions.contains(&AuditAction::ResponseReceived));
    }

    #[tokio::test]
    async fn export_and_import_are_audited() {
        let client = ScriptedClient::new(Vec::new());
        let mut service = service_with(client).await;
        let id = service.create_session(Some("Allergy notes".into()), None).await;

        let payload = service.export_session(id).await.unwrap();
        let imported = service.import_session(&payload).await.unwrap();

        assert_ne!(imported, id);
        let actions: Vec<AuditAction> =
            service.audit_log().entries().map(|e| e.action).collect();
        assert!(actions.contains(&AuditAction::SessionExported));
        assert!(actions.contains(&AuditAction::SessionImported));
    }

    #[tokio::test]
    async fn delete_of_unknown_session_leaves_no_audit_entry() {
        let client = ScriptedClient::new(Vec::new());
        let mut service = service_with(client).await;

        service.delete_session(Uuid::new_v4()).await;

        assert!(service.audit_log().is_empty());
    }

    #[tokio::test]
    async fn message_cap_applies_to_the_persisted_snapshot() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let client = ScriptedClient::new(vec![Ok(reply("one")), Ok(reply("two"))]);
        let config = ServiceConfig {
            message_cap: Some(2),
            ..ServiceConfig::default()
        };
        let mut service = ChatService::load(storage.clone(), client, config).await;
        let cancel = CancellationToken::new();
        service.send_message("first", &cancel).await.unwrap();
        service.send_message("second", &cancel).await.unwrap();
        assert_eq!(service.store().current_session().unwrap().messages.len(), 4);

        let reloaded =
            ChatService::load(storage, ScriptedClient::new(Vec::new()), ServiceConfig::default())
                .await;
        let session = &reloaded.store().sessions()[0];
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[1].first_text(), Some("two"));
    }

    #[tokio::test]
    async fn failed_sync_queues_a_retry_that_later_drains() {
        let flaky = FlakyStorage::new();
        let storage: Arc<dyn Storage> = flaky.clone();
        let client = ScriptedClient::new(Vec::new());
        let mut service = ChatService::load(storage, client, ServiceConfig::default()).await;
        service.create_session(Some("Sync test".into()), None).await;

        flaky.fail_writes(true);
        service.sync_now().await;
        assert_eq!(service.queue().len(), 1);
        assert!(matches!(
            service.queue().items().next().unwrap().kind,
            QueueItemKind::Sync
        ));

        flaky.fail_writes(false);
        let report = service.drain_queue().await;
        assert_eq!(report.delivered, 1);
        assert!(service.queue().is_empty());
    }

    #[tokio::test]
    async fn malformed_queued_payload_is_a_delivery_error() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut store = SessionStore::new(storage);
        let client = ScriptedClient::new(Vec::new());
        let item = QueueItem::new(QueueItemKind::Chat, serde_json::json!({ "bogus": true }));

        let err = deliver_item(&mut store, client.as_ref(), item)
            .await
            .unwrap_err();

        assert!(err.0.contains("payload"));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn guard_warning_is_surfaced_and_audited_once() {
        let client = ScriptedClient::new(Vec::new());
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let config = ServiceConfig {
            guard: Some(GuardConfig {
                timeout: chrono::Duration::zero(),
                grace: chrono::Duration::minutes(5),
            }),
            ..ServiceConfig::default()
        };
        let mut service = ChatService::load(storage, client, config).await;

        let signal = service.note_activity(ActivityKind::Key).await;

        assert_eq!(signal, Some(GuardSignal::TimeoutWarning));
        let warnings = service
            .audit_log()
            .entries()
            .filter(|e| e.action == AuditAction::TimeoutWarning)
            .count();
        assert_eq!(warnings, 1);
    }

    #[tokio::test]
    async fn forced_logout_expires_the_guard_until_reset() {
        let client = ScriptedClient::new(Vec::new());
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let config = ServiceConfig {
            guard: Some(GuardConfig {
                timeout: chrono::Duration::zero(),
                grace: chrono::Duration::zero(),
            }),
            ..ServiceConfig::default()
        };
        let mut service = ChatService::load(storage, client, config).await;

        let signal = service.note_activity(ActivityKind::Pointer).await;

        assert_eq!(signal, Some(GuardSignal::ForcedLogout));
        assert!(service.guard().is_expired());
        let actions: Vec<AuditAction> =
            service.audit_log().entries().map(|e| e.action).collect();
        assert!(actions.contains(&AuditAction::ForcedLogout));

        service.reset_guard();
        assert!(!service.guard().is_expired());
    }

    #[tokio::test]
    async fn untitled_session_from_create_keeps_the_default_title() {
        let client = ScriptedClient::new(Vec::new());
        let mut service = service_with(client).await;

        let id = service.create_session(None, None).await;

        assert_eq!(service.store().session(id).unwrap().title, DEFAULT_TITLE);
    }
}
