//! Bounded, append-only audit log of user actions.

use chrono::{DateTime, Utc};
use pedia_storage::{Storage, read_json, slot, write_json};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// How many entries the log keeps by default.
pub const DEFAULT_AUDIT_CAPACITY: usize = 100;

/// A tracked user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    SessionCreated,
    SessionDeleted,
    SessionsCleared,
    SessionExported,
    SessionImported,
    MessageSent,
    ResponseReceived,
    ResponseFailed,
    OfflineEnqueued,
    QueueDrained,
    TimeoutWarning,
    ForcedLogout,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionCreated => write!(f, "session_created"),
            Self::SessionDeleted => write!(f, "session_deleted"),
            Self::SessionsCleared => write!(f, "sessions_cleared"),
            Self::SessionExported => write!(f, "session_exported"),
            Self::SessionImported => write!(f, "session_imported"),
            Self::MessageSent => write!(f, "message_sent"),
            Self::ResponseReceived => write!(f, "response_received"),
            Self::ResponseFailed => write!(f, "response_failed"),
            Self::OfflineEnqueued => write!(f, "offline_enqueued"),
            Self::QueueDrained => write!(f, "queue_drained"),
            Self::TimeoutWarning => write!(f, "timeout_warning"),
            Self::ForcedLogout => write!(f, "forced_logout"),
        }
    }
}

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// In-memory audit trail, bounded by FIFO eviction.
///
/// Recording can never fail; persistence is a separate best-effort step
/// whose failures go to the diagnostic log only. This log exists for
/// compliance review, so a full or broken store must never take the
/// application down with it.
pub struct AuditLog {
    entries: VecDeque<AuditEntry>,
    capacity: usize,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLog {
    /// Log with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }

    /// Log bounded at `capacity` entries (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Log hydrated from the `audit-log` slot.
    ///
    /// A missing, unreadable, or corrupt slot degrades to an empty log.
    /// An oversized slot keeps only the newest entries.
    pub async fn load(storage: &dyn Storage, capacity: usize) -> Self {
        let mut log = Self::with_capacity(capacity);
        match read_json::<Vec<AuditEntry>>(storage, slot::AUDIT_LOG).await {
            Ok(Some(entries)) => {
                for entry in entries {
                    log.push(entry);
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Failed to load audit log, starting empty: {e}");
            }
        }
        log
    }

    /// Record an action. Never fails.
    pub fn record(&mut self, action: AuditAction, session_id: Option<Uuid>) {
        self.push(AuditEntry {
            timestamp: Utc::now(),
            action,
            session_id,
            details: None,
        });
    }

    /// Record an action with contextual details. Never fails.
    pub fn record_with(
        &mut self,
        action: AuditAction,
        session_id: Option<Uuid>,
        details: serde_json::Value,
    ) {
        self.push(AuditEntry {
            timestamp: Utc::now(),
            action,
            session_id,
            details: Some(details),
        });
    }

    fn push(&mut self, entry: AuditEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Entries oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Write the log to its slot, best effort.
    ///
    /// Failures are swallowed after a diagnostic warning; callers never
    /// see them.
    pub async fn flush(&self, storage: &dyn Storage) {
        let entries: Vec<&AuditEntry> = self.entries.iter().collect();
        if let Err(e) = write_json(storage, slot::AUDIT_LOG, &entries).await {
            tracing::warn!("Failed to flush audit log, entries stay in memory: {e}");
        }
    }
}
