//! Session data types.

use chrono::{DateTime, Utc};
use pedia_types::util::{truncate_chars, truncate_str};
use pedia_types::{MedicalContext, Message, Role};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Title given to a session before the first question arrives.
pub const DEFAULT_TITLE: &str = "New conversation";

/// Character cap for titles derived from the first question.
pub const TITLE_MAX_CHARS: usize = 50;

/// A titled, ordered conversation between a user and the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medical_context: Option<MedicalContext>,
}

impl Session {
    /// Create a new empty session.
    pub fn new(title: Option<String>, medical_context: Option<MedicalContext>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            is_pinned: false,
            tags: BTreeSet::new(),
            medical_context,
        }
    }

    /// Short hex prefix of the session ID for display.
    pub fn short_id(&self) -> String {
        self.id.to_string()[..8].to_string()
    }

    /// Bump `updated_at`, never moving it backwards.
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// Derive the title from the opening question.
    ///
    /// Applies only when the session holds exactly one message and that
    /// message is from the user; later messages never retitle.
    pub fn auto_title(&mut self) {
        if self.messages.len() != 1 {
            return;
        }
        let first = &self.messages[0];
        if first.role != Role::User {
            return;
        }
        if let Some(text) = first.first_text() {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return;
            }
            let clipped = truncate_chars(trimmed, TITLE_MAX_CHARS);
            self.title = if clipped.len() < trimmed.len() {
                format!("{clipped}...")
            } else {
                clipped.to_string()
            };
        }
    }

    /// Generate a preview string from the first user message.
    pub fn preview(&self) -> String {
        for msg in &self.messages {
            if msg.role == Role::User {
                if let Some(text) = msg.first_text() {
                    let trimmed = text.trim();
                    if trimmed.len() > 80 {
                        return format!("{}...", truncate_str(trimmed, 77));
                    }
                    return trimmed.to_string();
                }
            }
        }
        String::new()
    }

    /// Build a summary for listing.
    pub fn to_summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            title: self.title.clone(),
            message_count: self.messages.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            is_pinned: self.is_pinned,
            preview: self.preview(),
        }
    }
}

/// Lightweight summary for session listing.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: Uuid,
    pub title: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_pinned: bool,
    pub preview: String,
}

impl SessionSummary {
    /// Short hex prefix of the session ID for display.
    pub fn short_id(&self) -> String {
        self.id.to_string()[..8].to_string()
    }

    /// Human-readable age string (e.g. "2h ago", "3d ago").
    pub fn age(&self) -> String {
        let duration = Utc::now() - self.updated_at;
        let minutes = duration.num_minutes();
        if minutes < 1 {
            "just now".to_string()
        } else if minutes < 60 {
            format!("{minutes}m ago")
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}
