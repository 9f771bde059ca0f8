//! Session export and import.

use crate::error::SessionError;
use crate::types::Session;
use chrono::{DateTime, Utc};
use pedia_types::{MedicalContext, Message};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Bumped when the exported shape changes incompatibly.
pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// The serialized form: session fields flattened next to the envelope.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionExport {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    #[serde(flatten)]
    pub session: Session,
}

/// Serialize a session for export.
pub fn export_json(session: &Session) -> Result<String, SessionError> {
    let export = SessionExport {
        format_version: EXPORT_FORMAT_VERSION,
        exported_at: Utc::now(),
        session: session.clone(),
    };
    Ok(serde_json::to_string_pretty(&export)?)
}

/// Parse an import payload into a fresh session.
///
/// Only two fields are required of the payload: an `id` and an
/// array-typed `messages`. Everything else is optional and tolerated.
/// The returned session gets a NEW id and fresh timestamps so it can
/// never collide with an existing session, and its title is suffixed
/// with `" (Imported)"`.
pub fn parse_import(payload: &str) -> Result<Session, SessionError> {
    let value: serde_json::Value =
        serde_json::from_str(payload).map_err(|e| SessionError::Validation {
            message: format!("payload is not valid JSON: {e}"),
        })?;
    let obj = value.as_object().ok_or_else(|| validation("payload is not a JSON object"))?;

    if !obj.contains_key("id") {
        return Err(validation("payload has no id"));
    }
    let messages_value = obj
        .get("messages")
        .ok_or_else(|| validation("payload has no messages field"))?;
    if !messages_value.is_array() {
        return Err(validation("messages is not an array"));
    }
    let messages: Vec<Message> =
        serde_json::from_value(messages_value.clone()).map_err(|e| SessionError::Validation {
            message: format!("messages are malformed: {e}"),
        })?;

    let title = obj
        .get("title")
        .and_then(|t| t.as_str())
        .unwrap_or("Untitled");
    let tags: BTreeSet<String> = obj
        .get("tags")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    let medical_context: Option<MedicalContext> = obj
        .get("medicalContext")
        .and_then(|v| serde_json::from_value(v.clone()).ok());

    let now = Utc::now();
    Ok(Session {
        id: Uuid::new_v4(),
        title: format!("{title} (Imported)"),
        messages,
        created_at: now,
        updated_at: now,
        is_pinned: false,
        tags,
        medical_context,
    })
}

fn validation(message: &str) -> SessionError {
    SessionError::Validation {
        message: message.to_string(),
    }
}
