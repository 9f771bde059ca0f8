//! Request and response types for the chat-completion service.

use serde::{Deserialize, Serialize};

use crate::{Citation, ContentBlock, EvidenceLevel, Message, Role};
use chrono::Utc;
use uuid::Uuid;

/// How thorough the assistant's answer should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseStyle {
    Concise,
    Detailed,
    EvidenceHeavy,
}

/// Patient context attached to a question.
///
/// Everything is optional; the service answers generically when no
/// context is given.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_months: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height_cm: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allergies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A quantity the assistant mentioned, with its unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalUnit {
    pub name: String,
    pub value: f64,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_range: Option<String>,
}

/// A question sent to the chat-completion service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<MedicalContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_evidence: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_style: Option<ResponseStyle>,
}

impl ChatRequest {
    /// Request with just a message, no context or style.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: None,
            context: None,
            include_evidence: None,
            response_style: None,
        }
    }
}

/// An answer from the chat-completion service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub message: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub evidence_level: Option<EvidenceLevel>,
    #[serde(default)]
    pub medical_units: Vec<MedicalUnit>,
    pub session_id: Uuid,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl ChatResponse {
    /// Build the assistant message this answer represents.
    pub fn to_message(&self) -> Message {
        Message {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content: vec![ContentBlock::text(self.message.clone())],
            timestamp: Utc::now(),
            citations: self.citations.clone(),
            evidence_level: self.evidence_level,
            error: None,
        }
    }
}
