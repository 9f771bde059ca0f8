//! Conversation message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Strength of the evidence backing an assistant answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvidenceLevel {
    High,
    Moderate,
    Low,
    ExpertOpinion,
}

/// A reference to source material backing part of an assistant answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub id: String,
    pub source: String,
    pub title: String,
    pub excerpt: String,
    /// Match strength in `[0, 1]`.
    pub relevance_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A block of content within a message.
///
/// Assistant answers mix prose with inline references, dose calculations,
/// and safety warnings; each block kind carries only its own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Citation {
        citation: Citation,
    },
    Calculation {
        description: String,
        result: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },
    Warning {
        text: String,
    },
}

impl ContentBlock {
    /// Create a text block.
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }
}

/// One turn in a conversation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: Vec<ContentBlock>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_level: Option<EvidenceLevel>,
    /// Set when the turn failed; the message then carries no answer content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Message {
    /// Create a message with a single text block and a fresh id.
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: vec![ContentBlock::text(text)],
            timestamp: Utc::now(),
            citations: Vec::new(),
            evidence_level: None,
            error: None,
        }
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Create an assistant message that records a failed turn.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content: Vec::new(),
            timestamp: Utc::now(),
            citations: Vec::new(),
            evidence_level: None,
            error: Some(error.into()),
        }
    }

    /// The first text block, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }

    /// All text-bearing blocks joined with newlines.
    ///
    /// Warnings count as text; citation and calculation blocks do not.
    pub fn text(&self) -> String {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } | ContentBlock::Warning { text } => {
                    Some(text.as_str())
                }
                _ => None,
            })
            .collect();
        parts.join("\n")
    }

    /// Apply a partial update. Absent fields are left untouched.
    pub fn apply(&mut self, patch: MessagePatch) {
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(citations) = patch.citations {
            self.citations = citations;
        }
        if let Some(level) = patch.evidence_level {
            self.evidence_level = Some(level);
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }
    }
}

/// Partial update to an existing message.
#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    pub content: Option<Vec<ContentBlock>>,
    pub citations: Option<Vec<Citation>>,
    pub evidence_level: Option<EvidenceLevel>,
    pub error: Option<String>,
}

impl MessagePatch {
    /// Patch that replaces the content blocks.
    pub fn content(blocks: Vec<ContentBlock>) -> Self {
        Self {
            content: Some(blocks),
            ..Self::default()
        }
    }

    /// Patch that marks the message as failed.
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}
