//! On-demand search over session messages.

use crate::types::Session;
use pedia_types::{Citation, ContentBlock, Message};
use uuid::Uuid;

/// Which part of a message matched the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchField {
    Content,
    CitationTitle,
    CitationExcerpt,
}

/// One search result: a message plus enough session context to show it.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub session_id: Uuid,
    pub session_title: String,
    pub message: Message,
    pub matched: MatchField,
}

/// Case-insensitive substring search across message text and citation
/// title/excerpt. Results are ordered by message timestamp, newest first.
///
/// A blank query matches nothing.
pub fn search_sessions(sessions: &[Session], query: &str) -> Vec<SearchHit> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    let mut hits = Vec::new();
    for session in sessions {
        for message in &session.messages {
            if let Some(matched) = match_message(message, &needle) {
                hits.push(SearchHit {
                    session_id: session.id,
                    session_title: session.title.clone(),
                    message: message.clone(),
                    matched,
                });
            }
        }
    }
    hits.sort_by(|a, b| b.message.timestamp.cmp(&a.message.timestamp));
    hits
}

fn match_message(message: &Message, needle: &str) -> Option<MatchField> {
    if message.text().to_lowercase().contains(needle) {
        return Some(MatchField::Content);
    }
    for citation in all_citations(message) {
        if citation.title.to_lowercase().contains(needle) {
            return Some(MatchField::CitationTitle);
        }
        if citation.excerpt.to_lowercase().contains(needle) {
            return Some(MatchField::CitationExcerpt);
        }
    }
    None
}

/// Message-level citations plus any carried inline as content blocks.
fn all_citations(message: &Message) -> impl Iterator<Item = &Citation> {
    let inline = message.content.iter().filter_map(|block| match block {
        ContentBlock::Citation { citation } => Some(citation),
        _ => None,
    });
    message.citations.iter().chain(inline)
}
