//! Service-layer orchestration for Pedia: the chat pipeline, offline
//! delivery, idle-session enforcement, and audit trail behind one type.

mod service;

pub use service::{ChatReply, ChatService, SendOptions, SendOutcome, ServiceConfig};
