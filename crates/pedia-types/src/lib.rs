//! Shared types and error hierarchy for Pedia.

pub mod chat;
pub mod completion;
pub mod error;
pub mod message;
pub mod util;

pub use chat::{ChatRequest, ChatResponse, MedicalContext, MedicalUnit, ResponseStyle};
pub use completion::ChatCompletion;
pub use error::{ApiError, ConfigError, PediaError};
pub use message::{Citation, ContentBlock, EvidenceLevel, Message, MessagePatch, Role};
