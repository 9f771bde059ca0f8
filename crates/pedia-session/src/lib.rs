//! Conversation sessions and their store for Pedia.

pub mod error;
pub mod export;
pub mod search;
pub mod store;
pub mod types;

pub use error::SessionError;
pub use export::{EXPORT_FORMAT_VERSION, SessionExport};
pub use search::{MatchField, SearchHit};
pub use store::{DEFAULT_MESSAGE_CAP, SessionStore};
pub use types::{DEFAULT_TITLE, Session, SessionSummary, TITLE_MAX_CHARS};
