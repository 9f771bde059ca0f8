//! Trait for chat-completion backends.

use crate::{ApiError, ChatRequest, ChatResponse};
use std::future::Future;
use std::pin::Pin;

/// A backend that answers medical questions.
///
/// Dyn-compatible so services work with `Arc<dyn ChatCompletion>`; the
/// production implementation speaks HTTP, tests script outcomes in memory.
pub trait ChatCompletion: Send + Sync {
    /// Answer one question.
    fn complete<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChatResponse, ApiError>> + Send + 'a>>;

    /// Backend name for logging/display (e.g., "http").
    fn name(&self) -> &str;
}
