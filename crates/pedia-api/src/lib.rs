//! HTTP chat-completion client with retry/backoff for Pedia.

mod client;
mod retry;

pub use client::HttpChatClient;
pub use retry::RetryConfig;
