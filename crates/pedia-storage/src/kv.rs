//! Key-value storage trait and typed slot helpers.

use crate::error::StorageError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;

/// Named slots this application persists.
pub mod slot {
    /// Session collection and current-session pointer.
    pub const SESSIONS: &str = "session-store";
    /// User preferences and profile.
    pub const USER: &str = "user-store";
    /// Actions awaiting delivery.
    pub const OFFLINE_QUEUE: &str = "offline-queue";
    /// Bounded audit trail.
    pub const AUDIT_LOG: &str = "audit-log";
}

/// Persisted key-value storage over named slots.
///
/// Dyn-compatible so services take `Arc<dyn Storage>`; backends decide
/// where a slot lives (a JSON file, a browser store, a test map).
pub trait Storage: Send + Sync {
    /// Read a slot. `None` when the slot has never been written.
    fn get<'a>(
        &'a self,
        slot: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, StorageError>> + Send + 'a>>;

    /// Write a slot, replacing any previous value.
    fn put<'a>(
        &'a self,
        slot: &'a str,
        value: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + 'a>>;

    /// Delete a slot. No-op when absent.
    fn remove<'a>(
        &'a self,
        slot: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + 'a>>;
}

/// Read and deserialize a slot.
pub async fn read_json<T: DeserializeOwned>(
    storage: &dyn Storage,
    slot: &str,
) -> Result<Option<T>, StorageError> {
    match storage.get(slot).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Serialize and write a slot.
pub async fn write_json<T: Serialize>(
    storage: &dyn Storage,
    slot: &str,
    value: &T,
) -> Result<(), StorageError> {
    let json = serde_json::to_string(value)?;
    storage.put(slot, &json).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn storage_is_dyn_compatible() {
        // Compile-time check: Storage can be used as a trait object.
        fn _accept(_s: &dyn Storage) {}
    }

    #[test]
    fn arc_storage_is_send_sync() {
        fn _assert_send_sync<T: Send + Sync>() {}
        _assert_send_sync::<Arc<dyn Storage>>();
    }
}
