//! File-backed storage. Each slot is a JSON file in one directory.

use crate::error::StorageError;
use crate::kv::Storage;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

/// Stores each slot as `<root>/<slot>.json`.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Create a store, ensuring the root directory exists.
    pub async fn new(root: PathBuf) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Map a slot name to its file path.
    ///
    /// Slot names are restricted to lowercase ASCII, digits, and hyphens
    /// so they can never escape the root directory.
    fn slot_path(&self, slot: &str) -> Result<PathBuf, StorageError> {
        let valid = !slot.is_empty()
            && slot
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !valid {
            return Err(StorageError::InvalidSlot {
                name: slot.to_string(),
            });
        }
        Ok(self.root.join(format!("{slot}.json")))
    }

    async fn get_inner(&self, slot: &str) -> Result<Option<String>, StorageError> {
        let path = self.slot_path(slot)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomic write: .tmp → rename.
    async fn put_inner(&self, slot: &str, value: &str) -> Result<(), StorageError> {
        let path = self.slot_path(slot)?;
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, value).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn remove_inner(&self, slot: &str) -> Result<(), StorageError> {
        let path = self.slot_path(slot)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Storage for FileStorage {
    fn get<'a>(
        &'a self,
        slot: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, StorageError>> + Send + 'a>> {
        Box::pin(self.get_inner(slot))
    }

    fn put<'a>(
        &'a self,
        slot: &'a str,
        value: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + 'a>> {
        Box::pin(self.put_inner(slot, value))
    }

    fn remove<'a>(
        &'a self,
        slot: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + 'a>> {
        Box::pin(self.remove_inner(slot))
    }
}
