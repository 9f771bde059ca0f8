//! Key-value persistence layer for Pedia state.

mod error;
mod file;
mod kv;
mod memory;

pub use error::StorageError;
pub use file::FileStorage;
pub use kv::{Storage, read_json, slot, write_json};
pub use memory::MemoryStorage;
