//! Storage abstraction and implementations for lessonflow.
//!
//! This crate provides a transactional, trait-based storage interface with
//! an in-memory reference implementation and a SQLite backend.

#![warn(missing_docs)]

pub mod trait_;
pub mod memory_storage;
#[cfg(feature = "sqlite")]
pub mod sqlite_storage;

pub use trait_::{Storage, StorageError, Result, Transaction};
pub use memory_storage::{MemoryStorage, MemoryTransaction};
#[cfg(feature = "sqlite")]
pub use sqlite_storage::{SqliteStorage, SqliteTransaction};
