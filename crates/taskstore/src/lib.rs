//! Storage backends for the task engine
//!
//! Both backends implement [`taskcore::StorageProvider`] and serialize their
//! multi-row writes through a shared [`WriteLock`].

mod lock;
mod memory;
mod sqlite;

pub use lock::WriteLock;
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;
