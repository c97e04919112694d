//! Durable key-value storage for client-side credentials.
//!
//! [`RedbStore`] persists across restarts, [`MemoryStore`] lives as long as
//! the process, and [`Namespaced`] scopes either of them to one server origin.

pub mod error;
pub mod memory;
pub mod namespace;
pub mod redb;
pub mod traits;

pub use error::KVError;
pub use memory::MemoryStore;
pub use namespace::{origin_namespace, Namespaced};
pub use redb::RedbStore;
pub use traits::KVStore;
