//! Storage layer for checkwarden.
//!
//! The traits define the narrow interface over the external store. The
//! in-memory backend is the reference implementation used by tests and
//! embedded setups; the redis backend (feature `redis`) is the production
//! store shared by processor instances.

mod memory;
#[cfg(feature = "redis")]
mod redis_store;
mod traits;

pub use memory::InMemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use traits::{Batch, BatchOp, CheckStore, EntityStore, StateStore, StoreError};
