//! Abstract storage traits for checkwarden.
//!
//! The durable store is an external collaborator. These traits define the
//! narrow contract the processor relies on:
//! - list-backed queues with plain, archiving and blocking pops
//! - hash counters updated in atomic multi-operation batches
//! - TTL-based key expiry, set inside batches
//! - check and entity records
//!
//! Store handles are passed explicitly; there is no process-wide client.

use std::time::Duration;

use thiserror::Error;

use crate::check::{Check, CheckKey};
use crate::entity::Entity;
use crate::error::ValidationError;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection failed or was lost.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Record referenced by an operation does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A record failed validation on save.
    #[error("Invalid record: {0}")]
    Invalid(#[from] ValidationError),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// One operation in an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BatchOp {
    /// Increment a hash field; replies with the new value.
    HashIncr { key: String, field: String, by: i64 },
    /// Set a hash field; replies with 0.
    HashSet { key: String, field: String, value: i64 },
    /// Set a key's time to live; replies with 1 if the key exists, else 0.
    Expire { key: String, ttl: Duration },
}

/// Ordered operations applied atomically: no other client observes a partial
/// batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    /// An empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a hash increment. Returns the index of its reply.
    pub fn hash_incr(&mut self, key: impl Into<String>, field: impl Into<String>, by: i64) -> usize {
        self.push(BatchOp::HashIncr {
            key: key.into(),
            field: field.into(),
            by,
        })
    }

    /// Queue a hash field assignment. Returns the index of its reply.
    pub fn hash_set(&mut self, key: impl Into<String>, field: impl Into<String>, value: i64) -> usize {
        self.push(BatchOp::HashSet {
            key: key.into(),
            field: field.into(),
            value,
        })
    }

    /// Queue an expiry. Returns the index of its reply.
    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) -> usize {
        self.push(BatchOp::Expire { key: key.into(), ttl })
    }

    fn push(&mut self, op: BatchOp) -> usize {
        self.ops.push(op);
        self.ops.len() - 1
    }

    /// Queued operations, in order.
    #[must_use]
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// True if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The queued operations.
    #[must_use]
    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Queue, counter and expiry primitives.
///
/// # Queue semantics
/// Producers push onto the head of a list; consumers pop from the tail, so
/// each list behaves as a FIFO. A pop hands a payload to exactly one caller.
pub trait StateStore: Send + Sync {
    /// Pop the oldest payload, if any.
    fn pop(&self, queue: &str) -> Result<Option<String>, StoreError>;

    /// Atomically move the oldest payload onto `archive` and return it, then
    /// set the archive's time to live. The payload is always in exactly one
    /// of the two lists.
    fn pop_and_archive(
        &self,
        queue: &str,
        archive: &str,
        ttl: Duration,
    ) -> Result<Option<String>, StoreError>;

    /// Pop the oldest payload, waiting up to `timeout` for one to arrive.
    fn blocking_pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>, StoreError>;

    /// Push a payload onto a queue.
    fn push(&self, queue: &str, payload: &str) -> Result<(), StoreError>;

    /// Number of payloads waiting on a queue.
    fn queue_len(&self, queue: &str) -> Result<usize, StoreError>;

    /// Read an integer hash field.
    fn hash_get(&self, key: &str, field: &str) -> Result<Option<i64>, StoreError>;

    /// Apply a batch atomically, returning one reply per operation.
    fn execute(&self, batch: Batch) -> Result<Vec<i64>, StoreError>;

    /// Release this handle's connection. Must be safe to call more than once.
    /// Other handles to the same backend stay connected.
    fn disconnect(&self) -> Result<(), StoreError>;
}

/// Storage trait for check records.
pub trait CheckStore: Send + Sync {
    /// Get a check by entity and check name.
    fn find(&self, key: &CheckKey) -> Result<Option<Check>, StoreError>;

    /// Insert or replace a check. Fails with `StoreError::Invalid` if the
    /// check does not validate (e.g. it has no state yet).
    fn save(&self, check: &Check) -> Result<(), StoreError>;
}

/// Storage trait for entity records.
pub trait EntityStore: Send + Sync {
    /// Get an entity by its unique name.
    fn find_by_name(&self, name: &str) -> Result<Option<Entity>, StoreError>;

    /// Insert a new entity. Returns `false`, leaving the stored record alone,
    /// if the name already exists.
    fn insert(&self, entity: Entity) -> Result<bool, StoreError>;

    /// Append a check to an entity's check list.
    fn add_check(&self, entity: &str, key: &CheckKey) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure traits are object-safe
    fn _assert_state_store_object_safe(_: &dyn StateStore) {}
    fn _assert_check_store_object_safe(_: &dyn CheckStore) {}
    fn _assert_entity_store_object_safe(_: &dyn EntityStore) {}

    #[test]
    fn test_batch_reply_indices() {
        let mut batch = Batch::new();
        assert!(batch.is_empty());
        let all = batch.hash_incr("event_counters", "all", 1);
        let set = batch.hash_set("event_counters:x", "ok", 0);
        let exp = batch.expire("event_counters:x", Duration::from_secs(60));
        assert_eq!((all, set, exp), (0, 1, 2));
        assert_eq!(batch.ops().len(), 3);
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Connection("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));

        let err: StoreError = ValidationError::MissingState {
            check: "a:b".to_string(),
        }
        .into();
        assert!(err.to_string().contains("a:b"));
    }
}
