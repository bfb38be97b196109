//! In-memory storage backend.
//!
//! This module provides a thread-safe in-memory implementation of the storage
//! traits. It is intended for embedded usage, tests, and as a reference
//! implementation of the queue and batch semantics.
//!
//! An [`InMemoryStore`] is one connection to a keyspace. Further connections
//! to the same keyspace come from [`InMemoryStore::new_connection`]; each one
//! is disconnected on its own, like separate clients of a shared server.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::check::{Check, CheckKey};
use crate::entity::Entity;
use crate::storage::traits::{Batch, BatchOp, CheckStore, EntityStore, StateStore, StoreError};

fn lock_err(context: &'static str) -> StoreError {
    StoreError::Backend(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct StoreState {
    lists: HashMap<String, VecDeque<String>>,
    hashes: HashMap<String, HashMap<String, i64>>,
    expiries: HashMap<String, Instant>,
    checks: HashMap<CheckKey, Check>,
    entities: HashMap<String, Entity>,
    unavailable: bool,
    disconnects: usize,
}

impl StoreState {
    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Connection("store unavailable".to_string()));
        }
        Ok(())
    }

    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .expiries
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.expiries.remove(&key);
            self.lists.remove(&key);
            self.hashes.remove(&key);
        }
    }

    fn key_exists(&self, key: &str) -> bool {
        self.lists.get(key).is_some_and(|l| !l.is_empty()) || self.hashes.contains_key(key)
    }

    fn pop_tail(&mut self, queue: &str) -> Option<String> {
        let list = self.lists.get_mut(queue)?;
        let value = list.pop_back();
        if list.is_empty() {
            self.lists.remove(queue);
            self.expiries.remove(queue);
        }
        value
    }

    fn set_expiry(&mut self, key: &str, ttl: Duration, now: Instant) -> bool {
        if !self.key_exists(key) {
            return false;
        }
        self.expiries.insert(key.to_string(), now + ttl);
        true
    }
}

/// The keyspace every connection shares.
#[derive(Debug, Default)]
struct Keyspace {
    state: Mutex<StoreState>,
    activity: Condvar,
}

/// Thread-safe in-memory store implementing every storage trait.
///
/// A single mutex guards all keys, so every operation (and every batch) is
/// atomic with respect to other callers. Blocking pops park on a condition
/// variable that is signalled by every push.
#[derive(Debug)]
pub struct InMemoryStore {
    keyspace: Arc<Keyspace>,
    connected: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            keyspace: Arc::new(Keyspace::default()),
            connected: AtomicBool::new(true),
        }
    }
}

impl InMemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open another connection to the same keyspace.
    #[must_use]
    pub fn new_connection(&self) -> Self {
        Self {
            keyspace: Arc::clone(&self.keyspace),
            connected: AtomicBool::new(true),
        }
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Connection("store disconnected".to_string()))
        }
    }

    fn lock(&self, context: &'static str) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        let mut state = self.keyspace.state.lock().map_err(|_| lock_err(context))?;
        self.ensure_connected()?;
        state.ensure_available()?;
        state.purge_expired(Instant::now());
        Ok(state)
    }

    fn peek(&self) -> Option<MutexGuard<'_, StoreState>> {
        let mut state = self.keyspace.state.lock().ok()?;
        state.purge_expired(Instant::now());
        Some(state)
    }

    /// Simulate losing (or regaining) the connection to the store.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut state) = self.keyspace.state.lock() {
            state.unavailable = unavailable;
        }
        self.keyspace.activity.notify_all();
    }

    /// Payloads on a list, oldest first.
    #[must_use]
    pub fn list(&self, key: &str) -> Vec<String> {
        self.peek()
            .and_then(|state| {
                state
                    .lists
                    .get(key)
                    .map(|l| l.iter().rev().cloned().collect())
            })
            .unwrap_or_default()
    }

    /// Keys of all non-empty lists starting with `prefix`.
    #[must_use]
    pub fn list_keys(&self, prefix: &str) -> Vec<String> {
        let Some(state) = self.peek() else {
            return Vec::new();
        };
        let mut keys: Vec<String> = state
            .lists
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Snapshot of a hash.
    #[must_use]
    pub fn hash(&self, key: &str) -> HashMap<String, i64> {
        self.peek()
            .and_then(|state| state.hashes.get(key).cloned())
            .unwrap_or_default()
    }

    /// Remaining time to live of a key, if one is set.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let state = self.peek()?;
        let now = Instant::now();
        state
            .expiries
            .get(key)
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// How many times `disconnect` has been called on any connection to
    /// this keyspace.
    #[must_use]
    pub fn disconnect_count(&self) -> usize {
        self.keyspace
            .state
            .lock()
            .map(|s| s.disconnects)
            .unwrap_or_default()
    }

    /// False once this connection has been disconnected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl StateStore for InMemoryStore {
    fn pop(&self, queue: &str) -> Result<Option<String>, StoreError> {
        let mut state = self.lock("state.pop")?;
        Ok(state.pop_tail(queue))
    }

    fn pop_and_archive(
        &self,
        queue: &str,
        archive: &str,
        ttl: Duration,
    ) -> Result<Option<String>, StoreError> {
        let mut state = self.lock("state.pop_and_archive")?;
        let Some(payload) = state.pop_tail(queue) else {
            return Ok(None);
        };
        state
            .lists
            .entry(archive.to_string())
            .or_default()
            .push_front(payload.clone());
        state.set_expiry(archive, ttl, Instant::now());
        Ok(Some(payload))
    }

    fn blocking_pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>, StoreError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock("state.blocking_pop")?;
        loop {
            if let Some(payload) = state.pop_tail(queue) {
                return Ok(Some(payload));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let (guard, _) = self
                .keyspace
                .activity
                .wait_timeout(state, deadline - now)
                .map_err(|_| lock_err("state.blocking_pop"))?;
            state = guard;
            self.ensure_connected()?;
            state.ensure_available()?;
            state.purge_expired(Instant::now());
        }
    }

    fn push(&self, queue: &str, payload: &str) -> Result<(), StoreError> {
        {
            let mut state = self.lock("state.push")?;
            state
                .lists
                .entry(queue.to_string())
                .or_default()
                .push_front(payload.to_string());
        }
        self.keyspace.activity.notify_all();
        Ok(())
    }

    fn queue_len(&self, queue: &str) -> Result<usize, StoreError> {
        let state = self.lock("state.queue_len")?;
        Ok(state.lists.get(queue).map_or(0, VecDeque::len))
    }

    fn hash_get(&self, key: &str, field: &str) -> Result<Option<i64>, StoreError> {
        let state = self.lock("state.hash_get")?;
        Ok(state.hashes.get(key).and_then(|h| h.get(field)).copied())
    }

    fn execute(&self, batch: Batch) -> Result<Vec<i64>, StoreError> {
        let mut state = self.lock("state.execute")?;
        let now = Instant::now();
        let mut replies = Vec::with_capacity(batch.ops().len());
        for op in batch.into_ops() {
            let reply = match op {
                BatchOp::HashIncr { key, field, by } => {
                    let value = state.hashes.entry(key).or_default().entry(field).or_insert(0);
                    *value += by;
                    *value
                }
                BatchOp::HashSet { key, field, value } => {
                    state.hashes.entry(key).or_default().insert(field, value);
                    0
                }
                BatchOp::Expire { key, ttl } => i64::from(state.set_expiry(&key, ttl, now)),
            };
            replies.push(reply);
        }
        Ok(replies)
    }

    fn disconnect(&self) -> Result<(), StoreError> {
        {
            let mut state = self
                .keyspace
                .state
                .lock()
                .map_err(|_| lock_err("state.disconnect"))?;
            self.connected.store(false, Ordering::SeqCst);
            state.disconnects += 1;
        }
        self.keyspace.activity.notify_all();
        Ok(())
    }
}

impl CheckStore for InMemoryStore {
    fn find(&self, key: &CheckKey) -> Result<Option<Check>, StoreError> {
        let state = self.lock("check.find")?;
        Ok(state.checks.get(key).cloned())
    }

    fn save(&self, check: &Check) -> Result<(), StoreError> {
        check.validate()?;
        let mut state = self.lock("check.save")?;
        state.checks.insert(check.key.clone(), check.clone());
        Ok(())
    }
}

impl EntityStore for InMemoryStore {
    fn find_by_name(&self, name: &str) -> Result<Option<Entity>, StoreError> {
        let state = self.lock("entity.find_by_name")?;
        Ok(state.entities.get(name).cloned())
    }

    fn insert(&self, entity: Entity) -> Result<bool, StoreError> {
        let mut state = self.lock("entity.insert")?;
        if state.entities.contains_key(&entity.name) {
            return Ok(false);
        }
        state.entities.insert(entity.name.clone(), entity);
        Ok(true)
    }

    fn add_check(&self, entity: &str, key: &CheckKey) -> Result<(), StoreError> {
        let mut state = self.lock("entity.add_check")?;
        let record = state
            .entities
            .get_mut(entity)
            .ok_or_else(|| StoreError::NotFound(format!("entity {entity}")))?;
        record.add_check(key.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use chrono::Utc;

    use super::*;
    use crate::check::{StateLabel, StateReport};

    #[test]
    fn queue_is_fifo() {
        let store = InMemoryStore::new();
        store.push("events", "a").unwrap();
        store.push("events", "b").unwrap();
        assert_eq!(store.queue_len("events").unwrap(), 2);
        assert_eq!(store.list("events"), vec!["a", "b"]);

        assert_eq!(store.pop("events").unwrap().as_deref(), Some("a"));
        assert_eq!(store.pop("events").unwrap().as_deref(), Some("b"));
        assert_eq!(store.pop("events").unwrap(), None);
        assert_eq!(store.queue_len("events").unwrap(), 0);
    }

    #[test]
    fn pop_and_archive_moves_exactly_once() {
        let store = InMemoryStore::new();
        store.push("events", "a").unwrap();
        store.push("events", "b").unwrap();

        let popped = store
            .pop_and_archive("events", "events_archive:x", Duration::from_secs(60))
            .unwrap();
        assert_eq!(popped.as_deref(), Some("a"));
        assert_eq!(store.list("events"), vec!["b"]);
        assert_eq!(store.list("events_archive:x"), vec!["a"]);
        assert!(store.ttl("events_archive:x").is_some());

        assert_eq!(
            store
                .pop_and_archive("events", "events_archive:x", Duration::from_secs(60))
                .unwrap()
                .as_deref(),
            Some("b")
        );
        assert_eq!(
            store
                .pop_and_archive("events", "events_archive:x", Duration::from_secs(60))
                .unwrap(),
            None
        );
        assert_eq!(store.list("events_archive:x"), vec!["a", "b"]);
    }

    #[test]
    fn expired_keys_disappear() {
        let store = InMemoryStore::new();
        store.push("short", "x").unwrap();
        let mut batch = Batch::new();
        batch.expire("short", Duration::from_millis(10));
        assert_eq!(store.execute(batch).unwrap(), vec![1]);
        thread::sleep(Duration::from_millis(30));
        assert!(store.list("short").is_empty());
        assert_eq!(store.queue_len("short").unwrap(), 0);
    }

    #[test]
    fn expire_on_missing_key_is_noop() {
        let store = InMemoryStore::new();
        let mut batch = Batch::new();
        batch.expire("missing", Duration::from_secs(5));
        assert_eq!(store.execute(batch).unwrap(), vec![0]);
        assert_eq!(store.ttl("missing"), None);
    }

    #[test]
    fn batch_replies_in_order() {
        let store = InMemoryStore::new();
        let mut batch = Batch::new();
        batch.hash_incr("counters", "all", 1);
        batch.hash_incr("counters", "all", 1);
        batch.hash_set("counters", "ok", 5);
        batch.expire("counters", Duration::from_secs(60));

        assert_eq!(store.execute(batch).unwrap(), vec![1, 2, 0, 1]);
        assert_eq!(store.hash_get("counters", "all").unwrap(), Some(2));
        assert_eq!(store.hash_get("counters", "ok").unwrap(), Some(5));
        assert_eq!(store.hash_get("counters", "failure").unwrap(), None);
    }

    #[test]
    fn blocking_pop_times_out_when_idle() {
        let store = InMemoryStore::new();
        let started = Instant::now();
        let got = store
            .blocking_pop("events_actions", Duration::from_millis(50))
            .unwrap();
        assert_eq!(got, None);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn blocking_pop_wakes_on_push() {
        let store = Arc::new(InMemoryStore::new());
        let pusher = Arc::clone(&store);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            pusher.push("events_actions", "+").unwrap();
        });

        let started = Instant::now();
        let got = store
            .blocking_pop("events_actions", Duration::from_secs(5))
            .unwrap();
        handle.join().unwrap();

        assert_eq!(got.as_deref(), Some("+"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn disconnect_is_idempotent_and_rejects_later_calls() {
        let store = InMemoryStore::new();
        store.disconnect().unwrap();
        store.disconnect().unwrap();
        assert_eq!(store.disconnect_count(), 2);
        assert!(!store.is_connected());
        assert!(matches!(store.pop("events"), Err(StoreError::Connection(_))));
    }

    #[test]
    fn connections_share_keys_but_disconnect_alone() {
        let first = InMemoryStore::new();
        let second = first.new_connection();
        first.push("events", "a").unwrap();
        assert_eq!(second.queue_len("events").unwrap(), 1);

        first.disconnect().unwrap();
        assert!(!first.is_connected());
        assert!(second.is_connected());
        assert!(matches!(first.pop("events"), Err(StoreError::Connection(_))));
        assert_eq!(second.pop("events").unwrap().as_deref(), Some("a"));
        assert_eq!(second.disconnect_count(), 1);
    }

    #[test]
    fn disconnect_wakes_own_blocking_pop() {
        let store = Arc::new(InMemoryStore::new());
        let closer = Arc::clone(&store);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            closer.disconnect().unwrap();
        });

        let started = Instant::now();
        let got = store.blocking_pop("events_actions", Duration::from_secs(5));
        handle.join().unwrap();

        assert!(matches!(got, Err(StoreError::Connection(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn unavailable_store_fails_with_connection_error() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.push("events", "x"),
            Err(StoreError::Connection(_))
        ));
        store.set_unavailable(false);
        store.push("events", "x").unwrap();
    }

    #[test]
    fn check_save_requires_state() {
        let store = InMemoryStore::new();
        let mut check = Check::new(CheckKey::new("web01", "PING"));
        assert!(matches!(store.save(&check), Err(StoreError::Invalid(_))));

        check.record_state(StateReport {
            state: StateLabel::Ok,
            summary: None,
            details: None,
            count: 1,
            timestamp: Utc::now(),
        });
        store.save(&check).unwrap();
        let found = store.find(&check.key).unwrap().unwrap();
        assert_eq!(found, check);
    }

    #[test]
    fn entity_insert_and_add_check() {
        let store = InMemoryStore::new();
        assert!(store.insert(Entity::new("web01").unwrap()).unwrap());
        assert!(!store.insert(Entity::new("web01").unwrap()).unwrap());

        let key = CheckKey::new("web01", "PING");
        store.add_check("web01", &key).unwrap();
        let entity = store.find_by_name("web01").unwrap().unwrap();
        assert_eq!(entity.checks, vec![key.clone()]);

        assert!(matches!(
            store.add_check("db01", &key),
            Err(StoreError::NotFound(_))
        ));
    }
}
