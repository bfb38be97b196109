//! Redis storage backend.
//!
//! Queues are redis lists (producers `LPUSH`, consumers `RPOP`), counters are
//! hashes, batches are `MULTI`/`EXEC` pipelines. Checks and entities are
//! stored as JSON blobs under `check:<entity>:<check>` and `entity:<name>`;
//! an entity's check list lives in the set `entity_checks:<name>`.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use redis::{Client, Connection, RedisError};
use tracing::{debug, info};

use crate::check::{Check, CheckKey};
use crate::entity::Entity;
use crate::storage::traits::{Batch, BatchOp, CheckStore, EntityStore, StateStore, StoreError};

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            Self::Connection(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn check_key(key: &CheckKey) -> String {
    format!("check:{}:{}", key.entity, key.check)
}

fn entity_key(name: &str) -> String {
    format!("entity:{name}")
}

fn entity_checks_key(name: &str) -> String {
    format!("entity_checks:{name}")
}

/// Redis-backed store shared by every processor instance.
///
/// Holds one synchronous connection. After [`StateStore::disconnect`] every
/// operation on this handle fails with `StoreError::Connection`; processors
/// running side by side each connect their own handle.
pub struct RedisStore {
    conn: Mutex<Option<Connection>>,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let conn = client.get_connection()?;
        info!(addr = %client.get_connection_info().addr, "connected to redis");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T>(
        &self,
        context: &'static str,
        f: impl FnOnce(&mut Connection) -> redis::RedisResult<T>,
    ) -> Result<T, StoreError> {
        let mut guard: MutexGuard<'_, Option<Connection>> = self
            .conn
            .lock()
            .map_err(|_| StoreError::Backend(format!("poisoned lock: {context}")))?;
        let conn = guard
            .as_mut()
            .ok_or_else(|| StoreError::Connection("store disconnected".to_string()))?;
        Ok(f(conn)?)
    }
}

impl StateStore for RedisStore {
    fn pop(&self, queue: &str) -> Result<Option<String>, StoreError> {
        self.with_conn("state.pop", |conn| redis::cmd("RPOP").arg(queue).query(conn))
    }

    fn pop_and_archive(
        &self,
        queue: &str,
        archive: &str,
        ttl: Duration,
    ) -> Result<Option<String>, StoreError> {
        self.with_conn("state.pop_and_archive", |conn| {
            let payload: Option<String> = redis::cmd("RPOPLPUSH").arg(queue).arg(archive).query(conn)?;
            if payload.is_some() {
                redis::cmd("PEXPIRE").arg(archive).arg(millis(ttl)).query::<i64>(conn)?;
            }
            Ok(payload)
        })
    }

    fn blocking_pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>, StoreError> {
        // BRPOP takes whole seconds on older servers; 0 would block forever.
        let secs = timeout.as_secs().max(1);
        self.with_conn("state.blocking_pop", |conn| {
            let reply: Option<(String, String)> =
                redis::cmd("BRPOP").arg(queue).arg(secs).query(conn)?;
            Ok(reply.map(|(_, payload)| payload))
        })
    }

    fn push(&self, queue: &str, payload: &str) -> Result<(), StoreError> {
        self.with_conn("state.push", |conn| {
            redis::cmd("LPUSH").arg(queue).arg(payload).query::<i64>(conn)?;
            Ok(())
        })
    }

    fn queue_len(&self, queue: &str) -> Result<usize, StoreError> {
        self.with_conn("state.queue_len", |conn| redis::cmd("LLEN").arg(queue).query(conn))
    }

    fn hash_get(&self, key: &str, field: &str) -> Result<Option<i64>, StoreError> {
        self.with_conn("state.hash_get", |conn| {
            redis::cmd("HGET").arg(key).arg(field).query(conn)
        })
    }

    fn execute(&self, batch: Batch) -> Result<Vec<i64>, StoreError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in batch.into_ops() {
            match op {
                BatchOp::HashIncr { key, field, by } => {
                    pipe.cmd("HINCRBY").arg(key).arg(field).arg(by);
                }
                BatchOp::HashSet { key, field, value } => {
                    pipe.cmd("HSET").arg(key).arg(field).arg(value);
                }
                BatchOp::Expire { key, ttl } => {
                    pipe.cmd("PEXPIRE").arg(key).arg(millis(ttl));
                }
            }
        }
        self.with_conn("state.execute", |conn| pipe.query(conn))
    }

    fn disconnect(&self) -> Result<(), StoreError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| StoreError::Backend("poisoned lock: state.disconnect".to_string()))?;
        if guard.take().is_some() {
            debug!("redis connection closed");
        }
        Ok(())
    }
}

impl CheckStore for RedisStore {
    fn find(&self, key: &CheckKey) -> Result<Option<Check>, StoreError> {
        let raw: Option<String> = self.with_conn("check.find", |conn| {
            redis::cmd("GET").arg(check_key(key)).query(conn)
        })?;
        raw.map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }

    fn save(&self, check: &Check) -> Result<(), StoreError> {
        check.validate()?;
        let json = serde_json::to_string(check)?;
        self.with_conn("check.save", |conn| {
            redis::cmd("SET").arg(check_key(&check.key)).arg(json).query::<()>(conn)
        })
    }
}

impl EntityStore for RedisStore {
    fn find_by_name(&self, name: &str) -> Result<Option<Entity>, StoreError> {
        let (raw, members): (Option<String>, Vec<String>) = self.with_conn("entity.find_by_name", |conn| {
            redis::pipe()
                .cmd("GET")
                .arg(entity_key(name))
                .cmd("SMEMBERS")
                .arg(entity_checks_key(name))
                .query(conn)
        })?;
        let Some(json) = raw else {
            return Ok(None);
        };
        let mut entity: Entity = serde_json::from_str(&json)?;
        let mut members = members;
        members.sort();
        for check in members {
            entity.add_check(CheckKey::new(name, check));
        }
        Ok(Some(entity))
    }

    fn insert(&self, entity: Entity) -> Result<bool, StoreError> {
        let json = serde_json::to_string(&entity)?;
        let created: Option<String> = self.with_conn("entity.insert", |conn| {
            redis::cmd("SET")
                .arg(entity_key(&entity.name))
                .arg(json)
                .arg("NX")
                .query(conn)
        })?;
        if created.is_none() {
            debug!(entity = %entity.name, "entity already exists");
        }
        Ok(created.is_some())
    }

    fn add_check(&self, entity: &str, key: &CheckKey) -> Result<(), StoreError> {
        let exists: bool = self.with_conn("entity.add_check", |conn| {
            redis::cmd("EXISTS").arg(entity_key(entity)).query(conn)
        })?;
        if !exists {
            return Err(StoreError::NotFound(format!("entity {entity}")));
        }
        self.with_conn("entity.add_check", |conn| {
            redis::cmd("SADD")
                .arg(entity_checks_key(entity))
                .arg(&key.check)
                .query::<i64>(conn)?;
            Ok(())
        })
    }
}
