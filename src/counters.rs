//! Operational event counters.
//!
//! Two hashes are maintained: a global one shared by every processor instance
//! and one per instance. Each has the fields `all`, `ok`, `failure` and
//! `action`. Per-instance keys carry a TTL that is refreshed while the
//! instance is alive, so crashed instances age out on their own.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::storage::{Batch, StateStore, StoreError};

/// Key of the global counters hash.
pub const GLOBAL_COUNTERS_KEY: &str = "event_counters";

/// Default lifetime of per-instance keys (one week).
pub const DEFAULT_INSTANCE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const FIELDS: [&str; 4] = ["all", "ok", "failure", "action"];

/// Classification of an event for counting purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    /// Service event in an ok state.
    Ok,
    /// Service event in a failing state.
    Failure,
    /// Action event.
    Action,
}

impl CounterKind {
    const fn field(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failure => "failure",
            Self::Action => "action",
        }
    }
}

/// Identity of this processor: `<hostname>:<pid>`.
#[must_use]
pub fn instance_id() -> String {
    let host = match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            warn!(error = %e, "could not read hostname; using localhost");
            "localhost".to_string()
        }
    };
    format!("{host}:{}", std::process::id())
}

/// Counter bookkeeping for one processor instance.
#[derive(Debug, Clone)]
pub struct EventCounters {
    instance_id: String,
    ttl: Duration,
}

impl EventCounters {
    /// Counters for `instance_id`, whose keys live for `ttl` after each touch.
    #[must_use]
    pub fn new(instance_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            instance_id: instance_id.into(),
            ttl,
        }
    }

    /// This instance's id.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Key of this instance's counters hash.
    #[must_use]
    pub fn instance_key(&self) -> String {
        format!("{GLOBAL_COUNTERS_KEY}:{}", self.instance_id)
    }

    /// Key of this instance's registration hash.
    #[must_use]
    pub fn instance_record_key(&self) -> String {
        format!("executive_instance:{}", self.instance_id)
    }

    /// Zero the counters for a fresh run.
    ///
    /// Global counters are only created when absent; per-instance counters
    /// are always reset and the boot time recorded.
    pub fn initialize(&self, store: &dyn StateStore, boot_time: DateTime<Utc>) -> Result<(), StoreError> {
        let has_global = store.hash_get(GLOBAL_COUNTERS_KEY, "all")?.is_some();

        let mut batch = Batch::new();
        if !has_global {
            for field in FIELDS {
                batch.hash_set(GLOBAL_COUNTERS_KEY, field, 0);
            }
        }
        batch.hash_set(self.instance_record_key(), "boot_time", boot_time.timestamp());
        for field in FIELDS {
            batch.hash_set(self.instance_key(), field, 0);
        }
        self.push_touch(&mut batch);
        store.execute(batch)?;
        Ok(())
    }

    /// Refresh the TTL on the per-instance keys.
    pub fn touch(&self, store: &dyn StateStore) -> Result<(), StoreError> {
        let mut batch = Batch::new();
        self.push_touch(&mut batch);
        store.execute(batch)?;
        Ok(())
    }

    fn push_touch(&self, batch: &mut Batch) {
        batch.expire(self.instance_record_key(), self.ttl);
        batch.expire(self.instance_key(), self.ttl);
    }

    /// Count one event, returning its position in the global sequence.
    ///
    /// The `all` increments, the classification increments and the TTL
    /// refresh go out as one atomic batch.
    pub fn record(&self, store: &dyn StateStore, kind: Option<CounterKind>) -> Result<i64, StoreError> {
        let mut batch = Batch::new();
        let counter_idx = batch.hash_incr(GLOBAL_COUNTERS_KEY, "all", 1);
        batch.hash_incr(self.instance_key(), "all", 1);
        if let Some(kind) = kind {
            batch.hash_incr(GLOBAL_COUNTERS_KEY, kind.field(), 1);
            batch.hash_incr(self.instance_key(), kind.field(), 1);
        }
        self.push_touch(&mut batch);

        let replies = store.execute(batch)?;
        replies
            .get(counter_idx)
            .copied()
            .ok_or_else(|| StoreError::Backend("missing reply for event counter".to_string()))
    }
}
