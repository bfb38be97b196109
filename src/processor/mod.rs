//! The event loop.
//!
//! A [`Processor`] drains the inbound queue in bursts under a [`BurstLock`],
//! applying each event to its check, running the filter chain and handing
//! unsuppressed transitions to the notification generator. When the queue
//! is empty it blocks on the companion `<queue>_actions` list so it wakes as
//! soon as a producer signals new work, or after the wait timeout.

mod handle;
mod lock;

use std::io::ErrorKind;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::check::{Check, StateMachine};
use crate::config::ProcessorConfig;
use crate::counters::{instance_id, EventCounters};
use crate::entity::Entity;
use crate::error::{WardenError, WardenResult};
use crate::event::Event;
use crate::filters::{FilterChain, FilterContext};
use crate::notification::{Notification, NotificationGenerator};
use crate::storage::{CheckStore, EntityStore, StateStore, StoreError};

pub use handle::{ProcessorHandle, StopHandle};
pub use lock::{BurstGuard, BurstLock};

/// Prefix of the hourly archive lists.
pub const ARCHIVE_PREFIX: &str = "events_archive";

/// Key of the archive list for the hour containing `at`.
#[must_use]
pub fn archive_key(at: DateTime<Utc>) -> String {
    format!("{ARCHIVE_PREFIX}:{}", at.format("%Y%m%d%H"))
}

/// Why `run()` returned without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The stop handle was triggered.
    Stopped,
    /// `exit_on_queue_empty` is set and the inbound queue ran dry.
    QueueDrained,
}

/// What happened to a single event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// Counted but not applied: an action event for a check with no state.
    Skipped,
    /// State recorded; notification ruled out before the filters ran.
    Suppressed,
    /// State recorded; a filter blocked the notification.
    Blocked {
        /// Name of the blocking filter.
        filter: &'static str,
    },
    /// A notification was enqueued.
    Notified(Notification),
}

impl EventOutcome {
    /// The enqueued notification, if there was one.
    #[must_use]
    pub const fn notification(&self) -> Option<&Notification> {
        match self {
            Self::Notified(n) => Some(n),
            _ => None,
        }
    }
}

/// Result of looking a check up by event.
#[derive(Debug, Clone)]
pub enum CheckLookup {
    /// Loaded from the store.
    Found(Check),
    /// Not stored yet. Its entity exists by now.
    Created(Check),
}

impl CheckLookup {
    /// True if the check was not in the store.
    #[must_use]
    pub const fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    /// The check, whichever way it was obtained.
    #[must_use]
    pub fn into_check(self) -> Check {
        match self {
            Self::Found(check) | Self::Created(check) => check,
        }
    }
}

/// The three store views a processor works against.
///
/// `run()` disconnects `state` when it returns, so processors running side
/// by side need their own connection each (see
/// [`InMemoryStore::new_connection`](crate::storage::InMemoryStore::new_connection)).
#[allow(missing_docs)]
#[derive(Clone)]
pub struct Stores {
    pub state: Arc<dyn StateStore>,
    pub checks: Arc<dyn CheckStore>,
    pub entities: Arc<dyn EntityStore>,
}

impl Stores {
    /// Use one backend for every view.
    pub fn shared<S>(backend: Arc<S>) -> Self
    where
        S: StateStore + CheckStore + EntityStore + 'static,
    {
        Self {
            state: Arc::clone(&backend) as Arc<dyn StateStore>,
            checks: Arc::clone(&backend) as Arc<dyn CheckStore>,
            entities: backend as Arc<dyn EntityStore>,
        }
    }
}

/// Disconnects the store however `run()` exits.
struct DisconnectGuard<'a>(&'a dyn StateStore);

impl Drop for DisconnectGuard<'_> {
    fn drop(&mut self) {
        match self.0.disconnect() {
            Ok(()) => debug!("store disconnected"),
            Err(e) => warn!(error = %e, "failed to disconnect store"),
        }
    }
}

/// Consumes events and produces notifications.
pub struct Processor {
    config: ProcessorConfig,
    stores: Stores,
    state_machine: StateMachine,
    filters: FilterChain,
    notifier: NotificationGenerator,
    lock: BurstLock,
    stop: StopHandle,
}

impl Processor {
    /// Build a processor with the standard filter chain, an in-process burst
    /// lock and an instance id of `<hostname>:<pid>`.
    pub fn new(config: ProcessorConfig, stores: Stores) -> WardenResult<Self> {
        Self::with_instance_id(config, stores, instance_id())
    }

    /// Like [`Processor::new`] with an explicit instance id for the
    /// per-instance counters.
    pub fn with_instance_id(
        config: ProcessorConfig,
        stores: Stores,
        instance_id: impl Into<String>,
    ) -> WardenResult<Self> {
        config.validate()?;
        let counters = EventCounters::new(instance_id, config.counter_ttl);
        let state_machine = StateMachine::new(
            Arc::clone(&stores.state),
            counters,
            config.state_machine_config()?,
        );
        let notifier = NotificationGenerator::new(
            Arc::clone(&stores.state),
            Arc::clone(&stores.checks),
            config.notifier_queue.clone(),
        );
        let filters = FilterChain::standard(config.delay_config());

        Ok(Self {
            config,
            stores,
            state_machine,
            filters,
            notifier,
            lock: BurstLock::default(),
            stop: StopHandle::new(),
        })
    }

    /// Replace the burst lock, e.g. with one shared by other processors.
    #[must_use]
    pub fn with_lock(mut self, lock: BurstLock) -> Self {
        self.lock = lock;
        self
    }

    /// Replace the filter chain.
    #[must_use]
    pub fn with_filters(mut self, filters: FilterChain) -> Self {
        self.filters = filters;
        self
    }

    /// Use an existing stop handle.
    #[must_use]
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    /// A handle that stops `run()` at the next event boundary.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// The validated configuration.
    #[must_use]
    pub const fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Counter bookkeeping for this instance.
    #[must_use]
    pub const fn counters(&self) -> &EventCounters {
        self.state_machine.counters()
    }

    /// Process events until stopped.
    ///
    /// Returns `Err` on store failure. The store is disconnected on every
    /// exit path.
    pub fn run(&self) -> WardenResult<RunOutcome> {
        let store = self.stores.state.as_ref();
        let _disconnect = DisconnectGuard(store);

        let counters = self.counters();
        counters.initialize(store, Utc::now())?;
        info!(
            instance = counters.instance_id(),
            queue = %self.config.queue,
            notifier_queue = %self.config.notifier_queue,
            archive_events = self.config.archive_events,
            "processor started"
        );

        let actions_queue = self.config.actions_queue();
        loop {
            if self.stop.is_stopped() {
                info!("stop requested; processor exiting");
                return Ok(RunOutcome::Stopped);
            }

            let processed = self.drain_burst()?;
            if processed > 0 {
                debug!(processed, "burst complete");
            }
            counters.touch(store)?;

            if self.stop.is_stopped() {
                info!("stop requested; processor exiting");
                return Ok(RunOutcome::Stopped);
            }
            if self.config.exit_on_queue_empty {
                info!(queue = %self.config.queue, "queue drained; processor exiting");
                return Ok(RunOutcome::QueueDrained);
            }

            // Payloads on the actions list only wake us up.
            if store
                .blocking_pop(&actions_queue, self.config.queue_wait_timeout)?
                .is_some()
            {
                debug!(queue = %actions_queue, "woken by queue activity");
            }
        }
    }

    /// Pop and process events under the burst lock until the queue is empty
    /// or a stop is requested. Returns how many payloads were popped.
    pub fn drain_burst(&self) -> WardenResult<usize> {
        let _burst = self.lock_burst()?;

        let mut popped = 0;
        while !self.stop.is_stopped() {
            let Some(raw) = self.next_payload()? else {
                break;
            };
            popped += 1;

            match Event::parse(&raw) {
                Ok(event) => {
                    self.process_event(event)?;
                }
                Err(e) => {
                    warn!(error = %e, payload = %raw, "dropping malformed event");
                }
            }
        }
        Ok(popped)
    }

    fn lock_burst(&self) -> WardenResult<BurstGuard<'_>> {
        match self.lock.try_acquire() {
            Ok(guard) => Ok(guard),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                debug!("burst lock held by another processor; waiting");
                self.lock.acquire().map_err(WardenError::Lock)
            }
            Err(e) => Err(WardenError::Lock(e)),
        }
    }

    fn next_payload(&self) -> Result<Option<String>, StoreError> {
        let store = self.stores.state.as_ref();
        if self.config.archive_events {
            store.pop_and_archive(
                &self.config.queue,
                &archive_key(Utc::now()),
                self.config.events_archive_maxage,
            )
        } else {
            store.pop(&self.config.queue)
        }
    }

    /// Process one event at the current time.
    pub fn process_event(&self, event: Event) -> WardenResult<EventOutcome> {
        self.process_event_at(event, Utc::now())
    }

    /// Process one event as if it arrived at `timestamp`.
    pub fn process_event_at(&self, event: Event, timestamp: DateTime<Utc>) -> WardenResult<EventOutcome> {
        let pending = self.stores.state.queue_len(&self.config.queue)?;
        debug!(
            event_id = %event.id(),
            event = %event.describe(),
            pending,
            "processing event"
        );

        let lookup = self.find_or_create(&event)?;
        let created = lookup.is_created();
        let mut check = lookup.into_check();

        let update = self.state_machine.update(&event, &mut check, timestamp)?;
        let event = event.with_counter(update.counter);

        if check.last_state().is_none() {
            info!(
                event_id = %event.id(),
                "check has no state yet; ignoring action event"
            );
            return Ok(EventOutcome::Skipped);
        }

        if let Some(maintenance) = update.new_check_maintenance {
            check.add_scheduled_maintenance(maintenance);
        }
        self.stores.checks.save(&check)?;
        if created {
            self.stores.entities.add_check(&check.key.entity, &check.key)?;
        }

        if !update.should_notify {
            debug!(event_id = %event.id(), "notification ruled out by state update");
            return Ok(EventOutcome::Suppressed);
        }

        let previous = update.previous_state.as_ref();
        let ctx = FilterContext::new(&event, &check, previous, timestamp);
        if let Some(filter) = self.filters.first_blocker(&ctx) {
            info!(event_id = %event.id(), filter, "notification blocked");
            return Ok(EventOutcome::Blocked { filter });
        }

        let notification = self.notifier.generate(&event, &mut check, timestamp, previous)?;
        info!(
            event_id = %event.id(),
            severity = %notification.severity,
            notification_type = %notification.notification_type,
            queue = self.notifier.queue(),
            "notification enqueued"
        );
        Ok(EventOutcome::Notified(notification))
    }

    /// Load the event's check, or create it (and its entity) in memory.
    pub fn find_or_create(&self, event: &Event) -> WardenResult<CheckLookup> {
        let key = event.check_key();
        if let Some(check) = self.stores.checks.find(&key)? {
            return Ok(CheckLookup::Found(check));
        }

        if self.stores.entities.find_by_name(&key.entity)?.is_none() {
            let entity = Entity::new(key.entity.clone())?;
            // Another processor may have created it since the lookup.
            if self.stores.entities.insert(entity)? {
                info!(entity = %key.entity, "created entity");
            }
        }
        debug!(check = %key, "created check");
        Ok(CheckLookup::Created(Check::new(key)))
    }
}
