//! Applying events to checks.
//!
//! [`StateMachine::update`] is the only place check history grows. It also
//! counts the event, decides whether notification is possible at all, and
//! opens or closes acknowledgement windows.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{Check, CheckState, ScheduledMaintenance, StateReport, UnscheduledMaintenance};
use crate::counters::{CounterKind, EventCounters};
use crate::event::{Event, EventType};
use crate::storage::{StateStore, StoreError};
use crate::time::TimeRange;

/// Tunables for state updates.
#[derive(Debug, Clone)]
pub struct StateMachineConfig {
    /// Length of the scheduled maintenance attached to brand-new checks;
    /// `None` disables it.
    pub new_check_maintenance: Option<Duration>,
    /// How long an acknowledgement lasts when the event carries no duration.
    pub default_acknowledgement_duration: Duration,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            new_check_maintenance: Some(Duration::from_secs(100 * 31_557_600)),
            default_acknowledgement_duration: Duration::from_secs(4 * 60 * 60),
        }
    }
}

/// Result of applying one event to a check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    /// False when notification must be skipped without consulting filters.
    pub should_notify: bool,
    /// Latest state before this event was recorded.
    pub previous_state: Option<CheckState>,
    /// Store-assigned position of the event in the global sequence.
    pub counter: i64,
    /// Window to attach once the (new) check has been saved.
    pub new_check_maintenance: Option<ScheduledMaintenance>,
}

/// Applies events to checks and keeps the event counters.
pub struct StateMachine {
    store: Arc<dyn StateStore>,
    counters: EventCounters,
    config: StateMachineConfig,
}

impl StateMachine {
    /// A state machine counting into `store`.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, counters: EventCounters, config: StateMachineConfig) -> Self {
        Self {
            store,
            counters,
            config,
        }
    }

    /// This instance's counters.
    #[must_use]
    pub const fn counters(&self) -> &EventCounters {
        &self.counters
    }

    /// Count the event and apply it to `check`.
    ///
    /// Service events append a new state. Action events never touch state
    /// history; an acknowledgement of a failing, unacknowledged check opens
    /// an unscheduled maintenance window instead.
    pub fn update(
        &self,
        event: &Event,
        check: &mut Check,
        timestamp: DateTime<Utc>,
    ) -> Result<StateUpdate, StoreError> {
        match event.event_type {
            EventType::Service => self.update_service(event, check, timestamp),
            EventType::Action => self.update_action(event, check, timestamp),
        }
    }

    fn update_service(
        &self,
        event: &Event,
        check: &mut Check,
        timestamp: DateTime<Utc>,
    ) -> Result<StateUpdate, StoreError> {
        let kind = if event.state.is_ok() {
            CounterKind::Ok
        } else {
            CounterKind::Failure
        };
        let counter = self.counters.record(self.store.as_ref(), Some(kind))?;

        let previous_state = check.last_state().cloned();
        let mut should_notify = true;
        let mut new_check_maintenance = None;

        if previous_state.is_none() {
            info!(event_id = %event.id(), "no previous state for event");

            if let Some(length) = self.config.new_check_maintenance {
                info!(
                    event_id = %event.id(),
                    duration = %humantime::format_duration(length),
                    "setting scheduled maintenance for new check"
                );
                new_check_maintenance = Some(ScheduledMaintenance::for_new_check(timestamp, length));
            }

            // A check seen for the first time must not alert as a recovery.
            if event.state.is_ok() {
                debug!(event_id = %event.id(), "first report is ok; skipping filters");
                should_notify = false;
            }
        }

        if event.state.is_ok() {
            let ended = check.end_unscheduled_maintenance(timestamp);
            if ended > 0 {
                debug!(event_id = %event.id(), ended, "check recovered; ended unscheduled maintenance");
            }
        }

        check.record_state(StateReport {
            state: event.state,
            summary: event.summary.clone(),
            details: event.details.clone(),
            count: counter,
            timestamp,
        });

        Ok(StateUpdate {
            should_notify,
            previous_state,
            counter,
            new_check_maintenance,
        })
    }

    fn update_action(
        &self,
        event: &Event,
        check: &mut Check,
        timestamp: DateTime<Utc>,
    ) -> Result<StateUpdate, StoreError> {
        let counter = self
            .counters
            .record(self.store.as_ref(), Some(CounterKind::Action))?;

        if event.is_acknowledgement() {
            if !check.is_failing() {
                debug!(event_id = %event.id(), "acknowledgement for a check that is not failing");
            } else if check.in_unscheduled_maintenance(timestamp) {
                debug!(event_id = %event.id(), "check is already acknowledged");
            } else {
                let length = event
                    .duration
                    .map_or(self.config.default_acknowledgement_duration, Duration::from_secs);
                check.add_unscheduled_maintenance(UnscheduledMaintenance::new(
                    TimeRange::starting_at_for(timestamp, length),
                    event.summary.clone(),
                    Some(counter),
                ));
                info!(
                    event_id = %event.id(),
                    duration = %humantime::format_duration(length),
                    acknowledgement_id = event.acknowledgement_id.as_deref().unwrap_or(""),
                    "acknowledged; opened unscheduled maintenance"
                );
            }
        }

        Ok(StateUpdate {
            should_notify: true,
            previous_state: None,
            counter,
            new_check_maintenance: None,
        })
    }
}
