//! Check records and the check state machine.
//!
//! A [`Check`] is one monitored service on an entity. It carries denormalized
//! "current" fields, an append-only history of [`CheckState`] snapshots and
//! two ordered collections of maintenance windows. History only grows through
//! [`Check::record_state`], which updates the current fields in the same call.

mod maintenance;
mod state;
mod update;

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::notification::Severity;

pub use maintenance::{ScheduledMaintenance, UnscheduledMaintenance};
pub use state::{CheckState, StateId, StateLabel, StateReport};
pub use update::{StateMachine, StateMachineConfig, StateUpdate};

/// Composite identity of a check: entity name plus check name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckKey {
    /// Entity name.
    pub entity: String,
    /// Check name.
    pub check: String,
}

impl CheckKey {
    /// Key for `entity:check`.
    #[must_use]
    pub fn new(entity: impl Into<String>, check: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            check: check.into(),
        }
    }
}

impl fmt::Display for CheckKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity, self.check)
    }
}

/// Stable check identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckId(Uuid);

impl CheckId {
    /// Creates a new random check ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CheckId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A monitored service on an entity.
///
/// # Examples
///
/// ```
/// use checkwarden::check::{Check, CheckKey, StateLabel, StateReport};
/// use chrono::Utc;
///
/// let mut check = Check::new(CheckKey::new("web01", "PING"));
/// assert!(check.validate().is_err());
///
/// check.record_state(StateReport {
///     state: StateLabel::Critical,
///     summary: Some("timeout".to_string()),
///     details: None,
///     count: 1,
///     timestamp: Utc::now(),
/// });
/// assert!(check.validate().is_ok());
/// assert_eq!(check.states().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    /// Stable id, assigned at creation.
    pub id: CheckId,

    /// Entity and check name.
    pub key: CheckKey,

    /// Tags copied onto every notification for this check.
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Per-check override of the initial failure delay, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_failure_delay: Option<u64>,

    /// Per-check override of the repeat failure delay, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_failure_delay: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    state: Option<StateLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_update: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_problem_alert: Option<DateTime<Utc>>,

    #[serde(default)]
    states: Vec<CheckState>,
    #[serde(default)]
    scheduled_maintenances: Vec<ScheduledMaintenance>,
    #[serde(default)]
    unscheduled_maintenances: Vec<UnscheduledMaintenance>,
}

impl Check {
    /// Creates an in-memory check with no state. It cannot be persisted until
    /// a state has been recorded.
    #[must_use]
    pub fn new(key: CheckKey) -> Self {
        Self {
            id: CheckId::new(),
            key,
            tags: BTreeSet::new(),
            initial_failure_delay: None,
            repeat_failure_delay: None,
            state: None,
            summary: None,
            details: None,
            count: None,
            last_update: None,
            last_problem_alert: None,
            states: Vec::new(),
            scheduled_maintenances: Vec::new(),
            unscheduled_maintenances: Vec::new(),
        }
    }

    /// Checks the record is fit to persist.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::MissingState` if no state was ever recorded,
    /// or an empty-name error for a blank key.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.key.entity.trim().is_empty() {
            return Err(ValidationError::EmptyEntityName);
        }
        if self.key.check.trim().is_empty() {
            return Err(ValidationError::EmptyCheckName);
        }
        if self.state.is_none() || self.states.is_empty() {
            return Err(ValidationError::MissingState {
                check: self.key.to_string(),
            });
        }
        Ok(())
    }

    /// Appends a state to the history and refreshes the current fields.
    ///
    /// Timestamps never go backwards: a report older than the latest recorded
    /// state is stamped with the latest timestamp instead.
    pub fn record_state(&mut self, report: StateReport) -> &CheckState {
        let mut report = report;
        if let Some(last) = self.states.last() {
            if report.timestamp < last.timestamp {
                report.timestamp = last.timestamp;
            }
        }

        self.state = Some(report.state);
        self.summary.clone_from(&report.summary);
        self.details.clone_from(&report.details);
        self.count = Some(report.count);
        self.last_update = Some(report.timestamp);

        self.states.push(CheckState::from_report(report));
        &self.states[self.states.len() - 1]
    }

    /// Current state label.
    #[must_use]
    pub const fn state(&self) -> Option<StateLabel> {
        self.state
    }

    /// Current summary.
    #[must_use]
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Current details.
    #[must_use]
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Counter of the event that set the current state.
    #[must_use]
    pub const fn count(&self) -> Option<i64> {
        self.count
    }

    /// When the current state was recorded.
    #[must_use]
    pub const fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// When the last problem notification went out.
    #[must_use]
    pub const fn last_problem_alert(&self) -> Option<DateTime<Utc>> {
        self.last_problem_alert
    }

    pub(crate) fn set_last_problem_alert(&mut self, at: DateTime<Utc>) {
        self.last_problem_alert = Some(at);
    }

    /// State history, oldest first.
    #[must_use]
    pub fn states(&self) -> &[CheckState] {
        &self.states
    }

    /// Newest history entry.
    #[must_use]
    pub fn last_state(&self) -> Option<&CheckState> {
        self.states.last()
    }

    pub(crate) fn last_state_mut(&mut self) -> Option<&mut CheckState> {
        self.states.last_mut()
    }

    /// True if the current state is failing.
    #[must_use]
    pub fn is_failing(&self) -> bool {
        self.state.is_some_and(StateLabel::is_failing)
    }

    /// When the current run of failing states began, if the check is failing.
    #[must_use]
    pub fn failure_started_at(&self) -> Option<DateTime<Utc>> {
        let mut started = None;
        for s in self.states.iter().rev() {
            if !s.state.is_failing() {
                break;
            }
            started = Some(s.timestamp);
        }
        started
    }

    /// Most recent state a notification was sent for.
    #[must_use]
    pub fn last_notified_state(&self) -> Option<&CheckState> {
        self.states.iter().rev().find(|s| s.notified)
    }

    /// True if a problem alert went out for the most recent failure streak.
    ///
    /// Trailing ok states are skipped, so this still answers for the streak
    /// an ok report has just ended.
    #[must_use]
    pub fn latest_failure_was_notified(&self) -> bool {
        self.states
            .iter()
            .rev()
            .skip_while(|s| s.state.is_ok())
            .take_while(|s| s.state.is_failing())
            .any(|s| s.notified)
    }

    /// Highest severity already notified since the last notified recovery.
    ///
    /// Walks the history backwards and stops at the first notified ok state,
    /// so a fresh failure streak starts again from nothing.
    #[must_use]
    pub fn max_notified_severity_of_current_failure(&self) -> Option<Severity> {
        let mut max: Option<Severity> = None;
        for s in self.states.iter().rev().filter(|s| s.notified) {
            if s.state.is_ok() {
                break;
            }
            let sev = Severity::of_state(s.state);
            max = Some(max.map_or(sev, |m| m.max(sev)));
        }
        max
    }

    /// Inserts a scheduled window, keeping the collection ordered by start.
    pub fn add_scheduled_maintenance(&mut self, sm: ScheduledMaintenance) {
        let idx = self
            .scheduled_maintenances
            .partition_point(|existing| existing.start() <= sm.start());
        self.scheduled_maintenances.insert(idx, sm);
    }

    /// Scheduled windows, earliest start first.
    #[must_use]
    pub fn scheduled_maintenances_by_start(&self) -> &[ScheduledMaintenance] {
        &self.scheduled_maintenances
    }

    /// True if a scheduled window contains `at`.
    #[must_use]
    pub fn in_scheduled_maintenance(&self, at: DateTime<Utc>) -> bool {
        self.scheduled_maintenances
            .iter()
            .any(|sm| sm.window.contains(at))
    }

    /// Inserts an unscheduled window, keeping the collection ordered by start.
    pub fn add_unscheduled_maintenance(&mut self, um: UnscheduledMaintenance) {
        let idx = self
            .unscheduled_maintenances
            .partition_point(|existing| existing.start() <= um.start());
        self.unscheduled_maintenances.insert(idx, um);
    }

    /// Unscheduled windows, earliest start first.
    #[must_use]
    pub fn unscheduled_maintenances_by_start(&self) -> &[UnscheduledMaintenance] {
        &self.unscheduled_maintenances
    }

    pub(crate) fn latest_unscheduled_maintenance_mut(&mut self) -> Option<&mut UnscheduledMaintenance> {
        self.unscheduled_maintenances.last_mut()
    }

    /// True if an unscheduled window contains `at`.
    #[must_use]
    pub fn in_unscheduled_maintenance(&self, at: DateTime<Utc>) -> bool {
        self.unscheduled_maintenances
            .iter()
            .any(|um| um.window.contains(at))
    }

    /// Ends every unscheduled window active at `at`. Returns how many ended.
    pub fn end_unscheduled_maintenance(&mut self, at: DateTime<Utc>) -> usize {
        let mut ended = 0;
        for um in &mut self.unscheduled_maintenances {
            if um.window.contains(at) {
                um.window.truncate_at(at);
                ended += 1;
            }
        }
        ended
    }
}
