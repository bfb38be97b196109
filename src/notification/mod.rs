//! Outbound notifications.
//!
//! A [`Notification`] describes one alert-worthy transition. It is built by
//! the [`NotificationGenerator`], serialized as JSON and pushed onto the
//! delivery queue; from then on it belongs to the delivery subsystem.

mod generator;

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::check::{CheckId, StateId, StateLabel};

pub use generator::NotificationGenerator;

/// Alert urgency, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Nothing wrong.
    Ok,
    /// Degraded.
    Warning,
    /// State could not be determined.
    Unknown,
    /// Down, or a test notification.
    Critical,
}

impl Severity {
    /// Severity implied by a single state label.
    #[must_use]
    pub const fn of_state(state: StateLabel) -> Self {
        match state {
            StateLabel::Ok | StateLabel::Acknowledgement => Self::Ok,
            StateLabel::Warning => Self::Warning,
            StateLabel::Unknown => Self::Unknown,
            StateLabel::Critical | StateLabel::TestNotifications => Self::Critical,
        }
    }

    /// Severity of a notification for `state`, given the highest severity
    /// already notified for the same unresolved problem.
    ///
    /// Never lower than `max_notified`, so severity within one failure streak
    /// is non-decreasing.
    ///
    /// # Examples
    ///
    /// ```
    /// use checkwarden::check::StateLabel;
    /// use checkwarden::Severity;
    ///
    /// assert_eq!(Severity::for_state(StateLabel::Warning, None), Severity::Warning);
    /// assert_eq!(
    ///     Severity::for_state(StateLabel::Warning, Some(Severity::Critical)),
    ///     Severity::Critical
    /// );
    /// ```
    #[must_use]
    pub fn for_state(state: StateLabel, max_notified: Option<Severity>) -> Self {
        let own = Self::of_state(state);
        max_notified.map_or(own, |max| own.max(max))
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Warning => write!(f, "warning"),
            Self::Unknown => write!(f, "unknown"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// What kind of transition a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// A check started or kept failing.
    Problem,
    /// A failing check is ok again.
    Recovery,
    /// Someone acknowledged the failure.
    Acknowledgement,
    /// Requested test notification.
    Test,
    /// Any other transition.
    Unknown,
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Problem => write!(f, "problem"),
            Self::Recovery => write!(f, "recovery"),
            Self::Acknowledgement => write!(f, "acknowledgement"),
            Self::Test => write!(f, "test"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// An outbound notification record.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    /// `entity:check` of the triggering event.
    pub event_id: String,
    pub check_id: CheckId,
    pub entity: String,
    pub check: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_id: Option<StateId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state_id: Option<StateId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<StateLabel>,

    /// Seconds the current state had been held when the notification fired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_duration: Option<i64>,

    pub severity: Severity,

    #[serde(rename = "type")]
    pub notification_type: NotificationType,

    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Counter of the event that produced this notification.
    pub count: i64,
}
