//! State labels and state history records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// State carried by an event.
///
/// Service states are partitioned into "ok" and "failing"; the remaining
/// labels are only valid on action events. The partition is fixed and does
/// not depend on configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateLabel {
    /// Healthy.
    Ok,
    /// Degraded.
    Warning,
    /// Down.
    Critical,
    /// The check could not determine a state.
    Unknown,
    /// Action: someone is looking at the failure.
    Acknowledgement,
    /// Action: send a test notification.
    TestNotifications,
}

impl StateLabel {
    /// States counted as healthy.
    pub const OK_STATES: [Self; 1] = [Self::Ok];

    /// States counted as failures.
    pub const FAILING_STATES: [Self; 3] = [Self::Warning, Self::Critical, Self::Unknown];

    /// True for [`StateLabel::OK_STATES`].
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// True for [`StateLabel::FAILING_STATES`].
    #[must_use]
    pub const fn is_failing(self) -> bool {
        matches!(self, Self::Warning | Self::Critical | Self::Unknown)
    }

    /// True for labels a `service` event may carry.
    #[must_use]
    pub const fn is_service_state(self) -> bool {
        self.is_ok() || self.is_failing()
    }

    /// Wire name of the label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Unknown => "unknown",
            Self::Acknowledgement => "acknowledgement",
            Self::TestNotifications => "test_notifications",
        }
    }
}

impl fmt::Display for StateLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identifier for a recorded check state.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(Uuid);

impl StateId {
    /// Create a new random state id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fields reported by a service event, recorded into a check's history.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct StateReport {
    pub state: StateLabel,
    pub summary: Option<String>,
    pub details: Option<String>,
    pub count: i64,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of a check's condition at a point in time.
///
/// Everything except the notification bookkeeping is fixed once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct CheckState {
    pub id: StateId,
    pub state: StateLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub count: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub notified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_notification_count: Option<i64>,
}

impl CheckState {
    pub(crate) fn from_report(report: StateReport) -> Self {
        Self {
            id: StateId::new(),
            state: report.state,
            summary: report.summary,
            details: report.details,
            count: report.count,
            timestamp: report.timestamp,
            notified: false,
            last_notification_count: None,
        }
    }

    /// Record that a notification went out for this state.
    pub(crate) fn mark_notified(&mut self, count: i64) {
        self.notified = true;
        self.last_notification_count = Some(count);
    }
}
