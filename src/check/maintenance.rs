//! Maintenance windows.
//!
//! Scheduled maintenance is planned downtime (including the window attached
//! to every brand-new check). Unscheduled maintenance is opened by an
//! acknowledgement and ends early when the check recovers.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time::TimeRange;

/// Planned suppression window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct ScheduledMaintenance {
    pub window: TimeRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ScheduledMaintenance {
    /// A window with a summary.
    #[must_use]
    pub fn new(window: TimeRange, summary: impl Into<String>) -> Self {
        Self {
            window,
            summary: Some(summary.into()),
        }
    }

    /// Window automatically attached to a check seen for the first time.
    #[must_use]
    pub fn for_new_check(at: DateTime<Utc>, length: StdDuration) -> Self {
        Self::new(
            TimeRange::starting_at_for(at, length),
            "Automatically created for new check",
        )
    }

    /// Start of the window.
    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        self.window.start
    }
}

/// Suppression window opened by an acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct UnscheduledMaintenance {
    pub window: TimeRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Counter of the acknowledgement event that opened the window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_by: Option<i64>,
    #[serde(default)]
    pub notified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_notification_count: Option<i64>,
}

impl UnscheduledMaintenance {
    /// A window not yet notified.
    #[must_use]
    pub fn new(window: TimeRange, summary: Option<String>, opened_by: Option<i64>) -> Self {
        Self {
            window,
            summary,
            opened_by,
            notified: false,
            last_notification_count: None,
        }
    }

    /// Start of the window.
    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        self.window.start
    }

    pub(crate) fn mark_notified(&mut self, count: i64) {
        self.notified = true;
        self.last_notification_count = Some(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_check_window_covers_requested_span() {
        let now = Utc::now();
        let sm = ScheduledMaintenance::for_new_check(now, StdDuration::from_secs(300));
        assert_eq!(sm.start(), now);
        assert_eq!(sm.window.end, now + chrono::Duration::seconds(300));
        assert_eq!(sm.summary.as_deref(), Some("Automatically created for new check"));
    }

    #[test]
    fn test_unscheduled_mark_notified() {
        let now = Utc::now();
        let mut um = UnscheduledMaintenance::new(
            TimeRange::starting_at_for(now, StdDuration::from_secs(60)),
            None,
            Some(9),
        );
        assert!(!um.notified);
        um.mark_notified(9);
        assert!(um.notified);
        assert_eq!(um.last_notification_count, Some(9));
    }
}
