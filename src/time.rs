//! Time ranges for maintenance windows.
//!
//! A window covers the half-open interval `[start, end)`. A zero-length
//! window is legal and never contains any instant.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A range of time (half-open interval: [start, end)).
///
/// # Examples
///
/// ```
/// use checkwarden::TimeRange;
/// use chrono::{Duration, Utc};
///
/// let now = Utc::now();
/// let range = TimeRange::new(now, now + Duration::hours(1)).unwrap();
/// assert!(range.contains(now));
/// assert!(!range.contains(now + Duration::hours(1)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start of the range (inclusive).
    pub start: DateTime<Utc>,

    /// End of the range (exclusive).
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Creates a time range from two timestamps.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidMaintenanceWindow` if `end < start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ValidationError> {
        if end < start {
            return Err(ValidationError::InvalidMaintenanceWindow {
                reason: format!("end ({end}) is before start ({start})"),
            });
        }
        Ok(Self { start, end })
    }

    /// Creates a range starting at `start` and lasting `length`.
    ///
    /// Lengths beyond the representable calendar saturate at the maximum
    /// timestamp instead of overflowing.
    #[must_use]
    pub fn starting_at_for(start: DateTime<Utc>, length: StdDuration) -> Self {
        let end = Duration::from_std(length)
            .ok()
            .and_then(|d| start.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self { start, end }
    }

    /// Check if a timestamp falls within this range [start, end).
    #[must_use]
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.start && time < self.end
    }

    /// Cut the range short so that it ends at `at`.
    ///
    /// Has no effect when `at` is outside the range.
    pub fn truncate_at(&mut self, at: DateTime<Utc>) {
        if self.contains(at) {
            self.end = at;
        }
    }
}
