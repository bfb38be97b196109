//! Notification suppression.
//!
//! Each filter is a pure predicate over a [`FilterContext`]. The
//! [`FilterChain`] evaluates its filters in order and stops at the first one
//! that blocks; later filters are never consulted.

mod acknowledgement;
mod delays;
mod ok;
mod scheduled_maintenance;
mod unscheduled_maintenance;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::check::{Check, CheckState};
use crate::event::Event;

pub use acknowledgement::AcknowledgementFilter;
pub use delays::{DelayConfig, DelaysFilter};
pub use ok::OkFilter;
pub use scheduled_maintenance::ScheduledMaintenanceFilter;
pub use unscheduled_maintenance::UnscheduledMaintenanceFilter;

/// Everything a filter may look at.
///
/// `check` already reflects the event: for service events its newest state
/// is the one the event just recorded.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy)]
pub struct FilterContext<'a> {
    pub event: &'a Event,
    pub check: &'a Check,
    pub previous_state: Option<&'a CheckState>,
    pub timestamp: DateTime<Utc>,
}

impl<'a> FilterContext<'a> {
    /// Context for one evaluation at `timestamp`.
    #[must_use]
    pub const fn new(
        event: &'a Event,
        check: &'a Check,
        previous_state: Option<&'a CheckState>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event,
            check,
            previous_state,
            timestamp,
        }
    }
}

/// A suppression rule.
pub trait Filter: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// True if the notification for this context must be suppressed.
    fn blocks(&self, ctx: &FilterContext<'_>) -> bool;
}

/// Ordered list of filters, evaluated with short-circuit.
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterChain {
    /// An empty chain that blocks nothing.
    #[must_use]
    pub fn new() -> Self {
        Self { filters: Vec::new() }
    }

    /// The production chain: ok, scheduled maintenance, unscheduled
    /// maintenance, delays, acknowledgement.
    #[must_use]
    pub fn standard(delays: DelayConfig) -> Self {
        Self::new()
            .with(OkFilter)
            .with(ScheduledMaintenanceFilter)
            .with(UnscheduledMaintenanceFilter)
            .with(DelaysFilter::new(delays))
            .with(AcknowledgementFilter)
    }

    /// Append a filter to the end of the chain.
    #[must_use]
    pub fn with(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    /// Filter names in evaluation order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Number of filters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// True if the chain has no filters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Name of the first filter that blocks, if any.
    #[must_use]
    pub fn first_blocker(&self, ctx: &FilterContext<'_>) -> Option<&'static str> {
        for filter in &self.filters {
            if filter.blocks(ctx) {
                debug!(event_id = %ctx.event.id(), filter = filter.name(), "filter blocked notification");
                return Some(filter.name());
            }
        }
        None
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::standard(DelayConfig::default())
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("filters", &self.names())
            .finish()
    }
}

pub(crate) fn elapsed_since(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Utc};

    use crate::check::{Check, CheckKey, StateLabel, StateReport};
    use crate::event::Event;

    pub fn service(state: &str) -> Event {
        Event::parse(&format!(
            r#"{{"entity":"web01","check":"PING","type":"service","state":"{state}"}}"#
        ))
        .unwrap()
    }

    pub fn action(state: &str, counter: i64) -> Event {
        Event::parse(&format!(
            r#"{{"entity":"web01","check":"PING","type":"action","state":"{state}"}}"#
        ))
        .unwrap()
        .with_counter(counter)
    }

    pub fn check() -> Check {
        Check::new(CheckKey::new("web01", "PING"))
    }

    pub fn record(check: &mut Check, state: StateLabel, at: DateTime<Utc>, notified: bool) {
        let count = check.states().len() as i64 + 1;
        check.record_state(StateReport {
            state,
            summary: None,
            details: None,
            count,
            timestamp: at,
        });
        if notified {
            if let Some(s) = check.last_state_mut() {
                s.mark_notified(count);
            }
        }
    }
}
