use std::time::Duration;

use tracing::debug;

use super::{elapsed_since, Filter, FilterContext};

/// Grace periods for failing checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayConfig {
    /// How long a failure must persist before the first alert.
    pub initial_failure_delay: Duration,
    /// Minimum gap between alerts for an unchanged failing state.
    pub repeat_failure_delay: Duration,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            initial_failure_delay: Duration::from_secs(30),
            repeat_failure_delay: Duration::from_secs(60),
        }
    }
}

/// Holds back alerts for failures that are too young or were alerted on
/// too recently.
///
/// Per-check `initial_failure_delay` / `repeat_failure_delay` (seconds)
/// override the configured defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelaysFilter {
    config: DelayConfig,
}

impl DelaysFilter {
    /// A filter using `config` unless a check overrides it.
    #[must_use]
    pub const fn new(config: DelayConfig) -> Self {
        Self { config }
    }

    /// The default delays.
    #[must_use]
    pub const fn config(&self) -> DelayConfig {
        self.config
    }
}

impl Filter for DelaysFilter {
    fn name(&self) -> &'static str {
        "delays"
    }

    fn blocks(&self, ctx: &FilterContext<'_>) -> bool {
        let event = ctx.event;
        if !event.is_service() || !event.is_failure() {
            return false;
        }
        let check = ctx.check;

        let initial = check
            .initial_failure_delay
            .map_or(self.config.initial_failure_delay, Duration::from_secs);
        let repeat = check
            .repeat_failure_delay
            .map_or(self.config.repeat_failure_delay, Duration::from_secs);

        let failing_for = check
            .failure_started_at()
            .map_or(Duration::ZERO, |started| elapsed_since(started, ctx.timestamp));
        if failing_for < initial {
            debug!(
                event_id = %event.id(),
                failing_for = %humantime::format_duration(failing_for),
                "failure younger than initial delay"
            );
            return true;
        }

        let Some(last_alert) = check.last_problem_alert() else {
            return false;
        };
        let since_alert = elapsed_since(last_alert, ctx.timestamp);
        let unchanged = check
            .last_notified_state()
            .is_some_and(|s| s.state == event.state);
        if since_alert < repeat && unchanged {
            debug!(
                event_id = %event.id(),
                since_alert = %humantime::format_duration(since_alert),
                "alerted recently for the same state"
            );
            return true;
        }
        false
    }
}
