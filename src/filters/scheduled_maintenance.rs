use super::{Filter, FilterContext};

/// Blocks everything but test notifications while a scheduled maintenance
/// window is active.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduledMaintenanceFilter;

impl Filter for ScheduledMaintenanceFilter {
    fn name(&self) -> &'static str {
        "scheduled_maintenance"
    }

    fn blocks(&self, ctx: &FilterContext<'_>) -> bool {
        !ctx.event.is_test_notification() && ctx.check.in_scheduled_maintenance(ctx.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use chrono::{Duration, Utc};

    use super::*;
    use crate::check::ScheduledMaintenance;
    use crate::filters::test_support::*;
    use crate::time::TimeRange;

    fn in_maintenance(now: chrono::DateTime<Utc>) -> crate::check::Check {
        let mut check = check();
        check.add_scheduled_maintenance(ScheduledMaintenance::new(
            TimeRange::starting_at_for(now - Duration::seconds(10), StdDuration::from_secs(60)),
            "patching",
        ));
        check
    }

    #[test]
    fn test_blocks_inside_window() {
        let now = Utc::now();
        let check = in_maintenance(now);
        let event = service("critical");
        assert!(ScheduledMaintenanceFilter.blocks(&FilterContext::new(&event, &check, None, now)));

        let ack = action("acknowledgement", 1);
        assert!(ScheduledMaintenanceFilter.blocks(&FilterContext::new(&ack, &check, None, now)));
    }

    #[test]
    fn test_passes_after_window_ends() {
        let now = Utc::now();
        let check = in_maintenance(now);
        let event = service("critical");
        let later = now + Duration::seconds(50);
        assert!(!ScheduledMaintenanceFilter.blocks(&FilterContext::new(&event, &check, None, later)));
    }

    #[test]
    fn test_test_notifications_pass() {
        let now = Utc::now();
        let check = in_maintenance(now);
        let event = action("test_notifications", 1);
        assert!(!ScheduledMaintenanceFilter.blocks(&FilterContext::new(&event, &check, None, now)));
    }
}
