use super::{Filter, FilterContext};

/// Blocks service events while the check is acknowledged.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnscheduledMaintenanceFilter;

impl Filter for UnscheduledMaintenanceFilter {
    fn name(&self) -> &'static str {
        "unscheduled_maintenance"
    }

    fn blocks(&self, ctx: &FilterContext<'_>) -> bool {
        ctx.event.is_service() && ctx.check.in_unscheduled_maintenance(ctx.timestamp)
    }
}
