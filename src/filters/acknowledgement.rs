use super::{Filter, FilterContext};

/// Lets through only the action events worth telling someone about.
///
/// Test notifications always pass. An acknowledgement passes when it is the
/// one that opened the check's latest unscheduled maintenance, i.e. it covers
/// a live failure that was not already acknowledged. Service events are not
/// this filter's concern.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcknowledgementFilter;

impl Filter for AcknowledgementFilter {
    fn name(&self) -> &'static str {
        "acknowledgement"
    }

    fn blocks(&self, ctx: &FilterContext<'_>) -> bool {
        let event = ctx.event;
        if !event.is_action() || event.is_test_notification() {
            return false;
        }
        if !event.is_acknowledgement() {
            return true;
        }
        let opened_by = ctx
            .check
            .unscheduled_maintenances_by_start()
            .last()
            .and_then(|um| um.opened_by);
        match (opened_by, event.counter) {
            (Some(opened), Some(counter)) => opened != counter,
            _ => true,
        }
    }
}
