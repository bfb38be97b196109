use super::{Filter, FilterContext};

/// Blocks ok service events that have nothing to recover from.
///
/// An ok event passes only when the previous state was failing and a problem
/// alert went out for that failure streak. A failure held back by the other
/// filters ends silently.
#[derive(Debug, Clone, Copy, Default)]
pub struct OkFilter;

impl Filter for OkFilter {
    fn name(&self) -> &'static str {
        "ok"
    }

    fn blocks(&self, ctx: &FilterContext<'_>) -> bool {
        if !ctx.event.is_service() || !ctx.event.is_ok() {
            return false;
        }
        let Some(previous) = ctx.previous_state else {
            return true;
        };
        previous.state.is_ok() || !ctx.check.latest_failure_was_notified()
    }
}
