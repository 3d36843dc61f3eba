use crate::peer::ReclaimOutcome;
use crate::protocol::ProtocolContext;

/// Shrinks (or grows) this peer's storage allowance. `target_kb` follows
/// the operator-facing convention of the service: kilobytes of 1000 bytes.
/// Eviction itself runs inside the state actor so victim selection and the
/// REMOVED announcements are consistent with the degree bookkeeping.
pub(crate) async fn run_reclaim(ctx: &ProtocolContext, target_kb: u64) -> ReclaimOutcome {
    let target_bytes = target_kb * 1000;
    let outcome = ctx.actor_client.reclaim(target_bytes).await;

    if outcome.target_met {
        slog::info!(
            ctx.logger,
            "Reclaim done: freed {} B, using {} of {} B",
            outcome.freed_bytes,
            outcome.used_space,
            outcome.capacity
        );
    } else {
        slog::warn!(
            ctx.logger,
            "Reclaim stopped early: using {} of {} B with no over-replicated chunks left",
            outcome.used_space,
            outcome.capacity
        );
    }

    outcome
}
