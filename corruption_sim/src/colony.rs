use rand::Rng;

use crate::chance::roll;
use crate::corruption_config::CorruptionConfig;
use crate::events::ColonyNotificationEvent;
use crate::ledger::ProgressCategory;
use crate::stage_config::{StageId, StageTable};
use crate::state::CorruptionState;
use crate::world::{ColonyView, WorldAccess};

/// Per-colony bookkeeping, created lazily on first evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColonyHandlerState {
    pub next_process_tick: u64,
    pub last_evaluation_tick: u64,
    pub last_notification_tick: u64,
    pub purification_credits: i64,
}

pub struct ColonyStep<'a> {
    pub table: &'a StageTable,
    pub stage: StageId,
    pub config: &'a CorruptionConfig,
    pub now: u64,
}

/// Signed colony contribution: negative purifies, positive corrupts.
pub fn sustainability_delta(colony: &ColonyView) -> i64 {
    let sustainability = colony.sustainability_level as i64;
    let gap = colony.max_building_level() as i64 - sustainability;
    if gap <= 0 {
        return gap;
    }
    colony
        .building_levels
        .iter()
        .map(|level| *level as i64 - sustainability)
        .filter(|excess| *excess > 0)
        .sum()
}

/// Evaluates every colony whose process tick has come due.
pub fn process_colonies<W: WorldAccess, R: Rng + ?Sized>(
    state: &mut CorruptionState,
    step: &ColonyStep<'_>,
    world: &W,
    rng: &mut R,
) -> Vec<ColonyNotificationEvent> {
    let settings = &step.config.colony;
    let mut notifications = Vec::new();

    for colony in world.colonies() {
        let handler = state.colonies.entry(colony.key.clone()).or_default();
        if step.now < handler.next_process_tick {
            continue;
        }
        handler.last_evaluation_tick = step.now;
        let jitter = if settings.process_jitter_ticks > 0 {
            rng.gen_range(0..settings.process_jitter_ticks)
        } else {
            0
        };
        handler.next_process_tick = step.now + settings.process_period_ticks + jitter;

        if step.now >= handler.last_notification_tick + settings.notification_cooldown_ticks
            && rng.gen_range(0..100) <= settings.notification_chance
        {
            handler.last_notification_tick = step.now;
            let message_index = rng.gen_range(0..settings.notification_messages.max(1));
            notifications.push(ColonyNotificationEvent {
                colony: colony.key.clone(),
                stage_ordinal: step.stage.ordinal(),
                message_index,
            });
        }

        let delta = sustainability_delta(&colony);
        if delta < 0 {
            handler.purification_credits += -delta;
        }
        state.mark_dirty();
        if delta != 0 {
            let protection = world.region_protection(colony.center.region());
            state.record_corruption(
                step.table,
                ProgressCategory::Colony,
                Some(colony.center),
                delta,
                protection,
                step.now,
            );
            tracing::debug!(
                target: "corruption::colony",
                colony = %colony.key,
                delta,
                "colony.evaluated"
            );
        }
    }
    notifications
}

/// Kill-based purification credited to the colony containing the kill.
pub fn credit_purification(state: &mut CorruptionState, colony: &ColonyView, amount: i64) {
    if amount <= 0 {
        return;
    }
    state.colony_mut(&colony.key).purification_credits += amount;
}

/// Bonus progression for taking in refugees, applied through the colony category.
pub fn record_refugee_intake(
    state: &mut CorruptionState,
    table: &StageTable,
    bonus: i64,
    colony: &ColonyView,
    now: u64,
) {
    state.record_corruption(
        table,
        ProgressCategory::Colony,
        Some(colony.center),
        bonus,
        0.0,
        now,
    );
    if bonus < 0 {
        credit_purification(state, colony, -bonus);
    }
    tracing::info!(
        target: "corruption::colony",
        colony = %colony.key,
        bonus,
        "colony.refugees_received"
    );
}
