//! Player-action progression sources: blocks, kills, fuel and refugees.

use crate::colony::{credit_purification, record_refugee_intake};
use crate::ledger::ProgressCategory;
use crate::progression_rules::ProgressionRules;
use crate::stage_config::StageTable;
use crate::state::CorruptionState;
use crate::world::{ActorKind, BlockPos, WorldAccess};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAction {
    Placed,
    Broken,
}

impl BlockAction {
    pub fn category(self) -> ProgressCategory {
        match self {
            BlockAction::Placed => ProgressCategory::Construction,
            BlockAction::Broken => ProgressCategory::ResourceGathering,
        }
    }
}

/// Borrowed inputs shared by every progression entry point.
pub struct ProgressionContext<'a, W: WorldAccess> {
    pub table: &'a StageTable,
    pub rules: &'a ProgressionRules,
    pub world: &'a W,
    pub now: u64,
}

impl<W: WorldAccess> ProgressionContext<'_, W> {
    fn record(&self, state: &mut CorruptionState, category: ProgressCategory, pos: Option<BlockPos>, amount: i64) {
        let protection = pos.map_or(0.0, |pos| self.world.region_protection(pos.region()));
        state.record_corruption(self.table, category, pos, amount, protection, self.now);
    }

    /// Applies a block's tiers; returns the net signed amount recorded.
    pub fn apply_block_progression(
        &self,
        state: &mut CorruptionState,
        pos: BlockPos,
        block_id: &str,
        action: BlockAction,
    ) -> i64 {
        let Some(tiers) = self.rules.block_tiers(block_id) else {
            return 0;
        };
        let category = action.category();
        let corruption = tiers.corruption_value();
        let purification = tiers.purification_value();
        if corruption > 0 {
            self.record(state, category, Some(pos), corruption);
        }
        if purification > 0 {
            self.record(state, category, Some(pos), -purification);
        }
        corruption - purification
    }

    /// Applies a kill's tiers; purifying kills inside a colony credit that colony.
    pub fn apply_kill_progression(&self, state: &mut CorruptionState, kind: &ActorKind, pos: BlockPos) -> i64 {
        let Some(tiers) = self.rules.actor_tiers(kind.as_str()) else {
            return 0;
        };
        let corruption = tiers.corruption_value();
        let purification = tiers.purification_value();
        if corruption > 0 {
            self.record(state, ProgressCategory::Animals, Some(pos), corruption);
        }
        if purification > 0 {
            self.record(state, ProgressCategory::Animals, Some(pos), -purification);
            if let Some(colony) = self.world.colony_at(pos) {
                credit_purification(state, &colony, purification);
            }
        }
        corruption - purification
    }

    /// Fuel burnt for `crafts` completed cooks at a furnace.
    pub fn apply_fuel_progression(
        &self,
        state: &mut CorruptionState,
        pos: BlockPos,
        fuel_item: Option<&str>,
        crafts: u32,
    ) -> i64 {
        let weight = fuel_item.map_or(self.rules.default_fuel_weight.max(0), |item| self.rules.fuel_weight(item));
        let amount = weight.saturating_mul(crafts as i64);
        if amount > 0 {
            self.record(state, ProgressCategory::Fuel, Some(pos), amount);
        }
        amount
    }

    /// Refugees taken in by the colony at `pos`; no-op outside colonies.
    pub fn apply_refugee_intake(&self, state: &mut CorruptionState, pos: BlockPos) -> bool {
        let Some(colony) = self.world.colony_at(pos) else {
            return false;
        };
        record_refugee_intake(state, self.table, self.rules.refugee_bonus, &colony, self.now);
        true
    }
}
