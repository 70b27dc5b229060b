//! Per-world corruption context.
//!
//! All external writes (progress, corrupting and purifying actions) funnel
//! through [`CorruptionState`] so the dirty flag and the cached stage stay
//! consistent. No method performs I/O.

use std::collections::BTreeMap;

use bevy::prelude::Resource;

use crate::blight::BlightRecords;
use crate::colony::ColonyHandlerState;
use crate::field::CorruptionField;
use crate::ledger::{ProgressCategory, ProgressionLedger};
use crate::stage_config::{StageId, StageTable};
use crate::world::{BlockPos, RegionKey};

#[derive(Resource, Debug, Clone, Default)]
pub struct CorruptionState {
    pub(crate) ledger: ProgressionLedger,
    pub(crate) field: CorruptionField,
    pub(crate) blight: BlightRecords,
    pub(crate) colonies: BTreeMap<String, ColonyHandlerState>,
    pub(crate) initialized: bool,
    pub(crate) last_loop_tick: u64,
    stage: StageId,
    dirty: bool,
}

impl CorruptionState {
    pub fn ledger(&self) -> &ProgressionLedger {
        &self.ledger
    }

    pub fn field(&self) -> &CorruptionField {
        &self.field
    }

    pub fn blight(&self) -> &BlightRecords {
        &self.blight
    }

    pub fn colonies(&self) -> &BTreeMap<String, ColonyHandlerState> {
        &self.colonies
    }

    pub fn colony(&self, key: &str) -> Option<&ColonyHandlerState> {
        self.colonies.get(key)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn last_loop_tick(&self) -> u64 {
        self.last_loop_tick
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clears the dirty flag, returning whether it was set.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn total_progress(&self) -> i64 {
        self.ledger.total()
    }

    /// Pure function of the ledger total.
    pub fn current_stage(&self, table: &StageTable) -> StageId {
        table.stage_for_total(self.ledger.total())
    }

    /// Stage as of the last refresh.
    pub fn cached_stage(&self) -> StageId {
        self.stage
    }

    /// Recomputes the cached stage; returns the previous stage when it moved.
    pub fn refresh_stage(&mut self, table: &StageTable) -> Option<StageId> {
        let next = self.current_stage(table);
        if next == self.stage {
            return None;
        }
        let previous = std::mem::replace(&mut self.stage, next);
        tracing::info!(
            target: "corruption::ledger",
            from = %previous,
            to = %next,
            name = %table.stage(next).name,
            total = self.ledger.total(),
            "stage.changed"
        );
        Some(previous)
    }

    /// Adds signed progress to one category (floored at zero) and marks dirty.
    pub fn add_progress(&mut self, table: &StageTable, category: ProgressCategory, delta: i64) -> i64 {
        let value = self.ledger.add(category, delta);
        self.dirty = true;
        tracing::trace!(
            target: "corruption::ledger",
            %category,
            delta,
            value,
            "progress.added"
        );
        self.refresh_stage(table);
        value
    }

    pub fn on_corrupting_action(&mut self, region: RegionKey, amount: i32, now: u64) -> i32 {
        self.dirty = true;
        self.field.on_corrupting_action(region, amount, now)
    }

    pub fn on_purifying_action(&mut self, region: RegionKey, amount: i32, now: u64) -> i32 {
        self.dirty = true;
        self.field.on_purifying_action(region, amount, now)
    }

    /// Ledger and field in one call. Positive amounts corrupt, negative purify.
    /// `protection` in `[0, 1]` scales corrupting field writes only.
    pub fn record_corruption(
        &mut self,
        table: &StageTable,
        category: ProgressCategory,
        position: Option<BlockPos>,
        amount: i64,
        protection: f64,
        now: u64,
    ) {
        if amount == 0 {
            return;
        }
        self.add_progress(table, category, amount);
        let Some(position) = position else {
            return;
        };
        let region = position.region();
        let magnitude = amount.unsigned_abs().min(i32::MAX as u64) as i32;
        if amount > 0 {
            let protection = if protection.is_nan() { 0.0 } else { protection.clamp(0.0, 1.0) };
            let scaled = (magnitude as f64 * (1.0 - protection)).round() as i32;
            self.on_corrupting_action(region, scaled, now);
        } else {
            self.on_purifying_action(region, magnitude, now);
        }
    }

    pub fn colony_mut(&mut self, key: &str) -> &mut ColonyHandlerState {
        self.dirty = true;
        self.colonies.entry(key.to_string()).or_default()
    }

    pub fn field_mut(&mut self) -> &mut CorruptionField {
        self.dirty = true;
        &mut self.field
    }

    pub fn blight_mut(&mut self) -> &mut BlightRecords {
        self.dirty = true;
        &mut self.blight
    }

    /// Progress a fresh world needs to start in `stage`; applied once.
    pub fn initialize_stage(&mut self, table: &StageTable, stage: StageId) -> bool {
        if self.initialized {
            return false;
        }
        let progress = table.starting_progress(stage);
        if progress > 0 {
            self.add_progress(table, ProgressCategory::Default, progress);
        }
        self.initialized = true;
        self.dirty = true;
        tracing::info!(
            target: "corruption::ledger",
            stage = %stage,
            progress,
            "stage.initialized"
        );
        true
    }

    /// Zeroes the ledger and clears every dependent per-world structure.
    pub fn reset(&mut self, table: &StageTable) -> StageId {
        self.ledger.clear();
        self.field.clear();
        self.blight.clear();
        self.colonies.clear();
        self.initialized = false;
        self.last_loop_tick = 0;
        self.dirty = true;
        self.refresh_stage(table);
        tracing::info!(target: "corruption::ledger", "ledger.reset");
        self.stage
    }
}
