//! Surface mutation: plain surface blocks near viewers turn blighted while
//! corruption is strong, and revert after purification under hysteresis.
//!
//! Only positions recorded here are ever reverted. Both halves are hard-capped
//! per tick by attempt budgets.

use std::collections::BTreeMap;

use rand::Rng;

use crate::chance::{clamp_unit, roll};
use crate::corruption_config::CorruptionConfig;
use crate::field::CorruptionField;
use crate::stage_config::{StageId, StageTable};
use crate::world::{BlockKind, BlockPos, RegionKey, WorldAccess};
use corruption_schema::REGION_SIZE;

pub struct BlightStep<'a> {
    pub table: &'a StageTable,
    pub stage: StageId,
    pub config: &'a CorruptionConfig,
    pub now: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlightReport {
    pub placed: usize,
    pub reverted: usize,
    pub discarded: usize,
}

/// Per-region positions converted by the subsystem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlightRecords {
    regions: BTreeMap<RegionKey, Vec<BlockPos>>,
}

impl BlightRecords {
    pub fn positions(&self, region: RegionKey) -> &[BlockPos] {
        self.regions.get(&region).map_or(&[], Vec::as_slice)
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn total_positions(&self) -> usize {
        self.regions.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RegionKey, &Vec<BlockPos>)> {
        self.regions.iter()
    }

    pub fn clear(&mut self) {
        self.regions.clear();
    }

    /// Restores a persisted region list; empty lists and foreign positions are dropped.
    pub fn restore_region(&mut self, region: RegionKey, positions: Vec<BlockPos>) {
        let positions: Vec<BlockPos> = positions
            .into_iter()
            .filter(|pos| pos.region() == region)
            .collect();
        if positions.is_empty() {
            self.regions.remove(&region);
        } else {
            self.regions.insert(region, positions);
        }
    }

    fn record(&mut self, pos: BlockPos) {
        self.regions.entry(pos.region()).or_default().push(pos);
    }

    /// Converts eligible surface blocks near viewers.
    pub fn apply<W: WorldAccess, R: Rng + ?Sized>(
        &mut self,
        step: &BlightStep<'_>,
        field: &CorruptionField,
        world: &mut W,
        rng: &mut R,
    ) -> usize {
        let blight = &step.config.blight;
        if step.stage < StageId(blight.min_stage) {
            return 0;
        }
        let stage = step.table.stage(step.stage);
        let scalar = stage.blight_apply_scalar;
        let cooldown = stage.blight_cooldown();
        let picks = (1 + (scalar * 2.0).floor() as i64).clamp(1, blight.max_picks_per_viewer.max(1) as i64);
        let radius = blight.radius.max(0);
        let mut budget = blight.apply_attempts_per_tick;
        let mut placed = 0;

        for viewer in world.viewers() {
            for pick in 0..picks {
                if budget == 0 {
                    return placed;
                }
                budget -= 1;
                let region = if pick == 0 {
                    viewer.region()
                } else {
                    viewer.region().offset(
                        rng.gen_range(-radius..=radius),
                        rng.gen_range(-radius..=radius),
                    )
                };
                if !world.is_region_loaded(region) {
                    continue;
                }
                if self.positions(region).len() >= blight.max_per_region {
                    continue;
                }
                let Some(cell) = field.cell(region) else {
                    continue;
                };
                let norm = cell.norm();
                if norm < blight.apply_threshold {
                    continue;
                }
                if cell.purification_is_latest()
                    && step.now < cell.last_purification.saturating_add(cooldown)
                {
                    continue;
                }
                let t = ((norm - blight.apply_threshold) / (1.0 - blight.apply_threshold).max(f64::EPSILON))
                    .clamp(0.0, 1.0);
                let chance = clamp_unit((blight.base_chance * scalar * t * t).max(blight.min_chance));
                if !roll(rng, chance) {
                    continue;
                }
                let x = region.min_block_x() + rng.gen_range(0..REGION_SIZE);
                let z = region.min_block_z() + rng.gen_range(0..REGION_SIZE);
                let Some(height) = world.surface_height(x, z) else {
                    continue;
                };
                let pos = BlockPos::new(x, height - 1, z);
                if pos.y <= world.min_build_height() {
                    continue;
                }
                if world.block_at(pos) != BlockKind::Grass || world.block_at(pos.above()) != BlockKind::Air {
                    continue;
                }
                if world.set_block(pos, BlockKind::BlightedGrass) {
                    self.record(pos);
                    placed += 1;
                    tracing::trace!(
                        target: "corruption::blight",
                        x = pos.x,
                        y = pos.y,
                        z = pos.z,
                        "blight.apply.placed"
                    );
                }
            }
        }
        placed
    }

    /// Reverts recorded positions in regions where purification is the latest
    /// event and no corruption landed inside its cooldown window.
    pub fn revert<W: WorldAccess, R: Rng + ?Sized>(
        &mut self,
        step: &BlightStep<'_>,
        field: &CorruptionField,
        world: &mut W,
        rng: &mut R,
    ) -> (usize, usize) {
        let blight = &step.config.blight;
        let stage = step.table.stage(step.stage);
        let cooldown = stage.blight_cooldown();
        let mut budget = blight.revert_attempts_per_tick;
        let mut reverted = 0;
        let mut discarded = 0;

        let candidates: Vec<RegionKey> = self.regions.keys().copied().collect();
        for region in candidates {
            if budget == 0 {
                break;
            }
            let Some(cell) = field.cell(region) else {
                continue;
            };
            let eligible = cell.purification_is_latest()
                && step.now <= cell.last_purification.saturating_add(cooldown)
                && (cell.last_corruption == 0
                    || step.now >= cell.last_corruption.saturating_add(cooldown));
            if !eligible {
                continue;
            }
            let count = if cell.norm() <= blight.revert_threshold {
                ((2.0 * stage.blight_revert_scalar).ceil() as i64)
                    .clamp(1, blight.max_reverts_per_region.max(1) as i64)
            } else {
                1
            };

            let Some(positions) = self.regions.get_mut(&region) else {
                continue;
            };
            for _ in 0..count {
                if budget == 0 || positions.is_empty() {
                    break;
                }
                if !world.is_region_loaded(region) {
                    break;
                }
                budget -= 1;
                let pos = positions.swap_remove(rng.gen_range(0..positions.len()));
                if world.block_at(pos) == BlockKind::BlightedGrass {
                    world.set_block(pos, BlockKind::Grass);
                    reverted += 1;
                    tracing::trace!(
                        target: "corruption::blight",
                        x = pos.x,
                        y = pos.y,
                        z = pos.z,
                        "blight.revert.restored"
                    );
                } else {
                    discarded += 1;
                }
            }
            if positions.is_empty() {
                self.regions.remove(&region);
            }
        }
        (reverted, discarded)
    }

    pub fn tick<W: WorldAccess, R: Rng + ?Sized>(
        &mut self,
        step: &BlightStep<'_>,
        field: &CorruptionField,
        world: &mut W,
        rng: &mut R,
    ) -> BlightReport {
        let placed = self.apply(step, field, world, rng);
        let (reverted, discarded) = self.revert(step, field, world, rng);
        let report = BlightReport {
            placed,
            reverted,
            discarded,
        };
        if report != BlightReport::default() {
            tracing::debug!(
                target: "corruption::blight",
                tick = step.now,
                placed,
                reverted,
                discarded,
                tracked = self.total_positions(),
                "blight.ticked"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid_world::GridWorld;
    use crate::world::Viewer;
    use rand::{rngs::SmallRng, SeedableRng};

    fn loaded_world(region: RegionKey) -> GridWorld {
        let mut world = GridWorld::flat(64);
        world.load_region(region);
        world.add_viewer(Viewer {
            id: 1,
            position: BlockPos::new(region.min_block_x() + 8, 64, region.min_block_z() + 8),
        });
        world
    }

    fn step<'a>(table: &'a StageTable, config: &'a CorruptionConfig, stage: u8, now: u64) -> BlightStep<'a> {
        BlightStep {
            table,
            stage: StageId(stage),
            config,
            now,
        }
    }

    #[test]
    fn apply_only_converts_grass_under_open_sky() {
        let table = StageTable::builtin();
        let config = CorruptionConfig::default();
        let region = RegionKey::new(0, 0);
        let mut world = loaded_world(region);
        let mut field = CorruptionField::default();
        field.seed_cell(region, 255, 1);
        let mut records = BlightRecords::default();
        let mut rng = SmallRng::seed_from_u64(9);

        for tick in 0..200 {
            records.apply(&step(&table, &config, 6, tick), &field, &mut world, &mut rng);
        }
        let positions = records.positions(region);
        assert!(!positions.is_empty());
        assert!(positions.len() <= config.blight.max_per_region);
        for pos in positions {
            assert_eq!(pos.y, 63);
            assert_eq!(world.block_at(*pos), BlockKind::BlightedGrass);
            assert_eq!(world.block_at(pos.above()), BlockKind::Air);
        }
    }

    #[test]
    fn apply_is_idle_below_minimum_stage_and_threshold() {
        let table = StageTable::builtin();
        let config = CorruptionConfig::default();
        let region = RegionKey::new(0, 0);
        let mut world = loaded_world(region);
        let mut field = CorruptionField::default();
        field.seed_cell(region, 255, 1);
        let mut records = BlightRecords::default();
        let mut rng = SmallRng::seed_from_u64(9);
        assert_eq!(records.apply(&step(&table, &config, 1, 5), &field, &mut world, &mut rng), 0);

        let mut weak = CorruptionField::default();
        weak.seed_cell(region, 40, 1);
        for tick in 0..50 {
            records.apply(&step(&table, &config, 6, tick), &weak, &mut world, &mut rng);
        }
        assert_eq!(records.total_positions(), 0);
    }

    #[test]
    fn revert_requires_recent_purification() {
        let table = StageTable::builtin();
        let config = CorruptionConfig::default();
        let region = RegionKey::new(0, 0);
        let mut world = loaded_world(region);
        let mut records = BlightRecords::default();
        let recorded = BlockPos::new(3, 63, 4);
        world.set_block(recorded, BlockKind::BlightedGrass);
        records.restore_region(region, vec![recorded]);
        let mut rng = SmallRng::seed_from_u64(2);

        let mut field = CorruptionField::default();
        field.on_corrupting_action(region, 30, 10);
        let cooldown = table.stage(StageId(2)).blight_cooldown();
        assert_eq!(
            records.revert(&step(&table, &config, 2, 20), &field, &mut world, &mut rng),
            (0, 0)
        );

        let now = 10 + cooldown;
        field.on_purifying_action(region, 26, now);
        let (reverted, discarded) =
            records.revert(&step(&table, &config, 2, now + 1), &field, &mut world, &mut rng);
        assert_eq!((reverted, discarded), (1, 0));
        assert_eq!(world.block_at(recorded), BlockKind::Grass);
        assert_eq!(records.region_count(), 0);
    }

    #[test]
    fn revert_discards_stale_records_and_leaves_unrecorded_blocks() {
        let table = StageTable::builtin();
        let config = CorruptionConfig::default();
        let region = RegionKey::new(0, 0);
        let mut world = loaded_world(region);
        let stale = BlockPos::new(1, 63, 1);
        let foreign = BlockPos::new(2, 63, 2);
        world.set_block(foreign, BlockKind::BlightedGrass);
        let mut records = BlightRecords::default();
        records.restore_region(region, vec![stale]);

        let mut field = CorruptionField::default();
        field.seed_cell(region, 30, 1);
        field.on_purifying_action(region, 5, 100);
        let mut rng = SmallRng::seed_from_u64(2);
        let (reverted, discarded) =
            records.revert(&step(&table, &config, 2, 101), &field, &mut world, &mut rng);
        assert_eq!((reverted, discarded), (0, 1));
        assert_eq!(world.block_at(stale), BlockKind::Grass);
        assert_eq!(world.block_at(foreign), BlockKind::BlightedGrass);
        assert_eq!(records.total_positions(), 0);
    }

    #[test]
    fn restore_drops_positions_outside_region() {
        let mut records = BlightRecords::default();
        records.restore_region(
            RegionKey::new(0, 0),
            vec![BlockPos::new(1, 60, 1), BlockPos::new(40, 60, 1)],
        );
        assert_eq!(records.positions(RegionKey::new(0, 0)), &[BlockPos::new(1, 60, 1)]);
        records.restore_region(RegionKey::new(5, 5), Vec::new());
        assert_eq!(records.region_count(), 1);
    }
}
