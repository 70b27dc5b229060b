//! Sparse spatial corruption field.
//!
//! Absent regions read as zero. A cell exists only while its intensity is
//! positive; every write path either clamps into `[1, MAX_INTENSITY]` or evicts.

use std::collections::BTreeMap;

use rand::Rng;

use crate::chance::{clamp_unit, roll};
use crate::corruption_config::{CorruptionConfig, CueConfig, MAX_INTENSITY};
use crate::events::AmbientCueEvent;
use crate::stage_config::{StageId, StageTable};
use crate::world::{RegionKey, Viewer};

const CARDINAL: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
const DIAGONAL: [(i32, i32); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];

/// One region's corruption. Timestamps of zero mean "never".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpatialCell {
    pub intensity: i32,
    pub touched: u64,
    pub last_corruption: u64,
    pub last_purification: u64,
}

impl SpatialCell {
    pub fn norm(&self) -> f64 {
        (self.intensity as f64 / MAX_INTENSITY as f64).clamp(0.0, 1.0)
    }

    /// Purification wins ties with a same-tick corruption event.
    pub fn purification_is_latest(&self) -> bool {
        self.last_purification > 0 && self.last_purification >= self.last_corruption
    }

    fn corruption_within(&self, now: u64, window: u64) -> bool {
        self.last_corruption > 0 && now < self.last_corruption.saturating_add(window)
    }

    fn purification_within(&self, now: u64, window: u64) -> bool {
        self.last_purification > 0 && now < self.last_purification.saturating_add(window)
    }
}

/// Inputs shared by every step of one field update.
pub struct FieldStep<'a> {
    pub table: &'a StageTable,
    pub stage: StageId,
    pub config: &'a CorruptionConfig,
    pub viewers: &'a [Viewer],
    pub now: u64,
    /// Ticks between consecutive field updates.
    pub call_period: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldTickReport {
    pub seeded: usize,
    pub adjusted: usize,
    pub evicted: usize,
    pub spread: usize,
    pub cues: Vec<AmbientCueEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorruptionField {
    cells: BTreeMap<RegionKey, SpatialCell>,
    seeded: bool,
}

impl CorruptionField {
    pub fn cell(&self, region: RegionKey) -> Option<&SpatialCell> {
        self.cells.get(&region)
    }

    pub fn intensity(&self, region: RegionKey) -> i32 {
        self.cells.get(&region).map_or(0, |cell| cell.intensity)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RegionKey, &SpatialCell)> {
        self.cells.iter()
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn set_seeded(&mut self, seeded: bool) {
        self.seeded = seeded;
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.seeded = false;
    }

    /// Restores a cell verbatim, clamping intensity. Non-positive cells are ignored.
    pub fn insert_cell(&mut self, region: RegionKey, mut cell: SpatialCell) -> bool {
        if cell.intensity <= 0 {
            self.cells.remove(&region);
            return false;
        }
        cell.intensity = cell.intensity.min(MAX_INTENSITY);
        self.cells.insert(region, cell);
        true
    }

    /// Raises a cell to at least `intensity` without stamping an event.
    pub fn seed_cell(&mut self, region: RegionKey, intensity: i32, now: u64) {
        if intensity <= 0 {
            return;
        }
        let cell = self.cells.entry(region).or_default();
        cell.intensity = cell.intensity.max(intensity.min(MAX_INTENSITY));
        cell.touched = now;
    }

    /// Adds corruption at a region and stamps the corruption event. Returns the new intensity.
    pub fn on_corrupting_action(&mut self, region: RegionKey, amount: i32, now: u64) -> i32 {
        if amount <= 0 {
            return self.intensity(region);
        }
        let cell = self.cells.entry(region).or_default();
        cell.intensity = cell.intensity.saturating_add(amount).min(MAX_INTENSITY);
        cell.touched = now;
        cell.last_corruption = now;
        cell.intensity
    }

    /// Removes corruption at a region and stamps the purification event.
    /// Returns the new intensity; the cell is evicted at zero.
    pub fn on_purifying_action(&mut self, region: RegionKey, amount: i32, now: u64) -> i32 {
        if amount <= 0 {
            return self.intensity(region);
        }
        let Some(cell) = self.cells.get_mut(&region) else {
            return 0;
        };
        cell.intensity = cell.intensity.saturating_sub(amount).max(0);
        cell.touched = now;
        cell.last_purification = now;
        let intensity = cell.intensity;
        if intensity <= 0 {
            self.cells.remove(&region);
        }
        intensity
    }

    /// Multiplier applied to spawn-time and sweep conversion chances.
    pub fn spawn_chance_multiplier(
        &self,
        table: &StageTable,
        stage: StageId,
        config: &CorruptionConfig,
        region: RegionKey,
    ) -> f64 {
        if !table.is_awakened(stage) {
            return 1.0;
        }
        match self.cells.get(&region) {
            Some(cell) => 1.0 + cell.norm() * table.stage(stage).spawn_scalar,
            None => config.field.missing_cell_multiplier,
        }
    }

    /// Runs seed, base delta, spread and cues in order.
    pub fn tick<R: Rng + ?Sized>(&mut self, step: &FieldStep<'_>, rng: &mut R) -> FieldTickReport {
        let mut report = FieldTickReport {
            seeded: self.seed(step, rng),
            ..Default::default()
        };
        let (adjusted, evicted) = self.apply_base_delta(step);
        report.adjusted = adjusted;
        report.evicted = evicted;
        report.spread = self.spread(step, rng);
        report.cues = self.visibility_cues(step, rng);

        if report.seeded > 0 || report.evicted > 0 || report.spread > 0 {
            tracing::debug!(
                target: "corruption::field",
                tick = step.now,
                stage = %step.stage,
                cells = self.cells.len(),
                seeded = report.seeded,
                adjusted = report.adjusted,
                evicted = report.evicted,
                spread = report.spread,
                "field.ticked"
            );
        }
        report
    }

    /// Scatters the first cells around viewers once the world awakens.
    pub fn seed<R: Rng + ?Sized>(&mut self, step: &FieldStep<'_>, rng: &mut R) -> usize {
        if self.seeded
            || !self.cells.is_empty()
            || !step.table.is_awakened(step.stage)
            || step.viewers.is_empty()
        {
            return 0;
        }
        let field = &step.config.field;
        let min = field.seed_count_min.min(field.seed_count_max);
        let count = rng.gen_range(min..=field.seed_count_max.max(min));
        let radius = field.seed_radius.max(0);
        for _ in 0..count {
            let viewer = step.viewers[rng.gen_range(0..step.viewers.len())];
            let dx = rng.gen_range(-radius..=radius);
            let dz = rng.gen_range(-radius..=radius);
            self.seed_cell(viewer.region().offset(dx, dz), field.seed_strength, step.now);
        }
        self.seeded = true;
        tracing::info!(
            target: "corruption::field",
            tick = step.now,
            seeds = count,
            cells = self.cells.len(),
            "field.seeded"
        );
        count as usize
    }

    /// Applies the stage's signed base delta. Returns (adjusted, evicted).
    pub fn apply_base_delta(&mut self, step: &FieldStep<'_>) -> (usize, usize) {
        let delta = step.table.base_delta(step.stage);
        if delta == 0 {
            return (0, 0);
        }
        let cooldown = step.table.stage(step.stage).decay_cooldown;
        let field = &step.config.field;
        let now = step.now;
        let mut adjusted = 0;
        for cell in self.cells.values_mut() {
            if delta < 0 && cell.corruption_within(now, cooldown) {
                continue;
            }
            if delta > 0 && cell.purification_within(now, cooldown) {
                continue;
            }
            // only decay is accelerated; never-touched cells are exempt
            let stale = delta < 0
                && cell.touched > 0
                && now.saturating_sub(cell.touched) > field.stale_after_ticks;
            let amount = if stale {
                delta.saturating_mul(field.stale_multiplier.max(1))
            } else {
                delta
            };
            cell.intensity = cell.intensity.saturating_add(amount).min(MAX_INTENSITY);
            adjusted += 1;
        }
        let before = self.cells.len();
        self.cells.retain(|_, cell| cell.intensity > 0);
        (adjusted, before - self.cells.len())
    }

    /// Pushes corruption from active cells into neighbours. Returns successful pushes.
    pub fn spread<R: Rng + ?Sized>(&mut self, step: &FieldStep<'_>, rng: &mut R) -> usize {
        let stage = step.table.stage(step.stage);
        if stage.spread_budget == 0 || self.cells.is_empty() {
            return 0;
        }
        let field = &step.config.field;
        let active: Vec<RegionKey> = self
            .cells
            .iter()
            .filter(|(_, cell)| cell.intensity >= field.active_threshold)
            .map(|(region, _)| *region)
            .collect();
        if active.is_empty() {
            return 0;
        }

        let guard_window = stage.blight_cooldown();
        let mut pushed = 0;
        for _ in 0..stage.spread_budget {
            let source = active[rng.gen_range(0..active.len())];
            if !self.cells.contains_key(&source) {
                continue;
            }
            let (dx, dz) = if rng.gen_range(0..10) < field.cardinal_weight {
                CARDINAL[rng.gen_range(0..CARDINAL.len())]
            } else {
                DIAGONAL[rng.gen_range(0..DIAGONAL.len())]
            };
            let target = source.offset(dx, dz);
            let jitter = if field.spread_jitter > 0 {
                rng.gen_range(0..field.spread_jitter)
            } else {
                0
            };
            let amount = (stage.spread_amount + jitter) as i32;

            let guarded = self
                .cells
                .get(&target)
                .is_some_and(|cell| cell.purification_within(step.now, guard_window));
            if amount > 0 && !guarded {
                let cell = self.cells.entry(target).or_default();
                cell.intensity = cell.intensity.saturating_add(amount).min(MAX_INTENSITY);
                cell.touched = step.now;
                pushed += 1;
            }

            if roll(rng, field.drain_chance) {
                if let Some(cell) = self.cells.get_mut(&source) {
                    cell.intensity -= 1;
                    if cell.intensity <= 0 {
                        self.cells.remove(&source);
                    }
                }
            }
        }
        pushed
    }

    /// Rolls ambient cues for viewers standing in visible corruption.
    pub fn visibility_cues<R: Rng + ?Sized>(
        &self,
        step: &FieldStep<'_>,
        rng: &mut R,
    ) -> Vec<AmbientCueEvent> {
        let stage = step.table.stage(step.stage);
        let cues = &step.config.cues;
        let base = step.call_period as f64 / stage.cue_interval() as f64;
        let mut emitted = Vec::new();
        for viewer in step.viewers {
            let region = viewer.region();
            let Some(cell) = self.cells.get(&region) else {
                continue;
            };
            if cell.intensity < step.config.field.visible_threshold {
                continue;
            }
            let norm = cell.norm();
            let particle_chance = (base * (cues.particle_base + cues.particle_norm_scale * norm))
                .clamp(0.0, cues.particle_max);
            let sound_chance = ((base * cues.sound_chance_scale + cues.sound_chance_offset)
                * stage.cue_sound_scalar
                * (cues.sound_norm_base + cues.sound_norm_scale * norm))
                .clamp(0.0, cues.sound_max);

            let particles = if roll(rng, clamp_unit(particle_chance)) {
                particle_count(cues, norm)
            } else {
                0
            };
            let sound_tier = roll(rng, clamp_unit(sound_chance)).then(|| tier_index(&cues.sound_tiers, norm));
            if particles > 0 || sound_tier.is_some() {
                emitted.push(AmbientCueEvent {
                    viewer: viewer.id,
                    region,
                    position: viewer.position,
                    particles,
                    sound_tier,
                });
            }
        }
        emitted
    }
}

fn tier_index(tiers: &[f64], norm: f64) -> u8 {
    tiers.iter().filter(|threshold| norm >= **threshold).count() as u8
}

fn particle_count(cues: &CueConfig, norm: f64) -> u8 {
    let index = tier_index(&cues.particle_tiers, norm) as usize;
    cues.particle_counts
        .get(index)
        .or_else(|| cues.particle_counts.last())
        .copied()
        .unwrap_or(1)
}
