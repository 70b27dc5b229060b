//! Entity conversion: the replace-in-place primitive, spawn-time interception,
//! sweep attempts and the timed countdowns that end in a conversion.

use std::collections::BTreeMap;

use bevy::prelude::Resource;
use rand::Rng;
use thiserror::Error;

use crate::chance::{clamp_unit, roll};
use crate::conversion_mapping::ConversionMapping;
use crate::corruption_config::CorruptionConfig;
use crate::events::{ActorConverted, ConversionFxEvent, ConversionFxPhase};
use crate::field::CorruptionField;
use crate::progression_rules::ProgressionRules;
use crate::stage_config::{StageId, StageTable};
use crate::world::{ActorId, ActorKind, ActorSpawn, BlockPos, RegionKey, WorldAccess};

const MAX_LIGHT: u8 = 15;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("source actor {0} no longer exists")]
    SourceMissing(ActorId),
    #[error("target kind {0} is not registered")]
    UnknownTarget(ActorKind),
    #[error("world refused to spawn {0}")]
    SpawnRejected(ActorKind),
    #[error("no mapping for {0}")]
    NoMapping(ActorKind),
    #[error("world refused to discard source actor {0}")]
    DiscardRejected(ActorId),
}

/// Replaces `source` with a freshly spawned `target`, carrying pose, flags,
/// name, leash holder and health fraction. The source is only discarded once the
/// target is in the world; on any error the source is left untouched and the
/// target, if it was already placed, is removed again.
pub fn convert_actor<W, F>(
    world: &mut W,
    source: ActorId,
    target: &ActorKind,
    finalize: F,
) -> Result<ActorId, ConversionError>
where
    W: WorldAccess,
    F: FnOnce(&mut ActorSpawn),
{
    let actor = world
        .actor(source)
        .cloned()
        .ok_or(ConversionError::SourceMissing(source))?;
    let target_max = world
        .max_health_of(target)
        .filter(|max| *max > 0.0)
        .ok_or_else(|| ConversionError::UnknownTarget(target.clone()))?;
    let source_max = world.max_health_of(&actor.kind).unwrap_or(0.0);
    let fraction = if source_max <= 0.0 {
        1.0
    } else {
        actor.health / source_max
    };
    let health = (target_max * fraction).clamp(1.0_f32.min(target_max), target_max);

    let mut spawn = ActorSpawn {
        kind: target.clone(),
        pose: actor.pose,
        health: Some(health),
        flags: actor.flags,
        custom_name: actor.custom_name.clone(),
        leash_holder: actor.leash_holder,
    };
    finalize(&mut spawn);

    let result = world
        .spawn_actor(spawn)
        .ok_or_else(|| ConversionError::SpawnRejected(target.clone()))?;
    if !world.discard_actor(source) {
        if !world.discard_actor(result) {
            tracing::warn!(
                target: "corruption::conversion",
                %source,
                %result,
                "conversion.rollback_failed"
            );
        }
        return Err(ConversionError::DiscardRejected(source));
    }
    Ok(result)
}

/// Environmental gate for corrupted spawns: darkness at night, loosening with
/// the stage, and light-tolerant from the late stage on.
pub fn check_corrupted_spawn(table: &StageTable, stage: StageId, light: u8, is_night: bool) -> bool {
    if stage == StageId::LOWEST {
        return false;
    }
    let ordinal = stage.ordinal();
    let max_light = (7 + ordinal.saturating_sub(1)).min(MAX_LIGHT);
    if table.is_late(stage) {
        light <= (max_light + 3).min(MAX_LIGHT)
    } else {
        is_night && light <= max_light
    }
}

/// Stage chance scaled by the local field multiplier, clamped to `[0, 1]`.
pub fn conversion_chance(
    table: &StageTable,
    stage: StageId,
    config: &CorruptionConfig,
    field: &CorruptionField,
    region: RegionKey,
) -> f64 {
    let base = table.stage(stage).spawn_chance;
    clamp_unit(base * field.spawn_chance_multiplier(table, stage, config, region))
}

pub struct ConversionContext<'a> {
    pub table: &'a StageTable,
    pub stage: StageId,
    pub config: &'a CorruptionConfig,
    pub rules: &'a ProgressionRules,
    pub mapping: &'a ConversionMapping,
    pub field: &'a CorruptionField,
}

impl ConversionContext<'_> {
    /// Chance roll followed by the environmental gate at `pos`.
    pub fn enforce_corrupted_spawn<W: WorldAccess, R: Rng + ?Sized>(
        &self,
        world: &W,
        pos: BlockPos,
        rng: &mut R,
    ) -> bool {
        let chance = conversion_chance(self.table, self.stage, self.config, self.field, pos.region());
        if chance <= 0.0 || !roll(rng, chance) {
            return false;
        }
        check_corrupted_spawn(self.table, self.stage, world.block_light(pos), world.is_night())
    }

    /// Possibly swaps a natural spawn for its corrupted variant.
    pub fn intercept_spawn<W: WorldAccess, R: Rng + ?Sized>(
        &self,
        world: &W,
        spawn: ActorSpawn,
        rng: &mut R,
    ) -> ActorSpawn {
        let Some(corrupted) = self.mapping.lookup_corrupted_for(&spawn.kind) else {
            return spawn;
        };
        if world.max_health_of(corrupted).is_none() {
            return spawn;
        }
        if !self.enforce_corrupted_spawn(world, spawn.pose.block_pos(), rng) {
            return spawn;
        }
        tracing::debug!(
            target: "corruption::conversion",
            from = %spawn.kind,
            to = %corrupted,
            "spawn.intercepted"
        );
        ActorSpawn {
            kind: corrupted.clone(),
            health: None,
            ..spawn
        }
    }

    /// Whether `kind` may be picked up by a corrupting sweep.
    pub fn is_sweep_candidate(&self, kind: &ActorKind) -> bool {
        self.rules.is_convertible(kind.as_str()) && self.mapping.lookup_corrupted_for(kind).is_some()
    }

    /// Rolls sweep conversions in one region; returns actors that passed.
    pub fn sweep_region<W: WorldAccess, R: Rng + ?Sized>(
        &self,
        world: &W,
        region: RegionKey,
        countdowns: &ConversionCountdowns,
        limit: usize,
        rng: &mut R,
    ) -> Vec<ActorId> {
        let mut selected = Vec::new();
        for id in world.actors_in_region(region) {
            if selected.len() >= limit {
                break;
            }
            if countdowns.contains(id) {
                continue;
            }
            let Some(actor) = world.actor(id) else {
                continue;
            };
            if !self.is_sweep_candidate(&actor.kind) {
                continue;
            }
            if self.enforce_corrupted_spawn(world, actor.pose.block_pos(), rng) {
                selected.push(id);
            }
        }
        selected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    pub remaining: u32,
    /// `true` converts corrupted → vanilla, `false` the other way.
    pub cleansing: bool,
    pub started: u64,
}

/// Outcome of one countdown tick that reached zero.
#[derive(Debug, Clone, PartialEq)]
pub enum CountdownOutcome {
    Converted(ActorConverted, BlockPos),
    Failed(ActorId, ConversionError),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountdownTick {
    pub fx: Vec<ConversionFxEvent>,
    pub outcomes: Vec<CountdownOutcome>,
    pub dropped: usize,
}

/// Side table of running conversions keyed by stable actor id.
#[derive(Resource, Debug, Clone, Default)]
pub struct ConversionCountdowns {
    running: BTreeMap<ActorId, Countdown>,
}

impl ConversionCountdowns {
    pub fn contains(&self, actor: ActorId) -> bool {
        self.running.contains_key(&actor)
    }

    pub fn get(&self, actor: ActorId) -> Option<&Countdown> {
        self.running.get(&actor)
    }

    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    /// Starts a countdown unless one is already running. Returns the start FX on success.
    pub fn start<W: WorldAccess>(
        &mut self,
        world: &W,
        actor: ActorId,
        cleansing: bool,
        length: u32,
        now: u64,
    ) -> Option<ConversionFxEvent> {
        if self.running.get(&actor).is_some_and(|countdown| countdown.remaining > 0) {
            return None;
        }
        let position = world.actor(actor)?.pose.block_pos();
        self.running.insert(
            actor,
            Countdown {
                remaining: length.max(1),
                cleansing,
                started: now,
            },
        );
        tracing::debug!(
            target: "corruption::conversion",
            %actor,
            cleansing,
            length,
            "countdown.started"
        );
        Some(ConversionFxEvent {
            actor,
            position,
            phase: ConversionFxPhase::Start,
            cleansing,
        })
    }

    pub fn cancel(&mut self, actor: ActorId) -> bool {
        self.running.remove(&actor).is_some()
    }

    pub fn clear(&mut self) {
        self.running.clear();
    }

    /// Advances every countdown by one tick and converts those that expire.
    pub fn tick<W: WorldAccess>(
        &mut self,
        world: &mut W,
        mapping: &ConversionMapping,
        pulse_interval: u32,
    ) -> CountdownTick {
        let mut report = CountdownTick::default();
        let ids: Vec<ActorId> = self.running.keys().copied().collect();
        for id in ids {
            let Some(position) = world.actor(id).map(|actor| actor.pose.block_pos()) else {
                self.running.remove(&id);
                report.dropped += 1;
                continue;
            };
            let Some(countdown) = self.running.get_mut(&id) else {
                continue;
            };
            countdown.remaining = countdown.remaining.saturating_sub(1);
            let cleansing = countdown.cleansing;
            if countdown.remaining > 0 {
                if pulse_interval > 0 && countdown.remaining % pulse_interval == 0 {
                    report.fx.push(ConversionFxEvent {
                        actor: id,
                        position,
                        phase: ConversionFxPhase::Pulse,
                        cleansing,
                    });
                }
                continue;
            }

            self.running.remove(&id);
            report.fx.push(ConversionFxEvent {
                actor: id,
                position,
                phase: ConversionFxPhase::FinalBurst,
                cleansing,
            });
            report.outcomes.push(finish_conversion(world, mapping, id, cleansing));
        }
        report
    }
}

fn finish_conversion<W: WorldAccess>(
    world: &mut W,
    mapping: &ConversionMapping,
    id: ActorId,
    cleansing: bool,
) -> CountdownOutcome {
    let Some(source_kind) = world.actor(id).map(|actor| actor.kind.clone()) else {
        return CountdownOutcome::Failed(id, ConversionError::SourceMissing(id));
    };
    let target = if cleansing {
        mapping.lookup_vanilla_for(&source_kind)
    } else {
        mapping.lookup_corrupted_for(&source_kind)
    };
    let Some(target) = target.cloned() else {
        return CountdownOutcome::Failed(id, ConversionError::NoMapping(source_kind));
    };
    match convert_actor(world, id, &target, |_| {}) {
        Ok(result) => {
            let position = world
                .actor(result)
                .map(|actor| actor.pose.block_pos())
                .unwrap_or_default();
            tracing::info!(
                target: "corruption::conversion",
                source = %id,
                result = %result,
                from = %source_kind,
                to = %target,
                cleansing,
                "actor.converted"
            );
            CountdownOutcome::Converted(
                ActorConverted {
                    source: id,
                    source_kind,
                    result,
                    result_kind: target,
                    cleansing,
                },
                position,
            )
        }
        Err(err) => {
            tracing::debug!(
                target: "corruption::conversion",
                actor = %id,
                error = %err,
                "actor.conversion_failed"
            );
            CountdownOutcome::Failed(id, err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion_mapping::builtin_mapping_documents;
    use crate::grid_world::GridWorld;
    use crate::world::{ActorFlags, Pose};
    use rand::{rngs::SmallRng, SeedableRng};

    fn world_with_wolf() -> (GridWorld, ActorId) {
        let mut world = GridWorld::flat(64);
        world.load_region(RegionKey::new(0, 0));
        let mut spawn = ActorSpawn::new("wolf", Pose::at_block(BlockPos::new(4, 64, 4)));
        spawn.health = Some(4.0);
        spawn.flags = ActorFlags::NAME_VISIBLE | ActorFlags::SILENT;
        spawn.custom_name = Some("Ash".into());
        spawn.leash_holder = Some(ActorId(99));
        let id = world.spawn_actor(spawn).expect("wolf spawns");
        (world, id)
    }

    fn mapping() -> ConversionMapping {
        ConversionMapping::from_documents(&builtin_mapping_documents(), |_| true)
    }

    #[test]
    fn conversion_copies_identity_and_health_fraction() {
        let (mut world, wolf) = world_with_wolf();
        let target = ActorKind::from("corrupted_wolf");
        let result = convert_actor(&mut world, wolf, &target, |spawn| {
            spawn.flags |= ActorFlags::GLOWING;
        })
        .expect("converts");

        assert!(world.actor(wolf).is_none());
        let converted = world.actor(result).expect("result exists");
        assert_eq!(converted.kind, target);
        assert_eq!(converted.custom_name.as_deref(), Some("Ash"));
        assert_eq!(converted.leash_holder, Some(ActorId(99)));
        assert!(converted.flags.contains(ActorFlags::SILENT | ActorFlags::GLOWING));
        let source_max = world.max_health_of(&"wolf".into()).expect("registered");
        let target_max = world.max_health_of(&target).expect("registered");
        assert!((converted.health - target_max * 4.0 / source_max).abs() < 1e-4);
    }

    #[test]
    fn failed_conversion_leaves_source_alive() {
        let (mut world, wolf) = world_with_wolf();
        let err = convert_actor(&mut world, wolf, &"dragon".into(), |_| {}).expect_err("unknown");
        assert_eq!(err, ConversionError::UnknownTarget("dragon".into()));
        assert!(world.actor(wolf).is_some());

        world.reject_spawns(true);
        let err = convert_actor(&mut world, wolf, &"corrupted_wolf".into(), |_| {}).expect_err("rejected");
        assert!(matches!(err, ConversionError::SpawnRejected(_)));
        assert!(world.actor(wolf).is_some());
        assert_eq!(world.actor_count(), 1);

        let err = convert_actor(&mut world, ActorId(404), &"corrupted_wolf".into(), |_| {})
            .expect_err("missing");
        assert_eq!(err, ConversionError::SourceMissing(ActorId(404)));
    }

    #[test]
    fn refused_discard_rolls_back_the_target() {
        let (mut world, wolf) = world_with_wolf();
        world.pin_actor(wolf, true);
        let err = convert_actor(&mut world, wolf, &"corrupted_wolf".into(), |_| {})
            .expect_err("discard refused");
        assert_eq!(err, ConversionError::DiscardRejected(wolf));
        let outcome = CountdownOutcome::Failed(wolf, err);
        assert_eq!(outcome.clone(), outcome);
        assert_eq!(world.actor_count(), 1);
        assert_eq!(world.actor(wolf).map(|a| a.kind.as_str()), Some("wolf"));

        world.pin_actor(wolf, false);
        let result = convert_actor(&mut world, wolf, &"corrupted_wolf".into(), |_| {}).expect("converts");
        assert_eq!(world.actor_count(), 1);
        assert!(world.actor(result).is_some());
    }

    #[test]
    fn health_never_drops_below_one() {
        let (mut world, wolf) = world_with_wolf();
        world.set_actor_health(wolf, 0.01);
        let result = convert_actor(&mut world, wolf, &"corrupted_wolf".into(), |_| {}).expect("converts");
        assert_eq!(world.actor(result).map(|a| a.health), Some(1.0));
    }

    #[test]
    fn spawn_gate_loosens_with_stage() {
        let table = StageTable::builtin();
        assert!(!check_corrupted_spawn(&table, StageId(0), 0, true));
        assert!(check_corrupted_spawn(&table, StageId(1), 7, true));
        assert!(!check_corrupted_spawn(&table, StageId(1), 8, true));
        assert!(!check_corrupted_spawn(&table, StageId(1), 0, false));
        assert!(check_corrupted_spawn(&table, StageId(4), 10, true));
        assert!(check_corrupted_spawn(&table, StageId(5), 14, false));
        assert!(!check_corrupted_spawn(&table, StageId(5), 15, false));
        assert!(check_corrupted_spawn(&table, StageId(6), 15, false));
    }

    #[test]
    fn interception_requires_chance_and_gate() {
        let table = StageTable::builtin();
        let config = CorruptionConfig::default();
        let rules = ProgressionRules::builtin();
        let mapping = mapping();
        let mut field = CorruptionField::default();
        field.seed_cell(RegionKey::new(0, 0), 100, 1);
        let mut world = GridWorld::flat(64);
        world.load_region(RegionKey::new(0, 0));
        let mut rng = SmallRng::seed_from_u64(3);
        let spawn = ActorSpawn::new("cow", Pose::at_block(BlockPos::new(2, 64, 2)));

        let calm = ConversionContext {
            table: &table,
            stage: StageId(0),
            config: &config,
            rules: &rules,
            mapping: &mapping,
            field: &field,
        };
        assert_eq!(calm.intercept_spawn(&world, spawn.clone(), &mut rng).kind.as_str(), "cow");

        let terminal = ConversionContext {
            stage: StageId(6),
            ..calm
        };
        world.set_night(false);
        world.set_ambient_light(15);
        let replaced = terminal.intercept_spawn(&world, spawn.clone(), &mut rng);
        assert_eq!(replaced.kind.as_str(), "corrupted_cow");
        assert_eq!(replaced.pose, spawn.pose);

        let unmapped = ActorSpawn::new("bat", spawn.pose);
        assert_eq!(terminal.intercept_spawn(&world, unmapped, &mut rng).kind.as_str(), "bat");
    }

    #[test]
    fn countdown_is_idempotent_and_converts_at_zero() {
        let (mut world, wolf) = world_with_wolf();
        let mapping = mapping();
        let mut countdowns = ConversionCountdowns::default();
        let start = countdowns.start(&world, wolf, false, 10, 1).expect("started");
        assert_eq!(start.phase, ConversionFxPhase::Start);
        assert!(countdowns.start(&world, wolf, false, 10, 2).is_none());

        let mut pulses = 0;
        let mut outcomes = Vec::new();
        for _ in 0..10 {
            let tick = countdowns.tick(&mut world, &mapping, 5);
            pulses += tick
                .fx
                .iter()
                .filter(|fx| fx.phase == ConversionFxPhase::Pulse)
                .count();
            outcomes.extend(tick.outcomes);
        }
        assert_eq!(pulses, 1);
        assert!(countdowns.is_empty());
        assert_eq!(outcomes.len(), 1);
        let CountdownOutcome::Converted(converted, _) = &outcomes[0] else {
            panic!("expected conversion, got {:?}", outcomes[0]);
        };
        assert_eq!(converted.result_kind.as_str(), "corrupted_wolf");
        assert!(world.actor(wolf).is_none());
        assert!(world.actor(converted.result).is_some());
    }

    #[test]
    fn countdown_for_removed_actor_is_dropped() {
        let (mut world, wolf) = world_with_wolf();
        let mut countdowns = ConversionCountdowns::default();
        countdowns.start(&world, wolf, true, 300, 1);
        world.discard_actor(wolf);
        let tick = countdowns.tick(&mut world, &mapping(), 5);
        assert_eq!(tick.dropped, 1);
        assert!(countdowns.is_empty());
    }

    #[test]
    fn cleansing_unmapped_actor_fails_without_side_effects() {
        let (mut world, wolf) = world_with_wolf();
        let mut countdowns = ConversionCountdowns::default();
        countdowns.start(&world, wolf, true, 1, 1);
        let tick = countdowns.tick(&mut world, &mapping(), 5);
        assert!(matches!(
            tick.outcomes.as_slice(),
            [CountdownOutcome::Failed(_, ConversionError::NoMapping(_))]
        ));
        assert!(world.actor(wolf).is_some());
    }
}
