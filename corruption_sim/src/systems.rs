//! Bevy systems driving the corruption engine, one `app.update()` per game tick.
//!
//! Every system is generic over the host world resource `W` so the same
//! pipeline runs against `GridWorld` in the headless app and any other
//! [`WorldAccess`] implementation a host provides.

use bevy::{ecs::system::SystemParam, prelude::*};
use tracing::{debug, info, trace, warn};

use crate::{
    blight::BlightStep,
    colony::{process_colonies, ColonyStep},
    conversion::{ConversionContext, ConversionCountdowns, CountdownOutcome},
    conversion_mapping::{load_mapping_directory, ConversionMappingHandle, MappingWatcher},
    corruption_config::CorruptionConfigHandle,
    events::{
        ActorConverted, AmbientCueEvent, ColonyNotificationEvent, ConversionFxEvent,
        CookCompletedEvent, FurnaceLit, RegionLoaded, RegionUnloaded, SpawnRequested,
    },
    field::FieldStep,
    furnace::FurnaceTracker,
    persistence::{load_state, save_state, PersistenceStore},
    progression::ProgressionContext,
    progression_rules::ProgressionRulesHandle,
    resources::{SimRng, SimulationConfig, SimulationTick},
    scheduler::SweepScheduler,
    stage_config::{StageId, StageTableHandle},
    state::CorruptionState,
    sync::{RegionSyncTracker, SyncOutbox},
    world::WorldAccess,
};

/// Read-only configuration shared by most systems.
#[derive(SystemParam)]
pub struct CorruptionSettings<'w> {
    pub sim: Res<'w, SimulationConfig>,
    pub stages: Res<'w, StageTableHandle>,
    pub tuning: Res<'w, CorruptionConfigHandle>,
    pub rules: Res<'w, ProgressionRulesHandle>,
    pub mapping: Res<'w, ConversionMappingHandle>,
}

#[derive(SystemParam)]
pub struct RegionEventParams<'w, 's, W: WorldAccess + Resource> {
    pub loaded: EventReader<'w, 's, RegionLoaded>,
    pub unloaded: EventReader<'w, 's, RegionUnloaded>,
    pub lit: EventReader<'w, 's, FurnaceLit>,
    pub scheduler: ResMut<'w, SweepScheduler>,
    pub furnaces: ResMut<'w, FurnaceTracker>,
    pub world: Res<'w, W>,
    pub tuning: Res<'w, CorruptionConfigHandle>,
    pub tick: Res<'w, SimulationTick>,
}

#[derive(SystemParam)]
pub struct CorruptionLoopParams<'w, W: WorldAccess + Resource> {
    pub settings: CorruptionSettings<'w>,
    pub tick: Res<'w, SimulationTick>,
    pub state: ResMut<'w, CorruptionState>,
    pub world: ResMut<'w, W>,
    pub rng: ResMut<'w, SimRng>,
    pub cues: EventWriter<'w, AmbientCueEvent>,
    pub notifications: EventWriter<'w, ColonyNotificationEvent>,
}

#[derive(SystemParam)]
pub struct ConversionParams<'w, W: WorldAccess + Resource> {
    pub settings: CorruptionSettings<'w>,
    pub tick: Res<'w, SimulationTick>,
    pub state: ResMut<'w, CorruptionState>,
    pub countdowns: ResMut<'w, ConversionCountdowns>,
    pub world: ResMut<'w, W>,
    pub rng: ResMut<'w, SimRng>,
    pub fx: EventWriter<'w, ConversionFxEvent>,
}

pub fn advance_tick(mut tick: ResMut<SimulationTick>) {
    tick.0 += 1;
}

/// Feeds load, unload and furnace notifications into the transient indices.
pub fn process_region_events<W: WorldAccess + Resource>(mut params: RegionEventParams<W>) {
    let now = params.tick.0;
    let tuning = params.tuning.get();
    for event in params.loaded.read() {
        params
            .scheduler
            .on_region_loaded(event.region, now, &tuning.scheduler);
        params
            .furnaces
            .on_region_loaded(&*params.world, event.region, now);
    }
    for event in params.unloaded.read() {
        params.scheduler.on_region_unloaded(event.region);
        params.furnaces.on_region_unloaded(event.region);
    }
    for event in params.lit.read() {
        params
            .furnaces
            .on_furnace_lit(&*params.world, event.position, now);
    }
}

/// Places requested natural spawns, swapping in corrupted variants when the
/// stage, field and environment allow it.
pub fn handle_spawn_requests<W: WorldAccess + Resource>(
    mut requests: EventReader<SpawnRequested>,
    settings: CorruptionSettings,
    state: Res<CorruptionState>,
    mut world: ResMut<W>,
    mut rng: ResMut<SimRng>,
) {
    if requests.is_empty() {
        return;
    }
    let table = settings.stages.get();
    let tuning = settings.tuning.get();
    let rules = settings.rules.get();
    let mapping = settings.mapping.get();
    let context = ConversionContext {
        table: &table,
        stage: state.cached_stage(),
        config: &tuning,
        rules: &rules,
        mapping: &mapping,
        field: state.field(),
    };
    for request in requests.read() {
        let spawn = context.intercept_spawn(&*world, request.spawn.clone(), &mut rng.0);
        let kind = spawn.kind.clone();
        if world.spawn_actor(spawn).is_none() {
            debug!(target: "corruption::conversion", %kind, "spawn.rejected");
        }
    }
}

/// Rebuilds and swaps the mapping table when watched files change.
pub fn reload_mappings<W: WorldAccess + Resource>(
    watcher: Option<Res<MappingWatcher>>,
    mut mapping: ResMut<ConversionMappingHandle>,
    world: Res<W>,
) {
    let Some(watcher) = watcher else {
        return;
    };
    if !watcher.take_changes() {
        return;
    }
    match load_mapping_directory(watcher.dir(), |kind| world.max_health_of(kind).is_some()) {
        Ok(table) => mapping.set_mappings(table),
        Err(err) => warn!(
            target: "corruption::config",
            path = %watcher.dir().display(),
            error = %err,
            "mapping.reload_failed"
        ),
    }
}

/// Stage refresh, field update, surface mutation and colony processing, once
/// every `loop_period_ticks`.
pub fn run_corruption_loop<W: WorldAccess + Resource>(mut params: CorruptionLoopParams<W>) {
    let now = params.tick.0;
    let period = params.settings.sim.loop_period_ticks.max(1);
    if now.saturating_sub(params.state.last_loop_tick()) < period {
        return;
    }
    let table = params.settings.stages.get();
    let tuning = params.settings.tuning.get();
    let state: &mut CorruptionState = &mut params.state;
    let world: &mut W = &mut params.world;
    let rng = &mut params.rng.0;

    state.refresh_stage(&table);
    let stage = state.cached_stage();
    let viewers = world.viewers();

    let field_step = FieldStep {
        table: &table,
        stage,
        config: &tuning,
        viewers: &viewers,
        now,
        call_period: period,
    };
    let report = state.field.tick(&field_step, &mut *rng);

    let blight_step = BlightStep {
        table: &table,
        stage,
        config: &tuning,
        now,
    };
    let blight = state
        .blight
        .tick(&blight_step, &state.field, &mut *world, &mut *rng);

    let colony_step = ColonyStep {
        table: &table,
        stage,
        config: &tuning,
        now,
    };
    let notifications = process_colonies(&mut *state, &colony_step, &*world, &mut *rng);

    state.last_loop_tick = now;
    if report.seeded + report.adjusted + report.spread > 0 || blight.placed + blight.reverted + blight.discarded > 0 {
        state.mark_dirty();
    }
    params.cues.send_batch(report.cues);
    params.notifications.send_batch(notifications);
}

/// Polls tracked furnaces and turns finished cooks into fuel progression.
pub fn poll_furnaces<W: WorldAccess + Resource>(
    settings: CorruptionSettings,
    tick: Res<SimulationTick>,
    mut tracker: ResMut<FurnaceTracker>,
    mut state: ResMut<CorruptionState>,
    world: Res<W>,
    mut completed: EventWriter<CookCompletedEvent>,
) {
    let now = tick.0;
    if now % settings.sim.furnace_poll_period_ticks.max(1) != 0 || tracker.is_empty() {
        return;
    }
    let table = settings.stages.get();
    let tuning = settings.tuning.get();
    let rules = settings.rules.get();
    let cooks = tracker.poll(&*world, now, &tuning.furnace);
    let context = ProgressionContext {
        table: &table,
        rules: &rules,
        world: &*world,
        now,
    };
    for cook in &cooks {
        context.apply_fuel_progression(&mut state, cook.position, cook.fuel_item.as_deref(), cook.crafts);
    }
    completed.send_batch(cooks);
}

/// Drains due scheduler regions plus viewer samples and starts corrupting
/// countdowns for actors that pass the conversion roll.
pub fn run_conversion_sweep<W: WorldAccess + Resource>(
    mut params: ConversionParams<W>,
    mut scheduler: ResMut<SweepScheduler>,
) {
    let now = params.tick.0;
    let table = params.settings.stages.get();
    let tuning = params.settings.tuning.get();
    let rules = params.settings.rules.get();
    let mapping = params.settings.mapping.get();
    let stage = params.state.cached_stage();
    let viewers = params.world.viewers();

    let mut regions = scheduler.drain_due(now, &tuning.scheduler);
    let world = &*params.world;
    regions.extend(scheduler.sample_viewer_regions(
        &viewers,
        now,
        &tuning.scheduler,
        |region| world.is_region_loaded(region),
        &mut params.rng.0,
    ));
    if now % tuning.scheduler.spread_window_ticks.max(1) == 0 {
        scheduler.prune(now, &tuning.scheduler);
    }
    if regions.is_empty() || table.stage(stage).spawn_chance <= 0.0 {
        return;
    }

    let context = ConversionContext {
        table: &table,
        stage,
        config: &tuning,
        rules: &rules,
        mapping: &mapping,
        field: params.state.field(),
    };
    let mut started = Vec::new();
    for region in regions {
        let selected = context.sweep_region(
            &*params.world,
            region,
            &params.countdowns,
            tuning.scheduler.conversions_per_region,
            &mut params.rng.0,
        );
        for actor in selected {
            if let Some(fx) = params.countdowns.start(
                &*params.world,
                actor,
                false,
                tuning.conversion.countdown_ticks,
                now,
            ) {
                started.push(fx);
            }
        }
    }
    if !started.is_empty() {
        debug!(target: "corruption::scheduler", started = started.len(), "sweep.countdowns_started");
    }
    params.fx.send_batch(started);
}

/// Advances running countdowns; completed cleansings feed the ledger like a
/// purifying kill of the corrupted kind.
pub fn tick_conversion_countdowns<W: WorldAccess + Resource>(
    mut params: ConversionParams<W>,
    mut converted: EventWriter<ActorConverted>,
) {
    if params.countdowns.is_empty() {
        return;
    }
    let now = params.tick.0;
    let tuning = params.settings.tuning.get();
    let mapping = params.settings.mapping.get();
    let report = params
        .countdowns
        .tick(&mut *params.world, &mapping, tuning.conversion.pulse_interval_ticks);
    params.fx.send_batch(report.fx);

    let table = params.settings.stages.get();
    let rules = params.settings.rules.get();
    let context = ProgressionContext {
        table: &table,
        rules: &rules,
        world: &*params.world,
        now,
    };
    for outcome in report.outcomes {
        match outcome {
            CountdownOutcome::Converted(event, position) => {
                if event.cleansing {
                    context.apply_kill_progression(&mut params.state, &event.source_kind, position);
                }
                converted.send(event);
            }
            CountdownOutcome::Failed(actor, err) => {
                debug!(target: "corruption::conversion", %actor, error = %err, "countdown.failed");
            }
        }
    }
}

/// Queues throttled region intensity updates for every viewer.
pub fn sync_viewers<W: WorldAccess + Resource>(
    tuning: Res<CorruptionConfigHandle>,
    tick: Res<SimulationTick>,
    state: Res<CorruptionState>,
    world: Res<W>,
    mut tracker: ResMut<RegionSyncTracker>,
    mut outbox: ResMut<SyncOutbox>,
) {
    let viewers = world.viewers();
    let messages = tracker.collect(
        &viewers,
        state.field(),
        state.cached_stage(),
        tick.0,
        &tuning.get().sync,
    );
    if !messages.is_empty() {
        trace!(target: "corruption::sync", queued = messages.len(), "sync.queued");
        outbox.extend(messages);
    }
}

/// Writes the world state when dirty, every `autosave_interval_ticks`.
pub fn autosave(
    config: Res<SimulationConfig>,
    tick: Res<SimulationTick>,
    store: Option<Res<PersistenceStore>>,
    mut state: ResMut<CorruptionState>,
) {
    let interval = config.autosave_interval_ticks;
    let Some(store) = store else {
        return;
    };
    if interval == 0 || tick.0 % interval != 0 || !state.take_dirty() {
        return;
    }
    match save_state(&state, store.0.as_ref()) {
        Ok(bytes) => info!(target: "corruption::persistence", tick = tick.0, bytes, "save.written"),
        Err(err) => {
            warn!(target: "corruption::persistence", error = %err, "save.failed");
            state.mark_dirty();
        }
    }
}

/// Startup: restores the saved state and resumes the tick counter after it.
pub fn restore_world_state(
    stages: Res<StageTableHandle>,
    store: Option<Res<PersistenceStore>>,
    mut state: ResMut<CorruptionState>,
    mut tick: ResMut<SimulationTick>,
) {
    let Some(store) = store else {
        return;
    };
    let table = stages.get();
    match load_state(&mut state, &table, store.0.as_ref()) {
        Ok(true) => {
            tick.0 = tick.0.max(state.last_loop_tick());
            info!(
                target: "corruption::persistence",
                total = state.total_progress(),
                cells = state.field().len(),
                stage = %state.cached_stage(),
                "save.loaded"
            );
        }
        Ok(false) => info!(target: "corruption::persistence", "save.missing=fresh_world"),
        Err(err) => warn!(target: "corruption::persistence", error = %err, "save.load_failed"),
    }
}

/// Startup: pushes a fresh world into the configured starting stage.
pub fn initialize_starting_stage(
    config: Res<SimulationConfig>,
    stages: Res<StageTableHandle>,
    mut state: ResMut<CorruptionState>,
) {
    let Some(ordinal) = config.initial_stage else {
        return;
    };
    let table = stages.get();
    let stage = StageId(ordinal.min(table.highest().ordinal()));
    state.initialize_stage(&table, stage);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion_mapping::{builtin_mapping_documents, ConversionMapping};
    use crate::corruption_config::CorruptionConfig;
    use crate::grid_world::GridWorld;
    use crate::ledger::ProgressCategory;
    use crate::persistence::MemoryStore;
    use crate::progression_rules::ProgressionRules;
    use crate::stage_config::StageTable;
    use crate::world::{ActorKind, ActorSpawn, BlockPos, Pose, RegionKey, Viewer};
    use bevy::ecs::event::Events;
    use bevy_ecs::system::RunSystemOnce;
    use std::sync::Arc;

    fn test_world(grid: GridWorld) -> World {
        let mut world = World::default();
        let mapping = ConversionMapping::from_documents(&builtin_mapping_documents(), |kind: &ActorKind| {
            grid.knows_kind(kind)
        });
        world.insert_resource(SimulationConfig::default());
        world.insert_resource(SimulationTick::default());
        world.insert_resource(SimRng::from_seed(99));
        world.insert_resource(StageTableHandle::new(StageTable::builtin()));
        world.insert_resource(CorruptionConfigHandle::new(CorruptionConfig::builtin()));
        world.insert_resource(ProgressionRulesHandle::new(ProgressionRules::builtin()));
        world.insert_resource(ConversionMappingHandle::new(Arc::new(mapping)));
        world.insert_resource(CorruptionState::default());
        world.insert_resource(ConversionCountdowns::default());
        world.insert_resource(SweepScheduler::default());
        world.insert_resource(FurnaceTracker::default());
        world.insert_resource(RegionSyncTracker::default());
        world.insert_resource(SyncOutbox::default());
        world.insert_resource(grid);
        world.init_resource::<Events<RegionLoaded>>();
        world.init_resource::<Events<RegionUnloaded>>();
        world.init_resource::<Events<FurnaceLit>>();
        world.init_resource::<Events<SpawnRequested>>();
        world.init_resource::<Events<AmbientCueEvent>>();
        world.init_resource::<Events<ConversionFxEvent>>();
        world.init_resource::<Events<ActorConverted>>();
        world.init_resource::<Events<ColonyNotificationEvent>>();
        world.init_resource::<Events<CookCompletedEvent>>();
        world
    }

    fn set_stage(world: &mut World, stage: u8) {
        let table = world.resource::<StageTableHandle>().get();
        world
            .resource_mut::<CorruptionState>()
            .initialize_stage(&table, StageId(stage));
    }

    #[test]
    fn loop_waits_for_its_period_then_seeds() {
        let mut grid = GridWorld::flat(64);
        grid.add_viewer(Viewer {
            id: 1,
            position: BlockPos::new(0, 64, 0),
        });
        let mut world = test_world(grid);
        set_stage(&mut world, 2);

        world.resource_mut::<SimulationTick>().0 = 17;
        world.run_system_once(run_corruption_loop::<GridWorld>);
        assert!(world.resource::<CorruptionState>().field().is_empty());

        world.resource_mut::<SimulationTick>().0 = 18;
        world.run_system_once(run_corruption_loop::<GridWorld>);
        let state = world.resource::<CorruptionState>();
        assert!(!state.field().is_empty(), "awakened world seeds around viewers");
        assert_eq!(state.last_loop_tick(), 18);
        assert!(state.field().is_seeded());
    }

    #[test]
    fn spawn_requests_become_corrupted_at_high_stage() {
        let mut grid = GridWorld::flat(64);
        let pos = BlockPos::new(4, 64, 4);
        grid.load_region(pos.region());
        let mut world = test_world(grid);
        set_stage(&mut world, 6);
        world
            .resource_mut::<CorruptionState>()
            .on_corrupting_action(pos.region(), 200, 1);

        world.send_event(SpawnRequested {
            spawn: ActorSpawn::new("cow", Pose::at_block(pos)),
        });
        world.run_system_once(handle_spawn_requests::<GridWorld>);

        let grid = world.resource::<GridWorld>();
        let kinds: Vec<&ActorKind> = grid.actors().map(|actor| &actor.kind).collect();
        assert_eq!(kinds, vec![&ActorKind::from("corrupted_cow")]);
    }

    #[test]
    fn finished_cleansing_purifies_the_ledger() {
        let mut grid = GridWorld::flat(64);
        let pos = BlockPos::new(1, 64, 1);
        grid.load_region(pos.region());
        let wolf = grid
            .spawn_actor(ActorSpawn::new("corrupted_wolf", Pose::at_block(pos)))
            .expect("spawned");
        let mut world = test_world(grid);
        {
            let table = world.resource::<StageTableHandle>().get();
            world
                .resource_mut::<CorruptionState>()
                .add_progress(&table, ProgressCategory::Animals, 30);
        }
        world.resource_scope(|world, mut countdowns: Mut<ConversionCountdowns>| {
            let grid = world.resource::<GridWorld>();
            countdowns.start(grid, wolf, true, 2, 0).expect("started");
        });

        world.run_system_once(tick_conversion_countdowns::<GridWorld>);
        assert_eq!(world.resource::<Events<ActorConverted>>().len(), 0);
        world.run_system_once(tick_conversion_countdowns::<GridWorld>);

        assert_eq!(world.resource::<Events<ActorConverted>>().len(), 1);
        assert_eq!(
            world.resource::<CorruptionState>().ledger().get(ProgressCategory::Animals),
            25
        );
        let grid = world.resource::<GridWorld>();
        assert_eq!(grid.actor_count(), 1);
        assert!(grid.actors().all(|actor| actor.kind.as_str() == "wolf"));
    }

    #[test]
    fn region_loads_schedule_sweeps() {
        let mut world = test_world(GridWorld::flat(64));
        world.send_event(RegionLoaded {
            region: RegionKey::new(2, 3),
        });
        world.run_system_once(process_region_events::<GridWorld>);
        assert_eq!(world.resource::<SweepScheduler>().pending_len(), 1);

        world.send_event(RegionUnloaded {
            region: RegionKey::new(2, 3),
        });
        world.run_system_once(process_region_events::<GridWorld>);
        assert_eq!(world.resource::<SweepScheduler>().pending_len(), 0);
    }

    #[test]
    fn autosave_only_writes_dirty_state_on_interval() {
        let mut world = test_world(GridWorld::flat(64));
        let store = MemoryStore::new();
        world.insert_resource(PersistenceStore::new(store.clone()));
        world
            .resource_mut::<CorruptionState>()
            .on_corrupting_action(RegionKey::new(0, 0), 5, 1);

        world.resource_mut::<SimulationTick>().0 = 5_999;
        world.run_system_once(autosave);
        assert!(!store.has_save());

        world.resource_mut::<SimulationTick>().0 = 6_000;
        world.run_system_once(autosave);
        assert!(store.has_save());
        assert!(!world.resource::<CorruptionState>().is_dirty());
    }

    #[test]
    fn starting_stage_is_clamped_to_the_table() {
        let mut world = test_world(GridWorld::flat(64));
        world.insert_resource(SimulationConfig {
            initial_stage: Some(40),
            ..SimulationConfig::default()
        });
        world.run_system_once(initialize_starting_stage);
        let table = StageTable::builtin();
        let state = world.resource::<CorruptionState>();
        assert_eq!(state.current_stage(&table), table.highest());
        assert!(state.is_initialized());
    }
}
