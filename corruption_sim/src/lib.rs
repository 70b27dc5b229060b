//! Core simulation crate for the headless corruption engine.
//!
//! A world-scale corruption condition: a progression ledger mapped onto stages,
//! a sparse per-region intensity field, budgeted actor conversion and surface
//! mutation, all advanced one game tick per [`run_tick`].

pub mod blight;
pub mod chance;
pub mod colony;
pub mod conversion;
pub mod conversion_mapping;
pub mod corruption_config;
pub mod events;
pub mod field;
pub mod furnace;
pub mod grid_world;
pub mod hashing;
pub mod ledger;
pub mod loot;
pub mod network;
pub mod persistence;
pub mod progression;
pub mod progression_rules;
mod resources;
pub mod scheduler;
pub mod stage_config;
pub mod state;
pub mod sync;
pub mod systems;
pub mod world;

use std::sync::Arc;

use bevy::prelude::*;

pub use blight::{BlightRecords, BlightReport};
pub use conversion::{
    check_corrupted_spawn, convert_actor, ConversionContext, ConversionCountdowns, ConversionError,
};
pub use conversion_mapping::{
    ConversionMapping, ConversionMappingHandle, MappingDocument, MappingEntry, MappingError,
    MappingWatcher,
};
pub use corruption_config::{CorruptionConfig, CorruptionConfigHandle, MAX_INTENSITY};
pub use events::{
    ActorConverted, AmbientCueEvent, ColonyNotificationEvent, ConversionFxEvent, ConversionFxPhase,
    CookCompletedEvent, FurnaceLit, RegionLoaded, RegionUnloaded, SpawnRequested,
};
pub use field::{CorruptionField, SpatialCell};
pub use furnace::FurnaceTracker;
pub use grid_world::GridWorld;
pub use ledger::{ProgressCategory, ProgressionLedger};
pub use loot::{corrupt_loot, LootContext, LootSource};
pub use persistence::{
    FileStore, MemoryStore, PersistenceError, PersistenceStore, PersistentStore,
};
pub use progression::{BlockAction, ProgressionContext};
pub use progression_rules::{ProgressionRules, ProgressionRulesHandle, ProgressionTier};
pub use resources::{
    load_simulation_config_from_env, SimRng, SimulationConfig, SimulationConfigError,
    SimulationTick,
};
pub use scheduler::SweepScheduler;
pub use stage_config::{StageDefinition, StageId, StageTable, StageTableError, StageTableHandle};
pub use state::CorruptionState;
pub use sync::{RegionSyncTracker, SyncOutbox};
pub use world::{
    ActorFlags, ActorId, ActorKind, ActorSpawn, ActorState, BlockKind, BlockPos, ColonyView,
    FurnaceKind, FurnaceState, ItemStack, Pose, RegionKey, Viewer, WorldAccess,
};

/// Construct a Bevy [`App`] running the corruption pipeline against a
/// generated [`GridWorld`].
///
/// Configuration comes from the `*_PATH` environment overrides, falling back
/// to the builtin JSON. Fails only when the stage table is empty.
pub fn try_build_headless_app() -> Result<App, StageTableError> {
    let config = load_simulation_config_from_env();
    let stages = stage_config::load_stage_table_from_env()?;
    let tuning = corruption_config::load_corruption_config_from_env();
    let rules = progression_rules::load_progression_rules_from_env();
    let grid = GridWorld::generated(config.world_seed());
    let mapping = conversion_mapping::load_conversion_mappings_from_env(|kind| grid.knows_kind(kind));
    let store = match &config.save_path {
        Some(path) => PersistenceStore::new(FileStore::new(path.clone())),
        None => PersistenceStore::new(MemoryStore::new()),
    };
    let watcher = config.mapping_dir.as_deref().and_then(|dir| {
        MappingWatcher::start(dir)
            .map_err(|err| {
                tracing::warn!(target: "corruption::config", error = %err, "mapping.watch_disabled");
            })
            .ok()
    });

    let mut app = App::new();
    app.insert_resource(SimRng::from_config(&config))
        .insert_resource(config)
        .insert_resource(SimulationTick::default())
        .insert_resource(StageTableHandle::new(stages))
        .insert_resource(CorruptionConfigHandle::new(tuning))
        .insert_resource(ProgressionRulesHandle::new(rules))
        .insert_resource(ConversionMappingHandle::new(Arc::new(mapping)))
        .insert_resource(CorruptionState::default())
        .insert_resource(ConversionCountdowns::default())
        .insert_resource(SweepScheduler::default())
        .insert_resource(FurnaceTracker::default())
        .insert_resource(RegionSyncTracker::default())
        .insert_resource(SyncOutbox::default())
        .insert_resource(store)
        .insert_resource(grid)
        .add_event::<RegionLoaded>()
        .add_event::<RegionUnloaded>()
        .add_event::<FurnaceLit>()
        .add_event::<SpawnRequested>()
        .add_event::<AmbientCueEvent>()
        .add_event::<ConversionFxEvent>()
        .add_event::<ActorConverted>()
        .add_event::<ColonyNotificationEvent>()
        .add_event::<CookCompletedEvent>()
        .add_plugins(MinimalPlugins)
        .add_systems(
            Startup,
            (
                systems::restore_world_state,
                systems::initialize_starting_stage,
            )
                .chain(),
        )
        .add_systems(
            Update,
            (
                systems::advance_tick,
                systems::process_region_events::<GridWorld>,
                systems::reload_mappings::<GridWorld>,
                systems::handle_spawn_requests::<GridWorld>,
                systems::run_corruption_loop::<GridWorld>,
                systems::poll_furnaces::<GridWorld>,
                systems::run_conversion_sweep::<GridWorld>,
                systems::tick_conversion_countdowns::<GridWorld>,
                systems::sync_viewers::<GridWorld>,
                systems::autosave,
            )
                .chain(),
        );
    if let Some(watcher) = watcher {
        app.insert_resource(watcher);
    }

    Ok(app)
}

/// Like [`try_build_headless_app`], but an empty stage table aborts.
pub fn build_headless_app() -> App {
    match try_build_headless_app() {
        Ok(app) => app,
        Err(err) => panic!("invalid stage table configuration: {err}"),
    }
}

/// Execute a single simulation tick.
///
/// Startup systems run on the first call.
pub fn run_tick(app: &mut App) {
    app.update();
}

pub fn current_tick(app: &App) -> u64 {
    app.world.resource::<SimulationTick>().0
}

/// Loads a region of the grid world and reports it to the pipeline.
pub fn load_region(app: &mut App, region: RegionKey) {
    if app.world.resource_mut::<GridWorld>().load_region(region) {
        app.world.send_event(RegionLoaded { region });
    }
}

pub fn unload_region(app: &mut App, region: RegionKey) {
    if app.world.resource_mut::<GridWorld>().unload_region(region) {
        app.world.send_event(RegionUnloaded { region });
    }
}

/// Adds signed progress to one ledger category.
pub fn add_progress(app: &mut App, category: ProgressCategory, delta: i64) -> i64 {
    let table = app.world.resource::<StageTableHandle>().get();
    app.world
        .resource_mut::<CorruptionState>()
        .add_progress(&table, category, delta)
}

/// Clears the ledger and every per-world structure; returns the resulting stage.
pub fn reset_corruption(app: &mut App) -> StageId {
    let table = app.world.resource::<StageTableHandle>().get();
    app.world.resource_mut::<ConversionCountdowns>().clear();
    app.world.resource_mut::<RegionSyncTracker>().clear();
    app.world.resource_mut::<CorruptionState>().reset(&table)
}

fn with_progression<T>(
    app: &mut App,
    apply: impl FnOnce(&ProgressionContext<'_, GridWorld>, &mut CorruptionState) -> T,
) -> T {
    let table = app.world.resource::<StageTableHandle>().get();
    let rules = app.world.resource::<ProgressionRulesHandle>().get();
    let now = current_tick(app);
    app.world
        .resource_scope(|world, mut state: Mut<CorruptionState>| {
            let context = ProgressionContext {
                table: &table,
                rules: &rules,
                world: world.resource::<GridWorld>(),
                now,
            };
            apply(&context, &mut state)
        })
}

pub fn record_block_action(app: &mut App, pos: BlockPos, block_id: &str, action: BlockAction) -> i64 {
    with_progression(app, |context, state| {
        context.apply_block_progression(state, pos, block_id, action)
    })
}

pub fn record_kill(app: &mut App, kind: &ActorKind, pos: BlockPos) -> i64 {
    with_progression(app, |context, state| context.apply_kill_progression(state, kind, pos))
}

pub fn record_refugee_intake(app: &mut App, pos: BlockPos) -> bool {
    with_progression(app, |context, state| context.apply_refugee_intake(state, pos))
}

/// Starts a cleansing countdown on a corrupted actor. Idempotent while running.
pub fn start_cleansing(app: &mut App, actor: ActorId) -> bool {
    let length = app
        .world
        .resource::<CorruptionConfigHandle>()
        .get()
        .conversion
        .countdown_ticks;
    let now = current_tick(app);
    let fx = app
        .world
        .resource_scope(|world, mut countdowns: Mut<ConversionCountdowns>| {
            countdowns.start(world.resource::<GridWorld>(), actor, true, length, now)
        });
    match fx {
        Some(fx) => {
            app.world.send_event(fx);
            true
        }
        None => false,
    }
}

/// Rolls loot corruption for a batch of drops at the current stage.
pub fn corrupt_drops(app: &mut App, context: LootContext, drops: &mut [ItemStack]) -> usize {
    let table = app.world.resource::<StageTableHandle>().get();
    let rules = app.world.resource::<ProgressionRulesHandle>().get();
    let stage = app.world.resource::<CorruptionState>().cached_stage();
    let mut rng = app.world.resource_mut::<SimRng>();
    corrupt_loot(table.stage(stage), &rules.loot, context, drops, &mut rng.0)
}

/// Drains queued sync messages into one frame.
pub fn take_sync_frame(app: &mut App) -> Option<corruption_schema::RegionSyncFrame> {
    let tick = current_tick(app);
    app.world.resource_mut::<SyncOutbox>().take_frame(tick)
}

/// Writes the current state through the configured store, regardless of dirtiness.
pub fn save_now(app: &mut App) -> Result<usize, PersistenceError> {
    app.world
        .resource_scope(|world, mut state: Mut<CorruptionState>| {
            let store = world.resource::<PersistenceStore>();
            let bytes = persistence::save_state(&state, store.0.as_ref())?;
            state.take_dirty();
            Ok(bytes)
        })
}
