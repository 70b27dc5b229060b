//! Cook-completion tracking for furnace-like blocks.
//!
//! The host never reports finished cooks directly, so tracked furnaces are
//! polled and their slot snapshots diffed. A completion is output growing while
//! input shrinks, both with the same item as the previous snapshot.

use std::collections::BTreeMap;

use bevy::prelude::Resource;

use crate::corruption_config::FurnaceConfig;
use crate::events::CookCompletedEvent;
use crate::world::{BlockPos, FurnaceKind, FurnaceState, ItemStack, RegionKey, WorldAccess};

#[derive(Debug, Clone, PartialEq, Eq)]
struct SlotSnapshot {
    input: Option<ItemStack>,
    output: Option<ItemStack>,
    fuel_item: Option<String>,
    last_active: u64,
}

impl SlotSnapshot {
    fn capture(state: &FurnaceState, now: u64) -> Self {
        Self {
            input: state.input.clone(),
            output: state.output.clone(),
            fuel_item: state.fuel.as_ref().map(|fuel| fuel.item.clone()),
            last_active: now,
        }
    }
}

fn cook_ticks(config: &FurnaceConfig, kind: FurnaceKind) -> u64 {
    match kind {
        FurnaceKind::Smelting => config.smelting_cook_ticks,
        FurnaceKind::Smoking => config.smoking_cook_ticks,
        FurnaceKind::Blasting => config.blasting_cook_ticks,
    }
}

fn count_of(stack: &Option<ItemStack>) -> u32 {
    stack.as_ref().map_or(0, |stack| stack.count)
}

fn same_item(previous: &Option<ItemStack>, current: &Option<ItemStack>) -> bool {
    match (previous, current) {
        (Some(previous), Some(current)) => previous.item == current.item,
        _ => true,
    }
}

/// Number of cooks finished between two snapshots; zero for extraction or swaps.
fn completed_crafts(previous: &SlotSnapshot, current: &FurnaceState) -> u32 {
    if !same_item(&previous.output, &current.output) || !same_item(&previous.input, &current.input) {
        return 0;
    }
    let produced = count_of(&current.output).saturating_sub(count_of(&previous.output));
    let consumed = count_of(&previous.input).saturating_sub(count_of(&current.input));
    produced.min(consumed)
}

#[derive(Resource, Debug, Clone, Default)]
pub struct FurnaceTracker {
    active: BTreeMap<BlockPos, SlotSnapshot>,
}

impl FurnaceTracker {
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn is_tracking(&self, pos: BlockPos) -> bool {
        self.active.contains_key(&pos)
    }

    fn track(&mut self, pos: BlockPos, state: &FurnaceState, now: u64) {
        self.active
            .entry(pos)
            .and_modify(|snapshot| snapshot.last_active = now)
            .or_insert_with(|| SlotSnapshot::capture(state, now));
    }

    /// Picks up every furnace in a freshly loaded region.
    pub fn on_region_loaded<W: WorldAccess>(&mut self, world: &W, region: RegionKey, now: u64) -> usize {
        let mut added = 0;
        for pos in world.furnaces_in_region(region) {
            if let Some(state) = world.furnace(pos) {
                if !self.active.contains_key(&pos) {
                    added += 1;
                }
                self.track(pos, &state, now);
            }
        }
        added
    }

    pub fn on_region_unloaded(&mut self, region: RegionKey) {
        self.active.retain(|pos, _| pos.region() != region);
    }

    pub fn on_furnace_lit<W: WorldAccess>(&mut self, world: &W, pos: BlockPos, now: u64) -> bool {
        let Some(state) = world.furnace(pos) else {
            return false;
        };
        self.track(pos, &state, now);
        true
    }

    /// Diffs every tracked furnace against the world and reports completions.
    pub fn poll<W: WorldAccess>(&mut self, world: &W, now: u64, config: &FurnaceConfig) -> Vec<CookCompletedEvent> {
        let mut completed = Vec::new();
        self.active.retain(|pos, snapshot| {
            let Some(state) = world.furnace(*pos) else {
                tracing::trace!(target: "corruption::furnace", x = pos.x, y = pos.y, z = pos.z, "furnace.dropped=missing");
                return false;
            };

            let crafts = completed_crafts(snapshot, &state);
            if crafts > 0 {
                let fuel_item = state
                    .fuel
                    .as_ref()
                    .map(|fuel| fuel.item.clone())
                    .or_else(|| snapshot.fuel_item.clone());
                completed.push(CookCompletedEvent {
                    position: *pos,
                    fuel_item,
                    crafts,
                });
            }

            let last_active = if state.lit || crafts > 0 { now } else { snapshot.last_active };
            let remembered_fuel = snapshot.fuel_item.take();
            *snapshot = SlotSnapshot::capture(&state, last_active);
            if snapshot.fuel_item.is_none() {
                snapshot.fuel_item = remembered_fuel;
            }

            let grace = config.idle_grace_ticks + cook_ticks(config, state.kind);
            now < snapshot.last_active.saturating_add(grace)
        });
        if !completed.is_empty() {
            tracing::debug!(target: "corruption::furnace", completed = completed.len(), "furnace.cooks_completed");
        }
        completed
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid_world::GridWorld;

    fn furnace(input: u32, output: u32) -> FurnaceState {
        FurnaceState {
            kind: FurnaceKind::Smelting,
            lit: true,
            input: (input > 0).then(|| ItemStack::new("iron_ore", input)),
            fuel: Some(ItemStack::new("coal", 4)),
            output: (output > 0).then(|| ItemStack::new("iron_ingot", output)),
        }
    }

    fn setup() -> (GridWorld, BlockPos) {
        let mut world = GridWorld::flat(64);
        let pos = BlockPos::new(2, 64, 2);
        world.load_region(pos.region());
        world.place_furnace(pos, furnace(8, 0));
        (world, pos)
    }

    #[test]
    fn output_growth_with_input_drop_is_a_cook() {
        let (mut world, pos) = setup();
        let config = FurnaceConfig::default();
        let mut tracker = FurnaceTracker::default();
        assert_eq!(tracker.on_region_loaded(&world, pos.region(), 0), 1);

        *world.furnace_mut(pos).expect("furnace") = furnace(6, 2);
        let events = tracker.poll(&world, 3, &config);
        assert_eq!(
            events,
            vec![CookCompletedEvent {
                position: pos,
                fuel_item: Some("coal".into()),
                crafts: 2,
            }]
        );
        assert!(tracker.poll(&world, 6, &config).is_empty());
    }

    #[test]
    fn extraction_and_item_swaps_are_not_cooks() {
        let (mut world, pos) = setup();
        let config = FurnaceConfig::default();
        let mut tracker = FurnaceTracker::default();
        tracker.on_furnace_lit(&world, pos, 0);

        *world.furnace_mut(pos).expect("furnace") = furnace(6, 2);
        tracker.poll(&world, 3, &config);
        *world.furnace_mut(pos).expect("furnace") = furnace(6, 0);
        assert!(tracker.poll(&world, 6, &config).is_empty());

        let swapped = world.furnace_mut(pos).expect("furnace");
        swapped.input = Some(ItemStack::new("beef", 3));
        swapped.output = Some(ItemStack::new("iron_ingot", 1));
        assert!(tracker.poll(&world, 9, &config).is_empty());
    }

    #[test]
    fn idle_and_missing_furnaces_are_dropped() {
        let (mut world, pos) = setup();
        let config = FurnaceConfig::default();
        let mut tracker = FurnaceTracker::default();
        tracker.on_furnace_lit(&world, pos, 0);

        world.furnace_mut(pos).expect("furnace").lit = false;
        tracker.poll(&world, 3, &config);
        assert!(tracker.is_tracking(pos));
        tracker.poll(&world, 499, &config);
        assert!(tracker.is_tracking(pos));
        tracker.poll(&world, 500, &config);
        assert!(!tracker.is_tracking(pos));

        tracker.on_furnace_lit(&world, pos, 600);
        world.remove_furnace(pos);
        tracker.poll(&world, 603, &config);
        assert!(tracker.is_empty());
    }

    #[test]
    fn unloaded_regions_drop_their_furnaces() {
        let (mut world, pos) = setup();
        let mut tracker = FurnaceTracker::default();
        tracker.on_region_loaded(&world, pos.region(), 0);
        world.unload_region(pos.region());
        assert!(!tracker.on_furnace_lit(&world, pos, 1));
        tracker.on_region_unloaded(pos.region());
        assert!(tracker.is_empty());
    }
}
