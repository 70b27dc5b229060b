//! In-memory world used by the headless app, the server binary and tests.
//!
//! Terrain is a single grass layer over solid ground. Column heights are
//! generated per region from the world seed when the region loads, so the same
//! seed always yields the same surface.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bevy::prelude::Resource;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::hashing::fmix64;
use crate::world::{
    ActorId, ActorKind, ActorSpawn, ActorState, BlockKind, BlockPos, ColonyView, FurnaceState,
    RegionKey, Viewer, WorldAccess,
};
use corruption_schema::REGION_SIZE;

const DEFAULT_KINDS: [(&str, f32); 12] = [
    ("cow", 10.0),
    ("pig", 10.0),
    ("sheep", 8.0),
    ("wolf", 8.0),
    ("zombie", 20.0),
    ("villager", 20.0),
    ("corrupted_cow", 15.0),
    ("corrupted_pig", 15.0),
    ("corrupted_sheep", 12.0),
    ("corrupted_wolf", 12.0),
    ("corrupted_zombie", 30.0),
    ("corrupted_villager", 30.0),
];

#[derive(Resource, Debug, Clone)]
pub struct GridWorld {
    seed: u64,
    base_height: i32,
    height_variation: i32,
    min_build_height: i32,
    loaded: BTreeSet<RegionKey>,
    heights: HashMap<(i32, i32), i32>,
    blocks: HashMap<BlockPos, BlockKind>,
    light: HashMap<BlockPos, u8>,
    ambient_light: u8,
    night: bool,
    viewers: Vec<Viewer>,
    actors: BTreeMap<ActorId, ActorState>,
    next_actor: u64,
    kinds: HashMap<ActorKind, f32>,
    protections: HashMap<RegionKey, f64>,
    furnaces: BTreeMap<BlockPos, FurnaceState>,
    colonies: Vec<ColonyView>,
    reject_spawns: bool,
    pinned: BTreeSet<ActorId>,
}

impl GridWorld {
    /// Rolling terrain between 62 and 69 derived from `seed`.
    pub fn generated(seed: u64) -> Self {
        Self::with_terrain(seed, 62, 8)
    }

    /// Perfectly flat terrain whose first air block is at `height`.
    pub fn flat(height: i32) -> Self {
        Self::with_terrain(0, height, 0)
    }

    fn with_terrain(seed: u64, base_height: i32, height_variation: i32) -> Self {
        Self {
            seed,
            base_height,
            height_variation,
            min_build_height: -64,
            loaded: BTreeSet::new(),
            heights: HashMap::new(),
            blocks: HashMap::new(),
            light: HashMap::new(),
            ambient_light: 0,
            night: true,
            viewers: Vec::new(),
            actors: BTreeMap::new(),
            next_actor: 1,
            kinds: DEFAULT_KINDS
                .iter()
                .map(|(kind, health)| (ActorKind::from(*kind), *health))
                .collect(),
            protections: HashMap::new(),
            furnaces: BTreeMap::new(),
            colonies: Vec::new(),
            reject_spawns: false,
            pinned: BTreeSet::new(),
        }
    }

    /// Marks a region loaded and generates its column heights. Returns false if already loaded.
    pub fn load_region(&mut self, region: RegionKey) -> bool {
        if !self.loaded.insert(region) {
            return false;
        }
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ fmix64(region.pack() as u64));
        for dx in 0..REGION_SIZE {
            for dz in 0..REGION_SIZE {
                let height = if self.height_variation > 0 {
                    self.base_height + rng.gen_range(0..self.height_variation)
                } else {
                    self.base_height
                };
                self.heights
                    .insert((region.min_block_x() + dx, region.min_block_z() + dz), height);
            }
        }
        true
    }

    /// Drops a region's terrain and actors from memory. Block edits are kept.
    pub fn unload_region(&mut self, region: RegionKey) -> bool {
        if !self.loaded.remove(&region) {
            return false;
        }
        self.heights
            .retain(|(x, z), _| RegionKey::containing(*x, *z) != region);
        self.actors.retain(|_, actor| actor.pose.region() != region);
        true
    }

    pub fn loaded_regions(&self) -> impl Iterator<Item = &RegionKey> {
        self.loaded.iter()
    }

    pub fn add_viewer(&mut self, viewer: Viewer) {
        self.viewers.retain(|existing| existing.id != viewer.id);
        self.viewers.push(viewer);
    }

    pub fn move_viewer(&mut self, id: u64, position: BlockPos) -> bool {
        match self.viewers.iter_mut().find(|viewer| viewer.id == id) {
            Some(viewer) => {
                viewer.position = position;
                true
            }
            None => false,
        }
    }

    pub fn remove_viewer(&mut self, id: u64) {
        self.viewers.retain(|viewer| viewer.id != id);
    }

    pub fn register_kind(&mut self, kind: impl Into<ActorKind>, max_health: f32) {
        self.kinds.insert(kind.into(), max_health);
    }

    pub fn knows_kind(&self, kind: &ActorKind) -> bool {
        self.kinds.contains_key(kind)
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    pub fn actors(&self) -> impl Iterator<Item = &ActorState> {
        self.actors.values()
    }

    pub fn set_actor_health(&mut self, id: ActorId, health: f32) {
        if let Some(actor) = self.actors.get_mut(&id) {
            actor.health = health;
        }
    }

    pub fn reject_spawns(&mut self, reject: bool) {
        self.reject_spawns = reject;
    }

    /// A pinned actor survives `discard_actor`, which then reports false.
    pub fn pin_actor(&mut self, id: ActorId, pinned: bool) {
        if pinned {
            self.pinned.insert(id);
        } else {
            self.pinned.remove(&id);
        }
    }

    pub fn set_night(&mut self, night: bool) {
        self.night = night;
    }

    pub fn set_ambient_light(&mut self, level: u8) {
        self.ambient_light = level.min(15);
    }

    pub fn set_light(&mut self, pos: BlockPos, level: u8) {
        self.light.insert(pos, level.min(15));
    }

    pub fn set_protection(&mut self, region: RegionKey, protection: f64) {
        self.protections.insert(region, protection);
    }

    pub fn place_furnace(&mut self, pos: BlockPos, furnace: FurnaceState) {
        self.furnaces.insert(pos, furnace);
    }

    pub fn furnace_mut(&mut self, pos: BlockPos) -> Option<&mut FurnaceState> {
        self.furnaces.get_mut(&pos)
    }

    pub fn remove_furnace(&mut self, pos: BlockPos) -> bool {
        self.furnaces.remove(&pos).is_some()
    }

    pub fn add_colony(&mut self, colony: ColonyView) {
        self.colonies.retain(|existing| existing.key != colony.key);
        self.colonies.push(colony);
    }

    pub fn count_blocks(&self, kind: BlockKind) -> usize {
        self.blocks.values().filter(|block| **block == kind).count()
    }
}

impl Default for GridWorld {
    fn default() -> Self {
        Self::generated(0)
    }
}

impl WorldAccess for GridWorld {
    fn viewers(&self) -> Vec<Viewer> {
        self.viewers.clone()
    }

    fn is_region_loaded(&self, region: RegionKey) -> bool {
        self.loaded.contains(&region)
    }

    fn surface_height(&self, x: i32, z: i32) -> Option<i32> {
        self.heights.get(&(x, z)).copied()
    }

    fn block_at(&self, pos: BlockPos) -> BlockKind {
        if let Some(block) = self.blocks.get(&pos) {
            return *block;
        }
        match self.surface_height(pos.x, pos.z) {
            Some(height) if pos.y < height - 1 => BlockKind::Solid,
            Some(height) if pos.y == height - 1 => BlockKind::Grass,
            _ => BlockKind::Air,
        }
    }

    fn set_block(&mut self, pos: BlockPos, block: BlockKind) -> bool {
        if !self.is_region_loaded(pos.region()) {
            return false;
        }
        self.blocks.insert(pos, block);
        true
    }

    fn block_light(&self, pos: BlockPos) -> u8 {
        self.light.get(&pos).copied().unwrap_or(self.ambient_light)
    }

    fn is_night(&self) -> bool {
        self.night
    }

    fn min_build_height(&self) -> i32 {
        self.min_build_height
    }

    fn actor(&self, id: ActorId) -> Option<&ActorState> {
        self.actors.get(&id)
    }

    fn actors_in_region(&self, region: RegionKey) -> Vec<ActorId> {
        self.actors
            .values()
            .filter(|actor| actor.pose.region() == region)
            .map(|actor| actor.id)
            .collect()
    }

    fn max_health_of(&self, kind: &ActorKind) -> Option<f32> {
        self.kinds.get(kind).copied()
    }

    fn spawn_actor(&mut self, spawn: ActorSpawn) -> Option<ActorId> {
        if self.reject_spawns || !self.is_region_loaded(spawn.pose.region()) {
            return None;
        }
        let max_health = self.max_health_of(&spawn.kind)?;
        let id = ActorId(self.next_actor);
        self.next_actor += 1;
        self.actors.insert(
            id,
            ActorState {
                id,
                kind: spawn.kind,
                pose: spawn.pose,
                health: spawn.health.unwrap_or(max_health).min(max_health),
                flags: spawn.flags,
                custom_name: spawn.custom_name,
                leash_holder: spawn.leash_holder,
            },
        );
        Some(id)
    }

    fn discard_actor(&mut self, id: ActorId) -> bool {
        if self.pinned.contains(&id) {
            return false;
        }
        self.actors.remove(&id).is_some()
    }

    fn region_protection(&self, region: RegionKey) -> f64 {
        self.protections.get(&region).copied().unwrap_or(0.0)
    }

    fn furnaces_in_region(&self, region: RegionKey) -> Vec<BlockPos> {
        self.furnaces
            .keys()
            .filter(|pos| pos.region() == region)
            .copied()
            .collect()
    }

    fn furnace(&self, pos: BlockPos) -> Option<FurnaceState> {
        if !self.is_region_loaded(pos.region()) {
            return None;
        }
        self.furnaces.get(&pos).cloned()
    }

    fn colonies(&self) -> Vec<ColonyView> {
        self.colonies.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::Pose;

    #[test]
    fn generated_terrain_is_seed_stable() {
        let region = RegionKey::new(3, -7);
        let mut a = GridWorld::generated(11);
        let mut b = GridWorld::generated(11);
        a.load_region(region);
        b.load_region(region);
        for dx in 0..REGION_SIZE {
            let (x, z) = (region.min_block_x() + dx, region.min_block_z() + dx);
            let height = a.surface_height(x, z).expect("loaded column");
            assert_eq!(Some(height), b.surface_height(x, z));
            assert!((62..70).contains(&height));
            assert_eq!(a.block_at(BlockPos::new(x, height - 1, z)), BlockKind::Grass);
            assert_eq!(a.block_at(BlockPos::new(x, height, z)), BlockKind::Air);
        }
    }

    #[test]
    fn unloaded_regions_refuse_writes_and_spawns() {
        let mut world = GridWorld::flat(64);
        let pos = BlockPos::new(1, 63, 1);
        assert!(!world.set_block(pos, BlockKind::BlightedGrass));
        assert!(world
            .spawn_actor(ActorSpawn::new("cow", Pose::at_block(pos)))
            .is_none());
        world.load_region(pos.region());
        assert!(world.set_block(pos, BlockKind::BlightedGrass));
        let cow = world
            .spawn_actor(ActorSpawn::new("cow", Pose::at_block(pos)))
            .expect("spawned");
        assert_eq!(world.actors_in_region(pos.region()), vec![cow]);

        world.unload_region(pos.region());
        assert_eq!(world.actor_count(), 0);
        assert_eq!(world.block_at(pos), BlockKind::BlightedGrass);
    }
}
