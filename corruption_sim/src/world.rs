//! World accessor seam.
//!
//! Everything the corruption engine needs from the host world (blocks, light,
//! actors, viewers, furnaces, colonies) goes through [`WorldAccess`]. The
//! headless app wires the in-memory [`crate::GridWorld`].

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

pub use corruption_schema::{BlockPos, RegionKey};

/// Stable identifier of a live actor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(pub u64);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

/// Registry name of an actor type (`"wolf"`, `"corrupted_wolf"`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ActorKind(pub String);

impl ActorKind {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActorKind {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

bitflags! {
    /// Presentation and behaviour flags carried across a conversion.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ActorFlags: u16 {
        const NAME_VISIBLE = 1 << 0;
        const SILENT = 1 << 1;
        const NO_GRAVITY = 1 << 2;
        const INVULNERABLE = 1 << 3;
        const GLOWING = 1 << 4;
        const NO_AI = 1 << 5;
        const LEFT_HANDED = 1 << 6;
        const PERSISTENT = 1 << 7;
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
}

impl Pose {
    pub fn at_block(pos: BlockPos) -> Self {
        Self {
            x: pos.x as f64 + 0.5,
            y: pos.y as f64,
            z: pos.z as f64 + 0.5,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    pub fn block_pos(&self) -> BlockPos {
        BlockPos::new(
            self.x.floor() as i32,
            self.y.floor() as i32,
            self.z.floor() as i32,
        )
    }

    pub fn region(&self) -> RegionKey {
        self.block_pos().region()
    }
}

/// Live actor as observed through the world accessor.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorState {
    pub id: ActorId,
    pub kind: ActorKind,
    pub pose: Pose,
    pub health: f32,
    pub flags: ActorFlags,
    pub custom_name: Option<String>,
    pub leash_holder: Option<ActorId>,
}

/// Request to place a new actor in the world.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorSpawn {
    pub kind: ActorKind,
    pub pose: Pose,
    /// `None` means full health for the kind.
    pub health: Option<f32>,
    pub flags: ActorFlags,
    pub custom_name: Option<String>,
    pub leash_holder: Option<ActorId>,
}

impl ActorSpawn {
    pub fn new(kind: impl Into<ActorKind>, pose: Pose) -> Self {
        Self {
            kind: kind.into(),
            pose,
            health: None,
            flags: ActorFlags::empty(),
            custom_name: None,
            leash_holder: None,
        }
    }
}

impl From<String> for ActorKind {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Air,
    Grass,
    BlightedGrass,
    Solid,
}

/// Remote participant whose surroundings drive seeding, cues, blight and sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer {
    pub id: u64,
    pub position: BlockPos,
}

impl Viewer {
    pub fn region(&self) -> RegionKey {
        self.position.region()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub item: String,
    pub count: u32,
}

impl ItemStack {
    pub fn new(item: impl Into<String>, count: u32) -> Self {
        Self {
            item: item.into(),
            count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FurnaceKind {
    Smelting,
    Smoking,
    Blasting,
}

/// Slot contents of a cooking block at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FurnaceState {
    pub kind: FurnaceKind,
    pub lit: bool,
    pub input: Option<ItemStack>,
    pub fuel: Option<ItemStack>,
    pub output: Option<ItemStack>,
}

/// Read-only view of a colony supplied by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColonyView {
    pub key: String,
    pub center: BlockPos,
    pub radius: i32,
    pub building_levels: Vec<u8>,
    pub sustainability_level: u8,
}

impl ColonyView {
    pub fn contains(&self, pos: BlockPos) -> bool {
        (pos.x - self.center.x).abs() <= self.radius && (pos.z - self.center.z).abs() <= self.radius
    }

    pub fn max_building_level(&self) -> u8 {
        self.building_levels.iter().copied().max().unwrap_or(0)
    }
}

/// Host world as seen by the corruption engine.
///
/// Implementations must be cheap for point queries; the engine never asks for
/// whole-world scans.
pub trait WorldAccess {
    fn viewers(&self) -> Vec<Viewer>;

    fn is_region_loaded(&self, region: RegionKey) -> bool;

    /// Y coordinate of the first air block above the terrain column.
    fn surface_height(&self, x: i32, z: i32) -> Option<i32>;

    fn block_at(&self, pos: BlockPos) -> BlockKind;

    fn set_block(&mut self, pos: BlockPos, block: BlockKind) -> bool;

    fn block_light(&self, pos: BlockPos) -> u8;

    fn is_night(&self) -> bool;

    fn min_build_height(&self) -> i32;

    fn actor(&self, id: ActorId) -> Option<&ActorState>;

    fn actors_in_region(&self, region: RegionKey) -> Vec<ActorId>;

    /// Maximum health of a kind, or `None` when the kind is not registered.
    fn max_health_of(&self, kind: &ActorKind) -> Option<f32>;

    /// Returns `None` when the world refuses the placement.
    fn spawn_actor(&mut self, spawn: ActorSpawn) -> Option<ActorId>;

    fn discard_actor(&mut self, id: ActorId) -> bool;

    /// Fraction in `[0, 1]` by which corrupting writes into `region` are reduced.
    fn region_protection(&self, _region: RegionKey) -> f64 {
        0.0
    }

    fn furnaces_in_region(&self, region: RegionKey) -> Vec<BlockPos>;

    fn furnace(&self, pos: BlockPos) -> Option<FurnaceState>;

    fn colonies(&self) -> Vec<ColonyView>;

    fn colony_at(&self, pos: BlockPos) -> Option<ColonyView> {
        self.colonies().into_iter().find(|colony| colony.contains(pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pose_maps_to_block_and_region() {
        let pose = Pose {
            x: -0.25,
            y: 64.9,
            z: 31.5,
            yaw: 0.0,
            pitch: 0.0,
        };
        assert_eq!(pose.block_pos(), BlockPos::new(-1, 64, 31));
        assert_eq!(pose.region(), RegionKey::new(-1, 1));
    }

    #[test]
    fn colony_bounds_are_square() {
        let colony = ColonyView {
            key: "north".into(),
            center: BlockPos::new(100, 70, 100),
            radius: 8,
            building_levels: vec![1, 3, 2],
            sustainability_level: 2,
        };
        assert!(colony.contains(BlockPos::new(108, 0, 92)));
        assert!(!colony.contains(BlockPos::new(109, 70, 100)));
        assert_eq!(colony.max_building_level(), 3);
    }
}
