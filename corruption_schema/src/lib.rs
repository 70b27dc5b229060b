use ahash::RandomState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{BuildHasher, Hasher};

/// Bumped whenever a persisted field changes meaning.
pub const SAVE_FORMAT_VERSION: u32 = 1;

/// Number of bits a block coordinate is shifted to obtain its region coordinate.
pub const REGION_SHIFT: i32 = 4;

/// Edge length of a region in blocks.
pub const REGION_SIZE: i32 = 1 << REGION_SHIFT;

/// Absolute block position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn above(self) -> Self {
        Self::new(self.x, self.y + 1, self.z)
    }

    pub fn region(self) -> RegionKey {
        RegionKey::containing(self.x, self.z)
    }
}

/// Coarse grid cell ("region") coordinate. Regions are `REGION_SIZE` blocks wide.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RegionKey {
    pub x: i32,
    pub z: i32,
}

impl RegionKey {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    pub fn containing(block_x: i32, block_z: i32) -> Self {
        Self::new(block_x >> REGION_SHIFT, block_z >> REGION_SHIFT)
    }

    pub fn offset(self, dx: i32, dz: i32) -> Self {
        Self::new(self.x.wrapping_add(dx), self.z.wrapping_add(dz))
    }

    pub fn min_block_x(self) -> i32 {
        self.x << REGION_SHIFT
    }

    pub fn min_block_z(self) -> i32 {
        self.z << REGION_SHIFT
    }

    /// Packs both coordinates into one stable 64-bit key (low half x, high half z).
    pub fn pack(self) -> i64 {
        ((self.x as u32) as i64) | (((self.z as u32) as i64) << 32)
    }

    pub fn unpack(packed: i64) -> Self {
        Self::new(packed as i32, (packed >> 32) as i32)
    }
}

/// One non-empty cell of the spatial corruption field.
///
/// Timestamps of zero are stored as `None`; intensity is always at least 1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CellRecord {
    pub region: RegionKey,
    pub intensity: u8,
    #[serde(default)]
    pub touched: Option<u64>,
    #[serde(default)]
    pub last_corruption: Option<u64>,
    #[serde(default)]
    pub last_purification: Option<u64>,
}

/// Positions the surface mutation subsystem converted inside one region.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlightRegionRecord {
    pub region: RegionKey,
    #[serde(default)]
    pub positions: Vec<BlockPos>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ColonyStateRecord {
    pub next_process_tick: u64,
    pub last_evaluation_tick: u64,
    pub last_notification_tick: u64,
    pub purification_credits: i64,
}

/// Sparse persisted state of one world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorldSaveState {
    pub version: u32,
    pub last_loop_tick: u64,
    pub initialized: bool,
    pub seeded: bool,
    /// Category name to accumulated progress. Zero categories are omitted.
    pub progression: BTreeMap<String, i64>,
    pub cells: Vec<CellRecord>,
    pub blight: Vec<BlightRegionRecord>,
    pub colonies: BTreeMap<String, ColonyStateRecord>,
}

impl Default for WorldSaveState {
    fn default() -> Self {
        Self {
            version: SAVE_FORMAT_VERSION,
            last_loop_tick: 0,
            initialized: false,
            seeded: false,
            progression: BTreeMap::new(),
            cells: Vec::new(),
            blight: Vec::new(),
            colonies: BTreeMap::new(),
        }
    }
}

impl WorldSaveState {
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn blighted_position_count(&self) -> usize {
        self.blight.iter().map(|record| record.positions.len()).sum()
    }
}

/// Outbound snapshot of the region a viewer stands in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegionSyncMessage {
    pub viewer: u64,
    pub region: RegionKey,
    pub intensity: u8,
    pub stage_ordinal: u8,
}

/// Batch of sync messages produced during one tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RegionSyncFrame {
    pub tick: u64,
    pub messages: Vec<RegionSyncMessage>,
}

pub fn hash_save_state(state: &WorldSaveState) -> u64 {
    let encoded = bincode::serialize(state).expect("save state serialization for hashing");
    let mut hasher = RandomState::with_seeds(0, 0, 0, 0).build_hasher();
    hasher.write(&encoded);
    hasher.finish()
}

pub fn encode_save(state: &WorldSaveState) -> bincode::Result<Vec<u8>> {
    bincode::serialize(state)
}

pub fn decode_save(data: &[u8]) -> bincode::Result<WorldSaveState> {
    bincode::deserialize(data)
}

pub fn encode_save_json(state: &WorldSaveState) -> serde_json::Result<String> {
    serde_json::to_string_pretty(state)
}

pub fn decode_save_json(data: &str) -> serde_json::Result<WorldSaveState> {
    serde_json::from_str(data)
}

pub fn encode_sync_frame(frame: &RegionSyncFrame) -> bincode::Result<Vec<u8>> {
    bincode::serialize(frame)
}

pub fn decode_sync_frame(data: &[u8]) -> bincode::Result<RegionSyncFrame> {
    bincode::deserialize(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_key_packs_negative_coordinates() {
        let key = RegionKey::new(-3, 7);
        assert_eq!(RegionKey::unpack(key.pack()), key);

        let key = RegionKey::new(i32::MIN, -1);
        assert_eq!(RegionKey::unpack(key.pack()), key);
    }

    #[test]
    fn block_positions_map_to_containing_region() {
        assert_eq!(BlockPos::new(0, 64, 0).region(), RegionKey::new(0, 0));
        assert_eq!(BlockPos::new(15, 64, 16).region(), RegionKey::new(0, 1));
        assert_eq!(BlockPos::new(-1, 64, -17).region(), RegionKey::new(-1, -2));
    }

    #[test]
    fn json_save_tolerates_missing_fields() {
        let state = decode_save_json(
            r#"{"cells":[{"region":{"x":1,"z":2},"intensity":40}],"progression":{"Fuel":12}}"#,
        )
        .expect("partial save parses");
        assert_eq!(state.version, SAVE_FORMAT_VERSION);
        assert!(!state.initialized);
        assert_eq!(state.cells[0].touched, None);
        assert_eq!(state.progression.get("Fuel"), Some(&12));
        assert!(state.colonies.is_empty());
    }

    #[test]
    fn save_hash_tracks_content() {
        let mut state = WorldSaveState::default();
        let empty = hash_save_state(&state);
        state.cells.push(CellRecord {
            region: RegionKey::new(0, 0),
            intensity: 5,
            touched: Some(10),
            last_corruption: Some(10),
            last_purification: None,
        });
        assert_ne!(empty, hash_save_state(&state));
        assert_eq!(hash_save_state(&state), hash_save_state(&state.clone()));
    }
}
