//! Sparse save/load of per-world corruption state.
//!
//! Only non-default entries are written: zero categories, empty blight lists
//! and cells at or below zero never reach the encoded form. Transient indices
//! (scheduler queue, furnace tracker, sync trackers) are not saved; load events
//! rebuild them.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use bevy::prelude::Resource;
use corruption_schema::{
    decode_save, encode_save, BlightRegionRecord, CellRecord, ColonyStateRecord, WorldSaveState,
    SAVE_FORMAT_VERSION,
};
use thiserror::Error;

use crate::colony::ColonyHandlerState;
use crate::field::SpatialCell;
use crate::ledger::ProgressCategory;
use crate::stage_config::StageTable;
use crate::state::CorruptionState;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to access save at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode save: {0}")]
    Encode(#[source] bincode::Error),
    #[error("failed to decode save: {0}")]
    Decode(#[source] bincode::Error),
}

/// Byte-level storage for one world's save.
pub trait PersistentStore: Send + Sync {
    fn load(&self) -> Result<Option<Vec<u8>>, PersistenceError>;
    fn save(&self, bytes: &[u8]) -> Result<(), PersistenceError>;
}

/// Writes through a sibling temp file and renames over the target.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl PersistentStore for FileStore {
    fn load(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(self.io_error(err)),
        }
    }

    fn save(&self, bytes: &[u8]) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| self.io_error(err))?;
        }
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);
        fs::write(&temp, bytes).map_err(|err| self.io_error(err))?;
        fs::rename(&temp, &self.path).map_err(|err| self.io_error(err))
    }
}

/// In-process store; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    bytes: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_save(&self) -> bool {
        self.bytes.lock().map(|bytes| bytes.is_some()).unwrap_or(false)
    }
}

impl PersistentStore for MemoryStore {
    fn load(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.bytes.lock().ok().and_then(|bytes| bytes.clone()))
    }

    fn save(&self, bytes: &[u8]) -> Result<(), PersistenceError> {
        if let Ok(mut slot) = self.bytes.lock() {
            *slot = Some(bytes.to_vec());
        }
        Ok(())
    }
}

/// The store the app's autosave and startup restore go through.
#[derive(Resource)]
pub struct PersistenceStore(pub Box<dyn PersistentStore>);

impl PersistenceStore {
    pub fn new(store: impl PersistentStore + 'static) -> Self {
        Self(Box::new(store))
    }
}

fn nonzero(tick: u64) -> Option<u64> {
    (tick > 0).then_some(tick)
}

pub fn to_save_state(state: &CorruptionState) -> WorldSaveState {
    WorldSaveState {
        version: SAVE_FORMAT_VERSION,
        last_loop_tick: state.last_loop_tick,
        initialized: state.initialized,
        seeded: state.field.is_seeded(),
        progression: state
            .ledger
            .iter()
            .filter(|(_, value)| *value != 0)
            .map(|(category, value)| (category.as_str().to_string(), value))
            .collect(),
        cells: state
            .field
            .iter()
            .filter(|(_, cell)| cell.intensity > 0)
            .map(|(region, cell)| CellRecord {
                region: *region,
                intensity: cell.intensity.clamp(0, u8::MAX as i32) as u8,
                touched: nonzero(cell.touched),
                last_corruption: nonzero(cell.last_corruption),
                last_purification: nonzero(cell.last_purification),
            })
            .collect(),
        blight: state
            .blight
            .iter()
            .filter(|(_, positions)| !positions.is_empty())
            .map(|(region, positions)| BlightRegionRecord {
                region: *region,
                positions: positions.clone(),
            })
            .collect(),
        colonies: state
            .colonies
            .iter()
            .map(|(key, colony)| {
                (
                    key.clone(),
                    ColonyStateRecord {
                        next_process_tick: colony.next_process_tick,
                        last_evaluation_tick: colony.last_evaluation_tick,
                        last_notification_tick: colony.last_notification_tick,
                        purification_credits: colony.purification_credits,
                    },
                )
            })
            .collect(),
    }
}

/// Replaces `state` with a decoded save. The dirty flag is cleared.
pub fn apply_save_state(state: &mut CorruptionState, table: &StageTable, save: WorldSaveState) {
    if save.version != SAVE_FORMAT_VERSION {
        tracing::warn!(
            target: "corruption::persistence",
            version = save.version,
            expected = SAVE_FORMAT_VERSION,
            "save.version_mismatch"
        );
    }
    state.ledger.clear();
    for (name, value) in &save.progression {
        match ProgressCategory::from_name(name) {
            Some(category) => state.ledger.set(category, *value),
            None => tracing::warn!(
                target: "corruption::persistence",
                category = %name,
                value,
                "save.category_dropped"
            ),
        }
    }

    state.field.clear();
    for record in &save.cells {
        let cell = SpatialCell {
            intensity: record.intensity as i32,
            touched: record.touched.unwrap_or(0),
            last_corruption: record.last_corruption.unwrap_or(0),
            last_purification: record.last_purification.unwrap_or(0),
        };
        state.field.insert_cell(record.region, cell);
    }
    state
        .field
        .set_seeded(save.seeded || !state.field.is_empty());

    state.blight.clear();
    for record in save.blight {
        state.blight.restore_region(record.region, record.positions);
    }

    state.colonies = save
        .colonies
        .into_iter()
        .map(|(key, record)| {
            (
                key,
                ColonyHandlerState {
                    next_process_tick: record.next_process_tick,
                    last_evaluation_tick: record.last_evaluation_tick,
                    last_notification_tick: record.last_notification_tick,
                    purification_credits: record.purification_credits,
                },
            )
        })
        .collect();

    state.initialized = save.initialized;
    state.last_loop_tick = save.last_loop_tick;
    state.refresh_stage(table);
    state.take_dirty();
}

pub fn save_state(state: &CorruptionState, store: &dyn PersistentStore) -> Result<usize, PersistenceError> {
    let bytes = encode_save(&to_save_state(state)).map_err(PersistenceError::Encode)?;
    store.save(&bytes)?;
    Ok(bytes.len())
}

/// Returns false when the store holds no save yet.
pub fn load_state(
    state: &mut CorruptionState,
    table: &StageTable,
    store: &dyn PersistentStore,
) -> Result<bool, PersistenceError> {
    let Some(bytes) = store.load()? else {
        return Ok(false);
    };
    let save = decode_save(&bytes).map_err(PersistenceError::Decode)?;
    apply_save_state(state, table, save);
    Ok(true)
}
