//! Stage table: ordered corruption stages and their per-stage tuning.
//!
//! Loaded from `stage_table.json` (override with `STAGE_TABLE_PATH`). Rows whose
//! threshold does not strictly increase are dropped with a warning; a table with
//! no surviving rows is the only fatal configuration error.

use std::{
    env, fmt, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use bevy::prelude::Resource;
use serde::Deserialize;
use thiserror::Error;

pub const BUILTIN_STAGE_TABLE: &str = include_str!("data/stage_table.json");

/// Fallback cue interval for stages that do not define one.
pub const DEFAULT_CUE_INTERVAL: u64 = 200;

/// Ordinal of a stage within the loaded [`StageTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StageId(pub u8);

impl StageId {
    pub const LOWEST: StageId = StageId(0);

    pub fn ordinal(self) -> u8 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage{}", self.0)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StageDefinition {
    pub name: String,
    /// Total progression must strictly exceed this to reach the stage.
    pub threshold: i64,
    pub loot_chance: f64,
    pub spawn_chance: f64,
    pub decay_cooldown: u64,
    /// Defaults to `decay_cooldown` when absent.
    pub blight_cooldown: Option<u64>,
    pub spread_budget: u32,
    pub spread_amount: u32,
    pub spawn_scalar: f64,
    pub blight_apply_scalar: f64,
    pub blight_revert_scalar: f64,
    pub cue_interval: Option<u64>,
    pub cue_sound_scalar: f64,
}

impl Default for StageDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            threshold: 0,
            loot_chance: 0.0,
            spawn_chance: 0.0,
            decay_cooldown: 1_200,
            blight_cooldown: None,
            spread_budget: 0,
            spread_amount: 0,
            spawn_scalar: 0.0,
            blight_apply_scalar: 0.0,
            blight_revert_scalar: 1.0,
            cue_interval: None,
            cue_sound_scalar: 0.0,
        }
    }
}

impl StageDefinition {
    pub fn blight_cooldown(&self) -> u64 {
        self.blight_cooldown.unwrap_or(self.decay_cooldown)
    }

    pub fn cue_interval(&self) -> u64 {
        self.cue_interval.unwrap_or(DEFAULT_CUE_INTERVAL).max(1)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct StageTableFile {
    stages: Vec<StageDefinition>,
    awakening_stage: u8,
    equilibrium_stage: u8,
    late_stage: u8,
    base_delta: i32,
}

impl Default for StageTableFile {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            awakening_stage: 2,
            equilibrium_stage: 3,
            late_stage: 5,
            base_delta: 1,
        }
    }
}

/// Validated, strictly increasing stage table.
#[derive(Debug, Clone, PartialEq)]
pub struct StageTable {
    stages: Vec<StageDefinition>,
    awakening: StageId,
    equilibrium: StageId,
    late: StageId,
    base_delta: i32,
}

impl StageTable {
    pub fn builtin() -> Arc<Self> {
        Arc::new(Self::from_json_str(BUILTIN_STAGE_TABLE).expect("builtin stage table should parse"))
    }

    pub fn from_json_str(json: &str) -> Result<Self, StageTableError> {
        let file: StageTableFile = serde_json::from_str(json)?;
        Self::validated(file)
    }

    pub fn from_file(path: &Path) -> Result<Self, StageTableError> {
        let contents = fs::read_to_string(path).map_err(|source| StageTableError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    fn validated(file: StageTableFile) -> Result<Self, StageTableError> {
        let mut stages: Vec<StageDefinition> = Vec::with_capacity(file.stages.len());
        for stage in file.stages {
            if let Some(previous) = stages.last() {
                if stage.threshold <= previous.threshold {
                    tracing::warn!(
                        target: "corruption::config",
                        stage = %stage.name,
                        threshold = stage.threshold,
                        previous = previous.threshold,
                        "stage_table.entry_dropped=non_increasing_threshold"
                    );
                    continue;
                }
            }
            stages.push(stage);
        }
        if stages.is_empty() {
            return Err(StageTableError::Empty);
        }
        if stages.len() > u8::MAX as usize {
            stages.truncate(u8::MAX as usize);
        }
        let top = (stages.len() - 1) as u8;
        Ok(Self {
            stages,
            awakening: StageId(file.awakening_stage.min(top)),
            equilibrium: StageId(file.equilibrium_stage.min(top)),
            late: StageId(file.late_stage.min(top)),
            base_delta: file.base_delta.abs(),
        })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn lowest(&self) -> StageId {
        StageId::LOWEST
    }

    pub fn highest(&self) -> StageId {
        StageId((self.stages.len() - 1) as u8)
    }

    pub fn awakening(&self) -> StageId {
        self.awakening
    }

    pub fn equilibrium(&self) -> StageId {
        self.equilibrium
    }

    pub fn late(&self) -> StageId {
        self.late
    }

    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    /// Definition for `stage`; out-of-range ids resolve to the highest stage.
    pub fn stage(&self, stage: StageId) -> &StageDefinition {
        let index = stage.index().min(self.stages.len() - 1);
        &self.stages[index]
    }

    /// Highest stage whose threshold is strictly exceeded by `total`.
    pub fn stage_for_total(&self, total: i64) -> StageId {
        self.stages
            .iter()
            .enumerate()
            .rev()
            .find(|(_, stage)| total > stage.threshold)
            .map(|(index, _)| StageId(index as u8))
            .unwrap_or(StageId::LOWEST)
    }

    /// Signed per-step field delta: decay below equilibrium, growth above.
    pub fn base_delta(&self, stage: StageId) -> i32 {
        match stage.cmp(&self.equilibrium) {
            std::cmp::Ordering::Less => -self.base_delta,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => self.base_delta,
        }
    }

    pub fn is_awakened(&self, stage: StageId) -> bool {
        stage >= self.awakening
    }

    pub fn is_late(&self, stage: StageId) -> bool {
        stage >= self.late
    }

    /// Progress needed to start a fresh world in `stage`.
    pub fn starting_progress(&self, stage: StageId) -> i64 {
        if stage == StageId::LOWEST {
            return 0;
        }
        let definition = self.stage(stage);
        if stage >= self.highest() {
            definition.threshold.saturating_mul(2).max(definition.threshold + 1)
        } else {
            definition.threshold + 1
        }
    }

    /// `ordinal:threshold` pairs, for logs and quick comparisons.
    pub fn threshold_summary(&self) -> String {
        self.stages
            .iter()
            .enumerate()
            .map(|(index, stage)| format!("{index}:{}", stage.threshold))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Error)]
pub enum StageTableError {
    #[error("failed to parse stage table: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read stage table from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("stage table defines no usable stages")]
    Empty,
}

/// Handle for accessing the stage table.
#[derive(Resource, Debug, Clone)]
pub struct StageTableHandle(pub Arc<StageTable>);

impl StageTableHandle {
    pub fn new(table: Arc<StageTable>) -> Self {
        Self(table)
    }

    pub fn get(&self) -> Arc<StageTable> {
        Arc::clone(&self.0)
    }

    pub fn replace(&mut self, table: Arc<StageTable>) {
        self.0 = table;
    }
}

/// Load the stage table from `STAGE_TABLE_PATH`, falling back to the builtin.
///
/// An override that parses but leaves no stages is fatal; read and parse
/// failures fall back to the builtin table.
pub fn load_stage_table_from_env() -> Result<Arc<StageTable>, StageTableError> {
    if let Some(path) = env::var("STAGE_TABLE_PATH").ok().map(PathBuf::from) {
        match StageTable::from_file(&path) {
            Ok(table) => {
                tracing::info!(
                    target: "corruption::config",
                    path = %path.display(),
                    stages = table.len(),
                    "stage_table.loaded=file"
                );
                return Ok(Arc::new(table));
            }
            Err(StageTableError::Empty) => {
                tracing::error!(
                    target: "corruption::config",
                    path = %path.display(),
                    "stage_table.load_failed=empty"
                );
                return Err(StageTableError::Empty);
            }
            Err(err) => {
                tracing::warn!(
                    target: "corruption::config",
                    path = %path.display(),
                    error = %err,
                    "stage_table.load_failed"
                );
            }
        }
    }

    let table = StageTable::builtin();
    tracing::info!(
        target: "corruption::config",
        stages = table.len(),
        "stage_table.loaded=builtin"
    );
    Ok(table)
}
