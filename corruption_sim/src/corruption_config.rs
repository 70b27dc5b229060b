//! Numeric tuning for the field, surface mutation, conversion, scheduler,
//! sync, colony and furnace subsystems.
//!
//! Loaded from `corruption_config.json` with support for the
//! `CORRUPTION_CONFIG_PATH` environment variable override.

use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use bevy::prelude::Resource;
use serde::Deserialize;
use thiserror::Error;

pub const BUILTIN_CORRUPTION_CONFIG: &str = include_str!("data/corruption_config.json");

/// Upper bound of a cell's intensity.
pub const MAX_INTENSITY: i32 = 255;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CorruptionConfig {
    pub field: FieldConfig,
    pub cues: CueConfig,
    pub blight: BlightConfig,
    pub conversion: ConversionConfig,
    pub scheduler: SchedulerConfig,
    pub sync: SyncConfig,
    pub colony: ColonyConfig,
    pub furnace: FurnaceConfig,
}

impl CorruptionConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_CORRUPTION_CONFIG)
                .expect("builtin corruption config should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, CorruptionConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| CorruptionConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_json_str(&contents)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    /// Cells at or above this intensity may spread.
    pub active_threshold: i32,
    /// Cells at or above this intensity produce ambient cues.
    pub visible_threshold: i32,
    pub stale_after_ticks: u64,
    pub stale_multiplier: i32,
    pub seed_strength: i32,
    pub seed_count_min: u32,
    pub seed_count_max: u32,
    pub seed_radius: i32,
    /// Out of ten; the remainder picks a diagonal neighbour.
    pub cardinal_weight: u32,
    pub spread_jitter: u32,
    pub drain_chance: f64,
    pub missing_cell_multiplier: f64,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            active_threshold: 20,
            visible_threshold: 12,
            stale_after_ticks: 12_000,
            stale_multiplier: 2,
            seed_strength: 28,
            seed_count_min: 4,
            seed_count_max: 10,
            seed_radius: 4,
            cardinal_weight: 4,
            spread_jitter: 3,
            drain_chance: 0.25,
            missing_cell_multiplier: 0.85,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CueConfig {
    pub particle_base: f64,
    pub particle_norm_scale: f64,
    pub particle_max: f64,
    pub sound_chance_scale: f64,
    pub sound_chance_offset: f64,
    pub sound_norm_base: f64,
    pub sound_norm_scale: f64,
    pub sound_max: f64,
    /// Normalized intensity breakpoints; one more count than breakpoints.
    pub particle_tiers: Vec<f64>,
    pub particle_counts: Vec<u8>,
    pub sound_tiers: Vec<f64>,
}

impl Default for CueConfig {
    fn default() -> Self {
        Self {
            particle_base: 0.65,
            particle_norm_scale: 0.85,
            particle_max: 0.95,
            sound_chance_scale: 0.15,
            sound_chance_offset: 0.02,
            sound_norm_base: 0.35,
            sound_norm_scale: 0.75,
            sound_max: 0.08,
            particle_tiers: vec![0.25, 0.55, 0.85],
            particle_counts: vec![2, 3, 4, 5],
            sound_tiers: vec![0.55, 0.90],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlightConfig {
    pub min_stage: u8,
    pub radius: i32,
    pub max_per_region: usize,
    pub apply_attempts_per_tick: u32,
    pub revert_attempts_per_tick: u32,
    pub apply_threshold: f64,
    pub revert_threshold: f64,
    pub base_chance: f64,
    pub min_chance: f64,
    pub max_picks_per_viewer: u32,
    pub max_reverts_per_region: u32,
}

impl Default for BlightConfig {
    fn default() -> Self {
        Self {
            min_stage: 2,
            radius: 7,
            max_per_region: 64,
            apply_attempts_per_tick: 24,
            revert_attempts_per_tick: 24,
            apply_threshold: 0.22,
            revert_threshold: 0.16,
            base_chance: 0.22,
            min_chance: 0.02,
            max_picks_per_viewer: 4,
            max_reverts_per_region: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    pub countdown_ticks: u32,
    pub pulse_interval_ticks: u32,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            countdown_ticks: 300,
            pulse_interval_ticks: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub region_cooldown_ticks: u64,
    pub spread_window_ticks: u64,
    pub pending_budget: usize,
    pub sweep_budget: usize,
    pub sample_radius: i32,
    pub samples_per_viewer: u32,
    pub conversions_per_region: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            region_cooldown_ticks: 3_600,
            spread_window_ticks: 1_200,
            pending_budget: 2,
            sweep_budget: 1,
            sample_radius: 6,
            samples_per_viewer: 2,
            conversions_per_region: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub period_ticks: u64,
    /// Unchanged values in the same region wait this many periods.
    pub unchanged_period_multiplier: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            period_ticks: 20,
            unchanged_period_multiplier: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ColonyConfig {
    pub process_period_ticks: u64,
    pub process_jitter_ticks: u64,
    /// Percent; the roll passes when `rand(0..100) <= chance`.
    pub notification_chance: u32,
    pub notification_cooldown_ticks: u64,
    pub notification_messages: u32,
}

impl Default for ColonyConfig {
    fn default() -> Self {
        Self {
            process_period_ticks: 800,
            process_jitter_ticks: 600,
            notification_chance: 15,
            notification_cooldown_ticks: 12_000,
            notification_messages: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FurnaceConfig {
    pub idle_grace_ticks: u64,
    pub smelting_cook_ticks: u64,
    pub smoking_cook_ticks: u64,
    pub blasting_cook_ticks: u64,
}

impl Default for FurnaceConfig {
    fn default() -> Self {
        Self {
            idle_grace_ticks: 300,
            smelting_cook_ticks: 200,
            smoking_cook_ticks: 100,
            blasting_cook_ticks: 100,
        }
    }
}

#[derive(Debug, Error)]
pub enum CorruptionConfigError {
    #[error("failed to parse corruption config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read corruption config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Handle for accessing the corruption tuning.
#[derive(Resource, Debug, Clone)]
pub struct CorruptionConfigHandle(pub Arc<CorruptionConfig>);

impl CorruptionConfigHandle {
    pub fn new(config: Arc<CorruptionConfig>) -> Self {
        Self(config)
    }

    pub fn get(&self) -> Arc<CorruptionConfig> {
        Arc::clone(&self.0)
    }

    pub fn replace(&mut self, config: Arc<CorruptionConfig>) {
        self.0 = config;
    }
}

pub fn load_corruption_config_from_env() -> Arc<CorruptionConfig> {
    if let Some(path) = env::var("CORRUPTION_CONFIG_PATH").ok().map(PathBuf::from) {
        match CorruptionConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "corruption::config",
                    path = %path.display(),
                    "corruption_config.loaded=file"
                );
                return Arc::new(config);
            }
            Err(err) => {
                tracing::warn!(
                    target: "corruption::config",
                    path = %path.display(),
                    error = %err,
                    "corruption_config.load_failed"
                );
            }
        }
    }

    let config = CorruptionConfig::builtin();
    tracing::info!(
        target: "corruption::config",
        "corruption_config.loaded=builtin"
    );
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_config_matches_defaults() {
        let config = CorruptionConfig::builtin();
        assert_eq!(config.field.active_threshold, 20);
        assert_eq!(config.field.seed_strength, 28);
        assert_eq!(config.blight.max_per_region, 64);
        assert_eq!(config.scheduler.spread_window_ticks, 1_200);
        assert_eq!(config.sync.period_ticks, 20);
        assert_eq!(config.cues.particle_counts.len(), config.cues.particle_tiers.len() + 1);
    }

    #[test]
    fn sections_fill_in_missing_knobs() {
        let config = CorruptionConfig::from_json_str(r#"{"blight":{"radius":3}}"#).expect("parses");
        assert_eq!(config.blight.radius, 3);
        assert_eq!(config.blight.apply_attempts_per_tick, 24);
        assert_eq!(config.colony.process_period_ticks, 800);
    }
}
