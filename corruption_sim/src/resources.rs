use std::{
    env, fs, io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
};

use bevy::prelude::*;
use rand::{rngs::SmallRng, SeedableRng};
use serde::Deserialize;
use thiserror::Error;

use crate::hashing::world_seed;

/// Global configuration parameters for the headless corruption simulation.
#[derive(Resource, Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub seed: u64,
    pub world_id: String,
    /// The field, blight and colony loop runs once every this many ticks.
    pub loop_period_ticks: u64,
    pub furnace_poll_period_ticks: u64,
    /// Zero disables autosave.
    pub autosave_interval_ticks: u64,
    /// Save file; `None` keeps saves in memory only.
    pub save_path: Option<PathBuf>,
    /// Directory watched for conversion mapping overrides.
    pub mapping_dir: Option<PathBuf>,
    pub command_bind: SocketAddr,
    pub sync_bind: SocketAddr,
    /// Stage ordinal a fresh world starts in.
    pub initial_stage: Option<u8>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0x5eed_c0de,
            world_id: "overworld".to_string(),
            loop_period_ticks: 18,
            furnace_poll_period_ticks: 3,
            autosave_interval_ticks: 6_000,
            save_path: None,
            mapping_dir: None,
            command_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 42001),
            sync_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 42000),
            initial_stage: None,
        }
    }
}

impl SimulationConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, SimulationConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| SimulationConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_json_str(&contents)?)
    }

    pub fn world_seed(&self) -> u64 {
        world_seed(self.seed, &self.world_id)
    }
}

#[derive(Debug, Error)]
pub enum SimulationConfigError {
    #[error("failed to parse simulation config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read simulation config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Load the simulation config named by `SIM_CONFIG_PATH`, or defaults.
pub fn load_simulation_config_from_env() -> SimulationConfig {
    let Some(path) = env::var("SIM_CONFIG_PATH").ok().map(PathBuf::from) else {
        return SimulationConfig::default();
    };
    match SimulationConfig::from_file(&path) {
        Ok(config) => {
            tracing::info!(
                target: "corruption::config",
                path = %path.display(),
                "simulation_config.loaded=file"
            );
            config
        }
        Err(err) => {
            tracing::warn!(
                target: "corruption::config",
                path = %path.display(),
                error = %err,
                "simulation_config.load_failed"
            );
            SimulationConfig::default()
        }
    }
}

/// Tracks total simulation ticks elapsed.
#[derive(Resource, Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationTick(pub u64);

/// Single random stream shared by every corruption system.
#[derive(Resource, Debug, Clone)]
pub struct SimRng(pub SmallRng);

impl SimRng {
    pub fn from_seed(seed: u64) -> Self {
        Self(SmallRng::seed_from_u64(seed))
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::from_seed(config.world_seed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config =
            SimulationConfig::from_json_str(r#"{"seed": 9, "initial_stage": 3}"#).expect("parses");
        assert_eq!(config.seed, 9);
        assert_eq!(config.initial_stage, Some(3));
        assert_eq!(config.loop_period_ticks, 18);
        assert_eq!(config.world_id, "overworld");
        assert!(config.save_path.is_none());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = SimulationConfig::from_file(Path::new("/nonexistent/sim.json"))
            .expect_err("missing file");
        assert!(matches!(err, SimulationConfigError::Read { .. }));
    }
}
