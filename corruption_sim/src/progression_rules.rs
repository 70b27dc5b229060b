//! Progression sources: which blocks, actors and fuels move the ledger, and by
//! how much. Also carries the loot corruption allow-list.
//!
//! Loaded from `progression_rules.json` (override with `PROGRESSION_RULES_PATH`).

use std::{
    collections::BTreeMap,
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use bevy::prelude::Resource;
use serde::Deserialize;
use thiserror::Error;

pub const BUILTIN_PROGRESSION_RULES: &str = include_str!("data/progression_rules.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressionTier {
    Minor,
    Major,
    Extreme,
}

impl ProgressionTier {
    pub fn value(self) -> i64 {
        match self {
            ProgressionTier::Minor => 2,
            ProgressionTier::Major => 5,
            ProgressionTier::Extreme => 13,
        }
    }
}

/// Tiers attached to one block or actor id. Several tiers on one side add up.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TierSet {
    pub corruption: Vec<ProgressionTier>,
    pub purification: Vec<ProgressionTier>,
}

impl TierSet {
    pub fn corruption_value(&self) -> i64 {
        self.corruption.iter().map(|tier| tier.value()).sum()
    }

    pub fn purification_value(&self) -> i64 {
        self.purification.iter().map(|tier| tier.value()).sum()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LootRules {
    /// Allow-listed item id to its corrupted variants (may be empty).
    pub corruptible: BTreeMap<String, Vec<String>>,
    pub crop_items: Vec<String>,
    pub crop_fallback: Option<String>,
    pub fishing_fallback: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProgressionRules {
    pub blocks: BTreeMap<String, TierSet>,
    pub actors: BTreeMap<String, TierSet>,
    pub fuel_weights: BTreeMap<String, i64>,
    pub default_fuel_weight: i64,
    pub refugee_bonus: i64,
    pub convertible_actors: Vec<String>,
    pub loot: LootRules,
}

impl Default for ProgressionRules {
    fn default() -> Self {
        Self {
            blocks: BTreeMap::new(),
            actors: BTreeMap::new(),
            fuel_weights: BTreeMap::new(),
            default_fuel_weight: 1,
            refugee_bonus: -144,
            convertible_actors: Vec::new(),
            loot: LootRules::default(),
        }
    }
}

impl ProgressionRules {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_PROGRESSION_RULES)
                .expect("builtin progression rules should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, ProgressionRulesError> {
        let contents = fs::read_to_string(path).map_err(|source| ProgressionRulesError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_json_str(&contents)?)
    }

    pub fn block_tiers(&self, block_id: &str) -> Option<&TierSet> {
        self.blocks.get(block_id)
    }

    pub fn actor_tiers(&self, actor_kind: &str) -> Option<&TierSet> {
        self.actors.get(actor_kind)
    }

    pub fn fuel_weight(&self, fuel_item: &str) -> i64 {
        self.fuel_weights
            .get(fuel_item)
            .copied()
            .unwrap_or(self.default_fuel_weight)
            .max(0)
    }

    pub fn is_convertible(&self, actor_kind: &str) -> bool {
        self.convertible_actors.iter().any(|kind| kind == actor_kind)
    }
}

#[derive(Debug, Error)]
pub enum ProgressionRulesError {
    #[error("failed to parse progression rules: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read progression rules from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Resource, Debug, Clone)]
pub struct ProgressionRulesHandle(pub Arc<ProgressionRules>);

impl ProgressionRulesHandle {
    pub fn new(rules: Arc<ProgressionRules>) -> Self {
        Self(rules)
    }

    pub fn get(&self) -> Arc<ProgressionRules> {
        Arc::clone(&self.0)
    }

    pub fn replace(&mut self, rules: Arc<ProgressionRules>) {
        self.0 = rules;
    }
}

pub fn load_progression_rules_from_env() -> Arc<ProgressionRules> {
    if let Some(path) = env::var("PROGRESSION_RULES_PATH").ok().map(PathBuf::from) {
        match ProgressionRules::from_file(&path) {
            Ok(rules) => {
                tracing::info!(
                    target: "corruption::config",
                    path = %path.display(),
                    "progression_rules.loaded=file"
                );
                return Arc::new(rules);
            }
            Err(err) => {
                tracing::warn!(
                    target: "corruption::config",
                    path = %path.display(),
                    error = %err,
                    "progression_rules.load_failed"
                );
            }
        }
    }

    let rules = ProgressionRules::builtin();
    tracing::info!(
        target: "corruption::config",
        "progression_rules.loaded=builtin"
    );
    rules
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_sum_per_side() {
        let tiers = TierSet {
            corruption: vec![ProgressionTier::Minor, ProgressionTier::Extreme],
            purification: vec![ProgressionTier::Major],
        };
        assert_eq!(tiers.corruption_value(), 15);
        assert_eq!(tiers.purification_value(), 5);
    }

    #[test]
    fn builtin_rules_parse() {
        let rules = ProgressionRules::builtin();
        assert_eq!(rules.refugee_bonus, -144);
        assert_eq!(rules.fuel_weight("coal"), 1);
        assert_eq!(rules.fuel_weight("purified_coal"), 0);
        assert_eq!(rules.fuel_weight("unlisted_fuel"), rules.default_fuel_weight);
        assert!(rules.is_convertible("wolf"));
        assert!(!rules.is_convertible("corrupted_wolf"));
        assert!(rules.actor_tiers("corrupted_wolf").is_some());
    }
}
