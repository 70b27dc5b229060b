use std::fmt;

use serde::{Deserialize, Serialize};

/// Source of a progression change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProgressCategory {
    Construction,
    ResourceGathering,
    Animals,
    Fuel,
    Colony,
    Default,
}

const CATEGORY_COUNT: usize = 6;

impl ProgressCategory {
    pub const ALL: [ProgressCategory; CATEGORY_COUNT] = [
        ProgressCategory::Construction,
        ProgressCategory::ResourceGathering,
        ProgressCategory::Animals,
        ProgressCategory::Fuel,
        ProgressCategory::Colony,
        ProgressCategory::Default,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProgressCategory::Construction => "Construction",
            ProgressCategory::ResourceGathering => "ResourceGathering",
            ProgressCategory::Animals => "Animals",
            ProgressCategory::Fuel => "Fuel",
            ProgressCategory::Colony => "Colony",
            ProgressCategory::Default => "Default",
        }
    }

    /// Case-insensitive lookup; accepts `resource_gathering` style too.
    pub fn from_name(name: &str) -> Option<Self> {
        let folded: String = name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str().to_lowercase() == folded)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ProgressCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-category signed accumulators, each floored at zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressionLedger {
    values: [i64; CATEGORY_COUNT],
}

impl ProgressionLedger {
    /// Adds `delta` to `category` and returns the new value.
    pub fn add(&mut self, category: ProgressCategory, delta: i64) -> i64 {
        let slot = &mut self.values[category.index()];
        *slot = slot.saturating_add(delta).max(0);
        *slot
    }

    pub fn set(&mut self, category: ProgressCategory, value: i64) {
        self.values[category.index()] = value.max(0);
    }

    pub fn get(&self, category: ProgressCategory) -> i64 {
        self.values[category.index()]
    }

    pub fn total(&self) -> i64 {
        self.values
            .iter()
            .fold(0i64, |total, value| total.saturating_add(*value))
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProgressCategory, i64)> + '_ {
        ProgressCategory::ALL
            .into_iter()
            .map(move |category| (category, self.get(category)))
    }

    pub fn clear(&mut self) {
        self.values = [0; CATEGORY_COUNT];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_floor_at_zero() {
        let mut ledger = ProgressionLedger::default();
        assert_eq!(ledger.add(ProgressCategory::Fuel, 10), 10);
        assert_eq!(ledger.add(ProgressCategory::Fuel, -25), 0);
        assert_eq!(ledger.add(ProgressCategory::Colony, -144), 0);
        assert_eq!(ledger.total(), 0);
    }

    #[test]
    fn total_is_sum_of_clamped_categories() {
        let mut ledger = ProgressionLedger::default();
        ledger.add(ProgressCategory::Construction, 40);
        ledger.add(ProgressCategory::Animals, 15);
        ledger.add(ProgressCategory::Animals, -20);
        ledger.add(ProgressCategory::Default, 7);
        assert_eq!(ledger.total(), 47);
        let summed: i64 = ledger.iter().map(|(_, value)| value).sum();
        assert_eq!(summed, ledger.total());
    }

    #[test]
    fn total_saturates_instead_of_overflowing() {
        let mut ledger = ProgressionLedger::default();
        ledger.add(ProgressCategory::Construction, i64::MAX);
        ledger.add(ProgressCategory::Fuel, i64::MAX);
        assert_eq!(ledger.total(), i64::MAX);
    }

    #[test]
    fn category_names_round_trip() {
        for category in ProgressCategory::ALL {
            assert_eq!(ProgressCategory::from_name(category.as_str()), Some(category));
        }
        assert_eq!(
            ProgressCategory::from_name("resource_gathering"),
            Some(ProgressCategory::ResourceGathering)
        );
        assert_eq!(ProgressCategory::from_name("Weather"), None);
    }
}
