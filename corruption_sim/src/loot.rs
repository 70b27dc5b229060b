use rand::Rng;

use crate::chance::{clamp_unit, roll};
use crate::progression_rules::LootRules;
use crate::stage_config::StageDefinition;
use crate::world::ItemStack;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LootSource {
    Block,
    Actor,
    Fishing,
    Chest,
    Other,
}

impl LootSource {
    fn is_corruptible(self) -> bool {
        matches!(self, LootSource::Block | LootSource::Actor | LootSource::Fishing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LootContext {
    pub source: LootSource,
    /// Fraction of the loot chance cancelled by wards near the drop.
    pub ward: f64,
}

impl LootContext {
    pub fn new(source: LootSource) -> Self {
        Self { source, ward: 0.0 }
    }
}

fn replacement_for<R: Rng + ?Sized>(
    rules: &LootRules,
    source: LootSource,
    item: &str,
    rng: &mut R,
) -> Option<String> {
    let variants = rules.corruptible.get(item)?;
    if !variants.is_empty() {
        return Some(variants[rng.gen_range(0..variants.len())].clone());
    }
    if rules.crop_items.iter().any(|crop| crop == item) {
        if let Some(fallback) = &rules.crop_fallback {
            return Some(fallback.clone());
        }
    }
    if source == LootSource::Fishing {
        return rules.fishing_fallback.clone();
    }
    None
}

/// Rolls each allow-listed drop for corruption and swaps it in place.
/// Returns how many stacks were replaced.
pub fn corrupt_loot<R: Rng + ?Sized>(
    stage: &StageDefinition,
    rules: &LootRules,
    context: LootContext,
    drops: &mut [ItemStack],
    rng: &mut R,
) -> usize {
    if !context.source.is_corruptible() {
        return 0;
    }
    let chance = clamp_unit(stage.loot_chance) * (1.0 - clamp_unit(context.ward));
    if chance <= 0.0 {
        return 0;
    }
    let mut replaced = 0;
    for stack in drops.iter_mut() {
        if !rules.corruptible.contains_key(&stack.item) || !roll(rng, chance) {
            continue;
        }
        if let Some(item) = replacement_for(rules, context.source, &stack.item, rng) {
            stack.item = item;
            replaced += 1;
        }
    }
    replaced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progression_rules::ProgressionRules;
    use rand::{rngs::SmallRng, SeedableRng};

    fn certain_stage() -> StageDefinition {
        StageDefinition {
            loot_chance: 1.0,
            ..StageDefinition::default()
        }
    }

    #[test]
    fn allow_listed_drops_are_replaced_keeping_counts() {
        let rules = ProgressionRules::builtin();
        let mut rng = SmallRng::seed_from_u64(2);
        let mut drops = vec![
            ItemStack::new("beef", 3),
            ItemStack::new("wheat", 5),
            ItemStack::new("dirt", 1),
            ItemStack::new("bone", 2),
        ];
        let replaced = corrupt_loot(
            &certain_stage(),
            &rules.loot,
            LootContext::new(LootSource::Actor),
            &mut drops,
            &mut rng,
        );
        assert_eq!(replaced, 3);
        assert_eq!(drops[0], ItemStack::new("tainted_beef", 3));
        assert_eq!(drops[1], ItemStack::new("withered_crop", 5));
        assert_eq!(drops[2], ItemStack::new("dirt", 1));
        assert!(drops[3].item == "blighted_bone" || drops[3].item == "withered_bone");
        assert_eq!(drops[3].count, 2);
    }

    #[test]
    fn fishing_uses_its_fallback() {
        let rules = ProgressionRules::builtin();
        let mut rng = SmallRng::seed_from_u64(2);
        let mut drops = vec![ItemStack::new("cod", 1)];
        corrupt_loot(&certain_stage(), &rules.loot, LootContext::new(LootSource::Fishing), &mut drops, &mut rng);
        assert_eq!(drops[0].item, "rotten_fish");

        let mut drops = vec![ItemStack::new("cod", 1)];
        assert_eq!(
            corrupt_loot(&certain_stage(), &rules.loot, LootContext::new(LootSource::Block), &mut drops, &mut rng),
            0
        );
    }

    #[test]
    fn chests_and_full_wards_are_untouched() {
        let rules = ProgressionRules::builtin();
        let mut rng = SmallRng::seed_from_u64(2);
        let mut drops = vec![ItemStack::new("beef", 1)];
        assert_eq!(
            corrupt_loot(&certain_stage(), &rules.loot, LootContext::new(LootSource::Chest), &mut drops, &mut rng),
            0
        );
        let warded = LootContext {
            source: LootSource::Actor,
            ward: 4.0,
        };
        assert_eq!(corrupt_loot(&certain_stage(), &rules.loot, warded, &mut drops, &mut rng), 0);
        assert_eq!(drops[0].item, "beef");
    }
}
