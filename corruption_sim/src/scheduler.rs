//! Time-bucketed sweep scheduler.
//!
//! Region loads enqueue a sweep at `now + bucket(region)`, where the bucket is a
//! stable hash of the region key modulo the spread window. Each tick drains a
//! fixed number of due regions and samples a few regions near viewers whose
//! bucket matches the current tick, so sweep work is spread evenly over time.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bevy::prelude::Resource;
use rand::Rng;

use crate::corruption_config::SchedulerConfig;
use crate::hashing::bucket_offset;
use crate::world::{RegionKey, Viewer};

#[derive(Resource, Debug, Clone, Default)]
pub struct SweepScheduler {
    /// Due tick per queued region.
    pending: HashMap<RegionKey, u64>,
    /// Queued regions bucketed by due tick, so draining never scans ahead of `now`.
    queue: BTreeMap<u64, BTreeSet<RegionKey>>,
    last_swept: HashMap<RegionKey, u64>,
}

impl SweepScheduler {
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn due_tick(&self, region: RegionKey) -> Option<u64> {
        self.pending.get(&region).copied()
    }

    pub fn last_swept(&self, region: RegionKey) -> Option<u64> {
        self.last_swept.get(&region).copied()
    }

    fn cooling_down(&self, region: RegionKey, now: u64, config: &SchedulerConfig) -> bool {
        self.last_swept
            .get(&region)
            .is_some_and(|last| now < last.saturating_add(config.region_cooldown_ticks))
    }

    /// Schedules a sweep for a freshly loaded region, keeping the earliest due tick.
    pub fn on_region_loaded(&mut self, region: RegionKey, now: u64, config: &SchedulerConfig) {
        if self.cooling_down(region, now, config) {
            return;
        }
        let due = now + bucket_offset(region, config.spread_window_ticks);
        if self.pending.get(&region).is_some_and(|existing| *existing <= due) {
            return;
        }
        self.dequeue(region);
        self.pending.insert(region, due);
        self.queue.entry(due).or_default().insert(region);
        tracing::trace!(
            target: "corruption::scheduler",
            x = region.x,
            z = region.z,
            due,
            "sweep.scheduled"
        );
    }

    /// Unloading only cancels pending work; sweep history is kept.
    pub fn on_region_unloaded(&mut self, region: RegionKey) {
        self.dequeue(region);
    }

    fn dequeue(&mut self, region: RegionKey) {
        let Some(due) = self.pending.remove(&region) else {
            return;
        };
        if let Some(bucket) = self.queue.get_mut(&due) {
            bucket.remove(&region);
            if bucket.is_empty() {
                self.queue.remove(&due);
            }
        }
    }

    /// Pops up to `pending_budget` regions whose due tick has passed, earliest first.
    pub fn drain_due(&mut self, now: u64, config: &SchedulerConfig) -> Vec<RegionKey> {
        let budget = config.pending_budget;
        let mut drained = Vec::new();
        while drained.len() < budget {
            let Some(mut entry) = self.queue.first_entry() else {
                break;
            };
            if *entry.key() > now {
                break;
            }
            let bucket = entry.get_mut();
            while drained.len() < budget {
                let Some(region) = bucket.pop_first() else {
                    break;
                };
                drained.push(region);
            }
            if bucket.is_empty() {
                entry.remove();
            }
        }
        for region in &drained {
            self.pending.remove(region);
            self.last_swept.insert(*region, now);
        }
        drained
    }

    /// Samples regions around viewers whose bucket lines up with `now`.
    pub fn sample_viewer_regions<R, F>(
        &mut self,
        viewers: &[Viewer],
        now: u64,
        config: &SchedulerConfig,
        is_loaded: F,
        rng: &mut R,
    ) -> Vec<RegionKey>
    where
        R: Rng + ?Sized,
        F: Fn(RegionKey) -> bool,
    {
        let window = config.spread_window_ticks.max(1);
        let slot = now % window;
        let radius = config.sample_radius.max(0);
        let mut picked = Vec::new();
        for viewer in viewers {
            for _ in 0..config.samples_per_viewer {
                if picked.len() >= config.sweep_budget {
                    return picked;
                }
                let region = viewer.region().offset(
                    rng.gen_range(-radius..=radius),
                    rng.gen_range(-radius..=radius),
                );
                if bucket_offset(region, window) != slot
                    || picked.contains(&region)
                    || self.cooling_down(region, now, config)
                    || !is_loaded(region)
                {
                    continue;
                }
                self.last_swept.insert(region, now);
                picked.push(region);
            }
        }
        picked
    }

    /// Forgets sweep history older than the cooldown.
    pub fn prune(&mut self, now: u64, config: &SchedulerConfig) {
        let cooldown = config.region_cooldown_ticks;
        self.last_swept
            .retain(|_, last| now < last.saturating_add(cooldown));
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.queue.clear();
        self.last_swept.clear();
    }
}
