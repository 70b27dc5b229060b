//! Throttled per-viewer region intensity updates for remote clients.

use std::collections::BTreeMap;

use bevy::prelude::Resource;
use corruption_schema::{RegionSyncFrame, RegionSyncMessage};

use crate::corruption_config::SyncConfig;
use crate::field::CorruptionField;
use crate::stage_config::StageId;
use crate::world::{RegionKey, Viewer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ViewerSync {
    region: RegionKey,
    last_tick: u64,
    last_value: u8,
}

#[derive(Resource, Debug, Clone, Default)]
pub struct RegionSyncTracker {
    viewers: BTreeMap<u64, ViewerSync>,
}

impl RegionSyncTracker {
    pub fn tracked(&self) -> usize {
        self.viewers.len()
    }

    fn should_send(previous: Option<&ViewerSync>, region: RegionKey, value: u8, now: u64, config: &SyncConfig) -> bool {
        let Some(previous) = previous else {
            return true;
        };
        if previous.region != region {
            return true;
        }
        let elapsed = now.saturating_sub(previous.last_tick);
        if elapsed < config.period_ticks {
            return false;
        }
        previous.last_value != value
            || elapsed >= config.period_ticks.saturating_mul(config.unchanged_period_multiplier.max(1))
    }

    /// Updates every viewer and returns the messages due this tick.
    pub fn collect(
        &mut self,
        viewers: &[Viewer],
        field: &CorruptionField,
        stage: StageId,
        now: u64,
        config: &SyncConfig,
    ) -> Vec<RegionSyncMessage> {
        self.viewers
            .retain(|id, _| viewers.iter().any(|viewer| viewer.id == *id));

        let mut messages = Vec::new();
        for viewer in viewers {
            let region = viewer.region();
            let value = field.intensity(region).clamp(0, u8::MAX as i32) as u8;
            if !Self::should_send(self.viewers.get(&viewer.id), region, value, now, config) {
                continue;
            }
            self.viewers.insert(
                viewer.id,
                ViewerSync {
                    region,
                    last_tick: now,
                    last_value: value,
                },
            );
            messages.push(RegionSyncMessage {
                viewer: viewer.id,
                region,
                intensity: value,
                stage_ordinal: stage.ordinal(),
            });
        }
        messages
    }

    pub fn clear(&mut self) {
        self.viewers.clear();
    }
}

/// Messages waiting to be broadcast by whatever transport the host runs.
#[derive(Resource, Debug, Clone, Default)]
pub struct SyncOutbox {
    pending: Vec<RegionSyncMessage>,
}

impl SyncOutbox {
    pub fn extend(&mut self, messages: impl IntoIterator<Item = RegionSyncMessage>) {
        self.pending.extend(messages);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn messages(&self) -> &[RegionSyncMessage] {
        &self.pending
    }

    /// Drains the outbox into a frame; `None` when nothing is queued.
    pub fn take_frame(&mut self, tick: u64) -> Option<RegionSyncFrame> {
        if self.pending.is_empty() {
            return None;
        }
        Some(RegionSyncFrame {
            tick,
            messages: std::mem::take(&mut self.pending),
        })
    }
}
