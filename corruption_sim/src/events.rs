use bevy::prelude::Event;

use crate::world::{ActorId, ActorKind, ActorSpawn, BlockPos, RegionKey};

/// Host reports a region became loaded. Order-tolerant; loads alone rebuild
/// every transient index.
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLoaded {
    pub region: RegionKey,
}

#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionUnloaded {
    pub region: RegionKey,
}

/// A cooking block started burning fuel.
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FurnaceLit {
    pub position: BlockPos,
}

/// A natural spawn about to be placed; may be replaced by its corrupted variant.
#[derive(Event, Debug, Clone, PartialEq)]
pub struct SpawnRequested {
    pub spawn: ActorSpawn,
}

/// Ambient particle / sound cue for one viewer.
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmbientCueEvent {
    pub viewer: u64,
    pub region: RegionKey,
    pub position: BlockPos,
    /// Zero when only a sound plays.
    pub particles: u8,
    pub sound_tier: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionFxPhase {
    Start,
    Pulse,
    FinalBurst,
}

#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionFxEvent {
    pub actor: ActorId,
    pub position: BlockPos,
    pub phase: ConversionFxPhase,
    pub cleansing: bool,
}

/// An actor was replaced by its mapped counterpart.
#[derive(Event, Debug, Clone, PartialEq, Eq)]
pub struct ActorConverted {
    pub source: ActorId,
    pub source_kind: ActorKind,
    pub result: ActorId,
    pub result_kind: ActorKind,
    pub cleansing: bool,
}

#[derive(Event, Debug, Clone, PartialEq, Eq)]
pub struct ColonyNotificationEvent {
    pub colony: String,
    pub stage_ordinal: u8,
    pub message_index: u32,
}

#[derive(Event, Debug, Clone, PartialEq, Eq)]
pub struct CookCompletedEvent {
    pub position: BlockPos,
    pub fuel_item: Option<String>,
    pub crafts: u32,
}
