//! Bidirectional vanilla ↔ corrupted actor mapping.
//!
//! The table is immutable once built and lives behind an `Arc`; reloads build a
//! new table and swap it in one assignment. Mapping documents come from
//! `conversion_mappings.json` (override with `CONVERSION_MAPPINGS_PATH`) and,
//! optionally, from a watched directory of `*.json` files applied in name order.

use std::{
    collections::HashMap,
    env, fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use bevy::prelude::Resource;
use crossbeam_channel::{unbounded, Receiver};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use thiserror::Error;

use crate::world::ActorKind;

pub const BUILTIN_CONVERSION_MAPPINGS: &str = include_str!("data/conversion_mappings.json");

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct MappingEntry {
    pub corrupted: ActorKind,
    pub vanilla: ActorKind,
}

/// One declarative mapping document. `replace` discards everything loaded before it.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MappingDocument {
    pub replace: bool,
    pub mappings: Vec<MappingEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum MappingFile {
    Many(Vec<MappingDocument>),
    One(MappingDocument),
}

impl MappingFile {
    fn into_documents(self) -> Vec<MappingDocument> {
        match self {
            MappingFile::Many(documents) => documents,
            MappingFile::One(document) => vec![document],
        }
    }
}

pub fn parse_mapping_documents(json: &str) -> Result<Vec<MappingDocument>, MappingError> {
    let file: MappingFile = serde_json::from_str(json)?;
    Ok(file.into_documents())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionMapping {
    to_corrupted: HashMap<ActorKind, ActorKind>,
    to_vanilla: HashMap<ActorKind, ActorKind>,
}

impl ConversionMapping {
    /// Builds a table from documents in order, dropping invalid entries.
    pub fn from_documents<F>(documents: &[MappingDocument], is_known: F) -> Self
    where
        F: Fn(&ActorKind) -> bool,
    {
        let mut mapping = Self::default();
        for document in documents {
            mapping.apply_document(document, &is_known);
        }
        mapping
    }

    fn apply_document<F>(&mut self, document: &MappingDocument, is_known: &F)
    where
        F: Fn(&ActorKind) -> bool,
    {
        if document.replace {
            self.to_corrupted.clear();
            self.to_vanilla.clear();
        }
        for entry in &document.mappings {
            if entry.corrupted == entry.vanilla {
                tracing::warn!(
                    target: "corruption::config",
                    kind = %entry.vanilla,
                    "mapping.entry_dropped=self_mapping"
                );
                continue;
            }
            if let Some(unknown) = [&entry.corrupted, &entry.vanilla]
                .into_iter()
                .find(|kind| !is_known(kind))
            {
                tracing::warn!(
                    target: "corruption::config",
                    kind = %unknown,
                    corrupted = %entry.corrupted,
                    vanilla = %entry.vanilla,
                    "mapping.entry_dropped=unknown_kind"
                );
                continue;
            }
            self.insert(entry.vanilla.clone(), entry.corrupted.clone());
        }
    }

    fn insert(&mut self, vanilla: ActorKind, corrupted: ActorKind) {
        if let Some(previous) = self.to_corrupted.insert(vanilla.clone(), corrupted.clone()) {
            if previous != corrupted {
                self.to_vanilla.remove(&previous);
            }
        }
        if let Some(previous) = self.to_vanilla.insert(corrupted.clone(), vanilla.clone()) {
            if previous != vanilla && self.to_corrupted.get(&previous) == Some(&corrupted) {
                self.to_corrupted.remove(&previous);
            }
        }
    }

    pub fn lookup_corrupted_for(&self, vanilla: &ActorKind) -> Option<&ActorKind> {
        self.to_corrupted.get(vanilla)
    }

    pub fn lookup_vanilla_for(&self, corrupted: &ActorKind) -> Option<&ActorKind> {
        self.to_vanilla.get(corrupted)
    }

    pub fn is_corrupted(&self, kind: &ActorKind) -> bool {
        self.to_vanilla.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.to_corrupted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_corrupted.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("failed to parse conversion mappings: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read conversion mappings from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to watch mapping directory {path:?}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Handle for the active mapping table.
#[derive(Resource, Debug, Clone, Default)]
pub struct ConversionMappingHandle(pub Arc<ConversionMapping>);

impl ConversionMappingHandle {
    pub fn new(mapping: Arc<ConversionMapping>) -> Self {
        Self(mapping)
    }

    pub fn get(&self) -> Arc<ConversionMapping> {
        Arc::clone(&self.0)
    }

    /// Swaps the whole table atomically.
    pub fn set_mappings(&mut self, mapping: ConversionMapping) {
        tracing::info!(
            target: "corruption::conversion",
            entries = mapping.len(),
            "mapping.swapped"
        );
        self.0 = Arc::new(mapping);
    }

    /// Applies documents on top of the current table, then swaps.
    pub fn merge_overrides<F>(&mut self, documents: &[MappingDocument], is_known: F)
    where
        F: Fn(&ActorKind) -> bool,
    {
        let mut merged = (*self.0).clone();
        for document in documents {
            merged.apply_document(document, &is_known);
        }
        self.set_mappings(merged);
    }
}

fn read_documents(path: &Path) -> Result<Vec<MappingDocument>, MappingError> {
    let contents = fs::read_to_string(path).map_err(|source| MappingError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_mapping_documents(&contents)
}

pub fn builtin_mapping_documents() -> Vec<MappingDocument> {
    parse_mapping_documents(BUILTIN_CONVERSION_MAPPINGS).expect("builtin conversion mappings should parse")
}

/// Load mapping documents from `CONVERSION_MAPPINGS_PATH`, falling back to the builtin file.
pub fn load_conversion_mappings_from_env<F>(is_known: F) -> ConversionMapping
where
    F: Fn(&ActorKind) -> bool,
{
    if let Some(path) = env::var("CONVERSION_MAPPINGS_PATH").ok().map(PathBuf::from) {
        match read_documents(&path) {
            Ok(documents) => {
                let mapping = ConversionMapping::from_documents(&documents, &is_known);
                tracing::info!(
                    target: "corruption::config",
                    path = %path.display(),
                    entries = mapping.len(),
                    "conversion_mappings.loaded=file"
                );
                return mapping;
            }
            Err(err) => {
                tracing::warn!(
                    target: "corruption::config",
                    path = %path.display(),
                    error = %err,
                    "conversion_mappings.load_failed"
                );
            }
        }
    }

    let mapping = ConversionMapping::from_documents(&builtin_mapping_documents(), &is_known);
    tracing::info!(
        target: "corruption::config",
        entries = mapping.len(),
        "conversion_mappings.loaded=builtin"
    );
    mapping
}

/// Reads every `*.json` file of a directory in name order on top of the builtin documents.
pub fn load_mapping_directory<F>(dir: &Path, is_known: F) -> Result<ConversionMapping, MappingError>
where
    F: Fn(&ActorKind) -> bool,
{
    let entries = fs::read_dir(dir).map_err(|source| MappingError::Read {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| is_mapping_file(path))
        .collect();
    files.sort();

    let mut documents = builtin_mapping_documents();
    for file in files {
        match read_documents(&file) {
            Ok(mut parsed) => documents.append(&mut parsed),
            Err(err) => tracing::warn!(
                target: "corruption::config",
                path = %file.display(),
                error = %err,
                "mapping.file_dropped"
            ),
        }
    }
    Ok(ConversionMapping::from_documents(&documents, is_known))
}

fn is_mapping_file(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("json")
}

/// Watches a mapping directory and reports changed JSON files.
#[derive(Resource)]
pub struct MappingWatcher {
    dir: PathBuf,
    receiver: Receiver<PathBuf>,
    _watcher: Mutex<RecommendedWatcher>,
}

impl MappingWatcher {
    pub fn start(dir: &Path) -> Result<Self, MappingError> {
        let (sender, receiver) = unbounded::<PathBuf>();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) => {
                    for path in event.paths.into_iter().filter(|path| is_mapping_file(path)) {
                        if sender.send(path).is_err() {
                            return;
                        }
                    }
                }
                Err(err) => tracing::warn!(
                    target: "corruption::config",
                    error = %err,
                    "mapping.watch_error"
                ),
            }
        })
        .map_err(|source| MappingError::Watch {
            path: dir.to_path_buf(),
            source,
        })?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|source| MappingError::Watch {
                path: dir.to_path_buf(),
                source,
            })?;
        tracing::info!(
            target: "corruption::config",
            path = %dir.display(),
            "mapping.watch_started"
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            receiver,
            _watcher: Mutex::new(watcher),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Drains pending change notifications; true when anything changed.
    pub fn take_changes(&self) -> bool {
        let mut changed = false;
        while let Ok(path) = self.receiver.try_recv() {
            tracing::debug!(
                target: "corruption::config",
                path = %path.display(),
                "mapping.file_changed"
            );
            changed = true;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(kind: &ActorKind) -> bool {
        !kind.as_str().starts_with("ghost")
    }

    fn entry(corrupted: &str, vanilla: &str) -> MappingEntry {
        MappingEntry {
            corrupted: corrupted.into(),
            vanilla: vanilla.into(),
        }
    }

    #[test]
    fn lookups_are_bidirectional() {
        let mapping = ConversionMapping::from_documents(&builtin_mapping_documents(), |_| true);
        let wolf = ActorKind::from("wolf");
        let corrupted = mapping.lookup_corrupted_for(&wolf).expect("wolf mapped");
        assert_eq!(corrupted.as_str(), "corrupted_wolf");
        assert_eq!(mapping.lookup_vanilla_for(corrupted), Some(&wolf));
        assert!(mapping.is_corrupted(corrupted));
        assert!(!mapping.is_corrupted(&wolf));
    }

    #[test]
    fn invalid_entries_are_dropped() {
        let document = MappingDocument {
            replace: false,
            mappings: vec![
                entry("cow", "cow"),
                entry("ghost_pig", "pig"),
                entry("corrupted_sheep", "sheep"),
            ],
        };
        let mapping = ConversionMapping::from_documents(&[document], known);
        assert_eq!(mapping.len(), 1);
        assert!(mapping.lookup_corrupted_for(&"pig".into()).is_none());
    }

    #[test]
    fn replace_documents_discard_earlier_entries() {
        let documents = parse_mapping_documents(
            r#"[{"mappings":[{"corrupted":"corrupted_cow","vanilla":"cow"}]},
                {"replace":true,"mappings":[{"corrupted":"husk","vanilla":"zombie"}]}]"#,
        )
        .expect("parses");
        let mapping = ConversionMapping::from_documents(&documents, |_| true);
        assert_eq!(mapping.len(), 1);
        assert!(mapping.lookup_corrupted_for(&"cow".into()).is_none());
        assert_eq!(
            mapping.lookup_vanilla_for(&"husk".into()).map(ActorKind::as_str),
            Some("zombie")
        );
    }

    #[test]
    fn remapping_a_vanilla_kind_drops_the_stale_reverse_entry() {
        let documents = vec![
            MappingDocument {
                replace: false,
                mappings: vec![entry("corrupted_cow", "cow")],
            },
            MappingDocument {
                replace: false,
                mappings: vec![entry("blighted_cow", "cow")],
            },
        ];
        let mapping = ConversionMapping::from_documents(&documents, |_| true);
        assert!(mapping.lookup_vanilla_for(&"corrupted_cow".into()).is_none());
        assert_eq!(
            mapping.lookup_corrupted_for(&"cow".into()).map(ActorKind::as_str),
            Some("blighted_cow")
        );
    }

    #[test]
    fn merge_overrides_swaps_a_new_table() {
        let mut handle = ConversionMappingHandle::new(Arc::new(ConversionMapping::from_documents(
            &builtin_mapping_documents(),
            |_| true,
        )));
        let before = handle.get();
        handle.merge_overrides(
            &[MappingDocument {
                replace: false,
                mappings: vec![entry("husk", "zombie")],
            }],
            |_| true,
        );
        let after = handle.get();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(
            after.lookup_corrupted_for(&"zombie".into()).map(ActorKind::as_str),
            Some("husk")
        );
        assert_eq!(
            before.lookup_corrupted_for(&"zombie".into()).map(ActorKind::as_str),
            Some("corrupted_zombie")
        );
    }

    #[test]
    fn directory_files_apply_in_name_order() {
        let dir = std::env::temp_dir().join(format!("corruption-mappings-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("temp dir");
        fs::write(
            dir.join("10-husk.json"),
            r#"{"mappings":[{"corrupted":"husk","vanilla":"zombie"}]}"#,
        )
        .expect("write");
        fs::write(
            dir.join("20-drowned.json"),
            r#"{"mappings":[{"corrupted":"drowned","vanilla":"zombie"}]}"#,
        )
        .expect("write");
        fs::write(dir.join("notes.txt"), "ignored").expect("write");

        let mapping = load_mapping_directory(&dir, |_| true).expect("directory loads");
        assert_eq!(
            mapping.lookup_corrupted_for(&"zombie".into()).map(ActorKind::as_str),
            Some("drowned")
        );
        assert!(mapping.lookup_corrupted_for(&"wolf".into()).is_some());
        fs::remove_dir_all(&dir).ok();
    }
}
