//! Generation-swapped persistence for the index and its metadata.
//!
//! ```text
//! <root>/CURRENT            name of the live generation, e.g. "gen-000004"
//! <root>/gen-000004/index.flat
//! <root>/gen-000004/metadata.json
//! <root>/gen-000004/build.json  model identity and shape
//! ```
//!
//! A publish writes a complete generation into a staging directory, reloads
//! and compares both files, renames the directory into place, then swaps the
//! `CURRENT` pointer with an atomic rename. Readers that resolve `CURRENT`
//! therefore always see a matching index/metadata pair.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::canonical::Document;
use crate::checkpoint::{read_json, write_json_atomic};
use crate::error::{GridError, Result};
use crate::index::FlatIndex;

pub const INDEX_FILE: &str = "index.flat";
pub const METADATA_FILE: &str = "metadata.json";
pub const BUILD_INFO_FILE: &str = "build.json";
const CURRENT_FILE: &str = "CURRENT";
const GENERATION_PREFIX: &str = "gen-";
const STAGING_PREFIX: &str = ".staging-";

/// Generations kept on disk after a publish, the live one included.
pub const DEFAULT_RETAINED_GENERATIONS: usize = 2;

/// One immutable index/metadata pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub number: u64,
    pub dir: PathBuf,
}

impl Generation {
    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }
}

/// Provenance recorded next to each generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    /// Embedding model identity; queries must embed with the same one.
    pub model: String,
    pub vectors: usize,
    pub dimension: usize,
}

/// A loaded generation.
#[derive(Debug, Clone)]
pub struct PublishedIndex {
    pub index: FlatIndex,
    pub metadata: Vec<Document>,
    pub info: Option<BuildInfo>,
    pub generation: Generation,
}

/// Directory holding every published generation.
#[derive(Debug, Clone)]
pub struct IndexLayout {
    root: PathBuf,
    retained: usize,
}

impl IndexLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            retained: DEFAULT_RETAINED_GENERATIONS,
        }
    }

    /// Keeps `count` generations (at least the live one) after each publish.
    pub fn with_retained_generations(mut self, count: usize) -> Self {
        self.retained = count.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The generation `CURRENT` points at, if any was published.
    pub fn current_generation(&self) -> Result<Option<Generation>> {
        let pointer = self.root.join(CURRENT_FILE);
        let name = match fs::read_to_string(&pointer) {
            Ok(name) => name,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(GridError::storage(&pointer, "read")(err)),
        };
        let name = name.trim();
        let number = parse_generation(name).ok_or_else(|| GridError::IndexFormat {
            artifact: pointer.clone(),
            reason: format!("unrecognized generation name {name:?}"),
        })?;
        Ok(Some(Generation {
            number,
            dir: self.root.join(name),
        }))
    }

    /// Writes, verifies and atomically activates a new generation.
    pub fn publish(&self, index: &FlatIndex, metadata: &[Document], model: &str) -> Result<Generation> {
        if index.len() != metadata.len() {
            return Err(GridError::Configuration(format!(
                "index holds {} vectors but metadata has {} documents",
                index.len(),
                metadata.len()
            )));
        }
        fs::create_dir_all(&self.root).map_err(GridError::storage(&self.root, "create index directory"))?;

        let number = self.generations()?.last().map_or(1, |latest| latest.number + 1);
        let name = generation_name(number);
        let staging = self.root.join(format!("{STAGING_PREFIX}{name}"));
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(GridError::storage(&staging, "clear stale staging"))?;
        }
        fs::create_dir(&staging).map_err(GridError::storage(&staging, "create staging"))?;

        let info = BuildInfo {
            model: model.to_string(),
            vectors: index.len(),
            dimension: index.dimension(),
        };
        if let Err(err) = write_and_verify(&staging, index, metadata, &info) {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                warn!(dir = ?staging, error = %cleanup, "could not remove failed staging directory");
            }
            return Err(err);
        }

        let generation = Generation {
            number,
            dir: self.root.join(&name),
        };
        fs::rename(&staging, &generation.dir).map_err(GridError::storage(&generation.dir, "activate generation"))?;
        self.swap_current(&name)?;
        info!(
            generation = number,
            vectors = index.len(),
            dimension = index.dimension(),
            "published index generation"
        );
        self.prune(number)?;
        Ok(generation)
    }

    /// Loads the live generation's index and metadata.
    pub fn load(&self) -> Result<PublishedIndex> {
        let generation = self.current_generation()?.ok_or_else(|| {
            GridError::Configuration(format!("no index has been published under {:?}", self.root))
        })?;
        let index = FlatIndex::load(&generation.index_path())?;
        let metadata = read_metadata(&generation.metadata_path())?;
        let info_path = generation.dir.join(BUILD_INFO_FILE);
        let info = if info_path.exists() {
            Some(read_json(&info_path, "read build info")?)
        } else {
            None
        };
        Ok(PublishedIndex {
            index,
            metadata,
            info,
            generation,
        })
    }

    /// Published generations in ascending order.
    pub fn generations(&self) -> Result<Vec<Generation>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(GridError::storage(&self.root, "list generations")(err)),
        };
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(GridError::storage(&self.root, "list generations"))?;
            if let Some(number) = entry.file_name().to_str().and_then(parse_generation) {
                found.push(Generation {
                    number,
                    dir: entry.path(),
                });
            }
        }
        found.sort_by_key(|generation| generation.number);
        Ok(found)
    }

    fn swap_current(&self, name: &str) -> Result<()> {
        let pointer = self.root.join(CURRENT_FILE);
        let mut tmp = NamedTempFile::new_in(&self.root).map_err(GridError::storage(&pointer, "stage"))?;
        writeln!(tmp, "{name}").map_err(GridError::storage(&pointer, "write"))?;
        tmp.as_file().sync_all().map_err(GridError::storage(&pointer, "sync"))?;
        tmp.persist(&pointer)
            .map_err(|err| GridError::storage(&pointer, "swap")(err.error))?;
        sync_dir(&self.root);
        Ok(())
    }

    fn prune(&self, live: u64) -> Result<()> {
        let generations = self.generations()?;
        let excess = generations.len().saturating_sub(self.retained);
        for generation in generations.into_iter().take(excess) {
            if generation.number == live {
                continue;
            }
            debug!(generation = generation.number, "pruning old index generation");
            fs::remove_dir_all(&generation.dir).map_err(GridError::storage(&generation.dir, "prune generation"))?;
        }
        Ok(())
    }
}

/// Reads a metadata file: a JSON array of documents in index order.
pub fn read_metadata(path: &Path) -> Result<Vec<Document>> {
    read_json(path, "read metadata")
}

/// Writes a metadata file and syncs it.
pub fn write_metadata(path: &Path, metadata: &[Document]) -> Result<()> {
    let file = File::create(path).map_err(GridError::storage(path, "create metadata"))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, metadata).map_err(GridError::serialization(path, "encode metadata"))?;
    let file = writer
        .into_inner()
        .map_err(|err| GridError::storage(path, "flush metadata")(err.into_error()))?;
    file.sync_all().map_err(GridError::storage(path, "sync metadata"))
}

fn write_and_verify(
    dir: &Path,
    index: &FlatIndex,
    metadata: &[Document],
    info: &BuildInfo,
) -> Result<()> {
    let index_path = dir.join(INDEX_FILE);
    let metadata_path = dir.join(METADATA_FILE);
    index.save(&index_path)?;
    write_metadata(&metadata_path, metadata)?;
    write_json_atomic(dir, &dir.join(BUILD_INFO_FILE), info, true)?;

    let reloaded_index = FlatIndex::load(&index_path)?;
    if &reloaded_index != index {
        return Err(GridError::IndexFormat {
            artifact: index_path,
            reason: "reloaded index differs from the one written".into(),
        });
    }
    let reloaded_metadata = read_metadata(&metadata_path)?;
    if reloaded_metadata.as_slice() != metadata {
        return Err(GridError::IndexFormat {
            artifact: metadata_path,
            reason: "reloaded metadata differs from the documents written".into(),
        });
    }
    sync_dir(dir);
    Ok(())
}

fn generation_name(number: u64) -> String {
    format!("{GENERATION_PREFIX}{number:06}")
}

fn parse_generation(name: &str) -> Option<u64> {
    name.strip_prefix(GENERATION_PREFIX)?.parse().ok()
}

// Directory fsync is advisory here: not every platform supports opening a directory.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::canonicalize;
    use crate::record::{Properties, Record};
    use pretty_assertions::assert_eq;

    fn docs(ids: &[&str]) -> Vec<Document> {
        ids.iter()
            .map(|id| {
                canonicalize(&Record {
                    properties: Properties {
                        id: Some((*id).into()),
                        voltage: Some(115_i64.into()),
                        ..Properties::default()
                    },
                    geometry: None,
                })
            })
            .collect()
    }

    fn flat(rows: usize) -> FlatIndex {
        let mut index = FlatIndex::new(2);
        for i in 0..rows {
            index.add(&[i as f32, 0.5]).expect("add");
        }
        index
    }

    #[test]
    fn publish_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = IndexLayout::new(dir.path().join("index"));
        assert_eq!(layout.current_generation().expect("current"), None);

        let generation = layout
            .publish(&flat(2), &docs(&["a", "b"]), "hashing-2")
            .expect("publish");
        assert_eq!(generation.number, 1);
        let published = layout.load().expect("load");
        assert_eq!(published.index, flat(2));
        assert_eq!(published.metadata, docs(&["a", "b"]));
        assert_eq!(published.generation, generation);
        assert_eq!(
            published.info,
            Some(BuildInfo {
                model: "hashing-2".into(),
                vectors: 2,
                dimension: 2,
            })
        );
    }

    #[test]
    fn republish_swaps_and_prunes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = IndexLayout::new(dir.path()).with_retained_generations(2);
        layout.publish(&flat(1), &docs(&["a"]), "m").expect("gen 1");
        layout.publish(&flat(2), &docs(&["a", "b"]), "m").expect("gen 2");
        layout.publish(&flat(3), &docs(&["a", "b", "c"]), "m").expect("gen 3");

        let numbers: Vec<u64> = layout
            .generations()
            .expect("list")
            .iter()
            .map(|g| g.number)
            .collect();
        assert_eq!(numbers, vec![2, 3]);
        let published = layout.load().expect("load");
        assert_eq!(published.generation.number, 3);
        assert_eq!(published.index.len(), published.metadata.len());
        assert_eq!(published.metadata.len(), 3);
    }

    #[test]
    fn misaligned_pair_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = IndexLayout::new(dir.path());
        let err = layout.publish(&flat(2), &docs(&["a"]), "m").expect_err("misaligned");
        assert!(err.is_configuration());
        assert_eq!(layout.current_generation().expect("current"), None);
    }

    #[test]
    fn metadata_file_is_a_json_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = IndexLayout::new(dir.path());
        let generation = layout.publish(&flat(1), &docs(&["L9"]), "m").expect("publish");
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(generation.metadata_path()).expect("read"))
                .expect("json");
        assert_eq!(raw[0]["id"], "L9");
        assert_eq!(raw[0]["substations"], serde_json::json!(["Unknown", "Unknown"]));
    }

    #[test]
    fn missing_index_is_a_configuration_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = IndexLayout::new(dir.path()).load().expect_err("nothing published");
        assert!(err.is_configuration());
    }
}
