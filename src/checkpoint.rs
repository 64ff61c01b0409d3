//! Durable per-batch checkpoints written by the embedding pipeline.
//!
//! A checkpoint directory holds one `batch-<ordinal>.json` per completed batch
//! plus a `manifest.json` describing the run that produced them. Every file is
//! written to a temporary sibling, synced, then renamed into place, so a crash
//! leaves either the complete file or nothing under the final name.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::canonical::Document;
use crate::error::{GridError, Result};

const MANIFEST_FILE: &str = "manifest.json";
const BATCH_PREFIX: &str = "batch-";
const BATCH_SUFFIX: &str = ".json";

/// One document with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedDocument {
    pub embedding: Vec<f32>,
    pub document: Document,
}

/// Ordinal-tagged output of one embedded batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Position of the batch in the input sequence.
    pub ordinal: u64,
    /// Provider identity the vectors came from.
    pub model: String,
    pub dimension: usize,
    pub entries: Vec<EmbeddedDocument>,
}

/// Settings a checkpoint directory was started with.
///
/// Ordinals are only meaningful for one batch size and one model, so a resume
/// must match what is recorded here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub batch_size: usize,
    pub model: String,
    /// Input document the run was started on; a resume from another input is refused.
    #[serde(default)]
    pub input: Option<PathBuf>,
}

/// Ordinal-keyed checkpoint directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Opens (creating if needed) a checkpoint directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(GridError::storage(&dir, "create checkpoint directory"))?;
        Ok(Self { dir })
    }

    /// Directory backing this store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final path for the checkpoint with `ordinal`.
    pub fn path_for(&self, ordinal: u64) -> PathBuf {
        self.dir
            .join(format!("{BATCH_PREFIX}{ordinal:08}{BATCH_SUFFIX}"))
    }

    /// Atomically persists one checkpoint, replacing any previous file for its ordinal.
    pub fn write(&self, checkpoint: &Checkpoint) -> Result<PathBuf> {
        let path = self.path_for(checkpoint.ordinal);
        write_json_atomic(&self.dir, &path, checkpoint, false)?;
        debug!(
            ordinal = checkpoint.ordinal,
            entries = checkpoint.entries.len(),
            "checkpoint persisted"
        );
        Ok(path)
    }

    /// All completed checkpoints ordered by ordinal.
    ///
    /// Temporary files and anything not named like a checkpoint are ignored.
    pub fn scan(&self) -> Result<BTreeMap<u64, PathBuf>> {
        let entries =
            fs::read_dir(&self.dir).map_err(GridError::storage(&self.dir, "list checkpoints"))?;
        let mut found = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(GridError::storage(&self.dir, "list checkpoints"))?;
            let name = entry.file_name();
            let Some(ordinal) = name.to_str().and_then(parse_ordinal) else {
                continue;
            };
            found.insert(ordinal, entry.path());
        }
        Ok(found)
    }

    /// Reads and validates one checkpoint file.
    pub fn load(&self, path: &Path) -> Result<Checkpoint> {
        let checkpoint: Checkpoint = read_json(path, "read checkpoint")?;
        if let Some(bad) = checkpoint
            .entries
            .iter()
            .find(|entry| entry.embedding.len() != checkpoint.dimension)
        {
            return Err(GridError::IndexFormat {
                artifact: path.to_path_buf(),
                reason: format!(
                    "entry {:?} has {} values, checkpoint declares {}",
                    bad.document.id,
                    bad.embedding.len(),
                    checkpoint.dimension
                ),
            });
        }
        Ok(checkpoint)
    }

    /// Deletes the checkpoint for `ordinal`; a missing file is not an error.
    pub fn remove(&self, ordinal: u64) -> Result<()> {
        let path = self.path_for(ordinal);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(GridError::storage(&path, "delete checkpoint")(err)),
        }
    }

    /// Run manifest, if one was recorded.
    pub fn manifest(&self) -> Result<Option<RunManifest>> {
        let path = self.dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path, "read run manifest").map(Some)
    }

    /// Records `expected` for a fresh directory, or checks it against the existing manifest.
    pub fn ensure_manifest(&self, expected: &RunManifest) -> Result<()> {
        let Some(existing) = self.manifest()? else {
            let path = self.dir.join(MANIFEST_FILE);
            return write_json_atomic(&self.dir, &path, expected, true);
        };
        if existing.batch_size != expected.batch_size || existing.model != expected.model {
            return Err(GridError::Configuration(format!(
                "checkpoints in {:?} were produced with batch size {} and model {:?}; \
                 this run uses batch size {} and model {:?}",
                self.dir, existing.batch_size, existing.model, expected.batch_size, expected.model
            )));
        }
        if let (Some(recorded), Some(current)) = (&existing.input, &expected.input) {
            if recorded != current {
                return Err(GridError::Configuration(format!(
                    "checkpoints in {:?} were produced from {:?}, not {:?}; \
                     remove them or use another checkpoint directory",
                    self.dir, recorded, current
                )));
            }
        }
        Ok(())
    }

    /// Removes the run manifest once its checkpoints have been consumed.
    pub fn remove_manifest(&self) -> Result<()> {
        let path = self.dir.join(MANIFEST_FILE);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(GridError::storage(&path, "delete run manifest")(err)),
        }
    }
}

fn parse_ordinal(name: &str) -> Option<u64> {
    name.strip_prefix(BATCH_PREFIX)?
        .strip_suffix(BATCH_SUFFIX)?
        .parse()
        .ok()
}

/// Serializes `value` into a temp file inside `dir`, syncs it, and renames it to `path`.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(
    dir: &Path,
    path: &Path,
    value: &T,
    pretty: bool,
) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir).map_err(GridError::storage(path, "create temp file for"))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        let encoded = if pretty {
            serde_json::to_writer_pretty(&mut writer, value)
        } else {
            serde_json::to_writer(&mut writer, value)
        };
        encoded.map_err(GridError::serialization(path, "encode"))?;
        writer.flush().map_err(GridError::storage(path, "write"))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(GridError::storage(path, "sync"))?;
    tmp.persist(path)
        .map_err(|err| GridError::storage(path, "rename into place")(err.error))?;
    Ok(())
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path, operation: &'static str) -> Result<T> {
    let file = File::open(path).map_err(GridError::storage(path, "open"))?;
    serde_json::from_reader(BufReader::new(file)).map_err(GridError::serialization(path, operation))
}
