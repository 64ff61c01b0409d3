//! Merges checkpoints into one published index generation.

use serde::Serialize;
use tracing::{info, warn};

use crate::canonical::Document;
use crate::checkpoint::CheckpointStore;
use crate::error::{GridError, Result};
use crate::index::FlatIndex;
use crate::store::IndexLayout;

/// Build behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Leave checkpoints in place after a verified publish so the merge can be repeated.
    pub keep_checkpoints: bool,
}

/// Result of a successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub vectors: usize,
    pub dimension: usize,
    pub checkpoints_merged: usize,
    pub generation: u64,
    pub model: String,
}

/// Assembles checkpoints, strictly by ordinal, into an index + metadata pair.
pub struct IndexBuilder {
    checkpoints: CheckpointStore,
    layout: IndexLayout,
    options: BuildOptions,
}

impl IndexBuilder {
    pub fn new(checkpoints: CheckpointStore, layout: IndexLayout, options: BuildOptions) -> Self {
        Self {
            checkpoints,
            layout,
            options,
        }
    }

    /// Merges every checkpoint, publishes a new generation, then deletes the
    /// checkpoints unless asked to keep them.
    ///
    /// Checkpoints are only removed after the published pair reloaded intact,
    /// so any failure leaves them available for another attempt.
    pub fn build(&self) -> Result<BuildReport> {
        let found = self.checkpoints.scan()?;
        if found.is_empty() {
            return Err(GridError::Configuration(format!(
                "no checkpoints found in {:?}; nothing to build",
                self.checkpoints.dir()
            )));
        }
        info!(checkpoints = found.len(), "merging checkpoints");

        let mut index: Option<FlatIndex> = None;
        let mut metadata: Vec<Document> = Vec::new();
        let mut model: Option<String> = None;
        let mut previous: Option<u64> = None;
        for (ordinal, path) in &found {
            if let Some(prev) = previous {
                if *ordinal != prev + 1 {
                    warn!(
                        missing_from = prev + 1,
                        missing_to = ordinal - 1,
                        "checkpoint ordinals have a gap; those batches failed or were never run"
                    );
                }
            }
            previous = Some(*ordinal);

            let checkpoint = self.checkpoints.load(path)?;
            let expected = model.get_or_insert_with(|| checkpoint.model.clone());
            if *expected != checkpoint.model {
                return Err(GridError::Configuration(format!(
                    "checkpoint {path:?} was embedded with {:?}, earlier checkpoints with {expected:?}",
                    checkpoint.model
                )));
            }
            let index = index.get_or_insert_with(|| FlatIndex::new(checkpoint.dimension));
            if checkpoint.dimension != index.dimension() {
                return Err(GridError::DimensionMismatch {
                    expected: index.dimension(),
                    actual: checkpoint.dimension,
                });
            }
            for entry in checkpoint.entries {
                index.add(&entry.embedding)?;
                metadata.push(entry.document);
            }
        }

        let index = match index {
            Some(index) if !index.is_empty() => index,
            _ => {
                return Err(GridError::Configuration(
                    "checkpoints contain no documents; nothing to build".into(),
                ))
            }
        };
        let model = model.unwrap_or_default();
        let generation = self.layout.publish(&index, &metadata, &model)?;

        if !self.options.keep_checkpoints {
            for ordinal in found.keys() {
                self.checkpoints.remove(*ordinal)?;
            }
            self.checkpoints.remove_manifest()?;
        }

        let report = BuildReport {
            vectors: index.len(),
            dimension: index.dimension(),
            checkpoints_merged: found.len(),
            generation: generation.number,
            model,
        };
        info!(
            vectors = report.vectors,
            dimension = report.dimension,
            generation = report.generation,
            "index build complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{Checkpoint, EmbeddedDocument};
    use crate::record::{Properties, Record};
    use pretty_assertions::assert_eq;

    fn checkpoint(ordinal: u64, ids: &[&str], dimension: usize) -> Checkpoint {
        Checkpoint {
            ordinal,
            model: "hashing-test".into(),
            dimension,
            entries: ids
                .iter()
                .map(|id| EmbeddedDocument {
                    embedding: vec![ordinal as f32; dimension],
                    document: crate::canonical::canonicalize(&Record {
                        properties: Properties {
                            id: Some((*id).into()),
                            ..Properties::default()
                        },
                        geometry: None,
                    }),
                })
                .collect(),
        }
    }

    fn setup() -> (tempfile::TempDir, CheckpointStore, IndexLayout) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::open(dir.path().join("checkpoints")).expect("store");
        let layout = IndexLayout::new(dir.path().join("index"));
        (dir, store, layout)
    }

    #[test]
    fn merges_by_ordinal_and_cleans_up() {
        let (_dir, store, layout) = setup();
        store.write(&checkpoint(3, &["d"], 2)).expect("write");
        store.write(&checkpoint(0, &["a", "b"], 2)).expect("write");
        store.write(&checkpoint(1, &["c"], 2)).expect("write");

        let report = IndexBuilder::new(store.clone(), layout.clone(), BuildOptions::default())
            .build()
            .expect("build");
        assert_eq!(report.vectors, 4);
        assert_eq!(report.dimension, 2);
        assert_eq!(report.checkpoints_merged, 3);

        let published = layout.load().expect("load");
        let ids: Vec<&str> = published.metadata.iter().map(|doc| doc.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(published.index.vector(3), Some(&[3.0, 3.0][..]));
        assert_eq!(published.info.map(|info| info.model), Some("hashing-test".to_string()));
        assert!(store.scan().expect("scan").is_empty());
    }

    #[test]
    fn dimension_disagreement_is_fatal_and_keeps_checkpoints() {
        let (_dir, store, layout) = setup();
        store.write(&checkpoint(0, &["a"], 2)).expect("write");
        store.write(&checkpoint(1, &["b"], 3)).expect("write");
        let err = IndexBuilder::new(store.clone(), layout.clone(), BuildOptions::default())
            .build()
            .expect_err("mixed widths");
        assert!(matches!(err, GridError::DimensionMismatch { expected: 2, actual: 3 }));
        assert_eq!(store.scan().expect("scan").len(), 2);
        assert_eq!(layout.current_generation().expect("current"), None);
    }

    #[test]
    fn empty_directory_has_nothing_to_build() {
        let (_dir, store, layout) = setup();
        let err = IndexBuilder::new(store, layout, BuildOptions::default())
            .build()
            .expect_err("empty");
        assert!(err.is_configuration());
    }
}
