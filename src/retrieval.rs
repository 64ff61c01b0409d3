//! Query-time access to a published index.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::canonical::Document;
use crate::embedder::EmbeddingProvider;
use crate::error::{GridError, Result};
use crate::index::FlatIndex;
use crate::store::IndexLayout;

/// Read-only index plus metadata, shared across concurrent queries.
#[derive(Debug)]
pub struct IndexContext {
    index: FlatIndex,
    metadata: Vec<Document>,
    model: Option<String>,
    generation: Option<u64>,
}

impl IndexContext {
    /// Loads the live generation from `layout`.
    ///
    /// A count disagreement between index and metadata is logged rather than
    /// refused; affected positions are dropped per query.
    pub fn load(layout: &IndexLayout) -> Result<Arc<Self>> {
        let published = layout.load()?;
        if published.index.len() != published.metadata.len() {
            warn!(
                vectors = published.index.len(),
                documents = published.metadata.len(),
                generation = published.generation.number,
                "index and metadata counts differ; unmatched positions will be skipped"
            );
        }
        Ok(Arc::new(Self {
            index: published.index,
            metadata: published.metadata,
            model: published.info.map(|info| info.model),
            generation: Some(published.generation.number),
        }))
    }

    /// Wraps in-memory parts, e.g. for tests or a freshly built index.
    pub fn from_parts(index: FlatIndex, metadata: Vec<Document>) -> Arc<Self> {
        Arc::new(Self {
            index,
            metadata,
            model: None,
            generation: None,
        })
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub fn metadata(&self) -> &[Document] {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    /// Model the index was built with, when recorded.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn generation(&self) -> Option<u64> {
        self.generation
    }
}

/// One ranked hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedDocument {
    pub document: Document,
    pub distance: f32,
    pub position: usize,
}

/// Embeds queries and runs exact k-NN over an [`IndexContext`].
#[derive(Clone)]
pub struct RetrievalEngine {
    context: Arc<IndexContext>,
    provider: Arc<dyn EmbeddingProvider>,
}

impl RetrievalEngine {
    /// Pairs a context with the provider used for queries.
    ///
    /// Refuses a provider whose model differs from the one recorded at build time.
    pub fn new(context: Arc<IndexContext>, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        if let Some(model) = context.model() {
            if !model.is_empty() && model != provider.model_id() {
                return Err(GridError::Configuration(format!(
                    "index was built with model {model:?} but queries would use {:?}",
                    provider.model_id()
                )));
            }
        }
        Ok(Self { context, provider })
    }

    pub fn context(&self) -> &Arc<IndexContext> {
        &self.context
    }

    /// Top `k` documents for `text`, nearest first.
    pub fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievedDocument>> {
        if k == 0 {
            return Err(GridError::InvalidQuery("k must be at least 1".into()));
        }
        let mut vectors = self.provider.embed(&[text])?;
        let vector = match vectors.pop() {
            Some(vector) if vectors.is_empty() => vector,
            _ => {
                return Err(GridError::Provider(
                    crate::embedder::ProviderError::CountMismatch {
                        expected: 1,
                        returned: vectors.len() + 1,
                    },
                ))
            }
        };
        self.search_vector(&vector, k)
    }

    /// Top `k` documents for an already embedded query.
    pub fn search_vector(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievedDocument>> {
        if k == 0 {
            return Err(GridError::InvalidQuery("k must be at least 1".into()));
        }
        if vector.len() != self.context.dimension() {
            return Err(GridError::DimensionMismatch {
                expected: self.context.dimension(),
                actual: vector.len(),
            });
        }
        let neighbors = self.context.index.search(vector, k)?;
        let mut results = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            match self.context.metadata.get(neighbor.position) {
                Some(document) => results.push(RetrievedDocument {
                    document: document.clone(),
                    distance: neighbor.distance,
                    position: neighbor.position,
                }),
                None => warn!(
                    position = neighbor.position,
                    documents = self.context.metadata.len(),
                    "index position has no metadata entry; dropping it"
                ),
            }
        }
        debug!(k, returned = results.len(), "query answered");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::canonicalize;
    use crate::embedder::HashingEmbedder;
    use crate::record::{Properties, Record};
    use pretty_assertions::assert_eq;

    fn doc(id: &str) -> Document {
        canonicalize(&Record {
            properties: Properties {
                id: Some(id.into()),
                ..Properties::default()
            },
            geometry: None,
        })
    }

    fn context(rows: &[[f32; 2]], docs: usize) -> Arc<IndexContext> {
        let mut index = FlatIndex::new(2);
        for row in rows {
            index.add(row).expect("add");
        }
        let metadata = (0..docs).map(|i| doc(&format!("d{i}"))).collect();
        IndexContext::from_parts(index, metadata)
    }

    fn engine(ctx: Arc<IndexContext>) -> RetrievalEngine {
        RetrievalEngine::new(ctx, Arc::new(HashingEmbedder::new(2))).expect("engine")
    }

    #[test]
    fn positions_map_to_metadata() {
        let engine = engine(context(&[[0.0, 0.0], [1.0, 0.0], [5.0, 5.0]], 3));
        let hits = engine.search_vector(&[0.9, 0.0], 2).expect("search");
        let ids: Vec<&str> = hits.iter().map(|hit| hit.document.id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d0"]);
        assert_eq!(hits[0].position, 1);
    }

    #[test]
    fn dangling_positions_are_dropped() {
        let engine = engine(context(&[[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]], 2));
        let hits = engine.search_vector(&[2.0, 0.0], 3).expect("search");
        let positions: Vec<usize> = hits.iter().map(|hit| hit.position).collect();
        assert_eq!(positions, vec![1, 0]);
    }

    #[test]
    fn invalid_queries_are_rejected() {
        let engine = engine(context(&[[0.0, 0.0]], 1));
        assert!(matches!(
            engine.search_vector(&[0.0, 0.0], 0),
            Err(GridError::InvalidQuery(_))
        ));
        assert!(matches!(
            engine.query("anything", 0),
            Err(GridError::InvalidQuery(_))
        ));
        assert!(matches!(
            engine.search_vector(&[0.0, 0.0, 0.0], 1),
            Err(GridError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn query_dimension_mismatch_is_configuration() {
        let ctx = context(&[[0.0, 0.0]], 1);
        let engine = RetrievalEngine::new(ctx, Arc::new(HashingEmbedder::new(8))).expect("engine");
        let err = engine.query("lines in alabama", 1).expect_err("width differs");
        assert!(err.is_configuration());
    }
}
