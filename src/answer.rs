//! Boundary to the external text-generation collaborator.

use crate::error::{GridError, Result};
use crate::retrieval::{RetrievalEngine, RetrievedDocument};

/// Turns a question plus ranked context into prose.
///
/// The prompt format and model are the implementation's business; the
/// returned text is passed through untouched.
pub trait AnswerSynthesizer {
    fn synthesize(&self, question: &str, context: &[RetrievedDocument]) -> anyhow::Result<String>;
}

/// Answer text plus the documents it was grounded on.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<RetrievedDocument>,
}

/// Retrieves `k` documents for `question` and hands them to `synthesizer`.
pub fn answer(
    engine: &RetrievalEngine,
    synthesizer: &dyn AnswerSynthesizer,
    question: &str,
    k: usize,
) -> Result<Answer> {
    let sources = engine.query(question, k)?;
    let text = synthesizer
        .synthesize(question, &sources)
        .map_err(GridError::Synthesis)?;
    Ok(Answer { text, sources })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::canonicalize;
    use crate::embedder::{EmbeddingProvider, HashingEmbedder};
    use crate::index::FlatIndex;
    use crate::record::{Properties, Record};
    use crate::retrieval::IndexContext;
    use std::sync::Arc;

    struct Echo;

    impl AnswerSynthesizer for Echo {
        fn synthesize(&self, question: &str, context: &[RetrievedDocument]) -> anyhow::Result<String> {
            let ids: Vec<&str> = context.iter().map(|hit| hit.document.id.as_str()).collect();
            Ok(format!("  {question} -> {}\n", ids.join(",")))
        }
    }

    struct Broken;

    impl AnswerSynthesizer for Broken {
        fn synthesize(&self, _: &str, _: &[RetrievedDocument]) -> anyhow::Result<String> {
            anyhow::bail!("model offline")
        }
    }

    fn engine() -> RetrievalEngine {
        let embedder = HashingEmbedder::new(32);
        let docs: Vec<_> = ["north", "south"]
            .iter()
            .map(|id| {
                canonicalize(&Record {
                    properties: Properties {
                        id: Some((*id).into()),
                        ..Properties::default()
                    },
                    geometry: None,
                })
            })
            .collect();
        let texts: Vec<&str> = docs.iter().map(|doc| doc.content.as_str()).collect();
        let mut index = FlatIndex::new(32);
        for vector in embedder.embed(&texts).expect("embed") {
            index.add(&vector).expect("add");
        }
        RetrievalEngine::new(IndexContext::from_parts(index, docs), Arc::new(embedder)).expect("engine")
    }

    #[test]
    fn synthesized_text_is_returned_verbatim() {
        let answer = answer(&engine(), &Echo, "where?", 2).expect("answer");
        assert_eq!(answer.sources.len(), 2);
        assert!(answer.text.starts_with("  where? -> "));
        assert!(answer.text.ends_with('\n'));
    }

    #[test]
    fn synthesis_failure_is_surfaced() {
        let err = answer(&engine(), &Broken, "where?", 1).expect_err("broken");
        assert!(matches!(err, GridError::Synthesis(_)));
        assert!(err.to_string().contains("model offline"));
    }
}
