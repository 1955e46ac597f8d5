//! Retrieval port and its vector-index implementation.
//!
//! `Retriever` is the narrow interface the answer engine depends on:
//! `search(query, k) -> ranked passages`. `SearchEngine` implements it by
//! embedding the query and asking the `VectorIndex` for nearest neighbors.

use std::sync::Arc;

use async_trait::async_trait;

use tutor_core::error::TutorError;
use tutor_core::types::Passage;

use crate::embedding::{DynEmbeddingService, EmbeddingService};
use crate::index::VectorIndex;

/// Semantic search capability consumed by the answer engine.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return up to `k` passages ranked by descending relevance.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>, TutorError>;
}

/// Search engine combining an embedder with a shared vector index.
pub struct SearchEngine {
    index: Arc<VectorIndex>,
    embedder: Box<dyn DynEmbeddingService>,
}

impl SearchEngine {
    pub fn new(index: Arc<VectorIndex>, embedder: impl EmbeddingService + 'static) -> Self {
        Self {
            index,
            embedder: Box::new(embedder),
        }
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }
}

#[async_trait]
impl Retriever for SearchEngine {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>, TutorError> {
        if k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.embed_boxed(query).await?;
        let hits = self.index.search(&query_vec, k)?;

        Ok(hits
            .into_iter()
            .filter(|hit| !hit.text.trim().is_empty())
            .map(|hit| Passage {
                text: hit.text,
                score: hit.score,
            })
            .collect())
    }
}
