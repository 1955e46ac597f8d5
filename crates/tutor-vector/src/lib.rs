//! Tutor Vector crate - embedding, in-memory index, retrieval, and ingestion.
//!
//! Provides the retrieval port consumed by the answer engine: a cosine
//! similarity index persisted as JSON, a deterministic hashing embedder,
//! a search engine that turns a query into ranked passages, and the
//! document ingestion path that fills the index.

pub mod embedding;
pub mod index;
pub mod ingest;
pub mod search;

pub use embedding::{EmbeddingService, HashingEmbedding};
pub use index::{SearchHit, VectorIndex};
pub use ingest::{Ingestor, TextSplitter};
pub use search::{Retriever, SearchEngine};
