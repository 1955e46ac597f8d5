//! Document ingestion: split reference text into overlapping chunks,
//! embed each chunk, and add it to the index.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use tutor_core::error::TutorError;

use crate::embedding::EmbeddingService;
use crate::index::VectorIndex;

const SEPARATOR: &str = "\n\n";

/// Character splitter that breaks on blank lines and merges paragraphs up
/// to `chunk_size` characters, carrying up to `chunk_overlap` characters of
/// trailing paragraphs into the next chunk.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, TutorError> {
        if chunk_size == 0 {
            return Err(TutorError::Config("chunk_size must be positive".to_string()));
        }
        if chunk_overlap >= chunk_size {
            return Err(TutorError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        let pieces: Vec<&str> = text
            .split(SEPARATOR)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();

        for piece in pieces {
            let piece_len = piece.chars().count();
            if piece_len > self.chunk_size {
                warn!(
                    piece_len,
                    chunk_size = self.chunk_size,
                    "Paragraph longer than chunk size, keeping it whole"
                );
            }

            if !current.is_empty() && joined_len(&current) + SEPARATOR.len() + piece_len > self.chunk_size
            {
                chunks.push(current.join(SEPARATOR));
                // Keep a tail of paragraphs as overlap, if it still leaves room.
                while !current.is_empty() {
                    let len = joined_len(&current);
                    if len > self.chunk_overlap
                        || len + SEPARATOR.len() + piece_len > self.chunk_size
                    {
                        current.remove(0);
                    } else {
                        break;
                    }
                }
            }
            current.push(piece);
        }

        if !current.is_empty() {
            chunks.push(current.join(SEPARATOR));
        }
        chunks
    }
}

fn joined_len(pieces: &[&str]) -> usize {
    if pieces.is_empty() {
        return 0;
    }
    pieces.iter().map(|p| p.chars().count()).sum::<usize>() + SEPARATOR.len() * (pieces.len() - 1)
}

/// Embeds chunks and writes them into a shared index.
pub struct Ingestor<E: EmbeddingService> {
    index: Arc<VectorIndex>,
    embedder: E,
    splitter: TextSplitter,
}

impl<E: EmbeddingService> Ingestor<E> {
    pub fn new(index: Arc<VectorIndex>, embedder: E, splitter: TextSplitter) -> Self {
        Self {
            index,
            embedder,
            splitter,
        }
    }

    /// Split, embed, and index `text`. Returns the number of chunks added.
    pub async fn ingest_text(&self, text: &str) -> Result<usize, TutorError> {
        let chunks = self.splitter.split(text);
        for chunk in &chunks {
            let embedding = self.embedder.embed(chunk).await?;
            self.index.insert(Uuid::new_v4(), embedding, chunk.clone())?;
        }
        Ok(chunks.len())
    }

    /// Read a UTF-8 text file and ingest its contents.
    pub async fn ingest_file(&self, path: &Path) -> Result<usize, TutorError> {
        let text = tokio::fs::read_to_string(path).await?;
        let count = self.ingest_text(&text).await?;
        info!(path = %path.display(), chunks = count, "Document ingested");
        Ok(count)
    }
}
