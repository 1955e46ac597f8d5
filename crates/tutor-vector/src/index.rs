//! In-memory vector index with brute-force cosine similarity search.
//!
//! Search is O(n), which is fine for a tutor's reference corpus. The index
//! can be saved to and restored from a single JSON file.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use tutor_core::error::TutorError;

/// A single hit returned from a vector search.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: Uuid,
    /// Cosine similarity score.
    pub score: f64,
    /// The chunk text stored with the vector.
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorEntry {
    embedding: Vec<f32>,
    text: String,
}

/// On-disk layout of a persisted index.
#[derive(Serialize, Deserialize)]
struct IndexFile {
    dimensions: usize,
    entries: Vec<StoredEntry>,
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    id: Uuid,
    text: String,
    embedding: Vec<f32>,
}

/// Thread-safe in-memory vector index.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimensions: usize,
    entries: Arc<RwLock<HashMap<Uuid, VectorEntry>>>,
}

impl VectorIndex {
    /// Create a new empty index for vectors of the given dimension.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Insert a vector with its chunk text. Overwrites any entry with the same ID.
    pub fn insert(&self, id: Uuid, embedding: Vec<f32>, text: String) -> Result<(), TutorError> {
        if embedding.len() != self.dimensions {
            return Err(TutorError::Retrieval(format!(
                "Embedding has {} dimensions, index expects {}",
                embedding.len(),
                self.dimensions
            )));
        }
        let mut entries = self
            .entries
            .write()
            .map_err(|e| TutorError::Storage(format!("Lock poisoned: {}", e)))?;
        entries.insert(id, VectorEntry { embedding, text });
        Ok(())
    }

    /// Search for the k nearest neighbors to the query vector.
    ///
    /// Returns results sorted by descending similarity score.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, TutorError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| TutorError::Storage(format!("Lock poisoned: {}", e)))?;

        let mut scored: Vec<SearchHit> = entries
            .iter()
            .map(|(id, entry)| SearchHit {
                id: *id,
                score: cosine_similarity(query, &entry.embedding),
                text: entry.text.clone(),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored)
    }

    /// Remove every entry.
    pub fn clear(&self) -> Result<(), TutorError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| TutorError::Storage(format!("Lock poisoned: {}", e)))?;
        entries.clear();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the index to `path` as JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), TutorError> {
        let file = {
            let entries = self
                .entries
                .read()
                .map_err(|e| TutorError::Storage(format!("Lock poisoned: {}", e)))?;
            IndexFile {
                dimensions: self.dimensions,
                entries: entries
                    .iter()
                    .map(|(id, entry)| StoredEntry {
                        id: *id,
                        text: entry.text.clone(),
                        embedding: entry.embedding.clone(),
                    })
                    .collect(),
            }
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec(&file)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), entries = file.entries.len(), "Vector index saved");
        Ok(())
    }

    /// Load an index previously written by [`VectorIndex::save`].
    pub fn load(path: &Path) -> Result<Self, TutorError> {
        let bytes = std::fs::read(path)?;
        let file: IndexFile = serde_json::from_slice(&bytes)?;

        let index = Self::new(file.dimensions);
        {
            let mut entries = index
                .entries
                .write()
                .map_err(|e| TutorError::Storage(format!("Lock poisoned: {}", e)))?;
            for stored in file.entries {
                if stored.embedding.len() != file.dimensions {
                    return Err(TutorError::Retrieval(format!(
                        "Entry {} has {} dimensions, file declares {}",
                        stored.id,
                        stored.embedding.len(),
                        file.dimensions
                    )));
                }
                entries.insert(
                    stored.id,
                    VectorEntry {
                        embedding: stored.embedding,
                        text: stored.text,
                    },
                );
            }
        }
        info!(path = %path.display(), entries = index.len(), "Vector index loaded");
        Ok(index)
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if the lengths differ or either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
