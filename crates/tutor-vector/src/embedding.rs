//! Embedding service trait and the built-in hashing embedder.
//!
//! `HashingEmbedding` maps lower-cased word tokens into a fixed number of
//! buckets (the hashing trick) and L2-normalizes the result. It needs no
//! model files, is deterministic, and gives useful lexical similarity for
//! the tutor's reference material.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;

use tutor_core::error::TutorError;

/// Service for generating text embeddings.
///
/// Used for both ingestion (indexing) and search (query).
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, TutorError>> + Send;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// Every `EmbeddingService` gets this through the blanket impl below, so
/// `Box<dyn DynEmbeddingService>` can be stored without generics.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>, TutorError>> + Send + 'a>>;

    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>, TutorError>> + Send + 'a>> {
        Box::pin(self.embed(text))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

/// Bag-of-words embedder using signed feature hashing.
#[derive(Debug, Clone)]
pub struct HashingEmbedding {
    dimensions: usize,
}

impl HashingEmbedding {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        for token in tokenize(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let h = hasher.finish();
            let bucket = (h % self.dimensions as u64) as usize;
            // Top bit picks the sign so colliding tokens partially cancel.
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedding {
    fn default() -> Self {
        Self::new(384)
    }
}

impl EmbeddingService for HashingEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, TutorError> {
        if text.trim().is_empty() {
            return Err(TutorError::Retrieval("Cannot embed empty text".to_string()));
        }
        Ok(self.hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_embedding_dimension() {
        let service = HashingEmbedding::new(128);
        let vec = service.embed("hello world").await.unwrap();
        assert_eq!(vec.len(), 128);
        assert_eq!(EmbeddingService::dimensions(&service), 128);
    }

    #[tokio::test]
    async fn test_embedding_deterministic() {
        let service = HashingEmbedding::default();
        let v1 = service.embed("same text").await.unwrap();
        let v2 = service.embed("same text").await.unwrap();
        assert_eq!(v1, v2);
    }

    #[tokio::test]
    async fn test_embedding_is_normalized() {
        let service = HashingEmbedding::default();
        let v = service.embed("recursion calls itself").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_embedding_case_and_punctuation_insensitive() {
        let service = HashingEmbedding::default();
        let v1 = service.embed("Binary Search!").await.unwrap();
        let v2 = service.embed("binary search").await.unwrap();
        assert_eq!(v1, v2);
    }

    #[tokio::test]
    async fn test_shared_words_score_higher() {
        let service = HashingEmbedding::default();
        let query = service.embed("what is recursion").await.unwrap();
        let related = service
            .embed("recursion is when a function calls itself")
            .await
            .unwrap();
        let unrelated = service
            .embed("photosynthesis converts light into sugar")
            .await
            .unwrap();
        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    }

    #[tokio::test]
    async fn test_empty_text_is_error() {
        let service = HashingEmbedding::default();
        assert!(service.embed("   ").await.is_err());
    }

    #[tokio::test]
    async fn test_dyn_embedding_dispatch() {
        let service: Box<dyn DynEmbeddingService> = Box::new(HashingEmbedding::new(16));
        let v = service.embed_boxed("boxed call").await.unwrap();
        assert_eq!(v.len(), 16);
        assert_eq!(service.dimensions(), 16);
    }
}
