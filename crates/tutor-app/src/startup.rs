//! Component construction shared by the `serve` and `ingest` commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tutor_core::config::TutorConfig;
use tutor_core::error::TutorError;
use tutor_vector::{HashingEmbedding, Ingestor, Retriever, SearchEngine, TextSplitter, VectorIndex};
use tutor_whisper::{DynTranscriptionService, UnavailableTranscriber, WhisperConfig, WhisperService};

use crate::cli::expand_home;

/// Location of the persisted index. Relative paths resolve against the
/// data directory.
pub fn index_path(config: &TutorConfig) -> PathBuf {
    let path = expand_home(&config.retrieval.index_path);
    if path.is_absolute() {
        path
    } else {
        expand_home(&config.general.data_dir).join(path)
    }
}

/// Load the persisted index for serving. Any problem disables retrieval.
pub fn load_retriever(config: &TutorConfig) -> Option<Arc<dyn Retriever>> {
    if !config.retrieval.enabled {
        tracing::info!("Retrieval disabled in config");
        return None;
    }

    let path = index_path(config);
    let index = match VectorIndex::load(&path) {
        Ok(index) => index,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Vector index unavailable, answering without context");
            return None;
        }
    };

    let dim = config.retrieval.embedding_dim;
    if index.dimensions() != dim {
        tracing::warn!(
            path = %path.display(),
            index_dim = index.dimensions(),
            config_dim = dim,
            "Vector index dimension mismatch, answering without context"
        );
        return None;
    }

    tracing::info!(path = %path.display(), entries = index.len(), "Vector index loaded");
    Some(Arc::new(SearchEngine::new(
        Arc::new(index),
        HashingEmbedding::new(dim),
    )))
}

/// Whisper when a model is configured and loads. Otherwise a transcriber
/// that fails every request, so `/stt` answers with an error.
pub fn build_transcriber(config: &TutorConfig) -> Arc<dyn DynTranscriptionService> {
    if config.speech.whisper_model.trim().is_empty() {
        tracing::warn!("No Whisper model configured, /stt is disabled");
        return Arc::new(UnavailableTranscriber::new("no Whisper model configured"));
    }
    match WhisperService::new(WhisperConfig::from(&config.speech)) {
        Ok(service) => {
            tracing::info!(model = %config.speech.whisper_model, "Whisper transcription ready");
            Arc::new(service)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Whisper unavailable, /stt is disabled");
            Arc::new(UnavailableTranscriber::new(e.to_string()))
        }
    }
}

/// Add a text file to the persisted index, creating the index if needed.
/// Returns the number of chunks added.
pub async fn ingest_file(config: &TutorConfig, file: &Path) -> Result<usize, TutorError> {
    let path = index_path(config);
    let dim = config.retrieval.embedding_dim;

    let index = if path.exists() {
        let index = VectorIndex::load(&path)?;
        if index.dimensions() != dim {
            return Err(TutorError::Config(format!(
                "Index at {} has {} dimensions but retrieval.embedding_dim is {}",
                path.display(),
                index.dimensions(),
                dim
            )));
        }
        index
    } else {
        VectorIndex::new(dim)
    };
    let index = Arc::new(index);

    let splitter = TextSplitter::new(config.retrieval.chunk_size, config.retrieval.chunk_overlap)?;
    let ingestor = Ingestor::new(Arc::clone(&index), HashingEmbedding::new(dim), splitter);
    let added = ingestor.ingest_file(file).await?;

    index.save(&path)?;
    tracing::info!(path = %path.display(), total = index.len(), "Index persisted");
    Ok(added)
}
