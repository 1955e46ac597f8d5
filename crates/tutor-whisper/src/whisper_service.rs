//! whisper.cpp transcription via whisper-rs.
//!
//! With the `whisper` feature the service loads a GGML model once and runs
//! inference on the blocking thread pool. Without it, construction succeeds
//! and every transcription returns an error.

#[cfg(feature = "whisper")]
use std::path::Path;
#[cfg(feature = "whisper")]
use std::sync::Arc;

use tutor_core::error::TutorError;

#[cfg(feature = "whisper")]
use crate::audio::resample;
#[cfg(feature = "whisper")]
use crate::Segment;
use crate::{TranscriptionResult, TranscriptionService, WhisperConfig};

#[cfg(feature = "whisper")]
const WHISPER_SAMPLE_RATE: u32 = 16000;

/// Transcription service backed by a loaded whisper.cpp model.
pub struct WhisperService {
    #[cfg(feature = "whisper")]
    ctx: Arc<whisper_rs::WhisperContext>,
    config: WhisperConfig,
}

impl WhisperService {
    /// Load the GGML model named in `config`.
    #[cfg(feature = "whisper")]
    pub fn new(config: WhisperConfig) -> Result<Self, TutorError> {
        use whisper_rs::{WhisperContext, WhisperContextParameters};

        let model_path = &config.model_path;
        if !Path::new(model_path).exists() {
            return Err(TutorError::Transcription(format!(
                "Whisper model file not found: {}",
                model_path
            )));
        }

        tracing::info!(model = %model_path, lang = %config.language, "Loading Whisper model");
        let ctx = WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
            .map_err(|e| TutorError::Transcription(format!("Failed to load Whisper model: {}", e)))?;

        Ok(Self {
            ctx: Arc::new(ctx),
            config,
        })
    }

    #[cfg(not(feature = "whisper"))]
    pub fn new(config: WhisperConfig) -> Result<Self, TutorError> {
        tracing::warn!("WhisperService created without the `whisper` feature, transcription will fail");
        Ok(Self { config })
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }
}

#[cfg(feature = "whisper")]
fn run_inference(
    ctx: &whisper_rs::WhisperContext,
    samples: &[f32],
    language: Option<&str>,
) -> Result<Vec<Segment>, TutorError> {
    use whisper_rs::{FullParams, SamplingStrategy};

    let err = |what: &str, e: whisper_rs::WhisperError| {
        TutorError::Transcription(format!("{}: {}", what, e))
    };

    let mut state = ctx
        .create_state()
        .map_err(|e| err("Failed to create Whisper state", e))?;

    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
    params.set_language(language);
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);

    state
        .full(params, samples)
        .map_err(|e| err("Whisper inference failed", e))?;

    let n_segments = state
        .full_n_segments()
        .map_err(|e| err("Failed to get segment count", e))?;

    let mut segments = Vec::with_capacity(n_segments.max(0) as usize);
    for i in 0..n_segments {
        let text = state
            .full_get_segment_text(i)
            .map_err(|e| err("Failed to read segment text", e))?;
        // Timestamps are in centiseconds.
        let t0 = state
            .full_get_segment_t0(i)
            .map_err(|e| err("Failed to read segment start", e))?;
        let t1 = state
            .full_get_segment_t1(i)
            .map_err(|e| err("Failed to read segment end", e))?;
        segments.push(Segment {
            start: t0 as f32 / 100.0,
            end: t1 as f32 / 100.0,
            text: text.trim().to_string(),
        });
    }
    Ok(segments)
}

#[cfg(feature = "whisper")]
impl TranscriptionService for WhisperService {
    async fn transcribe(
        &self,
        audio_data: &[f32],
        sample_rate: u32,
    ) -> Result<TranscriptionResult, TutorError> {
        if audio_data.is_empty() {
            return Err(TutorError::Transcription(
                "Cannot transcribe empty audio data".into(),
            ));
        }
        if sample_rate == 0 {
            return Err(TutorError::Transcription(
                "Sample rate must be greater than 0".into(),
            ));
        }

        let samples = resample(audio_data, sample_rate, WHISPER_SAMPLE_RATE);
        let duration_secs = samples.len() as f32 / WHISPER_SAMPLE_RATE as f32;
        let language = (self.config.language != "auto").then(|| self.config.language.clone());
        let ctx = Arc::clone(&self.ctx);

        let segments = tokio::task::spawn_blocking(move || {
            run_inference(&ctx, &samples, language.as_deref())
        })
        .await
        .map_err(|e| TutorError::Transcription(format!("Transcription task failed: {}", e)))??;

        let text = segments
            .iter()
            .map(|s| s.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        tracing::info!(segments = segments.len(), text_len = text.len(), "Transcription complete");

        Ok(TranscriptionResult {
            text,
            segments,
            language: self.config.language.clone(),
            duration_secs,
        })
    }
}

#[cfg(not(feature = "whisper"))]
impl TranscriptionService for WhisperService {
    async fn transcribe(
        &self,
        _audio_data: &[f32],
        _sample_rate: u32,
    ) -> Result<TranscriptionResult, TutorError> {
        Err(TutorError::Transcription(
            "Whisper transcription requires the `whisper` feature to be enabled".into(),
        ))
    }
}
