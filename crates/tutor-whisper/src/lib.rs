//! Tutor Whisper crate - speech-to-text port and implementations.
//!
//! Provides the `TranscriptionService` trait, WAV decoding, a whisper.cpp
//! backed service behind the `whisper` feature, a placeholder that reports
//! transcription as unavailable, and a mock service for tests.

pub mod audio;
pub mod whisper_service;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use tutor_core::config::SpeechConfig;
use tutor_core::error::TutorError;

pub use audio::{decode_wav, decode_wav_file, resample, DecodedAudio};
pub use whisper_service::WhisperService;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the Whisper transcription engine.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Path to a GGML model file.
    pub model_path: String,
    /// Language code for transcription (e.g., "en", "auto").
    pub language: String,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model_path: String::new(),
            language: "en".to_string(),
        }
    }
}

impl From<&SpeechConfig> for WhisperConfig {
    fn from(config: &SpeechConfig) -> Self {
        Self {
            model_path: config.whisper_model.clone(),
            language: config.language.clone(),
        }
    }
}

// =============================================================================
// Result types
// =============================================================================

/// A single time-aligned segment within a transcription.
#[derive(Debug, Clone)]
pub struct Segment {
    pub start: f32,
    pub end: f32,
    pub text: String,
}

/// The complete result of a transcription operation.
#[derive(Debug, Clone)]
pub struct TranscriptionResult {
    pub text: String,
    pub segments: Vec<Segment>,
    pub language: String,
    pub duration_secs: f32,
}

// =============================================================================
// Traits
// =============================================================================

/// Service for transcribing audio data to text.
pub trait TranscriptionService: Send + Sync {
    /// Transcribe mono PCM samples in [-1.0, 1.0] at `sample_rate` Hz.
    fn transcribe(
        &self,
        audio_data: &[f32],
        sample_rate: u32,
    ) -> impl Future<Output = Result<TranscriptionResult, TutorError>> + Send;
}

/// Object-safe form of [`TranscriptionService`], for shared handles.
pub trait DynTranscriptionService: Send + Sync {
    fn transcribe_boxed<'a>(
        &'a self,
        audio_data: &'a [f32],
        sample_rate: u32,
    ) -> Pin<Box<dyn Future<Output = Result<TranscriptionResult, TutorError>> + Send + 'a>>;
}

impl<T: TranscriptionService> DynTranscriptionService for T {
    fn transcribe_boxed<'a>(
        &'a self,
        audio_data: &'a [f32],
        sample_rate: u32,
    ) -> Pin<Box<dyn Future<Output = Result<TranscriptionResult, TutorError>> + Send + 'a>> {
        Box::pin(self.transcribe(audio_data, sample_rate))
    }
}

/// Decode a WAV file and transcribe it.
pub async fn transcribe_file(
    service: &dyn DynTranscriptionService,
    path: &Path,
) -> Result<TranscriptionResult, TutorError> {
    let bytes = tokio::fs::read(path).await?;
    let audio = decode_wav(&bytes)?;
    tracing::debug!(
        path = %path.display(),
        sample_rate = audio.sample_rate,
        duration_secs = audio.duration_secs(),
        "Decoded upload"
    );
    service
        .transcribe_boxed(&audio.samples, audio.sample_rate)
        .await
}

// =============================================================================
// Unavailable placeholder
// =============================================================================

/// Stands in when no usable model is configured. Every call fails, so
/// callers report an error instead of an invented transcript.
#[derive(Debug, Clone)]
pub struct UnavailableTranscriber {
    reason: String,
}

impl UnavailableTranscriber {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl TranscriptionService for UnavailableTranscriber {
    async fn transcribe(
        &self,
        _audio_data: &[f32],
        _sample_rate: u32,
    ) -> Result<TranscriptionResult, TutorError> {
        Err(TutorError::Transcription(format!(
            "Speech recognition unavailable: {}",
            self.reason
        )))
    }
}

// =============================================================================
// Mock implementation
// =============================================================================

/// Mock transcription service that returns a fixed transcript.
#[derive(Debug, Clone)]
pub struct MockTranscriptionService {
    text: String,
}

impl Default for MockTranscriptionService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTranscriptionService {
    pub fn new() -> Self {
        Self::with_text("[mock transcription]")
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl TranscriptionService for MockTranscriptionService {
    async fn transcribe(
        &self,
        audio_data: &[f32],
        sample_rate: u32,
    ) -> Result<TranscriptionResult, TutorError> {
        if audio_data.is_empty() {
            return Err(TutorError::Transcription(
                "Cannot transcribe empty audio data".to_string(),
            ));
        }
        if sample_rate == 0 {
            return Err(TutorError::Transcription(
                "Sample rate must be greater than 0".to_string(),
            ));
        }

        let duration_secs = audio_data.len() as f32 / sample_rate as f32;
        tracing::debug!(duration_secs, sample_rate, "Mock transcription generated");

        Ok(TranscriptionResult {
            text: self.text.clone(),
            segments: vec![Segment {
                start: 0.0,
                end: duration_secs,
                text: self.text.clone(),
            }],
            language: "en".to_string(),
            duration_secs,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
