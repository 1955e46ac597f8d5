//! Application state shared across all route handlers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use tutor_chat::DialogueController;
use tutor_speech::SpeechSynthesizer;
use tutor_whisper::DynTranscriptionService;

/// Default binary frame size on the audio WebSocket.
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// Default cap on uploaded audio for `/stt`.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    /// Session-aware answering; may be running without a provider.
    pub controller: Arc<DialogueController>,
    /// Speech-to-text backend for `/stt`.
    pub transcriber: Arc<dyn DynTranscriptionService>,
    /// Text-to-speech backend for `/tts` and `/ws/tts`.
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    /// Bytes per binary frame on `/ws/tts`.
    pub frame_size: usize,
    /// Largest accepted `/stt` upload.
    pub max_upload_bytes: usize,
    /// Where `/stt` stages uploads while they are transcribed.
    pub upload_dir: PathBuf,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        controller: Arc<DialogueController>,
        transcriber: Arc<dyn DynTranscriptionService>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            controller,
            transcriber,
            synthesizer,
            frame_size: DEFAULT_FRAME_SIZE,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            upload_dir: std::env::temp_dir(),
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }

    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size.max(1);
        self
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    pub fn with_upload_dir(mut self, upload_dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = upload_dir.into();
        self
    }
}
