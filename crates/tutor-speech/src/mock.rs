//! Synthesizer returning fixed bytes, for tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use tutor_core::error::TutorError;

use crate::artifact::AudioArtifact;
use crate::synth::SpeechSynthesizer;

/// Writes the same payload for every request, or fails if configured to.
#[derive(Debug, Default)]
pub struct StaticSynthesizer {
    payload: Vec<u8>,
    fail: bool,
    renders: AtomicUsize,
    last_path: Mutex<Option<PathBuf>>,
}

impl StaticSynthesizer {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            fail: false,
            renders: AtomicUsize::new(0),
            last_path: Mutex::new(None),
        }
    }

    /// A payload of `len` bytes with a repeating pattern.
    pub fn with_len(len: usize) -> Self {
        Self::new((0..len).map(|i| (i % 251) as u8).collect())
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// How many times the backend was reached.
    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    /// Location of the most recently rendered artifact.
    pub fn last_path(&self) -> Option<PathBuf> {
        self.last_path.lock().ok().and_then(|p| p.clone())
    }
}

#[async_trait]
impl SpeechSynthesizer for StaticSynthesizer {
    fn name(&self) -> &str {
        "static"
    }

    async fn render(&self, _text: &str, _voice: Option<&str>) -> Result<AudioArtifact, TutorError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(TutorError::Synthesis("engine crashed".to_string()));
        }
        let artifact = AudioArtifact::from_bytes(&self.payload).await?;
        if let Ok(mut last) = self.last_path.lock() {
            *last = Some(artifact.path().to_path_buf());
        }
        Ok(artifact)
    }
}
