//! Speech synthesis port and backends.

use std::f32::consts::PI;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use tutor_core::config::SpeechConfig;
use tutor_core::error::TutorError;

use crate::artifact::AudioArtifact;

/// Turns text into a complete audio clip.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn name(&self) -> &str;

    /// Validate `text` and render it. Empty text never reaches the backend.
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<AudioArtifact, TutorError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TutorError::Synthesis("Empty text".to_string()));
        }
        self.render(text, voice).await
    }

    /// Backend-specific rendering of non-empty text.
    async fn render(&self, text: &str, voice: Option<&str>) -> Result<AudioArtifact, TutorError>;
}

/// Build the backend named in config: "command" or "tone".
pub fn build_synthesizer(config: &SpeechConfig) -> Result<Arc<dyn SpeechSynthesizer>, TutorError> {
    match config.tts_backend.trim().to_ascii_lowercase().as_str() {
        "command" => Ok(Arc::new(CommandSynthesizer::new(
            &config.tts_command,
            config.default_voice.clone(),
        ))),
        "tone" => Ok(Arc::new(ToneSynthesizer::default())),
        other => Err(TutorError::Config(format!(
            "Unknown TTS backend '{}' (expected \"command\" or \"tone\")",
            other
        ))),
    }
}

// =============================================================================
// Command backend
// =============================================================================

/// Runs an espeak-compatible program: `<program> -w <out.wav> [-v voice] -- <text>`.
///
/// The text always follows `--`, so input starting with `-` is spoken rather
/// than parsed as an option.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    program: String,
    default_voice: Option<String>,
}

impl CommandSynthesizer {
    pub fn new(program: impl Into<String>, default_voice: Option<String>) -> Self {
        Self {
            program: program.into(),
            default_voice,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    fn name(&self) -> &str {
        &self.program
    }

    async fn render(&self, text: &str, voice: Option<&str>) -> Result<AudioArtifact, TutorError> {
        let artifact = AudioArtifact::allocate()?;
        let voice = voice
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or(self.default_voice.as_deref());

        let mut command = tokio::process::Command::new(&self.program);
        command.arg("-w").arg(artifact.path());
        if let Some(voice) = voice {
            command.arg("-v").arg(voice);
        }
        command
            .arg("--")
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %self.program, voice = ?voice, chars = text.len(), "Running synthesizer");
        let output = command.output().await.map_err(|e| {
            TutorError::Synthesis(format!("Failed to run {}: {}", self.program, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TutorError::Synthesis(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        if artifact.is_empty().await? {
            return Err(TutorError::Synthesis(format!(
                "{} produced no audio",
                self.program
            )));
        }

        let bytes = artifact.len().await?;
        info!(program = %self.program, bytes, "Speech synthesized");
        Ok(artifact)
    }
}

// =============================================================================
// Tone backend
// =============================================================================

/// Deterministic synthesizer that renders each character as a short tone.
///
/// Letters and digits map to pitches, whitespace to silence. Useful for
/// exercising the audio path without a speech engine installed.
#[derive(Debug, Clone)]
pub struct ToneSynthesizer {
    sample_rate: u32,
    millis_per_char: u32,
}

impl Default for ToneSynthesizer {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            millis_per_char: 60,
        }
    }
}

impl ToneSynthesizer {
    pub fn new(sample_rate: u32, millis_per_char: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            millis_per_char: millis_per_char.max(1),
        }
    }

    fn samples_for(&self, text: &str) -> Vec<i16> {
        let per_char = (self.sample_rate as u64 * self.millis_per_char as u64 / 1000) as usize;
        let mut samples = Vec::with_capacity(per_char * text.chars().count());
        for c in text.chars() {
            if c.is_whitespace() || !c.is_alphanumeric() {
                samples.extend(std::iter::repeat(0i16).take(per_char));
                continue;
            }
            let step = (c.to_ascii_lowercase() as u32 % 24) as f32;
            let freq = 220.0 * 2f32.powf(step / 12.0);
            for n in 0..per_char {
                let t = n as f32 / self.sample_rate as f32;
                let value = (2.0 * PI * freq * t).sin() * 0.3;
                samples.push((value * i16::MAX as f32) as i16);
            }
        }
        samples
    }

    fn write_wav(&self, path: &std::path::Path, samples: &[i16]) -> Result<(), TutorError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let wav_err = |e: hound::Error| TutorError::Synthesis(format!("Failed to write WAV: {e}"));
        let mut writer = hound::WavWriter::create(path, spec).map_err(wav_err)?;
        for &s in samples {
            writer.write_sample(s).map_err(wav_err)?;
        }
        writer.finalize().map_err(wav_err)
    }
}

#[async_trait]
impl SpeechSynthesizer for ToneSynthesizer {
    fn name(&self) -> &str {
        "tone"
    }

    async fn render(&self, text: &str, _voice: Option<&str>) -> Result<AudioArtifact, TutorError> {
        let artifact = AudioArtifact::allocate()?;
        let samples = self.samples_for(text);
        let path = artifact.path().to_path_buf();
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.write_wav(&path, &samples))
            .await
            .map_err(|e| TutorError::Synthesis(format!("Synthesis task failed: {e}")))??;
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_text_rejected_before_backend() {
        // A command that cannot exist: render would fail differently.
        let synth = CommandSynthesizer::new("/nonexistent/espeak", None);
        let err = synth.synthesize("   ", None).await.unwrap_err();
        assert_eq!(err.to_string(), "Synthesis error: Empty text");
    }

    #[tokio::test]
    async fn test_missing_program_is_synthesis_error() {
        let synth = CommandSynthesizer::new("/nonexistent/espeak", None);
        let err = synth.synthesize("hello", None).await.unwrap_err();
        assert!(matches!(err, TutorError::Synthesis(_)));
        assert!(err.to_string().contains("/nonexistent/espeak"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_program_reports_status() {
        let synth = CommandSynthesizer::new("false", None);
        let err = synth.synthesize("hello", None).await.unwrap_err();
        assert!(err.to_string().contains("exited with"));
    }

    /// Write an executable stand-in for espeak that dumps its arguments
    /// after `-w <path>` into that path, one per line.
    #[cfg(unix)]
    fn arg_echo_program(dir: &std::path::Path) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-espeak");
        std::fs::write(
            &path,
            "#!/bin/sh\nout=\"$2\"\nshift 2\nprintf '%s\\n' \"$@\" > \"$out\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dash_prefixed_text_is_not_an_option() {
        let dir = tempfile::tempdir().unwrap();
        let program = arg_echo_program(dir.path());
        let hijack = dir.path().join("hijacked.wav");
        let text = format!("-w{}", hijack.display());

        let synth = CommandSynthesizer::new(program.to_string_lossy(), None);
        let artifact = synth.synthesize(&text, None).await.unwrap();
        let args = String::from_utf8(artifact.read_all().await.unwrap()).unwrap();

        assert_eq!(args, format!("--\n{}\n", text));
        assert!(!hijack.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_voice_precedes_separator() {
        let dir = tempfile::tempdir().unwrap();
        let program = arg_echo_program(dir.path());

        let synth = CommandSynthesizer::new(program.to_string_lossy(), Some("en-us".into()));
        let artifact = synth.synthesize("hello", Some("de")).await.unwrap();
        let args = String::from_utf8(artifact.read_all().await.unwrap()).unwrap();
        assert_eq!(args, "-v\nde\n--\nhello\n");
    }

    #[tokio::test]
    async fn test_tone_is_valid_wav_and_deterministic() {
        let synth = ToneSynthesizer::new(8000, 50);
        let a = synth.synthesize("hi there", None).await.unwrap();
        let b = synth.synthesize("hi there", None).await.unwrap();
        let bytes_a = a.read_all().await.unwrap();
        assert_eq!(bytes_a, b.read_all().await.unwrap());

        let reader = hound::WavReader::new(std::io::Cursor::new(bytes_a)).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        // 8 chars * 50ms * 8000Hz
        assert_eq!(reader.len(), 8 * 400);
    }

    #[test]
    fn test_build_synthesizer() {
        let mut config = SpeechConfig::default();
        assert_eq!(build_synthesizer(&config).unwrap().name(), "espeak-ng");

        config.tts_backend = "Tone".into();
        assert_eq!(build_synthesizer(&config).unwrap().name(), "tone");

        config.tts_backend = "coqui".into();
        assert!(matches!(
            build_synthesizer(&config).err().unwrap(),
            TutorError::Config(_)
        ));
    }
}
