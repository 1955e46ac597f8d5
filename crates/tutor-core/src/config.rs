use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, TutorError};

/// Top-level configuration for the tutor service.
///
/// Loaded from `~/.tutor/config.toml` by default, then overlaid with
/// environment variables. Provider credentials only ever come from the
/// environment and are never written back to disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TutorConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub affect: AffectConfig,
}

impl TutorConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TutorConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| TutorError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary key lookup.
    ///
    /// Empty values are ignored. Unparseable numbers are logged and skipped.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(key) = get("GROQ_API_KEY") {
            self.llm.groq_api_key = Some(key);
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.llm.openai_api_key = Some(key);
        }
        if let Some(model) = get("GROQ_MODEL") {
            self.llm.groq_model = model;
        }
        if let Some(model) = get("OPENAI_MODEL") {
            self.llm.openai_model = model;
        }
        if let Some(raw) = get("RAG_TEMPERATURE") {
            match raw.parse::<f32>() {
                Ok(t) => self.llm.temperature = t,
                Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid RAG_TEMPERATURE"),
            }
        }
        if let Some(raw) = get("RAG_MAX_TOKENS") {
            match raw.parse::<u32>() {
                Ok(n) => self.llm.max_tokens = n,
                Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid RAG_MAX_TOKENS"),
            }
        }
        if let Some(raw) = get("BACKEND_PORT") {
            match raw.parse::<u16>() {
                Ok(p) => self.general.port = p,
                Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid BACKEND_PORT"),
            }
        }
        if let Some(dir) = get("CHROMA_DIR") {
            self.retrieval.index_path = format!("{}/index.json", dir.trim_end_matches('/'));
        }
        if let Some(model) = get("WHISPER_MODEL") {
            self.speech.whisper_model = model;
        }
        if let Some(backend) = get("TTS_BACKEND") {
            self.speech.tts_backend = backend;
        }
    }
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Interface to bind the HTTP server to.
    pub host: String,
    /// HTTP server port.
    pub port: u16,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Data directory for the vector index and other local state.
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            log_level: "info".to_string(),
            data_dir: "~/.tutor/data".to_string(),
        }
    }
}

/// Generation provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Credential for the primary provider (environment only).
    #[serde(skip)]
    pub groq_api_key: Option<String>,
    /// Credential for the secondary provider (environment only).
    #[serde(skip)]
    pub openai_api_key: Option<String>,
    pub groq_model: String,
    pub openai_model: String,
    pub groq_base_url: String,
    pub openai_base_url: String,
    /// Sampling temperature, fixed for the process lifetime.
    pub temperature: f32,
    /// Upper bound on generated tokens, fixed for the process lifetime.
    pub max_tokens: u32,
    /// Per-request HTTP timeout in seconds.
    pub timeout_secs: u64,
    /// Longest wait for the next streamed delta before the answer is cut off.
    pub stream_idle_secs: u64,
    /// Capacity of the channel between generation and the transport writer.
    pub stream_buffer: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            groq_api_key: None,
            openai_api_key: None,
            groq_model: "llama-3.1-8b-instant".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
            groq_base_url: "https://api.groq.com/openai/v1".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            temperature: 0.2,
            max_tokens: 512,
            timeout_secs: 60,
            stream_idle_secs: 30,
            stream_buffer: 32,
        }
    }
}

/// Semantic retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Whether to attach retrieved context at all.
    pub enabled: bool,
    /// Persisted index file. Relative paths resolve against `general.data_dir`.
    pub index_path: String,
    /// Passages fetched per query.
    pub top_k: usize,
    /// Target characters per ingested chunk.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
    /// Embedding dimension.
    pub embedding_dim: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            index_path: "chroma_db/index.json".to_string(),
            top_k: 4,
            chunk_size: 1000,
            chunk_overlap: 200,
            embedding_dim: 384,
        }
    }
}

/// Session store retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum live sessions; the least recently used is evicted beyond this.
    pub max_sessions: usize,
    /// Idle time after which a session is dropped. 0 disables expiry.
    pub idle_ttl_minutes: u64,
    /// Number of most recent turns sent to the provider.
    pub history_window: usize,
    /// Longest accepted query, in characters.
    pub max_query_chars: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 1024,
            idle_ttl_minutes: 0,
            history_window: 8,
            max_query_chars: 4000,
        }
    }
}

/// Speech-to-text and text-to-speech settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Path to a whisper.cpp GGML model. Empty uses the mock transcriber.
    pub whisper_model: String,
    /// Transcription language code.
    pub language: String,
    /// Synthesis backend: "command" or "tone".
    pub tts_backend: String,
    /// Executable used by the command backend.
    pub tts_command: String,
    /// Voice used when a request does not name one.
    pub default_voice: Option<String>,
    /// Size of each binary frame on the audio WebSocket.
    pub frame_size: usize,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            whisper_model: String::new(),
            language: "en".to_string(),
            tts_backend: "command".to_string(),
            tts_command: "espeak-ng".to_string(),
            default_voice: None,
            frame_size: 4096,
        }
    }
}

/// Affect tagging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AffectConfig {
    /// "random" picks among soft labels for unmatched text; "fixed" always
    /// returns `fixed_label`.
    pub fallback: String,
    pub fixed_label: String,
}

impl Default for AffectConfig {
    fn default() -> Self {
        Self {
            fallback: "random".to_string(),
            fixed_label: "neutral".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = TutorConfig::default();
        assert_eq!(config.general.port, 8000);
        assert_eq!(config.llm.groq_model, "llama-3.1-8b-instant");
        assert_eq!(config.llm.openai_model, "gpt-4o-mini");
        assert_eq!(config.llm.temperature, 0.2);
        assert_eq!(config.llm.max_tokens, 512);
        assert_eq!(config.retrieval.top_k, 4);
        assert_eq!(config.sessions.history_window, 8);
        assert_eq!(config.speech.frame_size, 4096);
        assert!(config.llm.groq_api_key.is_none());
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[general]
log_level = "debug"
port = 9001

[sessions]
max_sessions = 16
"#;
        let file = create_temp_config(content);
        let config = TutorConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.port, 9001);
        assert_eq!(config.sessions.max_sessions, 16);
        assert_eq!(config.sessions.history_window, 8);
        assert_eq!(config.retrieval.chunk_size, 1000);
    }

    #[test]
    fn test_credentials_are_not_read_from_file() {
        let content = r#"
[llm]
groq_api_key = "leaked"
"#;
        let file = create_temp_config(content);
        let config = TutorConfig::load(file.path()).unwrap();
        assert!(config.llm.groq_api_key.is_none());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = TutorConfig::load_or_default(Path::new("/nonexistent/tutor.toml"));
        assert_eq!(config.general.data_dir, "~/.tutor/data");
    }

    #[test]
    fn test_load_invalid_toml_is_config_error() {
        let file = create_temp_config("[general\nport = ");
        let err = TutorConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, TutorError::Config(_)));
    }

    #[test]
    fn test_save_and_reload_omits_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = TutorConfig::default();
        config.llm.groq_api_key = Some("secret".to_string());
        config.general.port = 8123;
        config.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("secret"));

        let reloaded = TutorConfig::load(&path).unwrap();
        assert_eq!(reloaded.general.port, 8123);
        assert!(reloaded.llm.groq_api_key.is_none());
    }

    #[test]
    fn test_apply_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("GROQ_API_KEY", "gsk_test"),
            ("OPENAI_MODEL", "gpt-4o"),
            ("RAG_TEMPERATURE", "0.7"),
            ("RAG_MAX_TOKENS", "256"),
            ("BACKEND_PORT", "9090"),
            ("CHROMA_DIR", "/srv/chroma/"),
        ]
        .into_iter()
        .collect();

        let mut config = TutorConfig::default();
        config.apply_env_from(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.llm.groq_api_key.as_deref(), Some("gsk_test"));
        assert!(config.llm.openai_api_key.is_none());
        assert_eq!(config.llm.openai_model, "gpt-4o");
        assert_eq!(config.llm.temperature, 0.7);
        assert_eq!(config.llm.max_tokens, 256);
        assert_eq!(config.general.port, 9090);
        assert_eq!(config.retrieval.index_path, "/srv/chroma/index.json");
    }

    #[test]
    fn test_apply_env_ignores_blank_and_invalid() {
        let env: HashMap<&str, &str> = [
            ("GROQ_API_KEY", "   "),
            ("RAG_MAX_TOKENS", "lots"),
            ("BACKEND_PORT", "99999"),
        ]
        .into_iter()
        .collect();

        let mut config = TutorConfig::default();
        config.apply_env_from(|k| env.get(k).map(|v| v.to_string()));

        assert!(config.llm.groq_api_key.is_none());
        assert_eq!(config.llm.max_tokens, 512);
        assert_eq!(config.general.port, 8000);
    }
}
