//! Answer engine: retrieval, context assembly, and provider invocation.
//!
//! Provider errors stop here. Synchronous answers fall back to fixed text;
//! streams end with a single fallback chunk.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use tutor_core::config::TutorConfig;
use tutor_core::types::{Message, Turn};
use tutor_vector::Retriever;

use crate::context::{build_messages, DEFAULT_HISTORY_WINDOW};
use crate::error::{ChatError, ProviderError};
use crate::fallback::{fallback_text, AnswerPath};
use crate::provider::{select_provider, GenerationOptions, GenerationProvider, ProviderDescriptor};

/// Fixed knobs of an engine, read once at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub options: GenerationOptions,
    pub top_k: usize,
    pub history_window: usize,
    pub stream_buffer: usize,
    /// Longest wait for the next delta once a stream is open.
    pub stream_idle_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            options: GenerationOptions::default(),
            top_k: 4,
            history_window: DEFAULT_HISTORY_WINDOW,
            stream_buffer: 32,
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &TutorConfig) -> Self {
        Self {
            options: GenerationOptions::from(&config.llm),
            top_k: config.retrieval.top_k,
            history_window: config.sessions.history_window,
            stream_buffer: config.llm.stream_buffer.max(1),
            stream_idle_timeout: Duration::from_secs(config.llm.stream_idle_secs.max(1)),
        }
    }
}

/// Generates answers with one provider chosen at construction.
#[derive(Clone)]
pub struct AnswerEngine {
    provider: Arc<dyn GenerationProvider>,
    retriever: Option<Arc<dyn Retriever>>,
    settings: EngineSettings,
}

impl AnswerEngine {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        retriever: Option<Arc<dyn Retriever>>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            provider,
            retriever,
            settings,
        }
    }

    /// Select a provider from the configured credentials.
    ///
    /// Fails with [`ChatError::Unavailable`] when no credential is present.
    pub fn from_config(
        config: &TutorConfig,
        retriever: Option<Arc<dyn Retriever>>,
    ) -> Result<Self, ChatError> {
        let provider = select_provider(&config.llm)?;
        let engine = Self::new(provider, retriever, EngineSettings::from_config(config));
        info!(
            provider = %engine.descriptor().name,
            model = %engine.descriptor().model,
            retrieval = engine.has_retrieval(),
            "Answer engine ready"
        );
        Ok(engine)
    }

    pub fn descriptor(&self) -> &ProviderDescriptor {
        self.provider.descriptor()
    }

    pub fn has_retrieval(&self) -> bool {
        self.retriever.is_some()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Retrieved passages joined by blank lines. Empty on any failure.
    pub async fn retrieve_context(&self, query: &str) -> String {
        let Some(retriever) = &self.retriever else {
            return String::new();
        };
        match retriever.search(query, self.settings.top_k).await {
            Ok(passages) => passages
                .into_iter()
                .map(|p| p.text)
                .filter(|t| !t.trim().is_empty())
                .collect::<Vec<_>>()
                .join("\n\n"),
            Err(e) => {
                warn!(error = %e, "Retrieval failed, answering without context");
                String::new()
            }
        }
    }

    async fn prepare(&self, query: &str, history: &[Turn]) -> Vec<Message> {
        let context = self.retrieve_context(query).await;
        debug!(
            context_chars = context.len(),
            history_turns = history.len(),
            "Assembling messages"
        );
        build_messages(query, history, &context, self.settings.history_window)
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, ProviderError> {
        self.provider
            .generate(messages, &self.settings.options)
            .await
    }

    fn recover(&self, result: Result<String, ProviderError>, path: AnswerPath) -> String {
        result.unwrap_or_else(|e| {
            error!(provider = %self.descriptor().name, error = %e, ?path, "Generation failed");
            fallback_text(path).to_string()
        })
    }

    /// Stateless answer.
    pub async fn answer(&self, query: &str) -> String {
        let messages = self.prepare(query, &[]).await;
        let result = self.complete(&messages).await;
        self.recover(result, AnswerPath::Single)
    }

    /// Answer with prior turns as context.
    pub async fn answer_with_history(&self, query: &str, history: &[Turn]) -> String {
        let messages = self.prepare(query, history).await;
        let result = self.complete(&messages).await;
        self.recover(result, AnswerPath::WithHistory)
    }

    /// Stream an answer as text deltas over a bounded channel.
    ///
    /// A provider without streaming support yields the whole synchronous
    /// answer as one chunk. A failure after the stream opens, or a gap
    /// between deltas longer than `stream_idle_timeout`, yields one fallback
    /// chunk and ends. Dropping the receiver stops generation.
    pub fn stream_answer_with_history(
        &self,
        query: String,
        history: Vec<Turn>,
    ) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(self.settings.stream_buffer.max(1));
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_stream(&query, &history, tx).await;
        });
        rx
    }

    async fn run_stream(&self, query: &str, history: &[Turn], tx: mpsc::Sender<String>) {
        let messages = self.prepare(query, history).await;

        if !self.descriptor().supports_streaming {
            let result = self.complete(&messages).await;
            let _ = tx.send(self.recover(result, AnswerPath::WithHistory)).await;
            return;
        }

        let mut stream = match self
            .provider
            .generate_stream(&messages, &self.settings.options)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                error!(provider = %self.descriptor().name, error = %e, "Failed to open stream");
                let _ = tx.send(fallback_text(AnswerPath::Stream).to_string()).await;
                return;
            }
        };

        loop {
            let next = tokio::select! {
                _ = tx.closed() => {
                    debug!("Stream receiver dropped, abandoning generation");
                    return;
                }
                next = tokio::time::timeout(self.settings.stream_idle_timeout, stream.next()) => next,
            };
            let Ok(next) = next else {
                warn!(
                    provider = %self.descriptor().name,
                    idle_secs = self.settings.stream_idle_timeout.as_secs_f32(),
                    "Stream stalled mid-answer"
                );
                let _ = tx.send(fallback_text(AnswerPath::Stream).to_string()).await;
                return;
            };
            match next {
                Some(Ok(delta)) => {
                    if tx.send(delta).await.is_err() {
                        return;
                    }
                }
                Some(Err(e)) => {
                    error!(provider = %self.descriptor().name, error = %e, "Stream failed mid-answer");
                    let _ = tx.send(fallback_text(AnswerPath::Stream).to_string()).await;
                    return;
                }
                None => return,
            }
        }
    }
}

impl std::fmt::Debug for AnswerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerEngine")
            .field("provider", self.descriptor())
            .field("retrieval", &self.has_retrieval())
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SYSTEM_PREAMBLE;
    use crate::mock::ScriptedProvider;
    use async_trait::async_trait;
    use std::time::Duration;
    use tutor_core::error::TutorError;
    use tutor_core::types::{Passage, Role};

    struct FixedRetriever(Vec<&'static str>);

    #[async_trait]
    impl Retriever for FixedRetriever {
        async fn search(&self, _query: &str, k: usize) -> Result<Vec<Passage>, TutorError> {
            Ok(self
                .0
                .iter()
                .take(k)
                .map(|t| Passage {
                    text: t.to_string(),
                    score: 1.0,
                })
                .collect())
        }
    }

    struct BrokenRetriever;

    #[async_trait]
    impl Retriever for BrokenRetriever {
        async fn search(&self, _query: &str, _k: usize) -> Result<Vec<Passage>, TutorError> {
            Err(TutorError::Retrieval("index missing".into()))
        }
    }

    fn engine(provider: ScriptedProvider) -> (AnswerEngine, Arc<ScriptedProvider>) {
        engine_with(provider, None)
    }

    fn engine_with(
        provider: ScriptedProvider,
        retriever: Option<Arc<dyn Retriever>>,
    ) -> (AnswerEngine, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let engine = AnswerEngine::new(
            Arc::clone(&provider) as Arc<dyn GenerationProvider>,
            retriever,
            EngineSettings::default(),
        );
        (engine, provider)
    }

    async fn drain(mut rx: mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.push(chunk);
        }
        out
    }

    #[test]
    fn test_from_config_without_credentials_fails() {
        let err = AnswerEngine::from_config(&TutorConfig::default(), None).unwrap_err();
        assert!(matches!(err, ChatError::Unavailable(_)));
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = TutorConfig::default();
        config.llm.temperature = 0.5;
        config.llm.stream_buffer = 0;
        config.retrieval.top_k = 2;
        config.llm.stream_idle_secs = 5;
        let settings = EngineSettings::from_config(&config);
        assert_eq!(settings.stream_idle_timeout, Duration::from_secs(5));
        assert_eq!(settings.options.temperature, 0.5);
        assert_eq!(settings.top_k, 2);
        assert_eq!(settings.stream_buffer, 1);
    }

    #[tokio::test]
    async fn test_answer_keeps_provider_text() {
        let (engine, _) = engine(ScriptedProvider::new(["  Loops repeat.\n"]));
        assert_eq!(engine.answer("what is a loop").await, "  Loops repeat.\n");
    }

    #[tokio::test]
    async fn test_answer_fallbacks_differ_by_path() {
        let (engine, _) = engine(ScriptedProvider::failing());
        assert_eq!(engine.answer("q").await, fallback_text(AnswerPath::Single));
        assert_eq!(
            engine.answer_with_history("q", &[]).await,
            fallback_text(AnswerPath::WithHistory)
        );
    }

    #[tokio::test]
    async fn test_context_and_history_reach_provider() {
        let retriever: Arc<dyn Retriever> = Arc::new(FixedRetriever(vec!["passage one", "passage two"]));
        let (engine, provider) = engine_with(ScriptedProvider::new(["ok"]), Some(retriever));
        let history = vec![Turn::user("earlier"), Turn::assistant("reply")];

        engine.answer_with_history("now", &history).await;

        let messages = provider.last_messages();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].content, SYSTEM_PREAMBLE);
        assert_eq!(messages[1].content, "Context:\npassage one\n\npassage two");
        assert_eq!(messages[2].content, "earlier");
        assert_eq!(messages[3].role, Role::Assistant);
        assert_eq!(messages[4], Message::user("now"));
    }

    #[tokio::test]
    async fn test_retrieval_failure_degrades_to_empty_context() {
        let (engine, provider) =
            engine_with(ScriptedProvider::new(["fine"]), Some(Arc::new(BrokenRetriever)));
        assert_eq!(engine.retrieve_context("q").await, "");
        assert_eq!(engine.answer("q").await, "fine");
        assert_eq!(provider.last_messages().len(), 2);
    }

    #[tokio::test]
    async fn test_no_retriever_means_empty_context() {
        let (engine, _) = engine(ScriptedProvider::new(["x"]));
        assert!(!engine.has_retrieval());
        assert_eq!(engine.retrieve_context("anything").await, "");
    }

    #[tokio::test]
    async fn test_stream_and_sync_paths_converge() {
        let text = "Recursion is... First, ... Second, ...";
        let (engine, _) = engine(ScriptedProvider::answering(text));
        let history = vec![Turn::user("hi"), Turn::assistant("hello")];

        let chunks = drain(engine.stream_answer_with_history("explain recursion".into(), history.clone())).await;
        assert!(chunks.len() > 1);
        let streamed: String = chunks.concat();
        let sync = engine.answer_with_history("explain recursion", &history).await;
        assert_eq!(streamed, sync);
    }

    #[tokio::test]
    async fn test_paths_converge_with_surrounding_whitespace() {
        let (engine, _) = engine(ScriptedProvider::new(["Hello", " world\n"]));
        let streamed = drain(engine.stream_answer_with_history("q".into(), vec![]))
            .await
            .concat();
        assert_eq!(streamed, engine.answer_with_history("q", &[]).await);
    }

    #[tokio::test]
    async fn test_non_streaming_provider_emits_single_chunk() {
        let (engine, _) = engine(ScriptedProvider::new(["one ", "two"]).non_streaming());
        let chunks = drain(engine.stream_answer_with_history("q".into(), vec![])).await;
        assert_eq!(chunks, vec!["one two".to_string()]);
    }

    #[tokio::test]
    async fn test_mid_stream_error_ends_with_one_fallback_chunk() {
        let (engine, _) = engine(ScriptedProvider::new(["a", "b", "c"]).fail_stream_after(2));
        let chunks = drain(engine.stream_answer_with_history("q".into(), vec![])).await;
        assert_eq!(
            chunks,
            vec![
                "a".to_string(),
                "b".to_string(),
                fallback_text(AnswerPath::Stream).to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_stalled_stream_ends_with_fallback() {
        let provider = Arc::new(ScriptedProvider::new(["a", "b"]).stall_after(1));
        let engine = AnswerEngine::new(
            Arc::clone(&provider) as Arc<dyn GenerationProvider>,
            None,
            EngineSettings {
                stream_idle_timeout: Duration::from_millis(50),
                ..EngineSettings::default()
            },
        );

        let chunks = tokio::time::timeout(
            Duration::from_secs(5),
            drain(engine.stream_answer_with_history("q".into(), vec![])),
        )
        .await
        .expect("stream never terminated");
        assert_eq!(
            chunks,
            vec!["a".to_string(), fallback_text(AnswerPath::Stream).to_string()]
        );
    }

    #[tokio::test]
    async fn test_stream_open_failure_yields_fallback() {
        let (engine, _) = engine(ScriptedProvider::failing());
        let chunks = drain(engine.stream_answer_with_history("q".into(), vec![])).await;
        assert_eq!(chunks, vec![fallback_text(AnswerPath::Stream).to_string()]);
    }

    #[tokio::test]
    async fn test_dropped_receiver_stops_consuming_provider() {
        let chunks: Vec<String> = (0..100).map(|i| format!("t{i} ")).collect();
        let (engine, provider) =
            engine(ScriptedProvider::new(chunks).with_delay(Duration::from_millis(5)));

        let mut rx = engine.stream_answer_with_history("q".into(), vec![]);
        assert!(rx.recv().await.is_some());
        drop(rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let pulled = provider.delivered();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(provider.delivered(), pulled, "generation kept running");
        assert!(pulled < 100);
    }
}
