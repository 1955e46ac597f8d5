//! Deterministic generation provider for tests and offline development.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;

use tutor_core::types::Message;

use crate::error::ProviderError;
use crate::provider::{DeltaStream, GenerationOptions, GenerationProvider, ProviderDescriptor};

/// Provider that replays a fixed list of chunks.
///
/// `generate` returns the chunks concatenated; `generate_stream` yields them
/// one by one, optionally pausing before each, and optionally failing or
/// going silent after a given number of chunks.
pub struct ScriptedProvider {
    descriptor: ProviderDescriptor,
    chunks: Vec<String>,
    fail: bool,
    fail_stream_after: Option<usize>,
    stall_after: Option<usize>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    delivered: Arc<AtomicUsize>,
    last_messages: Mutex<Vec<Message>>,
}

impl ScriptedProvider {
    pub fn new<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            descriptor: ProviderDescriptor {
                name: "scripted".to_string(),
                model: "scripted-1".to_string(),
                supports_streaming: true,
            },
            chunks: chunks.into_iter().map(Into::into).collect(),
            fail: false,
            fail_stream_after: None,
            stall_after: None,
            delay: None,
            calls: AtomicUsize::new(0),
            delivered: Arc::new(AtomicUsize::new(0)),
            last_messages: Mutex::new(Vec::new()),
        }
    }

    /// Provider whose whole answer is `text`, streamed word by word.
    pub fn answering(text: &str) -> Self {
        let mut chunks = Vec::new();
        let mut start = 0;
        for (i, c) in text.char_indices() {
            if c == ' ' && i > start {
                chunks.push(text[start..i].to_string());
                start = i;
            }
        }
        if start < text.len() {
            chunks.push(text[start..].to_string());
        }
        Self::new(chunks)
    }

    /// Every call fails.
    pub fn failing() -> Self {
        let mut provider = Self::new(Vec::<String>::new());
        provider.fail = true;
        provider
    }

    pub fn non_streaming(mut self) -> Self {
        self.descriptor.supports_streaming = false;
        self
    }

    pub fn fail_stream_after(mut self, chunks: usize) -> Self {
        self.fail_stream_after = Some(chunks);
        self
    }

    /// Stop yielding after `chunks` without ending the stream.
    pub fn stall_after(mut self, chunks: usize) -> Self {
        self.stall_after = Some(chunks);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `generate`/`generate_stream` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of stream chunks actually pulled by a consumer.
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }

    /// Messages passed on the most recent call.
    pub fn last_messages(&self) -> Vec<Message> {
        self.last_messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    fn record(&self, messages: &[Message]) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_messages.lock() {
            *last = messages.to_vec();
        }
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn generate(
        &self,
        messages: &[Message],
        _options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        self.record(messages);
        if self.fail {
            return Err(ProviderError::Http("scripted failure".to_string()));
        }
        Ok(self.chunks.concat())
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        _options: &GenerationOptions,
    ) -> Result<DeltaStream, ProviderError> {
        self.record(messages);
        if self.fail {
            return Err(ProviderError::Http("scripted failure".to_string()));
        }

        let mut items: Vec<Result<String, ProviderError>> =
            self.chunks.iter().cloned().map(Ok).collect();
        if let Some(n) = self.fail_stream_after {
            items.truncate(n);
            items.push(Err(ProviderError::Stream("scripted stream failure".to_string())));
        }

        let delay = self.delay;
        let delivered = Arc::clone(&self.delivered);
        let stream = futures_util::stream::iter(items).then(move |item| {
            let delivered = Arc::clone(&delivered);
            async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                delivered.fetch_add(1, Ordering::SeqCst);
                item
            }
        });
        match self.stall_after {
            Some(n) => Ok(Box::pin(stream.take(n).chain(futures_util::stream::pending()))),
            None => Ok(Box::pin(stream)),
        }
    }
}
