//! OpenAI-compatible chat completions adapter.
//!
//! Groq and OpenAI both speak the `/chat/completions` wire format, so one
//! adapter serves both; they differ in base URL, model, whether streaming
//! is used, and whether `max_tokens` is sent.
//!
//! Streaming responses are server-sent events:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//!
//! data: {"choices":[{"delta":{"content":"lo"}}]}
//!
//! data: [DONE]
//! ```

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};
use tracing::debug;

use tutor_core::config::LlmConfig;
use tutor_core::types::Message;

use super::{DeltaStream, GenerationOptions, GenerationProvider, ProviderDescriptor};
use crate::error::ProviderError;

const DONE_SENTINEL: &str = "[DONE]";

/// Chat completions client for any OpenAI-compatible endpoint.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    descriptor: ProviderDescriptor,
    send_max_tokens: bool,
    timeout: Duration,
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("base_url", &self.base_url)
            .field("descriptor", &self.descriptor)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl OpenAiCompatProvider {
    pub fn new(
        descriptor: ProviderDescriptor,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        send_max_tokens: bool,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            descriptor,
            send_max_tokens,
            timeout,
        })
    }

    /// Primary provider: streams and sends `max_tokens`.
    pub fn groq(config: &LlmConfig, api_key: &str) -> Result<Self, ProviderError> {
        Self::new(
            ProviderDescriptor {
                name: "groq".to_string(),
                model: config.groq_model.clone(),
                supports_streaming: true,
            },
            &config.groq_base_url,
            api_key,
            true,
            Duration::from_secs(config.timeout_secs.max(1)),
        )
    }

    /// Secondary provider: synchronous only, no `max_tokens`.
    pub fn openai(config: &LlmConfig, api_key: &str) -> Result<Self, ProviderError> {
        Self::new(
            ProviderDescriptor {
                name: "openai".to_string(),
                model: config.openai_model.clone(),
                supports_streaming: false,
            },
            &config.openai_base_url,
            api_key,
            false,
            Duration::from_secs(config.timeout_secs.max(1)),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn request_body(&self, messages: &[Message], options: &GenerationOptions, stream: bool) -> Value {
        let messages: Vec<Value> = messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();
        let mut body = json!({
            "model": self.descriptor.model,
            "messages": messages,
            "temperature": options.temperature,
        });
        if self.send_max_tokens {
            body["max_tokens"] = json!(options.max_tokens);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerationProvider for OpenAiCompatProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        let body = self.request_body(messages, options, false);
        let response = tokio::time::timeout(self.timeout, async {
            let response = self.post(&body).await?;
            let value = response.json::<Value>().await?;
            Ok::<_, ProviderError>(value)
        })
        .await
        .map_err(|_| ProviderError::Timeout)??;

        Ok(extract_content(&response))
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<DeltaStream, ProviderError> {
        let body = self.request_body(messages, options, true);
        let response = tokio::time::timeout(self.timeout, self.post(&body))
            .await
            .map_err(|_| ProviderError::Timeout)??;
        debug!(provider = %self.descriptor.name, "Completion stream opened");

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(ProviderError::from));
        Ok(sse_delta_stream(Box::pin(bytes)))
    }
}

/// Pull the answer text out of a chat completions response.
///
/// Tries `choices[0].message.content`, then the legacy `choices[0].text`,
/// and otherwise falls back to the raw JSON as a string. Never fails.
pub fn extract_content(response: &Value) -> String {
    if let Some(content) = response.pointer("/choices/0/message/content") {
        return match content {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
    }
    if let Some(Value::String(text)) = response.pointer("/choices/0/text") {
        return text.clone();
    }
    match response {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Splits a byte stream into SSE `data:` payloads.
#[derive(Debug, Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(data) = data_payload(&line) {
                payloads.push(data);
            }
        }
        payloads
    }

    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        data_payload(&rest)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\r', '\n']);
    line.strip_prefix("data:").map(|d| d.trim_start().to_string())
}

/// Parse one SSE payload into an optional text delta.
fn parse_delta(data: &str) -> Result<Option<String>, ProviderError> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| ProviderError::Payload(format!("invalid stream chunk: {e}")))?;
    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(ProviderError::Stream(message));
    }
    Ok(value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, ProviderError>> + Send>>;

struct StreamState {
    bytes: ByteStream,
    lines: SseLineBuffer,
    pending: VecDeque<Result<String, ProviderError>>,
    finished: bool,
}

impl StreamState {
    /// Queue parsed payloads. Returns true once the stream is over.
    fn absorb(&mut self, payloads: impl IntoIterator<Item = String>) -> bool {
        for data in payloads {
            if data == DONE_SENTINEL {
                return true;
            }
            if data.is_empty() {
                continue;
            }
            match parse_delta(&data) {
                Ok(Some(delta)) => self.pending.push_back(Ok(delta)),
                Ok(None) => {}
                Err(e) => {
                    self.pending.push_back(Err(e));
                    return true;
                }
            }
        }
        false
    }
}

/// Turn raw SSE bytes into a stream of text deltas ending at `[DONE]`,
/// end of body, or the first error.
fn sse_delta_stream(bytes: ByteStream) -> DeltaStream {
    let state = StreamState {
        bytes,
        lines: SseLineBuffer::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let payloads = state.lines.push(&chunk);
                    state.finished = state.absorb(payloads);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state.pending.push_back(Err(e));
                }
                None => {
                    let tail = state.lines.finish();
                    state.absorb(tail);
                    state.finished = true;
                }
            }
        }
    }))
}
