//! Dialogue session controller: drives the answer engine for a session,
//! records completed exchanges, and tags the affect of each answer.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use tutor_core::config::TutorConfig;
use tutor_core::types::Affect;
use tutor_vector::Retriever;

use crate::affect::AffectTagger;
use crate::engine::AnswerEngine;
use crate::error::ChatError;
use crate::session::{SessionPolicy, SessionStore};

const DEFAULT_MAX_QUERY_CHARS: usize = 4000;
const DEFAULT_SIGNAL_BUFFER: usize = 32;

/// A finished answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatReply {
    pub text: String,
    pub affect: Affect,
}

/// Progress of a streamed answer, in wire order:
/// `Start`, any number of `Token`s, then exactly one `Final` or `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatSignal {
    Start,
    Token(String),
    Final { text: String, affect: Affect },
    Error(String),
}

/// Final form of an answer as returned to clients and stored in history.
/// Applied identically to synchronous and streamed answers.
fn reply_text(raw: &str) -> String {
    raw.trim().to_string()
}

impl ChatSignal {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatSignal::Final { .. } | ChatSignal::Error(_))
    }
}

pub struct DialogueController {
    engine: Option<AnswerEngine>,
    unavailable_reason: String,
    sessions: Arc<SessionStore>,
    tagger: AffectTagger,
    max_query_chars: usize,
    signal_buffer: usize,
}

impl DialogueController {
    pub fn new(engine: Option<AnswerEngine>, sessions: Arc<SessionStore>, tagger: AffectTagger) -> Self {
        Self {
            engine,
            unavailable_reason: "No answer engine configured".to_string(),
            sessions,
            tagger,
            max_query_chars: DEFAULT_MAX_QUERY_CHARS,
            signal_buffer: DEFAULT_SIGNAL_BUFFER,
        }
    }

    /// Build from config. A missing provider credential leaves the
    /// controller in degraded mode instead of failing.
    pub fn from_config(config: &TutorConfig, retriever: Option<Arc<dyn Retriever>>) -> Self {
        let sessions = Arc::new(SessionStore::new(SessionPolicy::from(&config.sessions)));
        let tagger = AffectTagger::from_config(&config.affect);

        let (engine, reason) = match AnswerEngine::from_config(config, retriever) {
            Ok(engine) => (Some(engine), None),
            Err(e) => {
                warn!(error = %e, "Answer engine unavailable, running in degraded mode");
                (None, Some(e.to_string()))
            }
        };

        let mut controller = Self::new(engine, sessions, tagger)
            .with_limits(config.sessions.max_query_chars, config.llm.stream_buffer);
        if let Some(reason) = reason {
            controller.unavailable_reason = reason;
        }
        controller
    }

    pub fn with_limits(mut self, max_query_chars: usize, signal_buffer: usize) -> Self {
        self.max_query_chars = max_query_chars.max(1);
        self.signal_buffer = signal_buffer.max(1);
        self
    }

    pub fn is_available(&self) -> bool {
        self.engine.is_some()
    }

    pub fn engine(&self) -> Option<&AnswerEngine> {
        self.engine.as_ref()
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn tagger(&self) -> &AffectTagger {
        &self.tagger
    }

    fn require_engine(&self) -> Result<&AnswerEngine, ChatError> {
        self.engine
            .as_ref()
            .ok_or_else(|| ChatError::Unavailable(self.unavailable_reason.clone()))
    }

    /// Trimmed query, or the reason it is rejected.
    pub fn validate<'q>(&self, query: &'q str) -> Result<&'q str, ChatError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ChatError::EmptyQuery);
        }
        if query.chars().count() > self.max_query_chars {
            return Err(ChatError::QueryTooLong(self.max_query_chars));
        }
        Ok(query)
    }

    /// Stateless question.
    pub async fn query(&self, query: &str) -> Result<ChatReply, ChatError> {
        let engine = self.require_engine()?;
        let query = self.validate(query)?;
        let text = reply_text(&engine.answer(query).await);
        let affect = self.tagger.tag(&text);
        Ok(ChatReply { text, affect })
    }

    /// Answer within a session and record the exchange.
    pub async fn chat(&self, session_id: &str, query: &str) -> Result<ChatReply, ChatError> {
        let engine = self.require_engine()?;
        let query = self.validate(query)?;

        let history = self.sessions.try_history(session_id)?;
        let text = reply_text(&engine.answer_with_history(query, &history).await);
        // Both turns go in only after the answer exists.
        self.sessions.append_exchange(session_id, query, text.as_str())?;

        let affect = self.tagger.tag(&text);
        info!(session_id, affect = %affect, "Chat answered");
        Ok(ChatReply { text, affect })
    }

    /// Stream an answer within a session.
    ///
    /// Validation and availability errors are returned immediately. Once
    /// the receiver is returned, every outcome arrives as a signal. If the
    /// receiver is dropped before the answer completes, generation stops
    /// and the session is left untouched.
    pub fn stream_chat(
        &self,
        session_id: &str,
        query: &str,
    ) -> Result<mpsc::Receiver<ChatSignal>, ChatError> {
        let engine = self.require_engine()?.clone();
        let query = self.validate(query)?.to_string();
        let session_id = session_id.to_string();
        let sessions = Arc::clone(&self.sessions);
        let tagger = self.tagger.clone();

        let (tx, rx) = mpsc::channel(self.signal_buffer);
        tokio::spawn(async move {
            let history = match sessions.try_history(&session_id) {
                Ok(history) => history,
                Err(e) => {
                    error!(session_id = %session_id, error = %e, "Cannot read session history");
                    let _ = tx.send(ChatSignal::Error(e.to_string())).await;
                    return;
                }
            };

            if tx.send(ChatSignal::Start).await.is_err() {
                return;
            }

            let mut deltas = engine.stream_answer_with_history(query.clone(), history);
            let mut full_text = String::new();
            loop {
                let delta = tokio::select! {
                    _ = tx.closed() => {
                        info!(session_id = %session_id, "Stream consumer gone, discarding turn");
                        return;
                    }
                    delta = deltas.recv() => delta,
                };
                let Some(delta) = delta else { break };
                full_text.push_str(&delta);
                if tx.send(ChatSignal::Token(delta)).await.is_err() {
                    info!(session_id = %session_id, "Stream consumer gone, discarding turn");
                    return;
                }
            }

            let full_text = reply_text(&full_text);
            if let Err(e) = sessions.append_exchange(&session_id, query, full_text.as_str()) {
                error!(session_id = %session_id, error = %e, "Failed to record exchange");
                let _ = tx.send(ChatSignal::Error(e.to_string())).await;
                return;
            }

            let affect = tagger.tag(&full_text);
            let _ = tx
                .send(ChatSignal::Final {
                    text: full_text,
                    affect,
                })
                .await;
        });

        Ok(rx)
    }
}
