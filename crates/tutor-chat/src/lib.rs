//! Dialogue orchestration for the tutor.
//!
//! Holds per-session conversation state, assembles provider context,
//! generates answers (synchronously or as a stream of deltas) with a fixed
//! fallback policy, and tags each answer with a coarse affect label.

pub mod affect;
pub mod context;
pub mod controller;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod mock;
pub mod provider;
pub mod session;

pub use affect::{AffectFallback, AffectTagger};
pub use context::build_messages;
pub use controller::{ChatReply, ChatSignal, DialogueController};
pub use engine::{AnswerEngine, EngineSettings};
pub use error::{ChatError, ProviderError};
pub use fallback::{fallback_text, AnswerPath};
pub use mock::ScriptedProvider;
pub use provider::{
    select_provider, DeltaStream, GenerationOptions, GenerationProvider, OpenAiCompatProvider,
    ProviderDescriptor,
};
pub use session::{SessionPolicy, SessionStore};
