//! HTTP and WebSocket surface for the tutor service.
//!
//! REST endpoints for one-shot answers, transcription and synthesis, plus
//! two WebSocket adapters: token streaming for chat and framed audio for
//! text-to-speech.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod ws;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
