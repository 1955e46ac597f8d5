//! Tutor Speech crate - text-to-speech port, backends, and scoped audio
//! artifacts.

pub mod artifact;
pub mod mock;
pub mod synth;

pub use artifact::{AudioArtifact, FrameReader};
pub use mock::StaticSynthesizer;
pub use synth::{build_synthesizer, CommandSynthesizer, SpeechSynthesizer, ToneSynthesizer};
