//! Keyword-based affect tagging for generated answers.

use rand::seq::IndexedRandom;
use tracing::warn;

use tutor_core::config::AffectConfig;
use tutor_core::types::Affect;

/// Label table, checked in order; the first label with a matching keyword wins.
const AFFECT_TABLE: &[(Affect, &[&str])] = &[
    (Affect::Happy, &["congrat", "great", "happy", "nice", "awesome"]),
    (
        Affect::Explaining,
        &["explain", "because", "therefore", "in summary", "first", "second"],
    ),
    (Affect::Thinking, &["let me think", "hmm", "thinking", "consider"]),
    (Affect::Neutral, &[]),
];

/// Labels the random fallback chooses from.
pub const FALLBACK_LABELS: &[Affect] = &[Affect::Neutral, Affect::Explaining];

/// What to return when no keyword matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffectFallback {
    /// Uniform pick from [`FALLBACK_LABELS`]. Not deterministic.
    Random,
    Fixed(Affect),
}

#[derive(Debug, Clone)]
pub struct AffectTagger {
    fallback: AffectFallback,
}

impl Default for AffectTagger {
    fn default() -> Self {
        Self::new(AffectFallback::Random)
    }
}

impl AffectTagger {
    pub fn new(fallback: AffectFallback) -> Self {
        Self { fallback }
    }

    pub fn from_config(config: &AffectConfig) -> Self {
        let fallback = match config.fallback.trim().to_ascii_lowercase().as_str() {
            "fixed" => match config.fixed_label.parse::<Affect>() {
                Ok(label) => AffectFallback::Fixed(label),
                Err(e) => {
                    warn!(error = %e, "Invalid fixed affect label, using neutral");
                    AffectFallback::Fixed(Affect::Neutral)
                }
            },
            "random" => AffectFallback::Random,
            other => {
                warn!(fallback = other, "Unknown affect fallback, using random");
                AffectFallback::Random
            }
        };
        Self::new(fallback)
    }

    pub fn fallback(&self) -> AffectFallback {
        self.fallback
    }

    /// Tag `text` with the first table label whose keyword it contains.
    pub fn tag(&self, text: &str) -> Affect {
        match match_keywords(text) {
            Some(label) => label,
            None => match self.fallback {
                AffectFallback::Fixed(label) => label,
                AffectFallback::Random => FALLBACK_LABELS
                    .choose(&mut rand::rng())
                    .copied()
                    .unwrap_or(Affect::Neutral),
            },
        }
    }
}

/// Deterministic part of tagging: the first matching table label, if any.
pub fn match_keywords(text: &str) -> Option<Affect> {
    let lower = text.to_lowercase();
    AFFECT_TABLE
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(label, _)| *label)
}
