//! User-facing fallback text for failed generation.

/// Which answer path failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerPath {
    /// Stateless single answer.
    Single,
    /// Answer with session history.
    WithHistory,
    /// Streaming answer, after the stream has been opened.
    Stream,
}

/// Fixed text returned in place of a generated answer.
pub fn fallback_text(path: AnswerPath) -> &'static str {
    match path {
        AnswerPath::Single => "Sorry, I couldn't process your request right now.",
        AnswerPath::WithHistory => "I'm having trouble retrieving the information right now.",
        AnswerPath::Stream => "Sorry, I encountered a problem while streaming the response.",
    }
}
