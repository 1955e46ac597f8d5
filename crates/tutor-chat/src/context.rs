//! Context assembly: turns a query, retrieved context, and session history
//! into the ordered message list sent to a generation provider.

use tutor_core::types::{Message, Role, Turn};

/// Number of most recent turns included by default.
pub const DEFAULT_HISTORY_WINDOW: usize = 8;

/// Instructional preamble, always the first message.
pub const SYSTEM_PREAMBLE: &str = "You are an expert, patient AI tutor. Explain concepts clearly, \
step-by-step, and use context when available.";

const CONTEXT_LABEL: &str = "Context:\n";

/// Build the provider message list.
///
/// Order: preamble, optional context block (only when `context` is
/// non-empty), the last `window` history turns in their original order,
/// then the query as a user message. Any role other than assistant is sent
/// as user; consecutive same-role turns are passed through unchanged.
pub fn build_messages(query: &str, history: &[Turn], context: &str, window: usize) -> Vec<Message> {
    let start = history.len().saturating_sub(window);
    let recent = &history[start..];

    let mut messages = Vec::with_capacity(recent.len() + 3);
    messages.push(Message::system(SYSTEM_PREAMBLE));
    if !context.is_empty() {
        messages.push(Message::system(format!("{CONTEXT_LABEL}{context}")));
    }
    messages.extend(recent.iter().map(|turn| {
        let role = match turn.role {
            Role::Assistant => Role::Assistant,
            _ => Role::User,
        };
        Message::new(role, turn.text.clone())
    }));
    messages.push(Message::user(query));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(n: usize) -> Vec<Turn> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Turn::user(format!("turn {i}"))
                } else {
                    Turn::assistant(format!("turn {i}"))
                }
            })
            .collect()
    }

    #[test]
    fn test_empty_history_no_context() {
        let messages = build_messages("what is a loop?", &[], "", DEFAULT_HISTORY_WINDOW);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], Message::system(SYSTEM_PREAMBLE));
        assert_eq!(messages[1], Message::user("what is a loop?"));
    }

    #[test]
    fn test_context_is_second_message() {
        let messages = build_messages("q", &history(2), "loops repeat work", 8);
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[1].role, Role::System);
        assert_eq!(messages[1].content, "Context:\nloops repeat work");
        assert_eq!(messages[2].content, "turn 0");
    }

    #[test]
    fn test_empty_context_never_emits_context_message() {
        let messages = build_messages("q", &history(3), "", 8);
        let system_count = messages.iter().filter(|m| m.role == Role::System).count();
        assert_eq!(system_count, 1);
    }

    #[test]
    fn test_history_window_keeps_last_eight() {
        let messages = build_messages("latest", &history(11), "", DEFAULT_HISTORY_WINDOW);
        assert_eq!(messages.len(), 1 + 8 + 1);
        let contents: Vec<&str> = messages[1..9].iter().map(|m| m.content.as_str()).collect();
        let expected: Vec<String> = (3..11).map(|i| format!("turn {i}")).collect();
        assert_eq!(contents, expected);
        assert_eq!(messages[9], Message::user("latest"));
    }

    #[test]
    fn test_roles_preserved_and_normalized() {
        let turns = vec![
            Turn::user("a"),
            Turn::user("b"),
            Turn::assistant("c"),
            Turn {
                role: Role::System,
                text: "d".into(),
            },
        ];
        let messages = build_messages("q", &turns, "", 8);
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::System,
                Role::User,
                Role::User,
                Role::Assistant,
                Role::User,
                Role::User
            ]
        );
    }

    #[test]
    fn test_zero_window_drops_all_history() {
        let messages = build_messages("q", &history(4), "ctx", 0);
        assert_eq!(messages.len(), 3);
    }
}
