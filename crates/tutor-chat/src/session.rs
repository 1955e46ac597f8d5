//! In-memory session store: per-session ordered turns with bounded retention.
//!
//! Sessions live in a [`moka`] cache capped at `max_sessions` with
//! least-recently-used eviction and an optional idle TTL. Each session's
//! turns sit behind their own mutex, so reads and appends on one session
//! are linearizable while different sessions never contend.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use tracing::{debug, error};

use tutor_core::config::SessionConfig;
use tutor_core::types::Turn;

use crate::error::ChatError;

/// Retention policy for the session store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub max_sessions: usize,
    pub idle_ttl: Option<Duration>,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_sessions: 1024,
            idle_ttl: None,
        }
    }
}

impl From<&SessionConfig> for SessionPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            max_sessions: config.max_sessions.max(1),
            idle_ttl: (config.idle_ttl_minutes > 0)
                .then(|| Duration::from_secs(config.idle_ttl_minutes * 60)),
        }
    }
}

type Turns = Arc<Mutex<Vec<Turn>>>;

/// Thread-safe store of conversation turns keyed by session identifier.
pub struct SessionStore {
    sessions: Cache<String, Turns>,
    policy: SessionPolicy,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.sessions.entry_count())
            .field("policy", &self.policy)
            .finish()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionPolicy::default())
    }
}

impl SessionStore {
    pub fn new(policy: SessionPolicy) -> Self {
        let policy = SessionPolicy {
            max_sessions: policy.max_sessions.max(1),
            idle_ttl: policy.idle_ttl,
        };
        let mut builder = Cache::<String, Turns>::builder()
            .max_capacity(policy.max_sessions as u64)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(|id: Arc<String>, _turns: Turns, cause: RemovalCause| {
                debug!(session_id = %id, ?cause, "Session dropped");
            });
        if let Some(ttl) = policy.idle_ttl {
            builder = builder.time_to_idle(ttl);
        }
        Self {
            sessions: builder.build(),
            policy,
        }
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    fn lock(turns: &Turns) -> Result<MutexGuard<'_, Vec<Turn>>, ChatError> {
        turns
            .lock()
            .map_err(|e| ChatError::SessionStore(format!("session lock poisoned: {}", e)))
    }

    /// The session's turn list, created empty if absent.
    fn session(&self, session_id: &str) -> Turns {
        self.sessions
            .get_with_by_ref(session_id, || Arc::new(Mutex::new(Vec::new())))
    }

    /// Snapshot of a session's turns in insertion order.
    ///
    /// Unknown sessions yield an empty history. Reading counts as an access
    /// for LRU purposes but never creates a session.
    pub fn get_history(&self, session_id: &str) -> Vec<Turn> {
        match self.try_history(session_id) {
            Ok(turns) => turns,
            Err(e) => {
                error!(session_id, error = %e, "Failed to read session history");
                Vec::new()
            }
        }
    }

    /// Like [`SessionStore::get_history`] but surfaces lock failures.
    pub fn try_history(&self, session_id: &str) -> Result<Vec<Turn>, ChatError> {
        let Some(turns) = self.sessions.get(session_id) else {
            return Ok(Vec::new());
        };
        let snapshot = Self::lock(&turns)?.clone();
        Ok(snapshot)
    }

    /// Append one turn at the tail, creating the session if needed.
    pub fn append(&self, session_id: &str, turn: Turn) -> Result<(), ChatError> {
        let turns = self.session(session_id);
        Self::lock(&turns)?.push(turn);
        Ok(())
    }

    /// Append a user turn and its assistant reply under a single lock.
    pub fn append_exchange(
        &self,
        session_id: &str,
        user_text: impl Into<String>,
        assistant_text: impl Into<String>,
    ) -> Result<(), ChatError> {
        let turns = self.session(session_id);
        let mut turns = Self::lock(&turns)?;
        turns.push(Turn::user(user_text));
        turns.push(Turn::assistant(assistant_text));
        Ok(())
    }

    /// Reset a session's turns to empty. The session identifier is kept.
    pub fn clear(&self, session_id: &str) -> Result<(), ChatError> {
        let turns = self.session(session_id);
        Self::lock(&turns)?.clear();
        Ok(())
    }

    /// Number of sessions currently held, after pending evictions run.
    pub fn len(&self) -> usize {
        self.sessions.run_pending_tasks();
        self.sessions.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tutor_core::types::Role;

    fn store() -> SessionStore {
        SessionStore::new(SessionPolicy::default())
    }

    #[test]
    fn test_unknown_session_has_empty_history() {
        let store = store();
        assert!(store.get_history("never-seen").is_empty());
        assert!(!store.contains("never-seen"));
    }

    #[test]
    fn test_append_preserves_insertion_order() {
        let store = store();
        store.append("s1", Turn::user("first")).unwrap();
        store.append("s1", Turn::user("second")).unwrap();
        store.append("s1", Turn::assistant("third")).unwrap();

        let history = store.get_history("s1");
        let texts: Vec<&str> = history.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert_eq!(history[1].role, Role::User);
        assert_eq!(history[2].role, Role::Assistant);
    }

    #[test]
    fn test_history_is_a_snapshot() {
        let store = store();
        store.append("s1", Turn::user("hello")).unwrap();
        let mut copy = store.get_history("s1");
        copy.push(Turn::assistant("injected"));
        copy[0].text = "mutated".into();

        let history = store.get_history("s1");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "hello");
    }

    #[test]
    fn test_append_exchange_order() {
        let store = store();
        store.append_exchange("s1", "question", "answer").unwrap();
        let history = store.get_history("s1");
        assert_eq!(history, vec![Turn::user("question"), Turn::assistant("answer")]);
    }

    #[test]
    fn test_clear_keeps_session_id() {
        let store = store();
        store.append_exchange("s1", "q", "a").unwrap();
        store.clear("s1").unwrap();
        assert!(store.get_history("s1").is_empty());
        assert!(store.contains("s1"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let store = store();
        store.append("a", Turn::user("for a")).unwrap();
        store.append("b", Turn::user("for b")).unwrap();
        assert_eq!(store.get_history("a")[0].text, "for a");
        assert_eq!(store.get_history("b")[0].text, "for b");
    }

    #[test]
    fn test_lru_eviction() {
        let store = SessionStore::new(SessionPolicy {
            max_sessions: 2,
            idle_ttl: None,
        });
        store.append("a", Turn::user("1")).unwrap();
        store.append("b", Turn::user("2")).unwrap();
        assert_eq!(store.len(), 2);
        // Touch "a" so "b" becomes least recently used.
        store.get_history("a");
        assert_eq!(store.len(), 2);
        store.append("c", Turn::user("3")).unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.contains("a"));
        assert!(!store.contains("b"));
        assert!(store.contains("c"));
    }

    #[test]
    fn test_existing_session_never_evicted_by_own_append() {
        let store = SessionStore::new(SessionPolicy {
            max_sessions: 1,
            idle_ttl: None,
        });
        store.append("a", Turn::user("1")).unwrap();
        store.append("a", Turn::assistant("2")).unwrap();
        assert_eq!(store.get_history("a").len(), 2);
    }

    #[test]
    fn test_idle_ttl_expires_session() {
        let store = SessionStore::new(SessionPolicy {
            max_sessions: 8,
            idle_ttl: Some(Duration::from_millis(20)),
        });
        store.append("s1", Turn::user("old")).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        assert!(store.get_history("s1").is_empty());
        assert!(!store.contains("s1"));
    }

    #[test]
    fn test_policy_from_config() {
        let config = SessionConfig {
            max_sessions: 0,
            idle_ttl_minutes: 5,
            ..SessionConfig::default()
        };
        let policy = SessionPolicy::from(&config);
        assert_eq!(policy.max_sessions, 1);
        assert_eq!(policy.idle_ttl, Some(Duration::from_secs(300)));

        let policy = SessionPolicy::from(&SessionConfig::default());
        assert_eq!(policy.idle_ttl, None);
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let store = Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        store
                            .append_exchange("shared", format!("q{i}-{j}"), format!("a{i}-{j}"))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let history = store.get_history("shared");
        assert_eq!(history.len(), 8 * 50 * 2);
        // Exchanges are never interleaved.
        for pair in history.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            assert_eq!(pair[0].text[1..], pair[1].text[1..]);
        }
    }
}
