use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

/// Session used when a request names none.
pub const DEFAULT_SESSION_ID: &str = "default_session";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationTurn {
    pub question: String,
    pub context_summary: String,
    pub answer: String,
    pub time: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(question: &str, context_summary: &str, answer: &str) -> Self {
        Self {
            question: question.to_string(),
            context_summary: context_summary.to_string(),
            answer: answer.to_string(),
            time: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
struct Session {
    turns: VecDeque<ConversationTurn>,
    last_used: u64,
}

#[derive(Debug, Default)]
struct Sessions {
    by_id: HashMap<String, Session>,
    clock: u64,
}

/// Per-session conversation history, bounded to `max_turns` per session and
/// `max_sessions` sessions. The least recently saved session is evicted first.
#[derive(Debug)]
pub struct SessionCache {
    max_turns: usize,
    max_sessions: usize,
    sessions: RwLock<Sessions>,
}

impl SessionCache {
    pub fn new(max_turns: usize, max_sessions: usize) -> Self {
        Self {
            max_turns: max_turns.max(1),
            max_sessions: max_sessions.max(1),
            sessions: RwLock::new(Sessions::default()),
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Turns of a session, oldest first.
    pub async fn history(&self, session_id: Option<&str>) -> Vec<ConversationTurn> {
        self.sessions
            .read()
            .await
            .by_id
            .get(session_key(session_id))
            .map(|session| session.turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn save(&self, session_id: Option<&str>, turn: ConversationTurn) {
        let mut sessions = self.sessions.write().await;
        sessions.clock += 1;
        let now = sessions.clock;
        let key = session_key(session_id);

        if !sessions.by_id.contains_key(key) && sessions.by_id.len() >= self.max_sessions {
            let oldest = sessions
                .by_id
                .iter()
                .min_by_key(|(_, s)| s.last_used)
                .map(|(id, _)| id.clone());
            if let Some(id) = oldest {
                sessions.by_id.remove(&id);
            }
        }

        let session = sessions.by_id.entry(key.to_string()).or_default();
        session.last_used = now;
        session.turns.push_back(turn);
        while session.turns.len() > self.max_turns {
            session.turns.pop_front();
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.by_id.len()
    }

    pub async fn clear(&self) {
        self.sessions.write().await.by_id.clear();
    }
}

fn session_key(session_id: Option<&str>) -> &str {
    match session_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => DEFAULT_SESSION_ID,
    }
}

/// History rendered for the completion prompt.
pub fn format_history(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|t| {
            format!(
                "[{}] Question: {}\nContext: {}\nAnswer: {}",
                t.time.format("%Y-%m-%d %H:%M:%S"),
                t.question,
                t.context_summary,
                t.answer
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn history_is_bounded_per_session() {
        let cache = SessionCache::new(2, 10);
        for i in 0..3 {
            cache
                .save(Some("s1"), ConversationTurn::new(&format!("q{i}"), "", "a"))
                .await;
        }

        let history = cache.history(Some("s1")).await;
        let questions: Vec<&str> = history.iter().map(|t| t.question.as_str()).collect();
        assert_eq!(questions, vec!["q1", "q2"]);
    }

    #[tokio::test]
    async fn missing_or_blank_session_uses_default() {
        let cache = SessionCache::new(5, 10);
        cache.save(None, ConversationTurn::new("q", "c", "a")).await;

        assert_eq!(cache.history(Some(DEFAULT_SESSION_ID)).await.len(), 1);
        assert_eq!(cache.history(Some("  ")).await.len(), 1);
        assert!(cache.history(Some("other")).await.is_empty());
        assert_eq!(cache.session_count().await, 1);

        cache.clear().await;
        assert_eq!(cache.session_count().await, 0);
    }

    #[tokio::test]
    async fn least_recently_used_session_is_evicted() {
        let cache = SessionCache::new(5, 2);
        cache.save(Some("a"), ConversationTurn::new("q1", "", "a1")).await;
        cache.save(Some("b"), ConversationTurn::new("q2", "", "a2")).await;
        cache.save(Some("a"), ConversationTurn::new("q3", "", "a3")).await;

        cache.save(Some("c"), ConversationTurn::new("q4", "", "a4")).await;

        assert_eq!(cache.session_count().await, 2);
        assert!(cache.history(Some("b")).await.is_empty());
        assert_eq!(cache.history(Some("a")).await.len(), 2);
        assert_eq!(cache.history(Some("c")).await.len(), 1);
    }

    #[tokio::test]
    async fn many_client_sessions_stay_bounded() {
        let cache = SessionCache::new(3, 50);
        for i in 0..500 {
            cache
                .save(Some(&format!("client-{i}")), ConversationTurn::new("q", "", "a"))
                .await;
        }

        assert_eq!(cache.session_count().await, 50);
        assert_eq!(cache.history(Some("client-499")).await.len(), 1);
        assert!(cache.history(Some("client-0")).await.is_empty());
    }

    #[test]
    fn zero_limits_keep_one() {
        let cache = SessionCache::new(0, 0);
        assert_eq!(cache.max_turns(), 1);
        assert_eq!(cache.max_sessions, 1);
    }

    #[test]
    fn formatted_history_lists_turns() {
        let turns = vec![
            ConversationTurn::new("How many vendors?", "4 vendors", "4"),
            ConversationTurn::new("Which one underpaid?", "Vendor 4", "Vendor 4"),
        ];
        let text = format_history(&turns);

        assert!(text.contains("Question: How many vendors?\nContext: 4 vendors\nAnswer: 4"));
        assert_eq!(text.matches("Question:").count(), 2);
    }
}
