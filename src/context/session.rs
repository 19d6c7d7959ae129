//! Per-user conversation memory used to resolve follow-up questions.
//!
//! Conversations idle for longer than the TTL are ignored by lookups and
//! removed by [`ConversationStore::prune`].

use super::types::{BusinessContextProfile, BusinessEntity};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub question: String,
    pub entities: Vec<BusinessEntity>,
    pub asked_at: DateTime<Utc>,
}

impl From<&BusinessContextProfile> for ConversationTurn {
    fn from(profile: &BusinessContextProfile) -> Self {
        Self {
            question: profile.original_question.clone(),
            entities: profile.entities.clone(),
            asked_at: profile.analyzed_at,
        }
    }
}

struct Conversation {
    turns: VecDeque<ConversationTurn>,
    last_active: Instant,
}

pub struct ConversationStore {
    conversations: Mutex<HashMap<String, Conversation>>,
    max_turns: usize,
    ttl: Duration,
}

impl ConversationStore {
    pub fn new(max_turns: usize, ttl: Duration) -> Self {
        Self {
            conversations: Mutex::new(HashMap::new()),
            max_turns: max_turns.max(1),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Conversation>> {
        self.conversations.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, user_id: &str, profile: &BusinessContextProfile) {
        let now = Instant::now();
        let mut conversations = self.lock();
        let conversation = conversations
            .entry(user_id.to_string())
            .or_insert_with(|| Conversation {
                turns: VecDeque::new(),
                last_active: now,
            });
        if now.duration_since(conversation.last_active) > self.ttl {
            conversation.turns.clear();
        }
        conversation.last_active = now;
        conversation.turns.push_back(ConversationTurn::from(profile));
        while conversation.turns.len() > self.max_turns {
            conversation.turns.pop_front();
        }
    }

    /// Most recent turn of a conversation that is still live.
    pub fn last_turn(&self, user_id: &str) -> Option<ConversationTurn> {
        let now = Instant::now();
        self.lock()
            .get(user_id)
            .filter(|c| now.duration_since(c.last_active) <= self.ttl)
            .and_then(|c| c.turns.back().cloned())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop conversations idle for longer than the TTL. Returns how many went.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let mut conversations = self.lock();
        let before = conversations.len();
        conversations.retain(|_, c| now.duration_since(c.last_active) <= self.ttl);
        before - conversations.len()
    }
}
