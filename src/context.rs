// consentry/src/context.rs

use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::{
    message::{ConversationTurn, Role, TurnPayload, WireMessage},
    tokens::TokenEncoding,
};

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct WindowStats {
    pub token_count: usize,
    pub max_context: i64,
    pub total_sent: usize,
    pub total_received: usize,
    pub turns: usize,
}

/// Ordered, token-accounted history. The system turn is pinned at index 0.
pub struct ContextWindow {
    turns: Vec<ConversationTurn>,
    token_count: usize,
    max_context: i64,
    total_sent: usize,
    total_received: usize,
    encoding: Arc<dyn TokenEncoding>,
}

impl ContextWindow {
    pub fn new(system_prompt: impl Into<String>, max_context: i64, encoding: Arc<dyn TokenEncoding>) -> Self {
        let system = ConversationTurn::new(TurnPayload::System(system_prompt.into()), encoding.as_ref());
        Self {
            token_count: system.tokens,
            turns: vec![system],
            max_context,
            total_sent: 0,
            total_received: 0,
            encoding,
        }
    }

    pub fn add_turns(&mut self, payloads: impl IntoIterator<Item = TurnPayload>) {
        for payload in payloads {
            let turn = ConversationTurn::new(payload, self.encoding.as_ref());
            self.token_count += turn.tokens;
            if turn.role == Role::Assistant { self.total_received += turn.tokens; }
            self.turns.push(turn);
        }
        self.prune();
    }

    fn prune(&mut self) {
        if self.max_context <= 0 { return; }
        let budget = self.max_context as usize;
        while self.token_count > budget && self.turns.len() > 1 {
            let evicted = self.turns.remove(1);
            self.token_count -= evicted.tokens;
            debug!(role = evicted.role.as_str(), tokens = evicted.tokens, remaining = self.token_count, "evicted turn");
        }
    }

    /// Ordered wire messages. With `mark_sent`, the whole window is charged to `total_sent`.
    pub fn serialize_for_request(&mut self, mark_sent: bool) -> Vec<WireMessage> {
        if mark_sent { self.total_sent += self.token_count; }
        self.turns.iter().map(ConversationTurn::wire).collect()
    }

    pub fn turns(&self) -> &[ConversationTurn] { &self.turns }
    pub fn token_count(&self) -> usize { self.token_count }
    pub fn encoding(&self) -> &dyn TokenEncoding { self.encoding.as_ref() }

    pub fn set_max_context(&mut self, max_context: i64) {
        self.max_context = max_context;
        self.prune();
    }

    pub fn stats(&self) -> WindowStats {
        WindowStats {
            token_count: self.token_count,
            max_context: self.max_context,
            total_sent: self.total_sent,
            total_received: self.total_received,
            turns: self.turns.len(),
        }
    }

    /// `role: content` lines for every turn after the system prompt.
    pub fn to_transcript(&self) -> String {
        self.turns[1..].iter().map(|t| format!("{}: {}", t.role.as_str(), t.content)).collect::<Vec<_>>().join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        message::{AssistantResponse, PendingEntry, UserPayload},
        testutil::WordEncoding,
    };

    fn user(text: &str) -> TurnPayload {
        TurnPayload::User(UserPayload { responses: vec![PendingEntry::Comment(text.into())] })
    }

    fn assistant(text: &str) -> TurnPayload {
        TurnPayload::Assistant(AssistantResponse { comment: text.into(), tasks: None, operations: vec![] })
    }

    #[test]
    fn system_turn_is_first() {
        let w = ContextWindow::new("system prompt here", -1, Arc::new(WordEncoding));
        assert_eq!(w.turns()[0].role, Role::System);
        assert_eq!(w.token_count(), 3);
    }

    #[test]
    fn token_count_is_sum_of_turns() {
        let mut w = ContextWindow::new("sys", -1, Arc::new(WordEncoding));
        w.add_turns([user("one two"), assistant("three")]);
        let sum: usize = w.turns().iter().map(|t| t.tokens).sum();
        assert_eq!(w.token_count(), sum);
    }

    #[test]
    fn sent_only_counts_when_marked() {
        let mut w = ContextWindow::new("sys", -1, Arc::new(WordEncoding));
        w.add_turns([user("hello")]);
        w.serialize_for_request(false);
        assert_eq!(w.stats().total_sent, 0);
        let msgs = w.serialize_for_request(true);
        assert_eq!(msgs.len(), 2);
        assert_eq!(w.stats().total_sent, w.token_count());
    }

    #[test]
    fn received_counts_assistant_turns_only() {
        let mut w = ContextWindow::new("sys", -1, Arc::new(WordEncoding));
        w.add_turns([user("a b c d"), assistant("x")]);
        let assistant_tokens = w.turns()[2].tokens;
        assert_eq!(w.stats().total_received, assistant_tokens);
    }

    #[test]
    fn pruning_evicts_oldest_but_keeps_system() {
        let mut w = ContextWindow::new("sys", -1, Arc::new(WordEncoding));
        for i in 0..10 { w.add_turns([user(&format!("message number {i}"))]); }
        let budget = w.turns()[0].tokens + 2 * w.turns()[1].tokens;
        w.set_max_context(budget as i64);
        assert_eq!(w.turns()[0].role, Role::System);
        assert!(w.token_count() <= budget);
        assert_eq!(w.turns().len(), 3);
        assert!(w.turns()[2].content.contains("message number 9"));
    }

    #[test]
    fn oversized_system_prompt_is_never_evicted() {
        let mut w = ContextWindow::new("a very long system prompt", 1, Arc::new(WordEncoding));
        w.add_turns([user("hi")]);
        assert_eq!(w.turns().len(), 1);
        assert_eq!(w.turns()[0].role, Role::System);
    }
}
