// consentry/src/pending.rs

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;
use tracing::debug;

use crate::{
    context::ContextWindow,
    message::{PendingEntry, TurnPayload, UserPayload},
    operation::OperationResult,
};

/// Comments and results waiting to become the next user turn. Producers may
/// interleave freely; order of arrival is preserved.
#[derive(Default)]
pub struct PendingResultQueue {
    entries: Mutex<VecDeque<PendingEntry>>,
    notify: Notify,
}

impl PendingResultQueue {
    pub fn new() -> Self { Self::default() }

    pub fn push(&self, entry: PendingEntry) {
        self.entries.lock().push_back(entry);
        self.notify.notify_waiters();
    }

    pub fn push_comment(&self, text: impl Into<String>) { self.push(PendingEntry::Comment(text.into())); }
    pub fn push_result(&self, result: OperationResult) { self.push(PendingEntry::Result(result)); }

    pub fn len(&self) -> usize { self.entries.lock().len() }
    pub fn is_empty(&self) -> bool { self.entries.lock().is_empty() }
    pub fn has_comment(&self) -> bool { self.entries.lock().iter().any(PendingEntry::is_comment) }

    /// Drain everything queued into one user turn. False when nothing was queued.
    pub fn consolidate(&self, window: &mut ContextWindow) -> bool {
        let drained: Vec<PendingEntry> = self.entries.lock().drain(..).collect();
        if drained.is_empty() { return false; }
        debug!(entries = drained.len(), "consolidating pending entries");
        window.add_turns([TurnPayload::User(UserPayload { responses: drained })]);
        true
    }

    /// Wait until a comment is queued. Entries are inspected in place, so
    /// results queued meanwhile stay where they are for the next `consolidate`.
    pub async fn wait_for_comment(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.has_comment() { return; }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{message::Role, testutil::{req, WordEncoding}};
    use std::{sync::Arc, time::Duration};

    fn result(tag: &str) -> OperationResult { OperationResult::for_request(&req(tag, &[])).accepted(true) }

    #[test]
    fn consolidate_on_empty_queue_adds_nothing() {
        let q = PendingResultQueue::new();
        let mut w = ContextWindow::new("sys", -1, Arc::new(WordEncoding));
        assert!(!q.consolidate(&mut w));
        assert_eq!(w.turns().len(), 1);
    }

    #[test]
    fn consolidate_wraps_everything_into_one_user_turn() {
        let q = PendingResultQueue::new();
        q.push_result(result("read"));
        q.push_comment("thanks");
        q.push_result(result("write"));
        let mut w = ContextWindow::new("sys", -1, Arc::new(WordEncoding));
        assert!(q.consolidate(&mut w));
        assert!(q.is_empty());
        assert_eq!(w.turns().len(), 2);
        assert_eq!(w.turns()[1].role, Role::User);
        let v: serde_json::Value = serde_json::from_str(&w.turns()[1].content).unwrap();
        assert_eq!(v["responses"][0]["title"], "read");
        assert_eq!(v["responses"][1]["comment"], "thanks");
        assert_eq!(v["responses"][2]["title"], "write");
    }

    #[tokio::test]
    async fn waiting_for_a_comment_loses_no_results() {
        let q = Arc::new(PendingResultQueue::new());
        q.push_result(result("read"));
        let producer = {
            let q = q.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                q.push_result(result("write"));
                tokio::time::sleep(Duration::from_millis(20)).await;
                q.push_comment("go on");
            })
        };
        tokio::time::timeout(Duration::from_secs(2), q.wait_for_comment()).await.unwrap();
        producer.await.unwrap();

        let mut w = ContextWindow::new("sys", -1, Arc::new(WordEncoding));
        assert!(q.consolidate(&mut w));
        let v: serde_json::Value = serde_json::from_str(&w.turns()[1].content).unwrap();
        let titles: Vec<_> = v["responses"].as_array().unwrap().iter().map(|e| e.get("title").cloned()).collect();
        assert_eq!(titles[0].as_ref().unwrap(), "read");
        assert_eq!(titles[1].as_ref().unwrap(), "write");
        assert_eq!(v["responses"][2]["comment"], "go on");
    }
}
