// consentry/src/input.rs

//! Routes user input lines: answers to a pending question first, then slash
//! commands, everything else becomes a comment for the model.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{io::{AsyncBufRead, AsyncBufReadExt}, sync::oneshot, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{pending::PendingResultQueue, presenter::Presenter, slash::SlashRegistry};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Routed {
    Answered,
    Slash(String),
    Comment,
    Ignored,
}

pub struct InputRouter {
    question: Mutex<Option<oneshot::Sender<String>>>,
    closed: CancellationToken,
    queue: Arc<PendingResultQueue>,
}

impl InputRouter {
    pub fn new(queue: Arc<PendingResultQueue>) -> Self {
        Self { question: Mutex::new(None), closed: CancellationToken::new(), queue }
    }

    /// Wait for the next line. `None` once input is closed.
    pub async fn ask(&self) -> Option<String> {
        let (tx, rx) = oneshot::channel();
        *self.question.lock() = Some(tx);
        if self.closed.is_cancelled() {
            self.question.lock().take();
            return None;
        }
        rx.await.ok()
    }

    pub fn route(&self, line: &str) -> Routed {
        if let Some(tx) = self.question.lock().take() {
            if tx.send(line.to_string()).is_ok() { return Routed::Answered; }
        }
        let line = line.trim();
        if line.is_empty() { return Routed::Ignored; }
        if line.starts_with('/') { return Routed::Slash(line.to_string()); }
        self.queue.push_comment(line);
        Routed::Comment
    }

    pub fn close(&self) {
        self.closed.cancel();
        self.question.lock().take();
    }

    pub fn is_closed(&self) -> bool { self.closed.is_cancelled() }

    /// Cancelled when input reaches EOF.
    pub fn closed_token(&self) -> CancellationToken { self.closed.clone() }
}

/// Read lines until EOF or cancellation, routing each one.
pub fn spawn_listener<R>(
    reader: R,
    router: Arc<InputRouter>,
    slash: Arc<SlashRegistry>,
    ui: Arc<dyn Presenter>,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = lines.next_line() => next,
            };
            let line = match next {
                Ok(Some(line)) => line,
                Ok(None) | Err(_) => break,
            };
            if let Routed::Slash(cmd) = router.route(&line) {
                match slash.dispatch(&cmd).await {
                    Ok(out) if !out.is_empty() => ui.display_text(&out),
                    Ok(_) => {}
                    Err(e) => ui.display_error(&format!("{e:#}")),
                }
            }
        }
        debug!("input listener stopped");
        router.close();
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_question_takes_the_next_line() {
        let q = Arc::new(PendingResultQueue::new());
        let r = Arc::new(InputRouter::new(q.clone()));
        let asker = {
            let r = r.clone();
            tokio::spawn(async move { r.ask().await })
        };
        while r.question.lock().is_none() { tokio::task::yield_now().await; }
        assert_eq!(r.route("y"), Routed::Answered);
        assert_eq!(asker.await.unwrap().as_deref(), Some("y"));
        assert!(q.is_empty());
    }

    #[test]
    fn unsolicited_lines_become_comments_or_slash_commands() {
        let q = Arc::new(PendingResultQueue::new());
        let r = InputRouter::new(q.clone());
        assert_eq!(r.route("  fix the test  "), Routed::Comment);
        assert_eq!(r.route("/stats"), Routed::Slash("/stats".into()));
        assert_eq!(r.route("   "), Routed::Ignored);
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn closed_input_answers_none() {
        let r = InputRouter::new(Arc::new(PendingResultQueue::new()));
        r.close();
        assert!(r.ask().await.is_none());
    }
}
