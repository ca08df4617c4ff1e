// consentry/src/conversation.rs

//! The conversation loop: send the window and contract to the model, run the
//! requested operations in order, fold the results back, repeat until the
//! model stops asking for operations, then wait for the user.

use parking_lot::{Mutex, RwLock};
use std::{
    path::PathBuf,
    sync::{atomic::{AtomicBool, Ordering}, Arc},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::ConfigManager,
    context::ContextWindow,
    engine::{Engine, PluginSummary},
    error::{EngineError, TransportError},
    message::{AssistantResponse, TurnPayload},
    operation::OperationContext,
    pending::PendingResultQueue,
    presenter::{with_animation, Presenter},
    shell::Shell,
    tasks::TaskList,
    tokens::TokenEncoding,
    transport::{ModelParams, ModelTransport},
};

/// State visible to slash commands while the loop runs.
pub struct SharedState {
    pub window: Mutex<ContextWindow>,
    pub plugins: RwLock<Vec<PluginSummary>>,
    pub tasks: RwLock<TaskList>,
}

impl SharedState {
    pub fn new(system_prompt: impl Into<String>, max_context: i64, encoding: Arc<dyn TokenEncoding>) -> Self {
        Self {
            window: Mutex::new(ContextWindow::new(system_prompt, max_context, encoding)),
            plugins: RwLock::new(vec![]),
            tasks: RwLock::new(TaskList::default()),
        }
    }
}

/// At most one model call in flight. A second caller gets an error, not a wait.
#[derive(Default)]
pub struct SingleFlight(AtomicBool);

pub struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) { self.0.store(false, Ordering::Release); }
}

impl SingleFlight {
    pub fn try_acquire(&self) -> Result<FlightGuard<'_>, EngineError> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| FlightGuard(&self.0))
            .map_err(|_| EngineError::ModelBusy)
    }
}

/// The conversation's collaborators at the external boundaries.
#[derive(Clone)]
pub struct Boundaries {
    pub transport: Arc<dyn ModelTransport>,
    pub ui: Arc<dyn Presenter>,
    pub shell: Arc<dyn Shell>,
}

pub struct Conversation {
    engine: Engine,
    config: ConfigManager,
    io: Boundaries,
    state: Arc<SharedState>,
    queue: Arc<PendingResultQueue>,
    workspace: PathBuf,
    cancel: CancellationToken,
    input_closed: CancellationToken,
    flight: SingleFlight,
}

enum Exchange {
    Response(AssistantResponse),
    Finished,
}

impl Conversation {
    pub fn new(
        engine: Engine,
        config: ConfigManager,
        io: Boundaries,
        state: Arc<SharedState>,
        queue: Arc<PendingResultQueue>,
        workspace: impl Into<PathBuf>,
    ) -> Self {
        Self {
            engine,
            config,
            io,
            state,
            queue,
            workspace: workspace.into(),
            cancel: CancellationToken::new(),
            input_closed: CancellationToken::new(),
            flight: SingleFlight::default(),
        }
    }

    /// Cancelling `token` interrupts the loop.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self { self.cancel = token; self }

    /// Once `token` is cancelled, waiting for the user ends the session.
    pub fn with_input_closed(mut self, token: CancellationToken) -> Self { self.input_closed = token; self }

    pub fn state(&self) -> &Arc<SharedState> { &self.state }
    pub fn engine(&self) -> &Engine { &self.engine }

    /// Run until the transport has nothing more to say, input closes, or an
    /// unrecoverable error occurs.
    pub async fn run(&mut self, initial_prompt: Option<String>) -> Result<(), EngineError> {
        if let Some(p) = initial_prompt.filter(|p| !p.trim().is_empty()) {
            self.queue.push_comment(p.trim());
        }
        loop {
            if !self.wait_for_user().await? {
                info!("input closed; conversation over");
                return Ok(());
            }
            loop {
                let response = match self.exchange().await {
                    Ok(Exchange::Response(r)) => r,
                    Ok(Exchange::Finished) => return Ok(()),
                    Err(e) if e.is_recoverable() => {
                        if !self.retry_or_amend(&e).await? { return Ok(()); }
                        continue;
                    }
                    Err(e) => {
                        self.report(&e);
                        return Err(e);
                    }
                };
                let has_ops = !response.operations.is_empty();
                self.handle_response(response).await?;
                if !has_ops { break; }
            }
        }
    }

    /// True once a comment is queued; false if input closed first.
    async fn wait_for_user(&self) -> Result<bool, EngineError> {
        if self.queue.has_comment() { return Ok(true); }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EngineError::Interrupted),
            _ = self.queue.wait_for_comment() => Ok(true),
            _ = self.input_closed.cancelled() => Ok(self.queue.has_comment()),
        }
    }

    async fn exchange(&mut self) -> Result<Exchange, EngineError> {
        let config = self.config.get();
        let contract = self.engine.refresh(&config)?;
        *self.state.plugins.write() = self.engine.plugin_summaries(&config);

        let messages = {
            let mut window = self.state.window.lock();
            window.set_max_context(config.max_context);
            self.queue.consolidate(&mut window);
            window.serialize_for_request(true)
        };

        let _flight = self.flight.try_acquire()?;
        let params = ModelParams::from(&config.model);
        debug!(messages = messages.len(), "calling model");
        let call = self.io.transport.complete(&messages, &contract, &params);
        let raw = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(EngineError::Interrupted),
            raw = with_animation(self.io.ui.as_ref(), "Waiting for the assistant...", call) => raw,
        };
        let raw = match raw {
            Err(TransportError::Exhausted) => return Ok(Exchange::Finished),
            other => other?,
        };
        let response = contract.parse_response(&raw, self.engine.registry())?;
        info!(operations = response.operations.len(), "assistant responded");
        self.state.window.lock().add_turns([TurnPayload::Assistant(response.clone())]);
        Ok(Exchange::Response(response))
    }

    async fn handle_response(&self, response: AssistantResponse) -> Result<(), EngineError> {
        let ui = self.io.ui.as_ref();
        if !response.comment.is_empty() {
            ui.display_block(&response.comment, "Assistant");
        }
        if let Some(tasks) = response.tasks {
            if !tasks.is_empty() {
                ui.display_block(&tasks.lines().join("\n"), &format!("Plan ({})", tasks.summary()));
            }
            *self.state.tasks.write() = tasks;
        }

        let config = self.config.get();
        let ctx = OperationContext {
            config: &config,
            approvals: self.engine.approvals(),
            ui,
            shell: self.io.shell.as_ref(),
            workspace: &self.workspace,
        };
        for op in &response.operations {
            if self.cancel.is_cancelled() { return Err(EngineError::Interrupted); }
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(EngineError::Interrupted),
                r = self.engine.execute(op, &ctx) => r,
            };
            self.queue.push_result(result);
        }
        Ok(())
    }

    /// Offer to resend the same window or to add a message first.
    /// False when the user can no longer answer.
    async fn retry_or_amend(&self, e: &EngineError) -> Result<bool, EngineError> {
        warn!(error = %e, "model exchange failed");
        self.report(e);
        let ui = self.io.ui.as_ref();
        let choice = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(EngineError::Interrupted),
            c = ui.ask_choice("Retry this message?", &["Retry the same message", "Add new message"]) => c,
        };
        if choice == 1 {
            ui.display_text("Type your message:");
            return self.wait_for_user().await;
        }
        Ok(true)
    }

    fn report(&self, e: &EngineError) {
        let ui = self.io.ui.as_ref();
        ui.display_error(&e.to_string());
        if self.config.get().verbose {
            ui.display_block(&format!("{e:#?}"), "Details");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_flight_rejects_a_second_call() {
        let f = SingleFlight::default();
        let g = f.try_acquire().unwrap();
        assert!(matches!(f.try_acquire(), Err(EngineError::ModelBusy)));
        drop(g);
        assert!(f.try_acquire().is_ok());
    }
}
