// consentry/src/testutil.rs

//! Scripted stand-ins for the presenter, shell and tokenizer, shared by unit
//! and integration tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::{atomic::{AtomicBool, AtomicUsize, Ordering}, Arc},
};

use crate::{
    config::{ApprovalRules, Config},
    operation::{FieldsSchema, OperationContext, OperationRequest, OperationResult, OperationType},
    presenter::Presenter,
    shell::{Shell, ShellOutput},
    tokens::TokenEncoding,
};

/// Build a request without going through the contract.
pub fn req(tag: &str, fields: &[(&str, Value)]) -> Arc<OperationRequest> {
    let map: Map<String, Value> = fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
    Arc::new(OperationRequest::new(tag, "test", map))
}

/// One token per whitespace-separated word.
pub struct WordEncoding;

impl TokenEncoding for WordEncoding {
    fn name(&self) -> &str { "words" }
    fn count(&self, text: &str) -> usize { text.split_whitespace().count() }
}

/// A type that does nothing but count how often it ran.
pub struct StubType {
    tag: String,
    executions: AtomicUsize,
}

impl StubType {
    pub fn new(tag: &str) -> Self { Self { tag: tag.to_string(), executions: AtomicUsize::new(0) } }
    pub fn executions(&self) -> usize { self.executions.load(Ordering::SeqCst) }
}

#[async_trait]
impl OperationType for StubType {
    fn tag(&self) -> &str { &self.tag }
    fn description(&self) -> &str { "stub" }
    fn fields(&self) -> FieldsSchema { FieldsSchema::new().optional("value", json!({ "type": "string" })) }
    async fn display(&self, _req: &OperationRequest, _ctx: &OperationContext<'_>) {}

    async fn execute(&self, req: &Arc<OperationRequest>, _ctx: &OperationContext<'_>) -> OperationResult {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.base_result(req).accepted(true)
    }
}

/// Answers questions from a script and records what was shown. An empty
/// script declines: `false` for yes/no, the last option for choices.
#[derive(Default)]
pub struct ScriptedPresenter {
    yes_no: Mutex<VecDeque<bool>>,
    choices: Mutex<VecDeque<usize>>,
    output: Mutex<Vec<String>>,
    warnings: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
    questions: Mutex<Vec<String>>,
    depth: AtomicUsize,
    hold_choices: AtomicBool,
}

impl ScriptedPresenter {
    pub fn new() -> Self { Self::default() }
    pub fn push_yes_no(&self, answer: bool) { self.yes_no.lock().push_back(answer); }
    pub fn push_choice(&self, index: usize) { self.choices.lock().push_back(index); }
    pub fn output(&self) -> Vec<String> { self.output.lock().clone() }
    pub fn warnings(&self) -> Vec<String> { self.warnings.lock().clone() }
    pub fn errors(&self) -> Vec<String> { self.errors.lock().clone() }
    pub fn questions(&self) -> Vec<String> { self.questions.lock().clone() }
    pub fn depth(&self) -> usize { self.depth.load(Ordering::SeqCst) }
    /// From now on `ask_choice` never answers, like a user who walked away.
    pub fn hold_choices(&self) { self.hold_choices.store(true, Ordering::SeqCst); }
}

#[async_trait]
impl Presenter for ScriptedPresenter {
    fn display_text(&self, text: &str) { self.output.lock().push(text.to_string()); }
    fn display_error(&self, text: &str) { self.errors.lock().push(text.to_string()); }
    fn display_warning(&self, text: &str) { self.warnings.lock().push(text.to_string()); }
    fn display_block(&self, text: &str, title: &str) { self.output.lock().push(format!("[{title}]\n{text}")); }

    async fn ask_yes_no(&self, question: &str) -> bool {
        self.questions.lock().push(question.to_string());
        self.yes_no.lock().pop_front().unwrap_or(false)
    }

    async fn ask_choice(&self, question: &str, options: &[&str]) -> usize {
        self.questions.lock().push(question.to_string());
        if self.hold_choices.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let last = options.len().saturating_sub(1);
        self.choices.lock().pop_front().map_or(last, |i| i.min(last))
    }

    fn enter_group(&self, _title: &str) { self.depth.fetch_add(1, Ordering::SeqCst); }
    fn leave_group(&self) { self.depth.fetch_sub(1, Ordering::SeqCst); }
    fn start_animation(&self, _status: &str) {}
    fn stop_animation(&self) {}
}

/// Records commands and replays canned outputs; with nothing queued it
/// answers with an empty successful run.
pub struct RecordingShell {
    outputs: Mutex<VecDeque<Result<ShellOutput, String>>>,
    commands: Mutex<Vec<String>>,
    cwd: PathBuf,
}

impl RecordingShell {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { outputs: Mutex::new(VecDeque::new()), commands: Mutex::new(vec![]), cwd: cwd.into() }
    }
    pub fn respond(&self, out: ShellOutput) { self.outputs.lock().push_back(Ok(out)); }
    pub fn fail(&self, msg: &str) { self.outputs.lock().push_back(Err(msg.to_string())); }
    pub fn commands(&self) -> Vec<String> { self.commands.lock().clone() }
}

#[async_trait]
impl Shell for RecordingShell {
    async fn run(&self, command: &str, _timeout: f64) -> Result<ShellOutput> {
        self.commands.lock().push(command.to_string());
        match self.outputs.lock().pop_front() {
            Some(Ok(out)) => Ok(out),
            Some(Err(msg)) => Err(anyhow!(msg)),
            None => Ok(ShellOutput { status: Some(0), ..Default::default() }),
        }
    }

    fn cwd(&self) -> PathBuf { self.cwd.clone() }
}

/// Everything an [`OperationContext`] borrows, rooted in a temp workspace.
pub struct Harness {
    pub config: Config,
    pub approvals: ApprovalRules,
    pub ui: Arc<ScriptedPresenter>,
    pub shell: Arc<RecordingShell>,
    dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self { Self::with_config(Config::default()) }

    pub fn with_config(config: Config) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let approvals = ApprovalRules::from_config(&config).expect("approval rules");
        Self {
            shell: Arc::new(RecordingShell::new(dir.path())),
            ui: Arc::new(ScriptedPresenter::new()),
            config,
            approvals,
            dir,
        }
    }

    pub fn workspace(&self) -> &Path { self.dir.path() }

    pub fn ctx(&self) -> OperationContext<'_> {
        OperationContext {
            config: &self.config,
            approvals: &self.approvals,
            ui: self.ui.as_ref(),
            shell: self.shell.as_ref(),
            workspace: self.dir.path(),
        }
    }
}

impl Default for Harness {
    fn default() -> Self { Self::new() }
}
