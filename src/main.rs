// consentry/src/main.rs

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use consentry::{
    config::{ConfigLayer, ConfigManager, PluginConfig},
    conversation::{Boundaries, Conversation, SharedState},
    engine::Engine,
    error::{ContractError, EngineError},
    input::{self, InputRouter},
    logging,
    pending::PendingResultQueue,
    presenter::{Presenter, TerminalPresenter},
    shell::PersistentShell,
    slash::SlashRegistry,
    tokens,
    transport::ScriptedTransport,
};
use std::{fs, path::{Path, PathBuf}, process::ExitCode, sync::Arc};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const SYSTEM_PROMPT: &str = "You operate on the user's machine by requesting operations. \
Every operation is shown to the user and runs only with their consent. \
Answer with a single JSON object that matches the response schema: a comment for the user, \
an optional task plan, and the operations to run in order. Results arrive in the next user message.";

#[derive(Parser)]
#[command(name = "consentry", version, about = "Consent-gated operations for LLM agents")]
struct Cli {
    #[command(flatten)]
    flags: Flags,
    #[command(subcommand)]
    cmd: Cmd,
}

/// Flags applied as the runtime configuration overlay.
#[derive(Args)]
struct Flags {
    /// Workspace root (defaults to the current directory)
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,
    /// Remove the command operation type
    #[arg(long, global = true)]
    no_commands: bool,
    /// Send command output without asking
    #[arg(long, global = true)]
    auto_send: bool,
    /// Token budget for the context window; <= 0 disables pruning
    #[arg(long, global = true, allow_hyphen_values = true)]
    max_context: Option<i64>,
    /// Tokenizer name (cl100k_base, o200k_base, ...) or a model name
    #[arg(long, global = true)]
    encoder: Option<String>,
    /// Enable a plugin by name; repeatable
    #[arg(long = "plugin", global = true)]
    plugins: Vec<String>,
    /// Regex of commands that run without asking; repeatable
    #[arg(long = "auto-execute", global = true)]
    auto_execute: Vec<String>,
    /// Glob of paths that are touched without asking; repeatable
    #[arg(long = "auto-allow", global = true)]
    auto_allow: Vec<String>,
    #[arg(short, long, global = true)]
    verbose: bool,
}

impl Flags {
    fn to_layer(&self) -> ConfigLayer {
        let flag = |set: bool| set.then_some(true);
        let list = |v: &Vec<String>| (!v.is_empty()).then(|| v.clone());
        ConfigLayer {
            plugins: self
                .plugins
                .iter()
                .map(|name| (name.clone(), PluginConfig::default()))
                .collect(),
            no_commands: flag(self.no_commands),
            auto_send: flag(self.auto_send),
            verbose: flag(self.verbose),
            max_context: self.max_context,
            encoder: self.encoder.clone(),
            auto_execute_commands: list(&self.auto_execute),
            auto_allowed_paths: list(&self.auto_allow),
            ..Default::default()
        }
    }
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the response schema for the active configuration
    Schema,
    /// Check an assistant response JSON file against the active schema
    Validate { file: PathBuf },
    /// Run a conversation whose assistant turns are replayed from a file
    Replay {
        /// JSON array or JSON lines of assistant responses
        file: PathBuf,
        /// First user message; without it the session waits for input
        prompt: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.flags.verbose);

    let workspace = match &cli.flags.workspace {
        Some(p) => p.clone(),
        None => std::env::current_dir().context("current directory")?,
    };
    let config = ConfigManager::load(&workspace).context("load configuration")?;
    config.apply_runtime_overlay(cli.flags.to_layer())?;
    let mut engine = Engine::new();

    match cli.cmd {
        Cmd::Schema => {
            let contract = engine.refresh(&config.get())?;
            println!("{}", serde_json::to_string_pretty(contract.schema())?);
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Validate { file } => validate(&mut engine, &config, &file),
        Cmd::Replay { file, prompt } => replay(engine, config, workspace, &file, prompt).await.map(|()| ExitCode::SUCCESS),
    }
}

/// Failure exit code when the response does not match; errors are for files that cannot be read.
fn validate(engine: &mut Engine, config: &ConfigManager, file: &Path) -> Result<ExitCode> {
    let contract = engine.refresh(&config.get())?;
    let text = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text).with_context(|| format!("parse {}", file.display()))?;
    match contract.parse_response(&value, engine.registry()) {
        Ok(response) => {
            println!("OK: {} ({} operations)", file.display(), response.operations.len());
            Ok(ExitCode::SUCCESS)
        }
        Err(ContractError::InvalidResponse(violations)) => {
            eprintln!("Invalid: {}", file.display());
            for v in violations { eprintln!("- {v}"); }
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            eprintln!("Invalid: {}\n- {e}", file.display());
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn replay(mut engine: Engine, config: ConfigManager, workspace: PathBuf, file: &Path, prompt: Option<String>) -> Result<()> {
    let cfg = config.get();
    let contract = engine.refresh(&cfg)?;
    let encoding = tokens::encoding_for(&cfg.encoder)?;
    let system_prompt = format!("{SYSTEM_PROMPT}\n\nAvailable operations:\n{}", contract.describe());
    info!(encoder = encoding.name(), types = contract.tags().len(), "starting replay session");

    let state = Arc::new(SharedState::new(system_prompt, cfg.max_context, encoding));
    let queue = Arc::new(PendingResultQueue::new());
    let router = Arc::new(InputRouter::new(queue.clone()));
    let ui: Arc<dyn Presenter> = Arc::new(TerminalPresenter::new(router.clone()));
    let cancel = CancellationToken::new();

    let slash = Arc::new(SlashRegistry::standard(state.clone(), cancel.clone()));
    let _listener = input::spawn_listener(BufReader::new(tokio::io::stdin()), router.clone(), slash, ui.clone(), cancel.clone());
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() { cancel.cancel(); }
        });
    }
    {
        let mut changes = config.subscribe();
        tokio::spawn(async move {
            while let Ok(cfg) = changes.recv().await {
                debug!(hash = %cfg.hash(), "configuration changed; applied on the next model call");
            }
        });
    }

    let io = Boundaries {
        transport: Arc::new(ScriptedTransport::from_file(file)?),
        ui: ui.clone(),
        shell: Arc::new(PersistentShell::new(&workspace)),
    };
    let mut conversation = Conversation::new(engine, config, io, state, queue, &workspace)
        .with_cancel(cancel.clone())
        .with_input_closed(router.closed_token());
    let outcome = conversation.run(prompt).await;
    cancel.cancel();

    match outcome {
        Ok(()) => Ok(()),
        Err(EngineError::Interrupted) => {
            ui.display_text("Interrupted.");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
