// consentry/src/slash.rs

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::conversation::SharedState;

#[async_trait]
pub trait SlashCommand: Send + Sync {
    fn name(&self) -> &'static str;
    fn help(&self) -> &'static str;
    async fn run(&self, args: String) -> Result<String>;
}

#[derive(Clone, Default)]
pub struct SlashRegistry {
    cmds: Vec<Arc<dyn SlashCommand>>,
}

impl SlashRegistry {
    pub fn new() -> Self { Self { cmds: vec![] } }
    pub fn register(&mut self, cmd: Arc<dyn SlashCommand>) { self.cmds.push(cmd); }

    /// The standard session commands.
    pub fn standard(state: Arc<SharedState>, cancel: CancellationToken) -> Self {
        let mut r = Self::new();
        r.register(Arc::new(StatsCmd { state: state.clone() }));
        r.register(Arc::new(HistoryCmd { state: state.clone() }));
        r.register(Arc::new(PluginsCmd { state: state.clone() }));
        r.register(Arc::new(TasksCmd { state }));
        r.register(Arc::new(ExitCmd { cancel }));
        r
    }

    fn help(&self) -> String {
        let mut lines = vec!["/help - list commands".to_string()];
        lines.extend(self.cmds.iter().map(|c| format!("/{} - {}", c.name(), c.help())));
        lines.join("\n")
    }

    pub async fn dispatch(&self, input: &str) -> Result<String> {
        let input = input.trim();
        let Some(body) = input.strip_prefix('/') else { return Err(anyhow!("not a slash command")) };
        let parts: Vec<&str> = body.split_whitespace().collect();
        let Some(&name) = parts.first() else { return Err(anyhow!("empty command")) };
        if name == "help" { return Ok(self.help()); }
        for c in &self.cmds { if c.name() == name { return c.run(parts[1..].join(" ")).await; } }
        Err(anyhow!("unknown command: {} (try /help)", name))
    }
}

struct StatsCmd { state: Arc<SharedState> }

#[async_trait]
impl SlashCommand for StatsCmd {
    fn name(&self) -> &'static str { "stats" }
    fn help(&self) -> &'static str { "token usage of this session" }
    async fn run(&self, _args: String) -> Result<String> {
        let s = self.state.window.lock().stats();
        let budget = if s.max_context > 0 { s.max_context.to_string() } else { "unlimited".into() };
        Ok(format!(
            "context: {} / {} tokens in {} turns\nsent: {}  received: {}",
            s.token_count, budget, s.turns, s.total_sent, s.total_received
        ))
    }
}

struct HistoryCmd { state: Arc<SharedState> }

#[async_trait]
impl SlashCommand for HistoryCmd {
    fn name(&self) -> &'static str { "history" }
    fn help(&self) -> &'static str { "print the conversation so far" }
    async fn run(&self, _args: String) -> Result<String> {
        let t = self.state.window.lock().to_transcript();
        Ok(if t.is_empty() { "(empty)".into() } else { t })
    }
}

struct PluginsCmd { state: Arc<SharedState> }

#[async_trait]
impl SlashCommand for PluginsCmd {
    fn name(&self) -> &'static str { "plugins" }
    fn help(&self) -> &'static str { "list plugins and whether they are enabled" }
    async fn run(&self, _args: String) -> Result<String> {
        let plugins = self.state.plugins.read();
        Ok(plugins
            .iter()
            .map(|p| format!("[{}] {} - {}", if p.enabled { "on" } else { "off" }, p.name, p.description))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

struct TasksCmd { state: Arc<SharedState> }

#[async_trait]
impl SlashCommand for TasksCmd {
    fn name(&self) -> &'static str { "tasks" }
    fn help(&self) -> &'static str { "show the assistant's current plan" }
    async fn run(&self, _args: String) -> Result<String> {
        let tasks = self.state.tasks.read();
        if tasks.is_empty() { return Ok("(no plan yet)".into()); }
        Ok(format!("{}\n{}", tasks.lines().join("\n"), tasks.summary()))
    }
}

struct ExitCmd { cancel: CancellationToken }

#[async_trait]
impl SlashCommand for ExitCmd {
    fn name(&self) -> &'static str { "exit" }
    fn help(&self) -> &'static str { "end the session" }
    async fn run(&self, _args: String) -> Result<String> {
        self.cancel.cancel();
        Ok("Bye.".into())
    }
}
