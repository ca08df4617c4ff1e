// consentry/src/presenter.rs

//! Presentation boundary. Everything user-facing goes through [`Presenter`];
//! [`TerminalPresenter`] is the plain stdout implementation.

use async_trait::async_trait;
use crossterm::style::Stylize;
use std::{
    future::Future,
    io::Write,
    sync::{atomic::{AtomicUsize, Ordering}, Arc},
    time::Duration,
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use unicode_width::UnicodeWidthStr;

use crate::input::InputRouter;

#[async_trait]
pub trait Presenter: Send + Sync {
    fn display_text(&self, text: &str);
    fn display_error(&self, text: &str);
    fn display_warning(&self, text: &str);
    fn display_block(&self, text: &str, title: &str);
    async fn ask_yes_no(&self, question: &str) -> bool;
    /// Index into `options`; 0 when `options` is empty.
    async fn ask_choice(&self, question: &str, options: &[&str]) -> usize;
    fn enter_group(&self, title: &str);
    fn leave_group(&self);
    fn start_animation(&self, status: &str);
    fn stop_animation(&self);
}

struct GroupGuard<'a>(&'a dyn Presenter);

impl Drop for GroupGuard<'_> {
    fn drop(&mut self) { self.0.leave_group(); }
}

struct AnimationGuard<'a>(&'a dyn Presenter);

impl Drop for AnimationGuard<'_> {
    fn drop(&mut self) { self.0.stop_animation(); }
}

/// Run `fut` inside a titled group; the group is left even if `fut` is dropped early.
pub async fn with_group<F: Future>(ui: &dyn Presenter, title: &str, fut: F) -> F::Output {
    ui.enter_group(title);
    let _guard = GroupGuard(ui);
    fut.await
}

pub async fn with_animation<F: Future>(ui: &dyn Presenter, status: &str, fut: F) -> F::Output {
    ui.start_animation(status);
    let _guard = AnimationGuard(ui);
    fut.await
}

const SPINNER: [&str; 8] = ["|", "/", "-", "\\", "|", "/", "-", "\\"];

pub struct TerminalPresenter {
    input: Arc<InputRouter>,
    depth: AtomicUsize,
    spinner: Mutex<Option<JoinHandle<()>>>,
}

impl TerminalPresenter {
    pub fn new(input: Arc<InputRouter>) -> Self {
        Self { input, depth: AtomicUsize::new(0), spinner: Mutex::new(None) }
    }

    fn indent(&self) -> String { "  ".repeat(self.depth.load(Ordering::Relaxed)) }

    fn print_lines(&self, text: &str) {
        let pad = self.indent();
        let mut out = std::io::stdout().lock();
        for line in text.lines() {
            let _ = writeln!(out, "{pad}{line}");
        }
        let _ = out.flush();
    }

    async fn ask_line(&self, prompt: &str) -> Option<String> {
        self.stop_animation();
        print!("{}{} ", self.indent(), prompt.bold());
        let _ = std::io::stdout().flush();
        self.input.ask().await
    }
}

#[async_trait]
impl Presenter for TerminalPresenter {
    fn display_text(&self, text: &str) { self.print_lines(text); }

    fn display_error(&self, text: &str) {
        self.print_lines(&format!("{} {}", "error:".red().bold(), text));
    }

    fn display_warning(&self, text: &str) {
        self.print_lines(&format!("{} {}", "warning:".yellow().bold(), text));
    }

    fn display_block(&self, text: &str, title: &str) {
        let width = text.lines().map(UnicodeWidthStr::width).max().unwrap_or(0).max(title.width() + 4).min(100);
        let rule = "-".repeat(width.saturating_sub(title.width() + 3));
        self.print_lines(&format!("{} {} {}", "--".dark_grey(), title.cyan(), rule.dark_grey()));
        self.print_lines(text);
        self.print_lines(&"-".repeat(width).dark_grey().to_string());
    }

    async fn ask_yes_no(&self, question: &str) -> bool {
        match self.ask_line(&format!("{question} [y/N]")).await {
            Some(ans) => matches!(ans.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            None => false,
        }
    }

    async fn ask_choice(&self, question: &str, options: &[&str]) -> usize {
        if options.is_empty() { return 0; }
        let last = options.len() - 1;
        let mut menu = String::from(question);
        for (i, o) in options.iter().enumerate() {
            menu.push_str(&format!("\n  {}. {}", i + 1, o));
        }
        self.print_lines(&menu);
        loop {
            let Some(ans) = self.ask_line(&format!("Choose 1-{}:", options.len())).await else { return last };
            let ans = ans.trim();
            if let Ok(n) = ans.parse::<usize>() {
                if (1..=options.len()).contains(&n) { return n - 1; }
            }
            let lower = ans.to_ascii_lowercase();
            if !lower.is_empty() {
                if let Some(i) = options.iter().position(|o| o.to_ascii_lowercase().starts_with(&lower)) {
                    return i;
                }
            }
            self.display_warning("invalid choice");
        }
    }

    fn enter_group(&self, title: &str) {
        self.print_lines(&format!("{}", title.bold()));
        self.depth.fetch_add(1, Ordering::Relaxed);
    }

    fn leave_group(&self) {
        let _ = self.depth.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| Some(d.saturating_sub(1)));
    }

    fn start_animation(&self, status: &str) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else { return };
        let status = status.to_string();
        let task = handle.spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(120));
            for frame in SPINNER.iter().cycle() {
                tick.tick().await;
                eprint!("\r{} {}", frame, status);
            }
        });
        if let Some(prev) = self.spinner.lock().replace(task) { prev.abort(); }
    }

    fn stop_animation(&self) {
        if let Some(task) = self.spinner.lock().take() {
            task.abort();
            eprint!("\r\x1b[2K");
        }
    }
}
