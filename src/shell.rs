// consentry/src/shell.rs

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use parking_lot::RwLock;
use std::{path::{Path, PathBuf}, process::Stdio, time::Duration};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command},
    sync::Mutex,
};
use tracing::{debug, warn};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when detached or timed out.
    pub status: Option<i32>,
    pub timed_out: bool,
}

impl ShellOutput {
    pub fn success(&self) -> bool { self.status == Some(0) }
}

#[async_trait]
pub trait Shell: Send + Sync {
    /// Run `command`, waiting at most `timeout` seconds. `timeout <= 0` detaches it.
    async fn run(&self, command: &str, timeout: f64) -> Result<ShellOutput>;
    /// Working directory after the last completed command.
    fn cwd(&self) -> PathBuf;
}

struct Proc {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr: BufReader<ChildStderr>,
}

/// One long-lived `bash`; state such as `cd` and exported variables carries
/// across commands. Commands are serialized.
pub struct PersistentShell {
    proc: Mutex<Option<Proc>>,
    cwd: RwLock<PathBuf>,
}

impl PersistentShell {
    pub fn new(start_dir: impl AsRef<Path>) -> Self {
        Self { proc: Mutex::new(None), cwd: RwLock::new(start_dir.as_ref().to_path_buf()) }
    }

    fn spawn(&self) -> Result<Proc> {
        let mut child = Command::new("bash")
            .args(["--noprofile", "--norc"])
            .current_dir(&*self.cwd.read())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("spawn bash")?;
        let stdin = child.stdin.take().context("bash stdin")?;
        let stdout = BufReader::new(child.stdout.take().context("bash stdout")?);
        let stderr = BufReader::new(child.stderr.take().context("bash stderr")?);
        debug!(pid = ?child.id(), "persistent shell started");
        Ok(Proc { child, stdin, stdout, stderr })
    }

    async fn run_detached(&self, command: &str) -> Result<ShellOutput> {
        let child = Command::new("bash")
            .arg("-c")
            .arg(command)
            .current_dir(&*self.cwd.read())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("spawn detached command")?;
        debug!(pid = ?child.id(), "command detached");
        Ok(ShellOutput::default())
    }
}

/// Read lines into `buf` until one starts with `marker`; returns that line.
async fn read_until_marker<R: AsyncBufRead + Unpin>(r: &mut R, marker: &str, buf: &mut String) -> Result<String> {
    let mut line = Vec::new();
    loop {
        line.clear();
        if r.read_until(b'\n', &mut line).await? == 0 {
            bail!("shell exited unexpectedly");
        }
        let text = String::from_utf8_lossy(&line);
        if let Some(rest) = text.strip_prefix(marker) {
            // the marker is preceded by a newline of its own
            if buf.ends_with('\n') { buf.pop(); }
            return Ok(rest.trim().to_string());
        }
        buf.push_str(&text);
    }
}

#[async_trait]
impl Shell for PersistentShell {
    async fn run(&self, command: &str, timeout: f64) -> Result<ShellOutput> {
        if timeout <= 0.0 { return self.run_detached(command).await; }
        let limit = Duration::try_from_secs_f64(timeout).with_context(|| format!("invalid timeout {timeout}"))?;

        let mut guard = self.proc.lock().await;
        if guard.is_none() { *guard = Some(self.spawn()?); }
        let Some(p) = guard.as_mut() else { bail!("shell unavailable") };

        let marker = format!("__CONSENTRY_{}__", uuid::Uuid::new_v4().simple());
        let script = format!(
            "eval \"$(printf '%s' '{}' | base64 -d)\" </dev/null\n__s=$?; printf '\\n{m} %d %s\\n' \"$__s\" \"$PWD\"; printf '\\n{m}\\n' >&2\n",
            B64.encode(command),
            m = marker,
        );
        p.stdin.write_all(script.as_bytes()).await.context("write to shell")?;
        p.stdin.flush().await?;

        let (mut out, mut err) = (String::new(), String::new());
        let waited = tokio::time::timeout(limit, async {
            let (o, e) = tokio::join!(
                read_until_marker(&mut p.stdout, &marker, &mut out),
                read_until_marker(&mut p.stderr, &marker, &mut err),
            );
            e?;
            o
        })
        .await;

        match waited {
            Ok(Ok(tail)) => {
                let (code, pwd) = tail.split_once(' ').unwrap_or((tail.as_str(), ""));
                if !pwd.is_empty() { *self.cwd.write() = PathBuf::from(pwd); }
                Ok(ShellOutput { stdout: out, stderr: err, status: code.parse().ok(), timed_out: false })
            }
            Ok(Err(e)) => {
                *guard = None;
                Err(e)
            }
            Err(_) => {
                warn!(timeout, "command timed out; restarting shell");
                if let Some(mut p) = guard.take() { let _ = p.child.start_kill(); }
                Ok(ShellOutput { stdout: out, stderr: err, status: None, timed_out: true })
            }
        }
    }

    fn cwd(&self) -> PathBuf { self.cwd.read().clone() }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn state_persists_between_commands() {
        let dir = tempfile::tempdir().unwrap();
        let sh = PersistentShell::new(dir.path());
        let o = sh.run("mkdir sub && cd sub && export X=42", 5.0).await.unwrap();
        assert!(o.success());
        let o = sh.run("echo $X", 5.0).await.unwrap();
        assert_eq!(o.stdout, "42\n");
        assert!(sh.cwd().ends_with("sub"));
    }

    #[tokio::test]
    async fn captures_stderr_and_status() {
        let sh = PersistentShell::new(std::env::temp_dir());
        let o = sh.run("printf oops >&2; false", 5.0).await.unwrap();
        assert_eq!(o.stderr, "oops");
        assert_eq!(o.status, Some(1));
    }

    #[tokio::test]
    async fn timeout_returns_partial_output_and_recovers() {
        let sh = PersistentShell::new(std::env::temp_dir());
        let o = sh.run("echo started; sleep 5", 0.5).await.unwrap();
        assert!(o.timed_out);
        assert_eq!(o.stdout, "started\n");
        let o = sh.run("echo again", 5.0).await.unwrap();
        assert_eq!(o.stdout, "again\n");
    }

    #[tokio::test]
    async fn unrepresentable_timeouts_are_errors() {
        let sh = PersistentShell::new(std::env::temp_dir());
        for t in [f64::INFINITY, f64::NAN, 1e20] {
            assert!(sh.run("true", t).await.is_err(), "{t}");
        }
        assert!(sh.run("true", 5.0).await.unwrap().success());
    }
}
