use async_trait::async_trait;
use regex::RegexSet;
use std::{io::ErrorKind, process::Stdio, sync::{Arc, LazyLock}};
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::debug;

use super::{HookSpec, Plugin};
use crate::{
    error::HookError,
    hooks::{Hook, HookEvent, Phase},
    operation::OperationContext,
};

pub const NAME: &str = "shellcheck";

static DANGEROUS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"\brm\s+(-[a-zA-Z]*[rR][a-zA-Z]*f[a-zA-Z]*|-[a-zA-Z]*f[a-zA-Z]*[rR][a-zA-Z]*)\s+/\*?(\s|$)",
        r"\bmkfs(\.\w+)?\b",
        r"\bdd\b.*\bof=/dev/",
        r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
        r"\bchmod\s+-R\s+777\s+/(\s|$)",
        r">\s*/dev/sd[a-z]",
    ])
    .unwrap_or_else(|_| RegexSet::empty())
});

pub fn is_obviously_dangerous(command: &str) -> bool { DANGEROUS.is_match(command) }

pub struct ShellcheckHook;

impl ShellcheckHook {
    fn severity(ctx: &OperationContext<'_>) -> String {
        ctx.config
            .plugins
            .get(NAME)
            .and_then(|p| p.options.get("severity"))
            .and_then(|v| v.as_str())
            .unwrap_or("error")
            .to_string()
    }

    /// Findings from the `shellcheck` binary; `None` when it is not installed.
    async fn lint(command: &str, severity: &str) -> Result<Option<String>, HookError> {
        let spawned = Command::new("shellcheck")
            .args(["--shell=bash", "--format=gcc", &format!("--severity={severity}"), "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let mut child = match spawned {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("shellcheck binary not found; skipping lint");
                return Ok(None);
            }
            Err(e) => return Err(HookError::validation(format!("shellcheck failed to start: {e}"))),
        };
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(command.as_bytes())
                .await
                .map_err(|e| HookError::validation(format!("shellcheck stdin: {e}")))?;
        }
        let out = child
            .wait_with_output()
            .await
            .map_err(|e| HookError::validation(format!("shellcheck failed: {e}")))?;
        if out.status.success() { return Ok(None); }
        let findings: Vec<String> = String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(|l| l.trim_start_matches("-:").to_string())
            .collect();
        Ok(Some(findings.join("\n")))
    }
}

#[async_trait]
impl Hook for ShellcheckHook {
    fn name(&self) -> &str { NAME }

    async fn on_event(&self, ctx: &OperationContext<'_>, event: &HookEvent<'_>) -> Result<(), HookError> {
        let HookEvent::Before { request } = event else { return Ok(()) };
        let command = request.str_field("command").unwrap_or_default();
        if is_obviously_dangerous(command) {
            return Err(HookError::security(format!("Command contains dangerous pattern: {command}")));
        }
        if let Some(findings) = Self::lint(command, &Self::severity(ctx)).await? {
            return Err(HookError::validation(format!("Shellcheck validation failed:\n{findings}")));
        }
        Ok(())
    }
}

pub fn plugin() -> Plugin {
    Plugin {
        name: NAME,
        description: "Blocks obviously destructive commands and lints the rest with shellcheck",
        operation_types: vec![],
        hooks: vec![HookSpec { phase: Phase::Before, scope: vec!["command"], hook: Arc::new(ShellcheckHook) }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_destructive_patterns() {
        for cmd in ["rm -rf /", "rm -rf /*", "rm -fr /", "mkfs.ext4 /dev/sda1", ":(){ :|:& };:", ":(){:|:&};:", "dd if=/dev/zero of=/dev/sda"] {
            assert!(is_obviously_dangerous(cmd), "{cmd}");
        }
    }

    #[test]
    fn ignores_ordinary_commands() {
        for cmd in ["ls -la", "echo hello world", "mkdir test_directory", "rm file.txt", "rm -rf ./build", "rm -rf /tmp/x"] {
            assert!(!is_obviously_dangerous(cmd), "{cmd}");
        }
    }
}
