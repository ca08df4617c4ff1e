use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::show_comment;
use crate::{
    operation::{normalize_str, FieldsSchema, OperationContext, OperationRequest, OperationResult, OperationType},
    presenter::with_animation,
};

pub const DEFAULT_TIMEOUT: f64 = 10.0;
/// Longer requests are clamped to this.
pub const MAX_TIMEOUT: f64 = 3600.0;
const HIDDEN: &str = "<hidden>";

pub struct CommandOp;

impl CommandOp {
    fn timeout(req: &OperationRequest) -> f64 { req.f64_field("timeout").unwrap_or(DEFAULT_TIMEOUT).min(MAX_TIMEOUT) }
}

#[async_trait]
impl OperationType for CommandOp {
    fn tag(&self) -> &str { "command" }

    fn description(&self) -> &str {
        "Run a shell command in a persistent shell (cd and exports carry over). timeout in seconds, default 10; <= 0 runs it detached with no output."
    }

    fn fields(&self) -> FieldsSchema {
        FieldsSchema::new()
            .required("command", json!({ "type": "string" }))
            .optional("timeout", json!({ "type": ["number", "null"] }))
    }

    fn validate(&self, fields: &mut Map<String, Value>) -> Result<(), String> {
        normalize_str(fields, "command", "Empty command")?;
        let timeout = match fields.get("timeout") {
            None | Some(Value::Null) => DEFAULT_TIMEOUT,
            Some(v) => v.as_f64().filter(|t| t.is_finite()).ok_or("Invalid timeout")?.min(MAX_TIMEOUT),
        };
        fields.insert("timeout".into(), json!(timeout));
        Ok(())
    }

    async fn display(&self, req: &OperationRequest, ctx: &OperationContext<'_>) {
        show_comment(req, ctx);
        let timeout = Self::timeout(req);
        let title = if timeout > 0.0 { format!("Command ({}, {timeout}s)", ctx.shell.cwd().display()) } else { "Command (detached)".into() };
        ctx.ui.display_block(req.str_field("command").unwrap_or_default(), &title);
    }

    async fn consent(&self, req: &OperationRequest, ctx: &OperationContext<'_>) -> bool {
        let command = req.str_field("command").unwrap_or_default();
        if ctx.approvals.command_allowed(command) {
            ctx.ui.display_text("Auto-executing: command matches auto_execute_commands");
            return true;
        }
        ctx.ui.ask_yes_no("Allow running command?").await
    }

    async fn execute(&self, req: &Arc<OperationRequest>, ctx: &OperationContext<'_>) -> OperationResult {
        let command = req.str_field("command").unwrap_or_default();
        let timeout = Self::timeout(req);

        let out = match with_animation(ctx.ui, "Executing...", ctx.shell.run(command, timeout)).await {
            Ok(out) => out,
            Err(e) => {
                let msg = format!("{e:#}");
                ctx.ui.display_error(&format!("Found error when running command: {msg}"));
                return self.build_error_result(req, &msg, true).with_field("success", false);
            }
        };

        if timeout <= 0.0 {
            ctx.ui.display_text("Detached process, no output");
            return self.base_result(req).accepted(true).with_field("success", true).with_field("detached", true);
        }

        if out.stdout.is_empty() {
            ctx.ui.display_text("No output");
        } else {
            ctx.ui.display_block(&out.stdout, "Output");
        }
        if !out.stderr.is_empty() {
            ctx.ui.display_block(&out.stderr, "Error");
        }
        if out.timed_out {
            ctx.ui.display_warning(&format!("Command timed out after {timeout}s; output is partial"));
        }

        let send = if ctx.config.auto_send {
            ctx.ui.display_text("Sending output since auto_send is set");
            true
        } else {
            ctx.ui.ask_yes_no("Allow sending output?").await
        };
        let (stdout, stderr) = if send { (out.stdout.clone(), out.stderr.clone()) } else { (HIDDEN.to_string(), String::new()) };

        self.base_result(req)
            .accepted(true)
            .with_field("success", out.success())
            .with_field("exit_code", out.status)
            .with_field("timed_out", out.timed_out)
            .with_field("cwd", ctx.shell.cwd().to_string_lossy().into_owned())
            .with_field("stdout", stdout)
            .with_field("stderr", stderr)
    }

    fn base_result(&self, req: &Arc<OperationRequest>) -> OperationResult {
        OperationResult::echoing(req, &["command"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, shell::ShellOutput, testutil::{req, Harness}};

    #[test]
    fn timeout_defaults_to_ten_seconds() {
        let mut f = Map::new();
        f.insert("command".into(), json!("  ls "));
        CommandOp.validate(&mut f).unwrap();
        assert_eq!(f["command"], "ls");
        assert_eq!(f["timeout"], json!(10.0));
        f.insert("command".into(), json!(" "));
        assert_eq!(CommandOp.validate(&mut f).unwrap_err(), "Empty command");
    }

    #[test]
    fn oversized_timeouts_are_clamped() {
        let mut f = Map::new();
        f.insert("command".into(), json!("sleep 1"));
        f.insert("timeout".into(), json!(1e20));
        CommandOp.validate(&mut f).unwrap();
        assert_eq!(f["timeout"], json!(MAX_TIMEOUT));
        f.insert("timeout".into(), json!(-1));
        CommandOp.validate(&mut f).unwrap();
        assert_eq!(f["timeout"], json!(-1.0));
        f.insert("timeout".into(), json!("soon"));
        assert_eq!(CommandOp.validate(&mut f).unwrap_err(), "Invalid timeout");
        assert_eq!(CommandOp::timeout(&req("command", &[("timeout", json!(1e300))])), MAX_TIMEOUT);
    }

    #[tokio::test]
    async fn declined_send_hides_output() {
        let h = Harness::new();
        h.shell.respond(ShellOutput { stdout: "secret\n".into(), status: Some(0), ..Default::default() });
        h.ui.push_yes_no(false);
        let r = CommandOp.execute(&req("command", &[("command", json!("cat key")), ("timeout", json!(5))]), &h.ctx()).await;
        assert!(r.accepted);
        assert_eq!(r.field("stdout").unwrap(), "<hidden>");
        assert_eq!(h.shell.commands(), vec!["cat key".to_string()]);
    }

    #[tokio::test]
    async fn auto_send_skips_prompt() {
        let h = Harness::with_config(Config { auto_send: true, ..Default::default() });
        h.shell.respond(ShellOutput { stdout: "ok\n".into(), status: Some(0), ..Default::default() });
        let r = CommandOp.execute(&req("command", &[("command", json!("echo ok")), ("timeout", json!(5))]), &h.ctx()).await;
        assert_eq!(r.field("stdout").unwrap(), "ok\n");
        assert_eq!(r.field("success"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn auto_execute_patterns_skip_consent() {
        let h = Harness::with_config(Config { auto_execute_commands: vec!["ls".into()], ..Default::default() });
        assert!(CommandOp.consent(&req("command", &[("command", json!("ls -la"))]), &h.ctx()).await);
    }

    #[tokio::test]
    async fn shell_errors_are_accepted_failures() {
        let h = Harness::new();
        h.shell.fail("shell exited unexpectedly");
        let r = CommandOp.execute(&req("command", &[("command", json!("exit")), ("timeout", json!(5))]), &h.ctx()).await;
        assert!(r.accepted);
        assert_eq!(r.field("success"), Some(&json!(false)));
        assert_eq!(r.error.as_deref(), Some("shell exited unexpectedly"));
    }
}
