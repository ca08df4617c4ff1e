use async_trait::async_trait;
use serde_json::json;
use std::{fs::{self, OpenOptions}, io::Write, path::{Path, PathBuf}, sync::Arc};

use super::{HookSpec, Plugin};
use crate::{
    error::HookError,
    hooks::{Hook, HookEvent, Phase},
    operation::OperationContext,
};

pub const NAME: &str = "audit_log";

pub fn log_path(workspace: &Path) -> PathBuf { workspace.join(".consentry").join("audit.log") }

/// Appends one JSON line per finished operation to `.consentry/audit.log`.
pub struct AuditLogHook;

#[async_trait]
impl Hook for AuditLogHook {
    fn name(&self) -> &str { NAME }

    async fn on_event(&self, ctx: &OperationContext<'_>, event: &HookEvent<'_>) -> Result<(), HookError> {
        let HookEvent::After { request, result } = event else { return Ok(()) };
        let line = json!({
            "ts": chrono::Utc::now().to_rfc3339(),
            "tag": request.tag(),
            "accepted": result.accepted,
            "error": result.error,
            "request": request,
        });
        let path = log_path(ctx.workspace);
        let write = || -> std::io::Result<()> {
            if let Some(dir) = path.parent() { fs::create_dir_all(dir)?; }
            let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
            writeln!(f, "{line}")
        };
        write().map_err(|e| HookError::processing(format!("audit log {}: {e}", path.display())))
    }
}

pub fn plugin() -> Plugin {
    Plugin {
        name: NAME,
        description: "Records every operation outcome in the workspace audit log",
        operation_types: vec![],
        hooks: vec![HookSpec { phase: Phase::After, scope: vec![], hook: Arc::new(AuditLogHook) }],
    }
}
