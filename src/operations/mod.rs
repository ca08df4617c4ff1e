//! Core operation types. Always available; `command` can be switched off by config.

mod command;
mod delete;
mod edit;
mod read;
mod relocate;
mod task_list;
mod write;

pub use command::CommandOp;
pub use delete::DeleteOp;
pub use edit::EditOp;
pub use read::ReadOp;
pub use relocate::{CopyOp, MoveOp};
pub use task_list::TaskListOp;
pub use write::WriteOp;

use serde_json::{json, Value};
use std::{path::Path, sync::Arc};

use crate::{
    operation::{OperationContext, OperationRequest},
    registry::Descriptor,
};

pub fn core_types() -> Vec<Descriptor> {
    vec![
        Descriptor::core(Arc::new(ReadOp)),
        Descriptor::core(Arc::new(WriteOp)),
        Descriptor::core(Arc::new(EditOp)),
        Descriptor::core(Arc::new(MoveOp)),
        Descriptor::core(Arc::new(CopyOp)),
        Descriptor::core(Arc::new(DeleteOp)),
        Descriptor::core(Arc::new(CommandOp)),
        Descriptor::core(Arc::new(TaskListOp)),
    ]
}

pub(crate) fn path_schema(what: &str) -> Value {
    json!({ "type": "string", "description": what })
}

pub(crate) fn show_comment(req: &OperationRequest, ctx: &OperationContext<'_>) {
    if !req.comment().is_empty() {
        ctx.ui.display_text(&format!("❝ {}", req.comment()));
    }
}

/// Auto-approve when every path matches `auto_allowed_paths`, otherwise ask.
pub(crate) async fn path_consent(ctx: &OperationContext<'_>, paths: &[&Path], question: &str) -> bool {
    if !paths.is_empty() && paths.iter().all(|p| ctx.approvals.path_allowed(p)) {
        ctx.ui.display_text("Auto-approved: path matches auto_allowed_paths");
        return true;
    }
    ctx.ui.ask_yes_no(question).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, testutil::Harness};

    #[tokio::test]
    async fn matching_paths_are_approved_without_asking() {
        let h = Harness::with_config(Config { auto_allowed_paths: vec!["**/allowed/**".into()], ..Default::default() });
        let inside = h.workspace().join("allowed/a.txt");
        let outside = h.workspace().join("other/b.txt");

        assert!(path_consent(&h.ctx(), &[&inside], "q1").await);
        assert!(h.ui.questions().is_empty());
        assert!(h.ui.output().iter().any(|l| l.starts_with("Auto-approved")));

        // one unmatched path is enough to ask; the empty script declines
        assert!(!path_consent(&h.ctx(), &[&inside, &outside], "q2").await);
        assert!(!path_consent(&h.ctx(), &[], "q3").await);
        assert_eq!(h.ui.questions(), vec!["q2".to_string(), "q3".to_string()]);
    }
}
