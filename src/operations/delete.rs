use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::{path_consent, path_schema, show_comment};
use crate::{
    fs_util::{describe_io_error, human_size, metadata, remove_any},
    operation::{normalize_str, FieldsSchema, OperationContext, OperationRequest, OperationResult, OperationType},
};

pub struct DeleteOp;

#[async_trait]
impl OperationType for DeleteOp {
    fn tag(&self) -> &str { "delete" }

    fn description(&self) -> &str { "Permanently delete a file or directory tree." }

    fn fields(&self) -> FieldsSchema {
        FieldsSchema::new().required("path", path_schema("File or directory to delete"))
    }

    fn validate(&self, fields: &mut Map<String, Value>) -> Result<(), String> {
        normalize_str(fields, "path", "Empty path")
    }

    async fn display(&self, req: &OperationRequest, ctx: &OperationContext<'_>) {
        show_comment(req, ctx);
        let path = req.path_field("path").unwrap_or_default();
        match metadata(&path) {
            Ok(md) if md.is_directory => {
                let n = md.entries.map(|e| e.len()).unwrap_or(0);
                ctx.ui.display_text(&format!("Delete directory {} ({n} entries)", path.display()));
            }
            Ok(md) => ctx.ui.display_text(&format!("Delete {} ({})", path.display(), human_size(md.size))),
            Err(_) => ctx.ui.display_text(&format!("Delete {}", path.display())),
        }
        ctx.ui.display_warning("This action is permanent and cannot be undone");
    }

    async fn consent(&self, req: &OperationRequest, ctx: &OperationContext<'_>) -> bool {
        let path = req.path_field("path").unwrap_or_default();
        path_consent(ctx, &[&path], &format!("Permanently delete '{}'?", path.display())).await
    }

    async fn execute(&self, req: &Arc<OperationRequest>, _ctx: &OperationContext<'_>) -> OperationResult {
        let path = req.path_field("path").unwrap_or_default();
        match remove_any(&path) {
            Ok(()) => self.base_result(req).accepted(true),
            Err(e) => self.build_error_result(req, &describe_io_error(&e, &path), false),
        }
    }

    fn base_result(&self, req: &Arc<OperationRequest>) -> OperationResult {
        let path = req.path_field("path").unwrap_or_default();
        OperationResult::for_request(req).with_path("path", &path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{req, Harness};
    use serde_json::json;

    #[tokio::test]
    async fn removes_directory_trees() {
        let h = Harness::new();
        let d = h.workspace().join("d");
        std::fs::create_dir_all(d.join("x/y")).unwrap();
        let r = DeleteOp.execute(&req("delete", &[("path", json!(d.to_str().unwrap()))]), &h.ctx()).await;
        assert!(r.accepted);
        assert!(!d.exists());
    }

    #[tokio::test]
    async fn consent_warns_and_asks() {
        let h = Harness::new();
        let f = h.workspace().join("f");
        std::fs::write(&f, "x").unwrap();
        let rq = req("delete", &[("path", json!(f.to_str().unwrap()))]);
        DeleteOp.display(&rq, &h.ctx()).await;
        h.ui.push_yes_no(false);
        assert!(!DeleteOp.consent(&rq, &h.ctx()).await);
        assert!(h.ui.warnings().iter().any(|w| w.contains("permanent")));
    }
}
