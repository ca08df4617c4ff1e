use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::{fs, sync::Arc};

use super::{path_consent, path_schema, show_comment};
use crate::{
    fs_util::describe_io_error,
    operation::{normalize_str, FieldsSchema, OperationContext, OperationRequest, OperationResult, OperationType},
};

pub struct WriteOp;

#[async_trait]
impl OperationType for WriteOp {
    fn tag(&self) -> &str { "write" }

    fn description(&self) -> &str {
        "Create a directory, or create or overwrite a file with the given content."
    }

    fn fields(&self) -> FieldsSchema {
        FieldsSchema::new()
            .required("path", path_schema("File or directory to create"))
            .optional("is_directory", json!({ "type": ["boolean", "null"] }))
            .optional("content", json!({ "type": ["string", "null"] }))
    }

    fn validate(&self, fields: &mut Map<String, Value>) -> Result<(), String> {
        normalize_str(fields, "path", "Empty path")
    }

    async fn display(&self, req: &OperationRequest, ctx: &OperationContext<'_>) {
        show_comment(req, ctx);
        let path = req.path_field("path").unwrap_or_default();
        if req.bool_field("is_directory") {
            ctx.ui.display_text(&format!("Create directory {}", path.display()));
            return;
        }
        if path.is_file() {
            ctx.ui.display_warning("Overwriting existing file");
        }
        ctx.ui.display_block(req.str_field("content").unwrap_or_default(), &path.display().to_string());
    }

    async fn consent(&self, req: &OperationRequest, ctx: &OperationContext<'_>) -> bool {
        let path = req.path_field("path").unwrap_or_default();
        let what = if req.bool_field("is_directory") { "creating directory" } else { "writing file" };
        path_consent(ctx, &[&path], &format!("Allow {what} '{}'?", path.display())).await
    }

    async fn execute(&self, req: &Arc<OperationRequest>, ctx: &OperationContext<'_>) -> OperationResult {
        let path = req.path_field("path").unwrap_or_default();
        if path.is_dir() {
            return self.build_error_result(req, &format!("Directory already exists: '{}'", path.display()), false);
        }

        if req.bool_field("is_directory") {
            return match fs::create_dir_all(&path) {
                Ok(()) => self.base_result(req).accepted(true),
                Err(e) => self.build_error_result(req, &describe_io_error(&e, &path), false),
            };
        }

        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            let create = ctx.approvals.path_allowed(&path)
                || ctx.ui.ask_yes_no(&format!("Parent directory '{}' does not exist. Create it?", parent.display())).await;
            if !create {
                return self.build_error_result(req, &format!("Parent directory does not exist: '{}'", parent.display()), false);
            }
            if let Err(e) = fs::create_dir_all(parent) {
                return self.build_error_result(req, &describe_io_error(&e, parent), false);
            }
        }

        let content = req.str_field("content").unwrap_or_default();
        match fs::write(&path, content) {
            Ok(()) => self.base_result(req).accepted(true).with_field("bytes_written", content.len()),
            Err(e) => self.build_error_result(req, &describe_io_error(&e, &path), false),
        }
    }

    fn base_result(&self, req: &Arc<OperationRequest>) -> OperationResult {
        let path = req.path_field("path").unwrap_or_default();
        OperationResult::echoing(req, &["is_directory"]).with_path("path", &path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{req, Harness};

    #[tokio::test]
    async fn writes_file_content() {
        let h = Harness::new();
        let file = h.workspace().join("out.txt");
        let r = WriteOp
            .execute(&req("write", &[("path", json!(file.to_str().unwrap())), ("content", json!("data"))]), &h.ctx())
            .await;
        assert!(r.accepted);
        assert_eq!(fs::read_to_string(&file).unwrap(), "data");
        assert!(r.field("content").is_none());
    }

    #[tokio::test]
    async fn refuses_existing_directory() {
        let h = Harness::new();
        let r = WriteOp
            .execute(&req("write", &[("path", json!(h.workspace().to_str().unwrap())), ("content", json!("x"))]), &h.ctx())
            .await;
        assert!(!r.accepted);
        assert!(r.error.unwrap().starts_with("Directory already exists"));
    }

    #[tokio::test]
    async fn missing_parent_needs_consent() {
        let h = Harness::new();
        let file = h.workspace().join("deep/dir/out.txt");
        h.ui.push_yes_no(false);
        let args = [("path", json!(file.to_str().unwrap())), ("content", json!("x"))];
        let r = WriteOp.execute(&req("write", &args), &h.ctx()).await;
        assert!(!r.accepted);
        assert!(!file.exists());

        h.ui.push_yes_no(true);
        let r = WriteOp.execute(&req("write", &args), &h.ctx()).await;
        assert!(r.accepted);
        assert!(file.exists());
    }

    #[tokio::test]
    async fn creates_directories() {
        let h = Harness::new();
        let dir = h.workspace().join("a/b");
        let r = WriteOp
            .execute(&req("write", &[("path", json!(dir.to_str().unwrap())), ("is_directory", json!(true))]), &h.ctx())
            .await;
        assert!(r.accepted);
        assert!(dir.is_dir());
    }
}
