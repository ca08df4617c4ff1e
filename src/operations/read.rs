use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::{path_schema, show_comment};
use crate::{
    fs_util::{self, describe_io_error, human_size, FileContent},
    operation::{normalize_str, FieldsSchema, OperationContext, OperationRequest, OperationResult, OperationType},
};

const HIDDEN: &str = "<hidden>";

pub struct ReadOp;

impl ReadOp {
    fn metadata_value(md: &fs_util::Metadata) -> Value {
        serde_json::to_value(md).unwrap_or(Value::Null)
    }
}

#[async_trait]
impl OperationType for ReadOp {
    fn tag(&self) -> &str { "read" }

    fn description(&self) -> &str {
        "Read a file or directory. For files, either the metadata only or the content and metadata."
    }

    fn fields(&self) -> FieldsSchema {
        FieldsSchema::new()
            .required("path", path_schema("File or directory to read"))
            .optional("metadata_only", json!({ "type": ["boolean", "null"] }))
    }

    fn validate(&self, fields: &mut Map<String, Value>) -> Result<(), String> {
        normalize_str(fields, "path", "Empty path")
    }

    async fn display(&self, req: &OperationRequest, ctx: &OperationContext<'_>) {
        show_comment(req, ctx);
        let path = req.path_field("path").unwrap_or_default();
        let what = if req.bool_field("metadata_only") { "Read metadata of" } else { "Read" };
        ctx.ui.display_text(&format!("{what} {}", path.display()));
    }

    /// The read is gated by the choices inside `execute`.
    async fn consent(&self, _req: &OperationRequest, _ctx: &OperationContext<'_>) -> bool { true }

    async fn execute(&self, req: &Arc<OperationRequest>, ctx: &OperationContext<'_>) -> OperationResult {
        let path = req.path_field("path").unwrap_or_default();
        let auto = ctx.approvals.path_allowed(&path);

        let md = match fs_util::metadata(&path) {
            Ok(md) => md,
            Err(e) => {
                let msg = describe_io_error(&e, &path);
                ctx.ui.display_error(&format!("Cannot access {}: {msg}", path.display()));
                return self.build_error_result(req, &msg, false);
            }
        };

        if md.is_directory || req.bool_field("metadata_only") {
            let send = if auto {
                ctx.ui.display_text("Sending metadata since the path matches auto_allowed_paths");
                true
            } else {
                ctx.ui.ask_choice("Allow sending metadata?", &["Yes", "No"]).await == 0
            };
            if let Some(entries) = &md.entries {
                ctx.ui.display_block(&entries.join("\n"), &format!("{} ({} entries)", path.display(), entries.len()));
            }
            let r = self.base_result(req).accepted(send);
            return if send { r.with_field("metadata", Self::metadata_value(&md)) } else { r };
        }

        let choice = if auto {
            ctx.ui.display_text("Reading and sending content since the path matches auto_allowed_paths");
            0
        } else {
            ctx.ui
                .ask_choice(
                    "Allow reading file?",
                    &[
                        "Read and send content and metadata",
                        "Read and inspect content first",
                        "Don't read and only send metadata",
                        "Don't read or send anything",
                    ],
                )
                .await
        };

        match choice {
            0 | 1 => {
                let content = match fs_util::read_file(&path) {
                    Ok(c) => c,
                    Err(e) => {
                        let msg = describe_io_error(&e, &path);
                        ctx.ui.display_error(&format!("Failed to read file content: {msg}"));
                        return self.build_error_result(req, &msg, false);
                    }
                };
                let shown = match &content {
                    FileContent::Text(t) => t.clone(),
                    FileContent::Base64(_) => "(Base64)".into(),
                };
                ctx.ui.display_block(&shown, &format!("{} ({})", path.display(), human_size(md.size)));
                let encoding = content.encoding();

                let send = if choice == 0 {
                    0
                } else {
                    ctx.ui
                        .ask_choice("Send file content?", &["Send content and metadata", "Send metadata only", "Don't send anything"])
                        .await
                };
                let r = self.base_result(req).with_field("encoding", encoding);
                match send {
                    0 => r.accepted(true).with_field("metadata", Self::metadata_value(&md)).with_field("content", content.into_string()),
                    1 => r.with_field("metadata", Self::metadata_value(&md)).with_field("content", HIDDEN),
                    _ => r.with_field("content", HIDDEN),
                }
            }
            2 => self.base_result(req).with_field("metadata", Self::metadata_value(&md)),
            _ => self.base_result(req),
        }
    }

    fn base_result(&self, req: &Arc<OperationRequest>) -> OperationResult {
        let path = req.path_field("path").unwrap_or_default();
        OperationResult::echoing(req, &["metadata_only"]).with_path("path", &path)
    }
}
