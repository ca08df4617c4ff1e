use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::{fs, sync::Arc};

use super::{path_schema, show_comment};
use crate::{
    fs_util::{describe_io_error, is_binary},
    operation::{normalize_str, FieldsSchema, OperationContext, OperationRequest, OperationResult, OperationType},
};

pub struct EditOp;

fn preview(s: &str) -> String {
    let mut p: String = s.chars().take(60).collect();
    if s.chars().count() > 60 { p.push_str("..."); }
    format!("{p:?}")
}

fn diff_block(old: &str, new: &str) -> String {
    let mut out = String::new();
    for l in old.lines() { out.push_str(&format!("- {l}\n")); }
    for l in new.lines() { out.push_str(&format!("+ {l}\n")); }
    out
}

#[async_trait]
impl OperationType for EditOp {
    fn tag(&self) -> &str { "edit" }

    fn description(&self) -> &str {
        "Edit a file by exact string replacement. Fails if old_string is absent, or appears more than once without replace_all."
    }

    fn fields(&self) -> FieldsSchema {
        FieldsSchema::new()
            .required("path", path_schema("File to edit"))
            .required("old_string", json!({ "type": "string", "description": "Exact text to find, including whitespace" }))
            .required("new_string", json!({ "type": "string", "description": "Replacement; empty deletes" }))
            .optional("replace_all", json!({ "type": ["boolean", "null"] }))
    }

    fn validate(&self, fields: &mut Map<String, Value>) -> Result<(), String> {
        normalize_str(fields, "path", "Empty path")?;
        match fields.get("old_string").and_then(Value::as_str) {
            Some(s) if !s.is_empty() => Ok(()),
            _ => Err("old_string cannot be empty".into()),
        }
    }

    async fn display(&self, req: &OperationRequest, ctx: &OperationContext<'_>) {
        show_comment(req, ctx);
        let path = req.path_field("path").unwrap_or_default();
        ctx.ui.display_text(&format!(
            "Edit {}: {} -> {}",
            path.display(),
            preview(req.str_field("old_string").unwrap_or_default()),
            preview(req.str_field("new_string").unwrap_or_default()),
        ));
    }

    /// Asked inside `execute`, once the replacement count is known.
    async fn consent(&self, _req: &OperationRequest, _ctx: &OperationContext<'_>) -> bool { true }

    async fn execute(&self, req: &Arc<OperationRequest>, ctx: &OperationContext<'_>) -> OperationResult {
        let path = req.path_field("path").unwrap_or_default();
        let old = req.str_field("old_string").unwrap_or_default();
        let new = req.str_field("new_string").unwrap_or_default();

        if path.is_dir() {
            return self.build_error_result(req, &format!("Is a directory: '{}'", path.display()), false);
        }
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) => return self.build_error_result(req, &describe_io_error(&e, &path), false),
        };
        if is_binary(&bytes) {
            return self.build_error_result(req, &format!("Cannot edit binary file: '{}'", path.display()), false);
        }
        let original = String::from_utf8_lossy(&bytes);

        let found = original.matches(old).count();
        if found == 0 {
            ctx.ui.display_error(&format!("String not found in file: {}", preview(old)));
            return self.build_error_result(req, &format!("String not found: {}", preview(old)), false);
        }
        let replace_all = req.bool_field("replace_all");
        if found > 1 && !replace_all {
            return self
                .build_error_result(req, &format!("String appears {found} times, replace_all=false"), false)
                .with_field("occurrences_found", found);
        }
        let (updated, replaced) = if replace_all {
            (original.replace(old, new), found)
        } else {
            (original.replacen(old, new, 1), 1)
        };

        ctx.ui.display_block(&diff_block(old, new), &format!("Edit: {}", path.display()));
        let apply = if ctx.approvals.path_allowed(&path) {
            ctx.ui.display_text(&format!("Auto-applying edit ({replaced} replacement(s)): path matches auto_allowed_paths"));
            true
        } else {
            ctx.ui.ask_choice(&format!("Apply edit ({replaced} replacement(s))?"), &["Apply", "Cancel"]).await == 0
        };
        let r = self.base_result(req).with_field("occurrences_found", found);
        if !apply {
            return r.with_field("occurrences_replaced", 0);
        }
        match fs::write(&path, updated) {
            Ok(()) => r.accepted(true).with_field("occurrences_replaced", replaced),
            Err(e) => self.build_error_result(req, &describe_io_error(&e, &path), false),
        }
    }

    fn base_result(&self, req: &Arc<OperationRequest>) -> OperationResult {
        let path = req.path_field("path").unwrap_or_default();
        OperationResult::echoing(req, &["replace_all"]).with_path("path", &path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{req, Harness};

    fn edit_req(path: &std::path::Path, old: &str, new: &str, all: bool) -> Arc<OperationRequest> {
        req(
            "edit",
            &[
                ("path", json!(path.to_str().unwrap())),
                ("old_string", json!(old)),
                ("new_string", json!(new)),
                ("replace_all", json!(all)),
            ],
        )
    }

    #[tokio::test]
    async fn replaces_single_occurrence() {
        let h = Harness::new();
        let f = h.workspace().join("a.rs");
        fs::write(&f, "let x = 1;\n").unwrap();
        h.ui.push_choice(0);
        let r = EditOp.execute(&edit_req(&f, "1", "2", false), &h.ctx()).await;
        assert!(r.accepted);
        assert_eq!(fs::read_to_string(&f).unwrap(), "let x = 2;\n");
    }

    #[tokio::test]
    async fn ambiguous_match_needs_replace_all() {
        let h = Harness::new();
        let f = h.workspace().join("a.txt");
        fs::write(&f, "aa aa").unwrap();
        let r = EditOp.execute(&edit_req(&f, "aa", "b", false), &h.ctx()).await;
        assert!(!r.accepted);
        assert_eq!(r.error.as_deref(), Some("String appears 2 times, replace_all=false"));

        h.ui.push_choice(0);
        let r = EditOp.execute(&edit_req(&f, "aa", "b", true), &h.ctx()).await;
        assert!(r.accepted);
        assert_eq!(r.field("occurrences_replaced"), Some(&json!(2)));
        assert_eq!(fs::read_to_string(&f).unwrap(), "b b");
    }

    #[tokio::test]
    async fn cancel_leaves_file_untouched() {
        let h = Harness::new();
        let f = h.workspace().join("a.txt");
        fs::write(&f, "keep").unwrap();
        h.ui.push_choice(1);
        let r = EditOp.execute(&edit_req(&f, "keep", "drop", false), &h.ctx()).await;
        assert!(!r.accepted);
        assert!(r.error.is_none());
        assert_eq!(fs::read_to_string(&f).unwrap(), "keep");
    }

    #[test]
    fn empty_old_string_is_rejected() {
        let mut f = Map::new();
        f.insert("path".into(), json!("a"));
        f.insert("old_string".into(), json!(""));
        assert!(EditOp.validate(&mut f).is_err());
    }
}
