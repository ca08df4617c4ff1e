use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::{fs, path::Path, sync::Arc};

use super::Plugin;
use crate::{
    operation::{normalize_str, FieldsSchema, OperationContext, OperationRequest, OperationResult, OperationType},
    operations::path_consent,
};

pub const NAME: &str = "tree";
const DEFAULT_DEPTH: u64 = 3;

#[derive(Default, Debug, PartialEq, Eq)]
struct TreeStats {
    files: usize,
    dirs: usize,
    truncated: bool,
}

fn render(root: &Path, max_depth: usize, show_hidden: bool) -> (Vec<String>, TreeStats) {
    let name = root.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| root.display().to_string());
    let mut lines = vec![format!("{name}/")];
    let mut stats = TreeStats::default();
    walk(root, "", 0, max_depth, show_hidden, &mut lines, &mut stats);
    (lines, stats)
}

fn walk(dir: &Path, prefix: &str, depth: usize, max_depth: usize, show_hidden: bool, lines: &mut Vec<String>, stats: &mut TreeStats) {
    let entries = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) => {
            lines.push(format!("{prefix}└── [{e}]"));
            return;
        }
    };
    let mut entries: Vec<(String, bool)> = entries
        .filter_map(Result::ok)
        .map(|e| (e.file_name().to_string_lossy().into_owned(), e.path().is_dir()))
        .filter(|(n, _)| show_hidden || !n.starts_with('.'))
        .collect();
    if depth >= max_depth {
        stats.truncated |= entries.iter().any(|(_, d)| *d);
        return;
    }
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.to_lowercase().cmp(&b.0.to_lowercase())));
    let n = entries.len();
    for (i, (name, is_dir)) in entries.into_iter().enumerate() {
        let last = i + 1 == n;
        let branch = if last { "└── " } else { "├── " };
        if is_dir {
            lines.push(format!("{prefix}{branch}{name}/"));
            stats.dirs += 1;
            let next = format!("{prefix}{}", if last { "    " } else { "│   " });
            walk(&dir.join(&name), &next, depth + 1, max_depth, show_hidden, lines, stats);
        } else {
            lines.push(format!("{prefix}{branch}{name}"));
            stats.files += 1;
        }
    }
}

pub struct TreeOp;

#[async_trait]
impl OperationType for TreeOp {
    fn tag(&self) -> &str { NAME }

    fn description(&self) -> &str {
        "List a directory as a tree, directories first. max_depth 1-10 (default 3); hidden entries only with show_hidden."
    }

    fn fields(&self) -> FieldsSchema {
        FieldsSchema::new()
            .required("path", json!({ "type": "string" }))
            .optional("max_depth", json!({ "type": ["integer", "null"], "minimum": 1, "maximum": 10 }))
            .optional("show_hidden", json!({ "type": ["boolean", "null"] }))
    }

    fn validate(&self, fields: &mut Map<String, Value>) -> Result<(), String> {
        normalize_str(fields, "path", "Empty path")?;
        match fields.get("max_depth").filter(|v| !v.is_null()) {
            None => {
                fields.insert("max_depth".into(), json!(DEFAULT_DEPTH));
                Ok(())
            }
            Some(v) => match v.as_u64() {
                Some(d) if (1..=10).contains(&d) => Ok(()),
                _ => Err("max_depth must be between 1 and 10".into()),
            },
        }
    }

    async fn display(&self, req: &OperationRequest, ctx: &OperationContext<'_>) {
        let path = req.path_field("path").unwrap_or_default();
        let depth = req.field("max_depth").and_then(Value::as_u64).unwrap_or(DEFAULT_DEPTH);
        ctx.ui.display_text(&format!("Tree of {} (depth {depth})", path.display()));
    }

    async fn consent(&self, req: &OperationRequest, ctx: &OperationContext<'_>) -> bool {
        let path = req.path_field("path").unwrap_or_default();
        path_consent(ctx, &[&path], &format!("Allow listing '{}'?", path.display())).await
    }

    async fn execute(&self, req: &Arc<OperationRequest>, ctx: &OperationContext<'_>) -> OperationResult {
        let path = req.path_field("path").unwrap_or_default();
        if !path.is_dir() {
            return self.build_error_result(req, &format!("Not a directory: '{}'", path.display()), false);
        }
        let depth = req.field("max_depth").and_then(Value::as_u64).unwrap_or(DEFAULT_DEPTH) as usize;
        let (lines, stats) = render(&path, depth, req.bool_field("show_hidden"));
        let tree = lines.join("\n");
        ctx.ui.display_block(&tree, &format!("{} dirs, {} files", stats.dirs, stats.files));
        self.base_result(req)
            .accepted(true)
            .with_field("tree_output", tree)
            .with_field("total_files", stats.files)
            .with_field("total_dirs", stats.dirs)
            .with_field("max_depth_reached", stats.truncated)
    }

    fn base_result(&self, req: &Arc<OperationRequest>) -> OperationResult {
        let path = req.path_field("path").unwrap_or_default();
        OperationResult::echoing(req, &["max_depth", "show_hidden"]).with_path("path", &path)
    }
}

pub fn plugin() -> Plugin {
    Plugin {
        name: NAME,
        description: "Adds the `tree` operation type",
        operation_types: vec![Arc::new(TreeOp)],
        hooks: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> tempfile::TempDir {
        let d = tempfile::tempdir().unwrap();
        fs::create_dir_all(d.path().join("src/deep/deeper")).unwrap();
        fs::write(d.path().join("src/main.rs"), "").unwrap();
        fs::write(d.path().join("README"), "").unwrap();
        fs::write(d.path().join(".env"), "").unwrap();
        d
    }

    #[test]
    fn directories_first_hidden_skipped() {
        let d = fixture();
        let (lines, stats) = render(d.path(), 3, false);
        assert_eq!(lines[1], "├── src/");
        assert_eq!(lines.last().unwrap(), "└── README");
        assert!(!lines.iter().any(|l| l.contains(".env")));
        assert_eq!(stats, TreeStats { files: 2, dirs: 3, truncated: false });
    }

    #[test]
    fn depth_limit_marks_truncation() {
        let d = fixture();
        let (_, stats) = render(d.path(), 1, true);
        assert_eq!(stats.dirs, 1);
        assert_eq!(stats.files, 2);
        assert!(stats.truncated);
    }

    #[test]
    fn depth_bounds_are_enforced() {
        let mut f = Map::new();
        f.insert("path".into(), json!("."));
        TreeOp.validate(&mut f).unwrap();
        assert_eq!(f["max_depth"], json!(3));
        f.insert("max_depth".into(), json!(11));
        assert!(TreeOp.validate(&mut f).is_err());
    }
}
