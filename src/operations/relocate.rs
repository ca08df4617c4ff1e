use async_trait::async_trait;
use serde_json::{Map, Value};
use std::{fs, io, path::{Path, PathBuf}, sync::Arc};
use tracing::warn;

use super::{path_consent, path_schema, show_comment};
use crate::{
    fs_util::{copy_dir_recursive, describe_io_error, human_size, metadata, remove_any},
    operation::{normalize_str, FieldsSchema, OperationContext, OperationRequest, OperationResult, OperationType},
};

#[derive(Clone, Copy)]
enum Mode { Move, Copy }

impl Mode {
    fn verb(self) -> &'static str { match self { Self::Move => "moving", Self::Copy => "copying" } }
    fn title(self) -> &'static str { match self { Self::Move => "Move", Self::Copy => "Copy" } }
}

fn copy_any(src: &Path, dst: &Path) -> io::Result<()> {
    if src.is_dir() { copy_dir_recursive(src, dst) } else { fs::copy(src, dst).map(|_| ()) }
}

/// Canonical form of a path that may not exist yet: its parent resolved, its name kept.
fn canonical_target(p: &Path) -> PathBuf {
    if let Ok(c) = fs::canonicalize(p) { return c; }
    match (p.parent().and_then(|d| fs::canonicalize(d).ok()), p.file_name()) {
        (Some(dir), Some(name)) => dir.join(name),
        _ => p.to_path_buf(),
    }
}

/// Refuse a destination that is the source itself or lies inside it.
fn check_targets(src: &Path, dst: &Path) -> Result<(), String> {
    let source = fs::canonicalize(src).map_err(|e| describe_io_error(&e, src))?;
    let target = canonical_target(dst);
    if source == target {
        return Err(format!("Source and destination are the same: '{}'", src.display()));
    }
    if source.is_dir() && target.starts_with(&source) {
        return Err(format!("Destination is inside the source directory: '{}'", dst.display()));
    }
    Ok(())
}

/// Hidden sibling of `dst` used while the new content is put in place.
fn sibling(dst: &Path, role: &str) -> PathBuf {
    let name = dst.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    dst.with_file_name(format!(".{name}.{role}-{}", uuid::Uuid::new_v4().simple()))
}

/// Put `src` at the free path `dst`. A failed copy leaves nothing behind.
fn place(mode: Mode, src: &Path, dst: &Path) -> io::Result<()> {
    let copied = match mode {
        Mode::Copy => copy_any(src, dst),
        Mode::Move => match fs::rename(src, dst) {
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => copy_any(src, dst),
            other => return other,
        },
    };
    if let Err(e) = copied {
        let _ = remove_any(dst);
        return Err(e);
    }
    match mode {
        Mode::Move => remove_any(src),
        Mode::Copy => Ok(()),
    }
}

/// Give back what `place` took from the source.
fn unplace(mode: Mode, src: &Path, staged: &Path) {
    let restored = match mode {
        Mode::Copy => remove_any(staged),
        Mode::Move => fs::rename(staged, src).or_else(|_| copy_any(staged, src).and_then(|()| remove_any(staged))),
    };
    if let Err(e) = restored {
        warn!(staged = %staged.display(), error = %e, "could not roll back staged content");
    }
}

/// The existing destination is only removed once the new content sits next
/// to it, and is restored if the swap fails.
fn relocate(mode: Mode, src: &Path, dst: &Path) -> io::Result<()> {
    if fs::symlink_metadata(dst).is_err() {
        return place(mode, src, dst);
    }
    let staged = sibling(dst, "incoming");
    place(mode, src, &staged)?;
    let backup = sibling(dst, "previous");
    if let Err(e) = fs::rename(dst, &backup) {
        unplace(mode, src, &staged);
        return Err(e);
    }
    if let Err(e) = fs::rename(&staged, dst) {
        let _ = fs::rename(&backup, dst);
        unplace(mode, src, &staged);
        return Err(e);
    }
    if let Err(e) = remove_any(&backup) {
        warn!(backup = %backup.display(), error = %e, "replaced destination left a backup behind");
    }
    Ok(())
}

fn fields_schema() -> FieldsSchema {
    FieldsSchema::new()
        .required("source_path", path_schema("Existing file or directory"))
        .required("destination_path", path_schema("Target path"))
}

fn validate(fields: &mut Map<String, Value>) -> Result<(), String> {
    normalize_str(fields, "source_path", "Empty path")?;
    normalize_str(fields, "destination_path", "Empty path")
}

async fn display(mode: Mode, req: &OperationRequest, ctx: &OperationContext<'_>) {
    show_comment(req, ctx);
    let src = req.path_field("source_path").unwrap_or_default();
    let dst = req.path_field("destination_path").unwrap_or_default();
    ctx.ui.display_text(&format!("{} {} -> {}", mode.title(), src.display(), dst.display()));
    if let Ok(md) = metadata(&src) {
        let kind = if md.is_directory { "directory" } else { "file" };
        ctx.ui.display_text(&format!("source: {kind}, {}", human_size(md.size)));
    }
    if fs::symlink_metadata(&dst).is_ok() {
        ctx.ui.display_warning("Destination path already exists");
    }
}

async fn consent(mode: Mode, req: &OperationRequest, ctx: &OperationContext<'_>) -> bool {
    let src = req.path_field("source_path").unwrap_or_default();
    let dst = req.path_field("destination_path").unwrap_or_default();
    path_consent(ctx, &[&src, &dst], &format!("Allow {} '{}' to '{}'?", mode.verb(), src.display(), dst.display())).await
}

async fn execute(mode: Mode, kind: &dyn OperationType, req: &Arc<OperationRequest>, ctx: &OperationContext<'_>) -> OperationResult {
    let src = req.path_field("source_path").unwrap_or_default();
    let dst = req.path_field("destination_path").unwrap_or_default();
    if let Err(e) = fs::symlink_metadata(&src) {
        return kind.build_error_result(req, &describe_io_error(&e, &src), false);
    }
    if let Err(msg) = check_targets(&src, &dst) {
        return kind.build_error_result(req, &msg, false);
    }
    // asked even when the paths are auto-approved
    if fs::symlink_metadata(&dst).is_ok()
        && !ctx.ui.ask_yes_no(&format!("Overwrite existing '{}'?", dst.display())).await
    {
        return kind.base_result(req);
    }
    match relocate(mode, &src, &dst) {
        Ok(()) => kind.base_result(req).accepted(true),
        Err(e) => kind.build_error_result(req, &describe_io_error(&e, &dst), false),
    }
}

fn base_result(req: &Arc<OperationRequest>) -> OperationResult {
    let src = req.path_field("source_path").unwrap_or_default();
    let dst = req.path_field("destination_path").unwrap_or_default();
    OperationResult::for_request(req).with_path("source_path", &src).with_path("destination_path", &dst)
}

pub struct MoveOp;

#[async_trait]
impl OperationType for MoveOp {
    fn tag(&self) -> &str { "move" }
    fn description(&self) -> &str { "Move or rename a file or directory." }
    fn fields(&self) -> FieldsSchema { fields_schema() }
    fn validate(&self, fields: &mut Map<String, Value>) -> Result<(), String> { validate(fields) }
    async fn display(&self, req: &OperationRequest, ctx: &OperationContext<'_>) { display(Mode::Move, req, ctx).await }
    async fn consent(&self, req: &OperationRequest, ctx: &OperationContext<'_>) -> bool { consent(Mode::Move, req, ctx).await }
    async fn execute(&self, req: &Arc<OperationRequest>, ctx: &OperationContext<'_>) -> OperationResult {
        execute(Mode::Move, self, req, ctx).await
    }
    fn base_result(&self, req: &Arc<OperationRequest>) -> OperationResult { base_result(req) }
}

pub struct CopyOp;

#[async_trait]
impl OperationType for CopyOp {
    fn tag(&self) -> &str { "copy" }
    fn description(&self) -> &str { "Copy a file, or a directory recursively." }
    fn fields(&self) -> FieldsSchema { fields_schema() }
    fn validate(&self, fields: &mut Map<String, Value>) -> Result<(), String> { validate(fields) }
    async fn display(&self, req: &OperationRequest, ctx: &OperationContext<'_>) { display(Mode::Copy, req, ctx).await }
    async fn consent(&self, req: &OperationRequest, ctx: &OperationContext<'_>) -> bool { consent(Mode::Copy, req, ctx).await }
    async fn execute(&self, req: &Arc<OperationRequest>, ctx: &OperationContext<'_>) -> OperationResult {
        execute(Mode::Copy, self, req, ctx).await
    }
    fn base_result(&self, req: &Arc<OperationRequest>) -> OperationResult { base_result(req) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{req, Harness};
    use serde_json::json;

    fn paths(src: &Path, dst: &Path) -> [(&'static str, Value); 2] {
        [("source_path", json!(src.to_str().unwrap())), ("destination_path", json!(dst.to_str().unwrap()))]
    }

    #[tokio::test]
    async fn move_renames_file() {
        let h = Harness::new();
        let (a, b) = (h.workspace().join("a"), h.workspace().join("b"));
        fs::write(&a, "x").unwrap();
        let r = MoveOp.execute(&req("move", &paths(&a, &b)), &h.ctx()).await;
        assert!(r.accepted);
        assert!(!a.exists());
        assert_eq!(fs::read_to_string(&b).unwrap(), "x");
    }

    #[tokio::test]
    async fn copy_replaces_existing_destination_tree() {
        let h = Harness::new();
        let (a, b) = (h.workspace().join("a"), h.workspace().join("b"));
        fs::create_dir_all(a.join("n")).unwrap();
        fs::write(a.join("n/f"), "new").unwrap();
        fs::create_dir_all(&b).unwrap();
        fs::write(b.join("stale"), "old").unwrap();
        h.ui.push_yes_no(true);
        let r = CopyOp.execute(&req("copy", &paths(&a, &b)), &h.ctx()).await;
        assert!(r.accepted);
        assert!(a.join("n/f").exists());
        assert_eq!(fs::read_to_string(b.join("n/f")).unwrap(), "new");
        assert!(!b.join("stale").exists());
    }

    #[tokio::test]
    async fn missing_source_fails_without_touching_destination() {
        let h = Harness::new();
        let (a, b) = (h.workspace().join("missing"), h.workspace().join("b"));
        fs::write(&b, "keep").unwrap();
        let r = CopyOp.execute(&req("copy", &paths(&a, &b)), &h.ctx()).await;
        assert!(!r.accepted);
        assert!(r.error.is_some());
        assert_eq!(fs::read_to_string(&b).unwrap(), "keep");
    }

    #[tokio::test]
    async fn moving_a_file_onto_itself_keeps_it() {
        let h = Harness::new();
        let a = h.workspace().join("a");
        fs::write(&a, "precious").unwrap();
        let r = MoveOp.execute(&req("move", &paths(&a, &a)), &h.ctx()).await;
        assert!(!r.accepted);
        assert!(r.error.unwrap().contains("same"));
        assert_eq!(fs::read_to_string(&a).unwrap(), "precious");
        assert!(h.ui.questions().is_empty());
    }

    #[tokio::test]
    async fn copying_onto_itself_through_another_spelling_is_refused() {
        let h = Harness::new();
        let d = h.workspace().join("d");
        fs::create_dir_all(&d).unwrap();
        fs::write(d.join("f"), "x").unwrap();
        let r = CopyOp.execute(&req("copy", &paths(&d, &d.join("..").join("d"))), &h.ctx()).await;
        assert!(!r.accepted);
        assert_eq!(fs::read_to_string(d.join("f")).unwrap(), "x");
    }

    #[tokio::test]
    async fn directory_cannot_go_into_its_own_subtree() {
        let h = Harness::new();
        let d = h.workspace().join("d");
        fs::create_dir_all(d.join("sub")).unwrap();
        fs::write(d.join("sub/f"), "x").unwrap();
        for r in [
            CopyOp.execute(&req("copy", &paths(&d, &d.join("sub/copy"))), &h.ctx()).await,
            MoveOp.execute(&req("move", &paths(&d, &d.join("sub"))), &h.ctx()).await,
        ] {
            assert!(!r.accepted);
            assert!(r.error.unwrap().contains("inside the source"));
        }
        assert_eq!(fs::read_to_string(d.join("sub/f")).unwrap(), "x");
        assert!(!d.join("sub/copy").exists());
    }

    #[tokio::test]
    async fn declined_overwrite_keeps_destination_even_when_auto_approved() {
        let h = Harness::with_config(crate::config::Config {
            auto_allowed_paths: vec!["/**".into()],
            ..Default::default()
        });
        let (a, b) = (h.workspace().join("a"), h.workspace().join("b"));
        fs::write(&a, "new").unwrap();
        fs::write(&b, "old").unwrap();
        let rq = req("move", &paths(&a, &b));
        assert!(MoveOp.consent(&rq, &h.ctx()).await);
        h.ui.push_yes_no(false);
        let r = MoveOp.execute(&rq, &h.ctx()).await;
        assert!(!r.accepted);
        assert!(r.error.is_none());
        assert_eq!(h.ui.questions().len(), 1);
        assert!(h.ui.questions()[0].starts_with("Overwrite"));
        assert_eq!(fs::read_to_string(&a).unwrap(), "new");
        assert_eq!(fs::read_to_string(&b).unwrap(), "old");
    }

    #[tokio::test]
    async fn accepted_overwrite_swaps_in_the_new_file_without_leftovers() {
        let h = Harness::new();
        let (a, b) = (h.workspace().join("a"), h.workspace().join("b"));
        fs::write(&a, "new").unwrap();
        fs::write(&b, "old").unwrap();
        h.ui.push_yes_no(true);
        let r = MoveOp.execute(&req("move", &paths(&a, &b)), &h.ctx()).await;
        assert!(r.accepted);
        assert!(!a.exists());
        assert_eq!(fs::read_to_string(&b).unwrap(), "new");
        assert_eq!(fs::read_dir(h.workspace()).unwrap().count(), 1);
    }
}
