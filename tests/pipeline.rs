//! Operations driven through the engine: consent, policy hooks, body.

use consentry::{
    config::Config,
    engine::Engine,
    error::HookError,
    hooks::{FnHook, HookEvent, Phase},
    testutil::{req, Harness},
};
use serde_json::json;
use std::sync::Arc;

fn guarded(phase: Phase, err: HookError) -> (Engine, Harness) {
    let mut engine = Engine::new();
    engine.register_hook("guard", phase, &["write"], Arc::new(FnHook::new("guard", move |_ev: &HookEvent<'_>| Err(err.clone()))));
    let mut cfg = Config::default();
    cfg.enable_plugin("guard");
    let h = Harness::with_config(cfg);
    engine.refresh(&h.config).unwrap();
    (engine, h)
}

#[tokio::test]
async fn before_hook_validation_failure_is_prefixed_and_blocks_the_write() {
    let (engine, h) = guarded(Phase::Before, HookError::validation("no writes today"));
    let file = h.workspace().join("out.txt");
    h.ui.push_yes_no(true);
    let r = engine
        .execute(&req("write", &[("path", json!(file.to_str().unwrap())), ("content", json!("x"))]), &h.ctx())
        .await;
    assert!(!r.accepted);
    assert_eq!(r.error.as_deref(), Some("Pre-processing failed: no writes today"));
    assert!(!file.exists());
}

#[tokio::test]
async fn after_hook_failure_is_prefixed_and_keeps_the_write() {
    let (engine, h) = guarded(Phase::After, HookError::processing("index update failed"));
    let file = h.workspace().join("out.txt");
    h.ui.push_yes_no(true);
    let r = engine
        .execute(&req("write", &[("path", json!(file.to_str().unwrap())), ("content", json!("x"))]), &h.ctx())
        .await;
    assert!(r.accepted);
    assert_eq!(r.error.as_deref(), Some("Post-processing failed: index update failed"));
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "x");
}

#[tokio::test]
async fn hooks_of_disabled_plugins_never_run() {
    let mut engine = Engine::new();
    engine.register_hook("guard", Phase::Before, &[], Arc::new(FnHook::new("deny", |_ev: &HookEvent<'_>| Err(HookError::security("nope")))));
    let h = Harness::new();
    engine.refresh(&h.config).unwrap();
    let file = h.workspace().join("ok.txt");
    h.ui.push_yes_no(true);
    let r = engine.execute(&req("write", &[("path", json!(file.to_str().unwrap()))]), &h.ctx()).await;
    assert!(r.accepted);
    assert!(r.error.is_none());
}

#[tokio::test]
async fn declined_delete_leaves_the_file() {
    let mut engine = Engine::new();
    let h = Harness::new();
    engine.refresh(&h.config).unwrap();
    let file = h.workspace().join("keep.txt");
    std::fs::write(&file, "precious").unwrap();
    h.ui.push_yes_no(false);
    let r = engine.execute(&req("delete", &[("path", json!(file.to_str().unwrap()))]), &h.ctx()).await;
    assert!(!r.accepted);
    assert!(r.error.is_none());
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "precious");
}

#[tokio::test]
async fn dangerous_command_is_blocked_before_the_shell_runs() {
    let mut engine = Engine::new();
    let mut cfg = Config::default();
    cfg.enable_plugin("shellcheck");
    let h = Harness::with_config(cfg);
    engine.refresh(&h.config).unwrap();
    h.ui.push_yes_no(true);
    let r = engine.execute(&req("command", &[("command", json!("rm -rf /")), ("timeout", json!(5))]), &h.ctx()).await;
    assert!(!r.accepted);
    let err = r.error.unwrap();
    assert!(err.starts_with("Pre-processing failed: "), "{err}");
    assert!(err.contains("dangerous"), "{err}");
    assert!(h.shell.commands().is_empty());
}

#[tokio::test]
async fn inactive_types_are_refused() {
    let mut engine = Engine::new();
    let h = Harness::with_config(Config { no_commands: true, ..Default::default() });
    engine.refresh(&h.config).unwrap();
    let r = engine.execute(&req("command", &[("command", json!("ls"))]), &h.ctx()).await;
    assert!(!r.accepted);
    assert!(r.error.unwrap().contains("not active"));
    assert!(h.shell.commands().is_empty());
}
