// consentry/src/executor.rs

//! Per-operation state machine:
//! `Presented -> Consent -> BeforeHooks -> Executing -> AfterHooks -> Done`.
//! Every path ends in an [`OperationResult`].

use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    hooks::PolicyRegistry,
    operation::{OperationContext, OperationRequest, OperationResult, OperationType},
    presenter::with_group,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationPhase { Presented, Consent, BeforeHooks, Executing, AfterHooks, Done }

pub const PRE_PREFIX: &str = "Pre-processing failed: ";
pub const POST_PREFIX: &str = "Post-processing failed: ";

fn enter(tag: &str, phase: OperationPhase) { debug!(tag, ?phase, "operation phase"); }

pub async fn run(
    kind: &dyn OperationType,
    request: &Arc<OperationRequest>,
    hooks: &PolicyRegistry,
    ctx: &OperationContext<'_>,
) -> OperationResult {
    let tag = request.tag();
    let title = tag.to_uppercase();
    with_group(ctx.ui, &title, async {
        enter(tag, OperationPhase::Presented);
        kind.display(request, ctx).await;

        enter(tag, OperationPhase::Consent);
        if !kind.consent(request, ctx).await {
            info!(tag, "operation declined");
            enter(tag, OperationPhase::Done);
            return kind.base_result(request);
        }

        enter(tag, OperationPhase::BeforeHooks);
        if let Err(e) = hooks.run_before(request, ctx).await {
            let msg = format!("{PRE_PREFIX}{e}");
            ctx.ui.display_error(&msg);
            enter(tag, OperationPhase::Done);
            return kind.build_error_result(request, &msg, false);
        }

        enter(tag, OperationPhase::Executing);
        let mut result = kind.execute(request, ctx).await;

        enter(tag, OperationPhase::AfterHooks);
        if let Err(e) = hooks.run_after(request, &result, ctx).await {
            let msg = format!("{POST_PREFIX}{e}");
            ctx.ui.display_error(&msg);
            result.error = Some(msg);
        }

        enter(tag, OperationPhase::Done);
        info!(tag, accepted = result.accepted, error = result.error.as_deref().unwrap_or(""), "operation finished");
        result
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::HookError,
        hooks::{FnHook, HookEvent, Phase},
        testutil::{req, Harness, StubType},
    };
    use std::collections::BTreeSet;

    fn hooks_with(phase: Phase, err: HookError) -> PolicyRegistry {
        let mut reg = PolicyRegistry::new();
        reg.register("p", phase, &[], Arc::new(FnHook::new("fail", move |_ev: &HookEvent<'_>| Err(err.clone()))));
        reg.filter(&BTreeSet::from(["p".to_string()]));
        reg
    }

    #[tokio::test]
    async fn declined_consent_never_executes() {
        let h = Harness::new();
        let stub = StubType::new("read");
        h.ui.push_yes_no(false);
        let r = run(&stub, &req("read", &[]), &PolicyRegistry::new(), &h.ctx()).await;
        assert!(!r.accepted);
        assert!(r.error.is_none());
        assert_eq!(stub.executions(), 0);
    }

    #[tokio::test]
    async fn before_hook_failure_blocks_body() {
        let h = Harness::new();
        let stub = StubType::new("read");
        h.ui.push_yes_no(true);
        let r = run(&stub, &req("read", &[]), &hooks_with(Phase::Before, HookError::validation("bad")), &h.ctx()).await;
        assert!(!r.accepted);
        assert_eq!(r.error.as_deref(), Some("Pre-processing failed: bad"));
        assert_eq!(stub.executions(), 0);
    }

    #[tokio::test]
    async fn after_hook_failure_keeps_acceptance() {
        let h = Harness::new();
        let stub = StubType::new("read");
        h.ui.push_yes_no(true);
        let r = run(&stub, &req("read", &[]), &hooks_with(Phase::After, HookError::processing("late")), &h.ctx()).await;
        assert!(r.accepted);
        assert_eq!(r.error.as_deref(), Some("Post-processing failed: late"));
        assert_eq!(stub.executions(), 1);
    }

    #[tokio::test]
    async fn groups_are_balanced() {
        let h = Harness::new();
        h.ui.push_yes_no(true);
        run(&StubType::new("read"), &req("read", &[]), &PolicyRegistry::new(), &h.ctx()).await;
        assert_eq!(h.ui.depth(), 0);
    }
}
