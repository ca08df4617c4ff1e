// consentry/src/hooks.rs

use async_trait::async_trait;
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, warn};

use crate::{
    error::HookError,
    operation::{OperationContext, OperationRequest, OperationResult},
};

#[derive(Clone, Copy, Debug)]
pub enum HookEvent<'a> {
    Before { request: &'a OperationRequest },
    After { request: &'a OperationRequest, result: &'a OperationResult },
}

impl HookEvent<'_> {
    pub fn request(&self) -> &OperationRequest {
        match self {
            Self::Before { request } | Self::After { request, .. } => request,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase { Before, After }

#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;
    async fn on_event(&self, ctx: &OperationContext<'_>, event: &HookEvent<'_>) -> Result<(), HookError>;
}

/// Adapter for hooks that need neither `await` nor the context.
pub struct FnHook<F> {
    name: String,
    f: F,
}

impl<F> FnHook<F>
where
    F: Fn(&HookEvent<'_>) -> Result<(), HookError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self { Self { name: name.into(), f } }
}

#[async_trait]
impl<F> Hook for FnHook<F>
where
    F: Fn(&HookEvent<'_>) -> Result<(), HookError> + Send + Sync,
{
    fn name(&self) -> &str { &self.name }
    async fn on_event(&self, _ctx: &OperationContext<'_>, event: &HookEvent<'_>) -> Result<(), HookError> {
        (self.f)(event)
    }
}

#[derive(Clone)]
struct Registration {
    hook: Arc<dyn Hook>,
    /// Empty means every tag.
    scope: BTreeSet<String>,
}

impl Registration {
    fn applies_to(&self, tag: &str) -> bool { self.scope.is_empty() || self.scope.contains(tag) }
}

#[derive(Clone)]
struct PluginHooks {
    plugin: String,
    before: Vec<Registration>,
    after: Vec<Registration>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HookStats {
    pub before: usize,
    pub after: usize,
}

/// Per-plugin before/after hook lists, flattened into the active lists by [`filter`](Self::filter).
#[derive(Clone, Default)]
pub struct PolicyRegistry {
    plugins: Vec<PluginHooks>,
    before: Vec<Registration>,
    after: Vec<Registration>,
}

impl PolicyRegistry {
    pub fn new() -> Self { Self::default() }

    /// Append `hook` to `plugin`'s list for `phase`. Inactive until the next `filter`.
    pub fn register(&mut self, plugin: &str, phase: Phase, scope: &[&str], hook: Arc<dyn Hook>) {
        let idx = match self.plugins.iter().position(|p| p.plugin == plugin) {
            Some(i) => i,
            None => {
                self.plugins.push(PluginHooks { plugin: plugin.into(), before: vec![], after: vec![] });
                self.plugins.len() - 1
            }
        };
        let reg = Registration { hook, scope: scope.iter().map(|s| s.to_string()).collect() };
        match phase {
            Phase::Before => self.plugins[idx].before.push(reg),
            Phase::After => self.plugins[idx].after.push(reg),
        }
    }

    /// Rebuild the active lists from the enabled plugins, in registration order.
    pub fn filter(&mut self, enabled: &BTreeSet<String>) -> HookStats {
        let on: Vec<&PluginHooks> = self.plugins.iter().filter(|p| enabled.contains(&p.plugin)).collect();
        self.before = on.iter().flat_map(|p| p.before.iter().cloned()).collect();
        self.after = on.iter().flat_map(|p| p.after.iter().cloned()).collect();
        let stats = self.active_counts();
        debug!(before = stats.before, after = stats.after, "policy hooks filtered");
        stats
    }

    pub fn active_counts(&self) -> HookStats {
        HookStats { before: self.before.len(), after: self.after.len() }
    }

    pub fn plugin_names(&self) -> Vec<&str> { self.plugins.iter().map(|p| p.plugin.as_str()).collect() }

    /// First failing before-hook aborts the operation.
    pub async fn run_before(&self, request: &OperationRequest, ctx: &OperationContext<'_>) -> Result<(), HookError> {
        let event = HookEvent::Before { request };
        Self::run(&self.before, request.tag(), ctx, &event).await
    }

    /// First failing after-hook stops the remaining ones.
    pub async fn run_after(&self, request: &OperationRequest, result: &OperationResult, ctx: &OperationContext<'_>) -> Result<(), HookError> {
        let event = HookEvent::After { request, result };
        Self::run(&self.after, request.tag(), ctx, &event).await
    }

    async fn run(list: &[Registration], tag: &str, ctx: &OperationContext<'_>, event: &HookEvent<'_>) -> Result<(), HookError> {
        for reg in list.iter().filter(|r| r.applies_to(tag)) {
            if let Err(e) = reg.hook.on_event(ctx, event).await {
                warn!(hook = reg.hook.name(), tag, kind = e.kind(), error = %e, "hook rejected operation");
                return Err(e);
            }
            debug!(hook = reg.hook.name(), tag, "hook passed");
        }
        Ok(())
    }
}
