// consentry/src/engine.rs

use std::sync::Arc;
use tracing::info;

use crate::{
    config::{ApprovalRules, Config},
    contract::{ResponseContract, SchemaNegotiator},
    error::EngineError,
    executor,
    hooks::{Hook, Phase, PolicyRegistry},
    operation::{OperationContext, OperationRequest, OperationResult},
    operations::core_types,
    plugins::{self, Plugin},
    registry::{CapabilityRegistry, Descriptor},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginSummary {
    pub name: String,
    pub description: String,
    pub enabled: bool,
}

/// Registries, negotiator and approval rules for one session. Built once from
/// the static plugin catalog; [`refresh`](Self::refresh) aligns it with a config.
pub struct Engine {
    registry: CapabilityRegistry,
    negotiator: SchemaNegotiator,
    hooks: PolicyRegistry,
    approvals: ApprovalRules,
    contract: Option<Arc<ResponseContract>>,
    plugins: Vec<(String, String)>,
}

impl Default for Engine {
    fn default() -> Self { Self::with_plugins(plugins::catalog()) }
}

impl Engine {
    pub fn new() -> Self { Self::default() }

    /// Core types plus the given plugins.
    pub fn with_plugins(plugins: Vec<Plugin>) -> Self {
        let mut registry = CapabilityRegistry::new();
        for d in core_types() { registry.register(d); }
        let mut hooks = PolicyRegistry::new();
        plugins::install(&plugins, &mut registry, &mut hooks);
        Self {
            registry,
            negotiator: SchemaNegotiator::new(),
            hooks,
            approvals: ApprovalRules::default(),
            contract: None,
            plugins: plugins.iter().map(|p| (p.name.to_string(), p.description.to_string())).collect(),
        }
    }

    /// An engine with no types at all; everything comes from `register_*`.
    pub fn empty() -> Self {
        Self {
            registry: CapabilityRegistry::new(),
            negotiator: SchemaNegotiator::new(),
            hooks: PolicyRegistry::new(),
            approvals: ApprovalRules::default(),
            contract: None,
            plugins: vec![],
        }
    }

    pub fn register_type(&mut self, d: Descriptor) {
        self.registry.register(d);
        self.invalidate();
    }

    pub fn register_hook(&mut self, plugin: &str, phase: Phase, scope: &[&str], hook: Arc<dyn Hook>) {
        self.hooks.register(plugin, phase, scope, hook);
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.negotiator.invalidate();
        self.contract = None;
    }

    /// Contract for `config`. When it changed, hooks are re-filtered and
    /// approval rules recompiled for the same config.
    pub fn refresh(&mut self, config: &Config) -> Result<Arc<ResponseContract>, EngineError> {
        let contract = self.negotiator.get_contract(&mut self.registry, config)?;
        if self.contract.as_ref().is_some_and(|c| Arc::ptr_eq(c, &contract)) {
            return Ok(contract);
        }
        let stats = self.hooks.filter(&config.enabled_plugins());
        self.approvals = ApprovalRules::from_config(config).map_err(|e| EngineError::Config(format!("{e:#}")))?;
        info!(types = contract.tags().len(), before = stats.before, after = stats.after, "engine refreshed");
        self.contract = Some(contract.clone());
        Ok(contract)
    }

    pub fn contract(&self) -> Option<&Arc<ResponseContract>> { self.contract.as_ref() }
    pub fn registry(&self) -> &CapabilityRegistry { &self.registry }
    pub fn hooks(&self) -> &PolicyRegistry { &self.hooks }
    pub fn approvals(&self) -> &ApprovalRules { &self.approvals }

    pub fn plugin_summaries(&self, config: &Config) -> Vec<PluginSummary> {
        let enabled = config.enabled_plugins();
        self.plugins
            .iter()
            .map(|(name, description)| PluginSummary {
                name: name.clone(),
                description: description.clone(),
                enabled: enabled.contains(name),
            })
            .collect()
    }

    /// Drive one request through the executor. A tag that went inactive since
    /// parsing yields a rejected result rather than running.
    pub async fn execute(&self, request: &Arc<OperationRequest>, ctx: &OperationContext<'_>) -> OperationResult {
        match self.registry.get(request.tag()) {
            Some(kind) => executor::run(kind.as_ref(), request, &self.hooks, ctx).await,
            None => OperationResult::for_request(request).with_error(format!("operation type '{}' is not active", request.tag())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_is_stable_for_equal_configs() {
        let mut e = Engine::new();
        let cfg = Config::default();
        let a = e.refresh(&cfg).unwrap();
        let b = e.refresh(&cfg).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.tags().contains("read"));
        assert!(!a.tags().contains("tree"));
    }

    #[test]
    fn enabling_a_plugin_adds_types_and_hooks() {
        let mut e = Engine::new();
        let mut cfg = Config::default();
        cfg.enable_plugin("tree");
        cfg.enable_plugin("shellcheck");
        let c = e.refresh(&cfg).unwrap();
        assert!(c.tags().contains("tree"));
        assert_eq!(e.hooks().active_counts().before, 1);
        let summaries = e.plugin_summaries(&cfg);
        assert!(summaries.iter().any(|p| p.name == "audit_log" && !p.enabled));
    }

    #[test]
    fn empty_engine_cannot_negotiate() {
        let mut e = Engine::empty();
        assert!(matches!(e.refresh(&Config::default()), Err(EngineError::EmptyCapabilitySet)));
    }

    #[test]
    fn bad_approval_patterns_surface_as_config_errors() {
        let mut e = Engine::new();
        let cfg = Config { auto_allowed_paths: vec!["[".into()], ..Default::default() };
        assert!(matches!(e.refresh(&cfg), Err(EngineError::Config(_))));
    }

    #[test]
    fn refresh_recompiles_approvals_when_the_config_changes() {
        let mut e = Engine::new();
        e.refresh(&Config::default()).unwrap();
        assert!(!e.approvals().command_allowed("ls"));

        let cfg = Config {
            auto_execute_commands: vec!["ls".into()],
            auto_allowed_paths: vec!["/srv/**".into()],
            ..Default::default()
        };
        e.refresh(&cfg).unwrap();
        assert!(e.approvals().command_allowed("ls -la"));
        assert!(e.approvals().path_allowed(std::path::Path::new("/srv/data/x")));

        e.refresh(&Config::default()).unwrap();
        assert!(!e.approvals().command_allowed("ls"));
    }
}
