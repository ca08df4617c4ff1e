// consentry/src/plugins/mod.rs

//! Static plugin catalog. A plugin contributes operation types and/or hooks;
//! config enables it by name.

pub mod audit_log;
pub mod shellcheck;
pub mod tree;

use std::sync::Arc;
use tracing::debug;

use crate::{
    hooks::{Hook, Phase, PolicyRegistry},
    operation::OperationType,
    registry::{CapabilityRegistry, Descriptor},
};

pub struct HookSpec {
    pub phase: Phase,
    /// Tags the hook applies to; empty means all.
    pub scope: Vec<&'static str>,
    pub hook: Arc<dyn Hook>,
}

pub struct Plugin {
    pub name: &'static str,
    pub description: &'static str,
    pub operation_types: Vec<Arc<dyn OperationType>>,
    pub hooks: Vec<HookSpec>,
}

pub fn catalog() -> Vec<Plugin> {
    vec![shellcheck::plugin(), tree::plugin(), audit_log::plugin()]
}

/// Register every plugin's types and hooks. Nothing becomes active until
/// the registries are activated/filtered for a config.
pub fn install(plugins: &[Plugin], registry: &mut CapabilityRegistry, hooks: &mut PolicyRegistry) {
    for p in plugins {
        for t in &p.operation_types {
            registry.register(Descriptor::plugin(p.name, t.clone()));
        }
        for h in &p.hooks {
            hooks.register(p.name, h.phase, &h.scope, h.hook.clone());
        }
        debug!(plugin = p.name, types = p.operation_types.len(), hooks = p.hooks.len(), "plugin installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn catalog_names_are_unique() {
        let mut names: Vec<_> = catalog().iter().map(|p| p.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), catalog().len());
    }

    #[test]
    fn installed_plugins_stay_inactive_until_enabled() {
        let (mut reg, mut hooks) = (CapabilityRegistry::new(), PolicyRegistry::new());
        install(&catalog(), &mut reg, &mut hooks);
        reg.activate_for(&Config::default());
        assert!(reg.get("tree").is_none());
        assert_eq!(hooks.filter(&Config::default().enabled_plugins()).before, 0);

        let mut cfg = Config::default();
        cfg.enable_plugin("tree");
        cfg.enable_plugin("shellcheck");
        reg.activate_for(&cfg);
        assert!(reg.get("tree").is_some());
        assert_eq!(hooks.filter(&cfg.enabled_plugins()).before, 1);
    }
}
