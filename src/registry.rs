// consentry/src/registry.rs

use std::{collections::BTreeSet, sync::Arc};
use tracing::debug;

use crate::{config::Config, operation::OperationType};

pub const COMMAND_TAG: &str = "command";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Origin {
    Core,
    Plugin(String),
}

#[derive(Clone)]
pub struct Descriptor {
    pub origin: Origin,
    pub kind: Arc<dyn OperationType>,
}

impl Descriptor {
    pub fn core(kind: Arc<dyn OperationType>) -> Self { Self { origin: Origin::Core, kind } }
    pub fn plugin(name: &str, kind: Arc<dyn OperationType>) -> Self {
        Self { origin: Origin::Plugin(name.into()), kind }
    }
    pub fn tag(&self) -> &str { self.kind.tag() }
}

/// Every known operation type, and the subset currently offered to the model.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    all: Vec<Descriptor>,
    active: Vec<Descriptor>,
}

impl CapabilityRegistry {
    pub fn new() -> Self { Self::default() }

    /// Add a type; an existing tag is replaced in place.
    pub fn register(&mut self, d: Descriptor) {
        match self.all.iter_mut().find(|x| x.tag() == d.tag()) {
            Some(slot) => *slot = d,
            None => self.all.push(d),
        }
    }

    pub fn activate(&mut self, pred: impl Fn(&Descriptor) -> bool) {
        self.active = self.all.iter().filter(|d| pred(d)).cloned().collect();
    }

    /// Core types always, plugin types when enabled, minus `command` when disabled.
    pub fn activate_for(&mut self, cfg: &Config) {
        let enabled = cfg.enabled_plugins();
        self.activate(|d| {
            let on = match &d.origin {
                Origin::Core => true,
                Origin::Plugin(p) => enabled.contains(p),
            };
            on && !(cfg.no_commands && d.tag() == COMMAND_TAG)
        });
        debug!(active = ?self.active_tags(), "capability set activated");
    }

    /// Active type by tag.
    pub fn get(&self, tag: &str) -> Option<Arc<dyn OperationType>> {
        self.active.iter().find(|d| d.tag() == tag).map(|d| d.kind.clone())
    }

    pub fn active(&self) -> &[Descriptor] { &self.active }
    pub fn all(&self) -> &[Descriptor] { &self.all }
    pub fn active_tags(&self) -> BTreeSet<String> { self.active.iter().map(|d| d.tag().to_string()).collect() }
    pub fn is_empty(&self) -> bool { self.active.is_empty() }
}
