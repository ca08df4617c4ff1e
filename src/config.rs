use anyhow::{Context, Result};
use directories::ProjectDirs;
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{recommended_watcher, Event, RecursiveMode, Watcher};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{collections::{BTreeMap, BTreeSet}, fs, path::{Path, PathBuf}, sync::Arc};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::fs_util::expand_tilde;

pub const DEFAULT_ENCODER: &str = "cl100k_base";

/// Effective configuration, merged system -> user -> workspace -> runtime.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Plugins by name; a plugin is enabled when present and not switched off.
    pub plugins: BTreeMap<String, PluginConfig>,
    /// Removes the `command` operation type from the active set.
    pub no_commands: bool,
    /// Glob patterns; matching paths skip the consent prompt.
    pub auto_allowed_paths: Vec<String>,
    /// Regexes anchored at the start of the command; matches skip the consent prompt.
    pub auto_execute_commands: Vec<String>,
    /// Send command output without asking.
    pub auto_send: bool,
    /// Token budget of the context window; `<= 0` disables pruning.
    pub max_context: i64,
    /// Token encoding identifier (`cl100k_base`, `o200k_base`, or a model name).
    pub encoder: String,
    pub verbose: bool,
    pub model: ModelConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plugins: BTreeMap::new(),
            no_commands: false,
            auto_allowed_paths: vec![],
            auto_execute_commands: vec![],
            auto_send: false,
            max_context: -1,
            encoder: DEFAULT_ENCODER.into(),
            verbose: false,
            model: ModelConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PluginConfig {
    pub enabled: bool,
    /// Free-form plugin options.
    #[serde(flatten)]
    pub options: BTreeMap<String, serde_json::Value>,
}

impl Default for PluginConfig {
    fn default() -> Self { Self { enabled: true, options: BTreeMap::new() } }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub name: Option<String>,
    pub url: Option<String>,
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self { Self { name: None, url: None, temperature: 0.0 } }
}

impl Config {
    /// Names of the plugins switched on by this configuration.
    pub fn enabled_plugins(&self) -> BTreeSet<String> {
        self.plugins.iter().filter(|(_, p)| p.enabled).map(|(k, _)| k.clone()).collect()
    }

    pub fn enable_plugin(&mut self, name: &str) {
        self.plugins.insert(name.into(), PluginConfig::default());
    }

    /// SHA-256 over the canonical JSON form. Field order is fixed by the struct
    /// and maps are ordered, so equal configs hash equally.
    pub fn hash(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        format!("{:x}", Sha256::digest(canonical.as_bytes()))
    }
}

/// One configuration source. Unset fields leave lower layers untouched.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ConfigLayer {
    pub plugins: BTreeMap<String, PluginConfig>,
    pub no_commands: Option<bool>,
    pub auto_allowed_paths: Option<Vec<String>>,
    pub auto_execute_commands: Option<Vec<String>>,
    pub auto_send: Option<bool>,
    pub max_context: Option<i64>,
    pub encoder: Option<String>,
    pub verbose: Option<bool>,
    pub model: ModelLayer,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ModelLayer {
    pub name: Option<String>,
    pub url: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scope { System, User, Workspace, Runtime }

fn merge(a: &mut Config, b: &ConfigLayer) {
    fn overlay<T: Clone>(dst: &mut T, src: &Option<T>) { if let Some(v) = src { *dst = v.clone(); } }
    for (k, v) in &b.plugins { a.plugins.insert(k.clone(), v.clone()); }
    overlay(&mut a.no_commands, &b.no_commands);
    overlay(&mut a.auto_allowed_paths, &b.auto_allowed_paths);
    overlay(&mut a.auto_execute_commands, &b.auto_execute_commands);
    overlay(&mut a.auto_send, &b.auto_send);
    overlay(&mut a.max_context, &b.max_context);
    overlay(&mut a.encoder, &b.encoder);
    overlay(&mut a.verbose, &b.verbose);
    if b.model.name.is_some() { a.model.name = b.model.name.clone(); }
    if b.model.url.is_some() { a.model.url = b.model.url.clone(); }
    overlay(&mut a.model.temperature, &b.model.temperature);
}

fn merge_layers(a: &mut ConfigLayer, b: &ConfigLayer) {
    fn overlay<T: Clone>(dst: &mut Option<T>, src: &Option<T>) { if src.is_some() { *dst = src.clone(); } }
    for (k, v) in &b.plugins { a.plugins.insert(k.clone(), v.clone()); }
    overlay(&mut a.no_commands, &b.no_commands);
    overlay(&mut a.auto_allowed_paths, &b.auto_allowed_paths);
    overlay(&mut a.auto_execute_commands, &b.auto_execute_commands);
    overlay(&mut a.auto_send, &b.auto_send);
    overlay(&mut a.max_context, &b.max_context);
    overlay(&mut a.encoder, &b.encoder);
    overlay(&mut a.verbose, &b.verbose);
    overlay(&mut a.model.name, &b.model.name);
    overlay(&mut a.model.url, &b.model.url);
    overlay(&mut a.model.temperature, &b.model.temperature);
}

fn config_paths(workspace_root: &Path) -> Result<(PathBuf, PathBuf, PathBuf)> {
    let proj = ProjectDirs::from("dev", "consentry", "consentry").context("ProjectDirs not available")?;
    let user = proj.config_dir().join("config.toml");
    let system = if cfg!(target_os = "windows") {
        PathBuf::from(r"C:\ProgramData\consentry\config.toml")
    } else {
        PathBuf::from("/etc/consentry/config.toml")
    };
    let workspace = workspace_root.join(".consentry").join("config.toml");
    Ok((system, user, workspace))
}

#[derive(Clone, Default)]
struct LayerPaths {
    system: Option<PathBuf>,
    user: Option<PathBuf>,
    workspace: Option<PathBuf>,
}

impl LayerPaths {
    fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        [&self.system, &self.user, &self.workspace].into_iter().flatten()
    }
}

#[derive(Clone)]
pub struct ConfigManager {
    inner: Arc<RwLock<Config>>,
    tx: broadcast::Sender<Config>,
    _watcher: Arc<RwLock<Option<notify::RecommendedWatcher>>>,
    paths: LayerPaths,
    base: Config,
    runtime_overlay: Arc<RwLock<ConfigLayer>>,
}

impl ConfigManager {
    /// Load system, user and workspace layers and watch them for changes.
    pub fn load(workspace_root: impl AsRef<Path>) -> Result<Self> {
        let (system, user, workspace) = config_paths(workspace_root.as_ref())?;
        let cm = Self::build(
            LayerPaths { system: Some(system), user: Some(user), workspace: Some(workspace) },
            Config::default(),
        );
        cm.reload_all()?;
        cm.start_watch()?;
        Ok(cm)
    }

    /// A manager with no backing files; only the runtime overlay applies on top of `base`.
    pub fn in_memory(base: Config) -> Self {
        let cm = Self::build(LayerPaths::default(), base);
        *cm.inner.write() = cm.base.clone();
        cm
    }

    fn build(paths: LayerPaths, base: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(base.clone())),
            tx: broadcast::channel(64).0,
            _watcher: Arc::new(RwLock::new(None)),
            paths,
            base,
            runtime_overlay: Arc::new(RwLock::new(ConfigLayer::default())),
        }
    }

    fn read_file(path: &Path) -> Option<ConfigLayer> {
        let text = fs::read_to_string(path).ok()?;
        match toml::from_str::<ConfigLayer>(&text) {
            Ok(layer) => Some(layer),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unparsable config layer");
                None
            }
        }
    }

    fn compose(paths: &LayerPaths, base: &Config, runtime: &ConfigLayer) -> Config {
        let mut merged = base.clone();
        for p in paths.iter() {
            if let Some(layer) = Self::read_file(p) { merge(&mut merged, &layer); }
        }
        merge(&mut merged, runtime);
        merged
    }

    pub fn reload_all(&self) -> Result<()> {
        let merged = Self::compose(&self.paths, &self.base, &self.runtime_overlay.read());
        debug!(hash = %merged.hash(), "configuration reloaded");
        *self.inner.write() = merged.clone();
        let _ = self.tx.send(merged);
        Ok(())
    }

    fn start_watch(&self) -> Result<()> {
        let paths = self.paths.clone();
        let base = self.base.clone();
        let tx = self.tx.clone();
        let inner = self.inner.clone();
        let runtime_overlay = self.runtime_overlay.clone();

        let mut watcher = recommended_watcher(move |res: Result<Event, _>| {
            if res.is_err() { return; }
            let merged = ConfigManager::compose(&paths, &base, &runtime_overlay.read());
            *inner.write() = merged.clone();
            let _ = tx.send(merged);
        })?;
        for p in self.paths.iter() {
            match p.parent() {
                Some(dir) if dir.is_dir() => watcher.watch(dir, RecursiveMode::NonRecursive)?,
                _ => debug!(path = %p.display(), "config directory absent; not watching"),
            }
        }
        *self._watcher.write() = Some(watcher);
        Ok(())
    }

    pub fn get(&self) -> Config { self.inner.read().clone() }
    pub fn subscribe(&self) -> broadcast::Receiver<Config> { self.tx.subscribe() }

    pub fn apply_runtime_overlay(&self, patch: ConfigLayer) -> Result<()> {
        {
            let mut rt = self.runtime_overlay.write();
            merge_layers(&mut rt, &patch);
        }
        self.reload_all()
    }

    pub fn write_patch(&self, scope: Scope, patch: &ConfigLayer) -> Result<()> {
        let path = match scope {
            Scope::System => self.paths.system.as_ref(),
            Scope::User => self.paths.user.as_ref(),
            Scope::Workspace => self.paths.workspace.as_ref(),
            Scope::Runtime => anyhow::bail!("Runtime scope is ephemeral; cannot persist"),
        }
        .context("no file backs this configuration scope")?;
        if let Some(dir) = path.parent() { fs::create_dir_all(dir)?; }
        let mut merged = Self::read_file(path).unwrap_or_default();
        merge_layers(&mut merged, patch);
        let text = toml::to_string_pretty(&merged).context("serialize toml")?;
        fs::write(path, text).with_context(|| format!("write {}", path.display()))?;
        self.reload_all()
    }
}

/// Compiled auto-approval patterns.
#[derive(Clone, Debug)]
pub struct ApprovalRules {
    paths: GlobSet,
    commands: Vec<Regex>,
}

impl Default for ApprovalRules {
    fn default() -> Self { Self { paths: GlobSet::empty(), commands: vec![] } }
}

impl ApprovalRules {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let mut b = GlobSetBuilder::new();
        for p in &cfg.auto_allowed_paths {
            let expanded = expand_tilde(p);
            let pattern = expanded.to_string_lossy();
            b.add(Glob::new(&pattern).with_context(|| format!("invalid glob: {}", p))?);
        }
        let commands = cfg
            .auto_execute_commands
            .iter()
            .map(|p| Regex::new(&format!("^(?:{p})")).with_context(|| format!("invalid regex: {}", p)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { paths: b.build()?, commands })
    }

    pub fn path_allowed(&self, abs_path: &Path) -> bool { self.paths.is_match(abs_path) }

    pub fn command_allowed(&self, command: &str) -> bool {
        let command = command.trim();
        self.commands.iter().any(|re| re.is_match(command))
    }
}
