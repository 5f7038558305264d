//! Action plugins and the static registry that wires them to actions.
//!
//! ## Contract
//!
//! ```text
//! startup:  configure(action)   once per (plugin, action) pair
//! message:  build(message) → run_before() → perform(action) → run_after()
//! ```
//!
//! A fresh plugin instance is built for every message. Each phase runs across
//! all configured plugins before the next phase starts.

pub mod dummy;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::{Config, Settings};
use crate::error::{ConfigError, PluginError};
use crate::message::{ActionKey, Message, MessageKind};

/// One unit of automation bound to one message.
#[async_trait]
pub trait ActionPlugin: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    async fn run_before(&self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn perform(&self, action: ActionKey) -> Result<(), PluginError>;

    async fn run_after(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Validates a plugin's configuration for one action at startup.
pub type ConfigureFn = dyn Fn(ActionKey, &Config) -> Result<(), String> + Send + Sync;

/// Builds a plugin instance bound to one message.
pub type BuildFn =
    dyn Fn(Arc<Message>, Arc<Settings>) -> Result<Box<dyn ActionPlugin>, PluginError> + Send + Sync;

/// Registry entry for one plugin.
#[derive(Clone)]
pub struct PluginDescriptor {
    id: String,
    configure: Arc<ConfigureFn>,
    build: Arc<BuildFn>,
}

impl PluginDescriptor {
    pub fn new<F>(id: impl Into<String>, build: F) -> Self
    where
        F: Fn(Arc<Message>, Arc<Settings>) -> Result<Box<dyn ActionPlugin>, PluginError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            id: id.into(),
            configure: Arc::new(|_, _| Ok(())),
            build: Arc::new(build),
        }
    }

    pub fn with_configure<F>(mut self, configure: F) -> Self
    where
        F: Fn(ActionKey, &Config) -> Result<(), String> + Send + Sync + 'static,
    {
        self.configure = Arc::new(configure);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn build(
        &self,
        message: Arc<Message>,
        settings: Arc<Settings>,
    ) -> Result<Box<dyn ActionPlugin>, PluginError> {
        (self.build)(message, settings)
    }
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor").field("id", &self.id).finish()
    }
}

/// Reject a message whose variant a plugin cannot handle.
pub fn require_kind(
    plugin: &str,
    message: &Message,
    expected: MessageKind,
) -> Result<(), PluginError> {
    if message.kind() == expected {
        Ok(())
    } else {
        Err(PluginError::InvalidMessage {
            plugin: plugin.to_string(),
            expected: expected.as_str(),
            actual: message.kind().as_str(),
        })
    }
}

/// Known plugins by identifier.
#[derive(Debug, Default, Clone)]
pub struct PluginRegistry {
    plugins: HashMap<String, PluginDescriptor>,
}

impl PluginRegistry {
    /// Registry holding the plugins shipped with the daemon.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.register(dummy::descriptor());
        registry
    }

    /// Add or replace a plugin.
    pub fn register(&mut self, descriptor: PluginDescriptor) {
        self.plugins.insert(descriptor.id.clone(), descriptor);
    }

    pub fn get(&self, id: &str) -> Option<&PluginDescriptor> {
        self.plugins.get(id)
    }

    /// Map every configured action to its plugins, configuring each
    /// (plugin, action) pair once. Unknown identifiers are reported together.
    pub fn resolve(&self, config: &Config) -> Result<ActionTable, ConfigError> {
        let mut table = BTreeMap::new();
        let mut missing = BTreeSet::new();
        let mut configured = HashSet::new();

        for (action, ids) in &config.actions {
            let mut plugins = Vec::with_capacity(ids.len());

            for id in ids {
                let Some(descriptor) = self.plugins.get(id) else {
                    missing.insert(id.clone());
                    continue;
                };

                if configured.insert((id.clone(), *action)) {
                    (descriptor.configure)(*action, config).map_err(|reason| {
                        ConfigError::PluginConfiguration {
                            plugin: id.clone(),
                            action: action.to_string(),
                            reason,
                        }
                    })?;
                    debug!(plugin = %id, action = %action, "plugin_configured");
                }

                plugins.push(descriptor.clone());
            }

            table.insert(*action, plugins);
        }

        if !missing.is_empty() {
            let missing: Vec<String> = missing.into_iter().collect();
            return Err(ConfigError::UnknownPlugins(missing.join(", ")));
        }

        let table = ActionTable { plugins: table };
        info!(plugins = ?table.summary(), "plugins_resolved");
        Ok(table)
    }
}

/// Immutable mapping of actions to their ordered plugins.
#[derive(Debug, Default, Clone)]
pub struct ActionTable {
    plugins: BTreeMap<ActionKey, Vec<PluginDescriptor>>,
}

impl ActionTable {
    pub fn new(plugins: BTreeMap<ActionKey, Vec<PluginDescriptor>>) -> Self {
        Self { plugins }
    }

    /// Plugins for `action`, in configured order.
    pub fn plugins_for(&self, action: ActionKey) -> &[PluginDescriptor] {
        self.plugins
            .get(&action)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn summary(&self) -> BTreeMap<&'static str, Vec<&str>> {
        self.plugins
            .iter()
            .map(|(action, plugins)| (action.as_str(), plugins.iter().map(|p| p.id()).collect()))
            .collect()
    }
}
