//! No-op plugin, useful for test notifications and for checking wiring.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{ActionPlugin, PluginDescriptor};
use crate::config::Settings;
use crate::error::PluginError;
use crate::message::{ActionKey, Message};

pub const ID: &str = "dummy";

/// Marker left on messages the dummy plugin has seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handled(pub ActionKey);

pub struct DummyPlugin {
    message: Arc<Message>,
    settings: Arc<Settings>,
}

impl DummyPlugin {
    /// Accepts either message variant.
    pub fn build(
        message: Arc<Message>,
        settings: Arc<Settings>,
    ) -> Result<Box<dyn ActionPlugin>, PluginError> {
        Ok(Box::new(DummyPlugin { message, settings }))
    }
}

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new(ID, DummyPlugin::build).with_configure(|action, _| {
        debug!(plugin = ID, action = %action, "dummy_configured");
        Ok(())
    })
}

#[async_trait]
impl ActionPlugin for DummyPlugin {
    fn name(&self) -> &str {
        ID
    }

    async fn perform(&self, action: ActionKey) -> Result<(), PluginError> {
        self.message.extensions().insert(Handled(action));

        let instance_name = match self.message.instance_name().await {
            Ok(name) => name,
            Err(e) => {
                warn!(plugin = ID, error = %e, "dummy_instance_lookup_failed");
                None
            }
        };

        info!(
            plugin = ID,
            action = %action,
            subject = %self.message.subject(),
            instance_id = ?self.message.instance_id(),
            instance_name = ?instance_name,
            dry_run = self.settings.dry_run,
            "dummy_performed"
        );
        Ok(())
    }
}
