//! Metric alarm state transitions.
//!
//! Alarm notifications name an autoscaling group in their trigger dimensions
//! rather than an instance; the instance is looked up from the group.

use serde::Deserialize;
use tracing::debug;

use super::ActionKey;
use crate::directory::GroupDirectory;
use crate::error::MessageError;
use crate::retry::retry;

/// Dimension name identifying the autoscaling group behind an alarm.
pub const GROUP_DIMENSION: &str = "AutoScalingGroupName";

/// The nested `Message` of an alarm notification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AlarmEvent {
    #[serde(default)]
    pub alarm_name: Option<String>,
    #[serde(default)]
    pub new_state_value: Option<String>,
    #[serde(default)]
    pub old_state_value: Option<String>,
    #[serde(default)]
    pub new_state_reason: Option<String>,
    #[serde(default)]
    pub trigger: Option<Trigger>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Trigger {
    #[serde(default)]
    pub metric_name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl AlarmEvent {
    pub fn parse(raw: &str) -> Result<Self, MessageError> {
        serde_json::from_str(raw).map_err(MessageError::Notification)
    }

    /// Only a transition into `ALARM` terminates.
    pub fn action(&self) -> Option<ActionKey> {
        (self.new_state_value.as_deref() == Some("ALARM")).then_some(ActionKey::Terminate)
    }

    pub fn auto_scaling_group_name(&self) -> Result<&str, MessageError> {
        self.trigger
            .as_ref()
            .and_then(|t| t.dimensions.iter().find(|d| d.name == GROUP_DIMENSION))
            .map(|d| d.value.as_str())
            .ok_or(MessageError::AutoScalingGroupNameNotFound)
    }

    /// Find the single instance in the alarm's autoscaling group.
    pub async fn lookup_instance_id(
        &self,
        directory: &dyn GroupDirectory,
        attempts: u32,
    ) -> Result<Option<String>, MessageError> {
        let group = self.auto_scaling_group_name()?;
        let mut ids = retry(attempts, || directory.group_instance_ids(group)).await?;

        debug!(group = %group, instances = ?ids, "alarm_group_instances");
        match ids.len() {
            0 | 1 => Ok(ids.pop()),
            count => Err(MessageError::TooManyInstances {
                group: group.to_string(),
                count,
            }),
        }
    }
}
