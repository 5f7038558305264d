//! Autoscaling lifecycle notifications.
//!
//! ```text
//! Subject: Auto Scaling: termination for group "test2-AutoScalingGroup-1QDX3CNO5SU3D"
//! Message: {"Event":"autoscaling:EC2_INSTANCE_TERMINATE","EC2InstanceId":"i-08e58cf8",...}
//! ```

use serde::Deserialize;

use super::ActionKey;
use crate::error::MessageError;

/// The nested `Message` of an autoscaling notification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AutoScalingEvent {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default, rename = "EC2InstanceId")]
    pub ec2_instance_id: Option<String>,
    #[serde(default)]
    pub cause: Option<String>,
    #[serde(default)]
    pub auto_scaling_group_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status_code: Option<String>,
}

impl AutoScalingEvent {
    pub fn parse(raw: &str) -> Result<Self, MessageError> {
        serde_json::from_str(raw).map_err(MessageError::Notification)
    }

    /// Map the `Event` field to an action. Unknown events map to `None`.
    pub fn action(&self) -> Option<ActionKey> {
        match self.event.as_deref()? {
            "autoscaling:EC2_INSTANCE_LAUNCH" => Some(ActionKey::Launch),
            "autoscaling:EC2_INSTANCE_LAUNCH_ERROR" => Some(ActionKey::LaunchError),
            "autoscaling:EC2_INSTANCE_TERMINATE" => Some(ActionKey::Terminate),
            "autoscaling:EC2_INSTANCE_TERMINATE_ERROR" => Some(ActionKey::TerminateError),
            "autoscaling:TEST_NOTIFICATION" => Some(ActionKey::Test),
            _ => None,
        }
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.ec2_instance_id.as_deref()
    }
}
