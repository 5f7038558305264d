//! Upstream lookups: autoscaling group membership for alarm messages and
//! EC2 instance details for plugins.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_autoscaling::error::{DisplayErrorContext, SdkError};
use aws_sdk_ec2::error::ProvideErrorMetadata;
use tracing::debug;

use crate::error::UpstreamError;

const NAME_TAG: &str = "Name";

/// Answers "which instances are in this autoscaling group?".
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// Instance ids currently in `group`. An unknown group yields an empty list.
    async fn group_instance_ids(&self, group: &str) -> Result<Vec<String>, UpstreamError>;
}

/// [`GroupDirectory`] backed by `aws-sdk-autoscaling`.
#[derive(Clone)]
pub struct AwsGroupDirectory {
    client: aws_sdk_autoscaling::Client,
}

impl AwsGroupDirectory {
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_autoscaling::Client::new(sdk_config),
        }
    }
}

fn map_sdk_error<E, R>(operation: &str, err: SdkError<E, R>) -> UpstreamError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::ServiceError(_) => UpstreamError::Service {
            operation: operation.to_string(),
            message,
        },
        _ => UpstreamError::Transport {
            operation: operation.to_string(),
            message,
        },
    }
}

#[async_trait]
impl GroupDirectory for AwsGroupDirectory {
    async fn group_instance_ids(&self, group: &str) -> Result<Vec<String>, UpstreamError> {
        let output = self
            .client
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(group)
            .send()
            .await
            .map_err(|e| map_sdk_error("DescribeAutoScalingGroups", e))?;

        let ids: Vec<String> = output
            .auto_scaling_groups()
            .first()
            .map(|g| {
                g.instances()
                    .iter()
                    // `instance_id()` is `&str` or `Option<&str>` depending on SDK release
                    .filter_map(|i| Option::<&str>::from(i.instance_id()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        debug!(group = %group, instances = ?ids, "autoscaling_group_described");
        Ok(ids)
    }
}

/// Snapshot of one EC2 instance as returned by `DescribeInstances`.
///
/// Terminated instances are still described (with `state` set), since
/// cleanup plugins need the name of an instance that is already gone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceDetails {
    pub instance_id: String,
    pub state: Option<String>,
    pub private_ip_address: Option<String>,
    pub private_dns_name: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl InstanceDetails {
    /// Value of the `Name` tag, if any.
    pub fn name(&self) -> Option<&str> {
        self.tags.get(NAME_TAG).map(String::as_str)
    }
}

/// Answers "what is this instance?".
#[async_trait]
pub trait InstanceDirectory: Send + Sync {
    /// Details for `instance_id`, or `None` when EC2 does not know it.
    async fn describe_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<InstanceDetails>, UpstreamError>;
}

/// [`InstanceDirectory`] backed by `aws-sdk-ec2`.
#[derive(Clone)]
pub struct AwsInstanceDirectory {
    client: aws_sdk_ec2::Client,
}

impl AwsInstanceDirectory {
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_ec2::Client::new(sdk_config),
        }
    }
}

fn is_unknown_instance(code: Option<&str>) -> bool {
    matches!(
        code,
        Some("InvalidInstanceID.NotFound") | Some("InvalidInstanceID.Malformed")
    )
}

#[async_trait]
impl InstanceDirectory for AwsInstanceDirectory {
    async fn describe_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<InstanceDetails>, UpstreamError> {
        let output = match self
            .client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) if is_unknown_instance(e.code()) => {
                debug!(instance_id = %instance_id, code = ?e.code(), "ec2_instance_unknown");
                return Ok(None);
            }
            Err(e) => return Err(map_sdk_error("DescribeInstances", e)),
        };

        let details = output
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .next()
            .map(|i| InstanceDetails {
                instance_id: i.instance_id().unwrap_or(instance_id).to_string(),
                state: i
                    .state()
                    .and_then(|s| s.name())
                    .map(|n| n.as_str().to_string()),
                private_ip_address: i.private_ip_address().map(str::to_string),
                private_dns_name: i.private_dns_name().map(str::to_string),
                tags: i
                    .tags()
                    .iter()
                    .filter_map(|t| {
                        Some((t.key()?.to_string(), t.value().unwrap_or_default().to_string()))
                    })
                    .collect(),
            });

        debug!(
            instance_id = %instance_id,
            found = details.is_some(),
            state = ?details.as_ref().and_then(|d| d.state.as_deref()),
            "ec2_instance_described"
        );
        Ok(details)
    }
}

/// The upstream lookups a listener hands to every message it builds.
#[derive(Clone)]
pub struct Directories {
    pub groups: Arc<dyn GroupDirectory>,
    pub instances: Arc<dyn InstanceDirectory>,
}

impl Directories {
    pub fn new(groups: Arc<dyn GroupDirectory>, instances: Arc<dyn InstanceDirectory>) -> Self {
        Self { groups, instances }
    }

    /// Both directories on one account's SDK configuration.
    pub fn aws(sdk_config: &aws_config::SdkConfig) -> Self {
        Self::new(
            Arc::new(AwsGroupDirectory::new(sdk_config)),
            Arc::new(AwsInstanceDirectory::new(sdk_config)),
        )
    }
}
