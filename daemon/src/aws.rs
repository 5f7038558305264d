//! SDK configuration for one listener's account and region.

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_sqs::config::Credentials;
use tracing::info;

use crate::config::CredentialsConfig;

/// Build the shared SDK configuration used by both the queue and the
/// autoscaling clients of a listener.
pub async fn sdk_config(credentials: &CredentialsConfig, region: &str) -> SdkConfig {
    let loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));

    let loader = match credentials {
        CredentialsConfig::Static {
            access_key_id,
            secret_access_key,
            session_token,
        } => loader.credentials_provider(Credentials::new(
            access_key_id,
            secret_access_key,
            session_token.clone(),
            None,
            "lifeguard-static",
        )),
        CredentialsConfig::Profile { profile_name } => loader.profile_name(profile_name),
        CredentialsConfig::Default => loader,
    };

    info!(region = %region, source = credentials.source(), "aws_config_loaded");
    loader.load().await
}

impl CredentialsConfig {
    /// Short label for logs; never includes secrets.
    pub fn source(&self) -> &'static str {
        match self {
            CredentialsConfig::Static { .. } => "static",
            CredentialsConfig::Profile { .. } => "profile",
            CredentialsConfig::Default => "default",
        }
    }
}
