//! Configuration loading.
//!
//! The daemon reads a JSON document (path from `LIFEGUARD_CONFIG`), fills in
//! defaults, then applies environment overrides for the global knobs. The
//! result is immutable for the lifetime of the process.

use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::error::ConfigError;
use crate::message::ActionKey;

/// Default location of the configuration document.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/lifeguard/config.json";

/// Credential entry name implied when none are configured.
pub const DEFAULT_CREDENTIALS: &str = "default";

/// Longest accepted long-poll wait, in seconds (SQS limit).
pub const MAX_WAIT_TIME: i32 = 20;

/// Longest accepted visibility timeout, in seconds (SQS limit).
pub const MAX_VISIBILITY_TIMEOUT: i32 = 43_200;

/// Upper bound for every other timeout or interval, in seconds.
pub const MAX_INTERVAL_SECS: f64 = 7.0 * 24.0 * 3600.0;

/// Full daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Global knobs shared by every listener
    #[serde(flatten)]
    pub settings: Settings,

    /// Named credential entries referenced by listeners
    #[serde(default)]
    pub aws_credentials: BTreeMap<String, CredentialsConfig>,

    /// One entry per monitored account, keyed by listener name
    #[serde(default)]
    pub listeners: BTreeMap<String, ListenerConfig>,

    /// Ordered plugin identifiers per action
    #[serde(default)]
    pub actions: BTreeMap<ActionKey, Vec<String>>,
}

/// Global knobs, shared as `Arc<Settings>`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Run every plugin phase but never acknowledge messages
    #[serde(default)]
    pub dry_run: bool,

    /// Leave failed messages on the queue for inspection or redelivery
    #[serde(default = "default_true")]
    pub save_failures: bool,

    /// Default long-poll wait in seconds
    #[serde(default = "default_wait_time")]
    pub wait_time: i32,

    /// Default visibility timeout in seconds
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout: i32,

    /// Upper bound in seconds for a batch of message handlers.
    /// Falls back to the visibility timeout.
    #[serde(default)]
    pub listen_timeout: Option<f64>,

    /// Interval in seconds between stats lines
    #[serde(default = "default_stats_interval")]
    pub stats_interval: u64,

    /// Upper bound in seconds for each queue attribute update at startup
    #[serde(default = "default_set_attributes_timeout")]
    pub sqs_set_attributes_timeout: f64,

    /// Attempts for upstream lookups made while building messages
    #[serde(default = "default_upstream_retries")]
    pub upstream_retries: u32,
}

/// One account's monitoring unit.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListenerConfig {
    /// Name of an entry in `aws_credentials`
    #[serde(default)]
    pub credentials: String,

    /// AWS region
    #[serde(default)]
    pub region: String,

    /// Queue names or `/regex/flags` patterns
    #[serde(default)]
    pub queues: Vec<String>,

    /// Overrides the global wait time
    #[serde(default)]
    pub wait_time: Option<i32>,

    /// Overrides the global visibility timeout
    #[serde(default)]
    pub visibility_timeout: Option<i32>,
}

/// How a listener obtains AWS credentials.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialsConfig {
    /// Static keys
    Static {
        access_key_id: String,
        secret_access_key: String,
        #[serde(default)]
        session_token: Option<String>,
    },
    /// A named profile from the shared credentials file
    Profile { profile_name: String },
    /// The SDK's default provider chain
    Default,
}

fn default_true() -> bool {
    true
}

fn default_wait_time() -> i32 {
    20
}

fn default_visibility_timeout() -> i32 {
    300
}

fn default_stats_interval() -> u64 {
    600
}

fn default_set_attributes_timeout() -> f64 {
    10.0
}

fn default_upstream_retries() -> u32 {
    2
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            dry_run: false,
            save_failures: true,
            wait_time: default_wait_time(),
            visibility_timeout: default_visibility_timeout(),
            listen_timeout: None,
            stats_interval: default_stats_interval(),
            sqs_set_attributes_timeout: default_set_attributes_timeout(),
            upstream_retries: default_upstream_retries(),
        }
    }
}

impl Settings {
    /// Bound on a batch of message handlers.
    pub fn listen_timeout(&self) -> Duration {
        let secs = self
            .listen_timeout
            .unwrap_or(f64::from(self.visibility_timeout));
        bounded_duration(secs)
    }

    /// Bound on each startup attribute update.
    pub fn set_attributes_timeout(&self) -> Duration {
        bounded_duration(self.sqs_set_attributes_timeout)
    }

    /// Interval between stats lines.
    pub fn stats_interval(&self) -> Duration {
        bounded_duration(self.stats_interval as f64).max(Duration::from_secs(1))
    }

    /// Reject timeouts and intervals that cannot be turned into a deadline.
    fn validate(&self) -> Result<(), ConfigError> {
        check_range("wait_time", f64::from(self.wait_time), f64::from(MAX_WAIT_TIME))?;
        check_range(
            "visibility_timeout",
            f64::from(self.visibility_timeout),
            f64::from(MAX_VISIBILITY_TIMEOUT),
        )?;
        if let Some(listen_timeout) = self.listen_timeout {
            check_range("listen_timeout", listen_timeout, MAX_INTERVAL_SECS)?;
        }
        check_range("stats_interval", self.stats_interval as f64, MAX_INTERVAL_SECS)?;
        check_range(
            "sqs_set_attributes_timeout",
            self.sqs_set_attributes_timeout,
            MAX_INTERVAL_SECS,
        )
    }
}

/// Seconds to a [`Duration`], clamped into `0..=MAX_INTERVAL_SECS`.
fn bounded_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.clamp(0.0, MAX_INTERVAL_SECS)).unwrap_or(Duration::ZERO)
}

fn check_range(key: &str, value: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidSetting {
            key: key.to_string(),
            value: value.to_string(),
            max,
        })
    }
}

impl ListenerConfig {
    /// Effective wait time, falling back to the global value.
    pub fn wait_time(&self, settings: &Settings) -> i32 {
        self.wait_time.unwrap_or(settings.wait_time)
    }

    /// Effective visibility timeout, falling back to the global value.
    pub fn visibility_timeout(&self, settings: &Settings) -> i32 {
        self.visibility_timeout
            .unwrap_or(settings.visibility_timeout)
    }
}

impl Config {
    /// Load from the file named by `LIFEGUARD_CONFIG`, apply environment
    /// overrides and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("LIFEGUARD_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        let mut config = Config::from_json(&raw)?;
        config.settings.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration document and fill in defaults.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_json::from_str(raw)?;

        if config.aws_credentials.is_empty() {
            config
                .aws_credentials
                .insert(DEFAULT_CREDENTIALS.to_string(), CredentialsConfig::Default);
        }

        for action in ActionKey::ALL {
            config.actions.entry(action).or_default();
        }

        Ok(config)
    }

    /// Reject listeners that cannot be started.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.settings.validate()?;

        if self.listeners.is_empty() {
            return Err(ConfigError::NoListeners);
        }

        for (name, listener) in &self.listeners {
            let mut missing = Vec::new();
            if listener.credentials.is_empty() {
                missing.push("credentials");
            }
            if listener.region.is_empty() {
                missing.push("region");
            }
            if listener.queues.is_empty() {
                missing.push("queues");
            }
            if !missing.is_empty() {
                return Err(ConfigError::MissingKeys {
                    listener: name.clone(),
                    keys: missing.join(", "),
                });
            }

            if let Some(wait_time) = listener.wait_time {
                check_range(
                    &format!("listeners.{name}.wait_time"),
                    f64::from(wait_time),
                    f64::from(MAX_WAIT_TIME),
                )?;
            }
            if let Some(visibility_timeout) = listener.visibility_timeout {
                check_range(
                    &format!("listeners.{name}.visibility_timeout"),
                    f64::from(visibility_timeout),
                    f64::from(MAX_VISIBILITY_TIMEOUT),
                )?;
            }

            if !self.aws_credentials.contains_key(&listener.credentials) {
                return Err(ConfigError::UndefinedCredential {
                    listener: name.clone(),
                    credential: listener.credentials.clone(),
                });
            }
        }

        Ok(())
    }
}

impl Settings {
    /// Override global knobs from environment variables.
    fn apply_env(&mut self) {
        override_from_env("DRY_RUN", &mut self.dry_run);
        override_from_env("SAVE_FAILURES", &mut self.save_failures);
        override_from_env("STATS_INTERVAL", &mut self.stats_interval);
        override_from_env("SQS_SET_ATTRIBUTES_TIMEOUT", &mut self.sqs_set_attributes_timeout);
        override_from_env("UPSTREAM_RETRIES", &mut self.upstream_retries);

        if let Some(timeout) = parse_env::<f64>("LISTEN_TIMEOUT") {
            self.listen_timeout = Some(timeout);
        }
    }
}

/// Replace `target` with the parsed value of `name`, if present and valid.
fn override_from_env<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Some(value) = parse_env(name) {
        *target = value;
    }
}

/// Parse an environment variable, warning when it is set but unparsable.
fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid override, keeping configured value");
            None
        }
    }
}
