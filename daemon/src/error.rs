//! Error types shared across the daemon.
//!
//! Only [`ConfigError`] is allowed to stop the process. Everything else is
//! contained to the message or poll iteration that produced it.

use thiserror::Error;

/// Errors a retry loop may swallow and try again.
pub trait Transient {
    /// Whether the failure is worth an immediate retry.
    fn is_transient(&self) -> bool;
}

/// Fatal startup errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no listeners configured")]
    NoListeners,

    #[error("listener {listener} missing keys: {keys}")]
    MissingKeys { listener: String, keys: String },

    #[error("{key} = {value} is out of range (0..={max} seconds)")]
    InvalidSetting { key: String, value: String, max: f64 },

    #[error("listener {listener} references undefined credential '{credential}'")]
    UndefinedCredential { listener: String, credential: String },

    #[error("queue pattern '{spec}' is not of the form /regex/flags")]
    MalformedPattern { spec: String },

    #[error("unknown regex modifier '{modifier}' in '{spec}'")]
    UnsupportedModifier { spec: String, modifier: char },

    #[error("invalid queue pattern '{spec}': {source}")]
    InvalidPattern {
        spec: String,
        #[source]
        source: regex::Error,
    },

    #[error("plugins undefined for actions: {0}")]
    UnknownPlugins(String),

    #[error("plugin {plugin} rejected its configuration for {action}: {reason}")]
    PluginConfiguration {
        plugin: String,
        action: String,
        reason: String,
    },

    #[error("listing queues failed: {0}")]
    QueueListing(#[source] QueueError),

    #[error("setting attributes on {queue} failed: {source}")]
    QueueAttributes {
        queue: String,
        #[source]
        source: QueueError,
    },

    #[error("setting attributes on {queue} timed out after {seconds}s")]
    QueueAttributesTimeout { queue: String, seconds: f64 },
}

/// Errors surfaced by the queue transport.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    #[error("queue does not exist: {queue}")]
    QueueDoesNotExist { queue: String },

    #[error("receipt handle is invalid or expired")]
    ReceiptHandleInvalid,

    #[error("{operation} returned a service error: {message}")]
    Service { operation: String, message: String },

    #[error("{operation} failed before a response arrived: {message}")]
    Transport { operation: String, message: String },
}

impl Transient for QueueError {
    fn is_transient(&self) -> bool {
        matches!(self, QueueError::Service { .. } | QueueError::Transport { .. })
    }
}

/// Errors from non-queue upstream services (autoscaling lookups).
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("{operation} returned a service error: {message}")]
    Service { operation: String, message: String },

    #[error("{operation} failed before a response arrived: {message}")]
    Transport { operation: String, message: String },
}

impl Transient for UpstreamError {
    fn is_transient(&self) -> bool {
        true
    }
}

/// Errors while building a typed message out of a raw payload.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("unknown subject '{subject}'")]
    UnknownSubject { subject: String },

    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("malformed notification body: {0}")]
    Notification(#[source] serde_json::Error),

    #[error("alarm trigger has no AutoScalingGroupName dimension")]
    AutoScalingGroupNameNotFound,

    #[error("auto scaling group {group} has {count} instances, expected at most one")]
    TooManyInstances { group: String, count: usize },

    #[error("instance lookup failed: {0}")]
    Upstream(#[from] UpstreamError),
}

/// Errors raised by a plugin during construction or execution.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin {plugin} requires {expected} messages, got {actual}")]
    InvalidMessage {
        plugin: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("plugin {plugin} failed: {message}")]
    Failed { plugin: String, message: String },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}
