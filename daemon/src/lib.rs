//! Lifeguard - SQS-driven automation for autoscaling and alarm notifications.
//!
//! The library holds everything the `lifeguard` binary wires together:
//! configuration, the queue transport, message classification, the plugin
//! pipeline and the per-account listeners.
//!
//! ## Architecture
//!
//! ```text
//! SNS → SQS queues → Listener (poll loop per queue)
//!                      → Processor (task per message)
//!                          → Message (AutoScaling | Alarm) → plugins → finalize (ack or leave)
//! ```

pub mod aws;
pub mod config;
pub mod directory;
pub mod error;
pub mod finalize;
pub mod listener;
pub mod message;
pub mod plugin;
pub mod processor;
pub mod queue;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::{Config, Settings};
pub use directory::{
    AwsGroupDirectory, AwsInstanceDirectory, Directories, GroupDirectory, InstanceDetails,
    InstanceDirectory,
};
pub use error::{ConfigError, MessageError, PluginError, QueueError, UpstreamError};
pub use listener::{Counters, Listener};
pub use message::{ActionKey, Message, MessageKind};
pub use plugin::{ActionPlugin, ActionTable, PluginDescriptor, PluginRegistry};
pub use processor::{ProcessOutcome, Processor};
pub use queue::{QueueClient, RawMessage, ResolvedQueue, SqsQueueClient};
