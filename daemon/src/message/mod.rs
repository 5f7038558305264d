//! Classified notification messages.
//!
//! A raw queue payload is an SNS envelope whose `Message` field holds the
//! actual notification as a JSON string. The `Subject` decides which variant
//! the payload is parsed as.
//!
//! ## Lifecycle
//!
//! ```text
//! RawMessage → sniff subject → build (parse, derive instance id + action) → plugins → finalize
//! ```

pub mod alarm;
pub mod auto_scaling;
pub mod extensions;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::config::Settings;
use crate::directory::{Directories, InstanceDetails, InstanceDirectory};
use crate::error::{MessageError, UpstreamError};
use crate::finalize::{self, Disposition};
use crate::queue::{QueueClient, RawMessage, ResolvedQueue};
use crate::retry::retry;

pub use alarm::AlarmEvent;
pub use auto_scaling::AutoScalingEvent;
pub use extensions::Extensions;

/// Recognized automation events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKey {
    Launch,
    LaunchError,
    Terminate,
    TerminateError,
    Test,
}

impl ActionKey {
    pub const ALL: [ActionKey; 5] = [
        ActionKey::Launch,
        ActionKey::LaunchError,
        ActionKey::Terminate,
        ActionKey::TerminateError,
        ActionKey::Test,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKey::Launch => "launch",
            ActionKey::LaunchError => "launch_error",
            ActionKey::Terminate => "terminate",
            ActionKey::TerminateError => "terminate_error",
            ActionKey::Test => "test",
        }
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which variant a raw payload should be parsed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    AutoScaling,
    Alarm,
}

impl MessageKind {
    /// Guess the variant from the raw body without parsing it.
    ///
    /// Looks at every `Subject` key, tolerating quoting, escaping and
    /// separators between the key and its value. Alarm subjects win.
    pub fn sniff(body: &str) -> Option<Self> {
        let subjects: Vec<&str> = subject_values(body).collect();

        if subjects.iter().any(|s| s.starts_with("ALARM")) {
            Some(MessageKind::Alarm)
        } else if subjects.iter().any(|s| s.starts_with("Auto Scaling:")) {
            Some(MessageKind::AutoScaling)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::AutoScaling => "auto_scaling",
            MessageKind::Alarm => "alarm",
        }
    }
}

/// Text following each `Subject` key and its separators.
fn subject_values(body: &str) -> impl Iterator<Item = &str> {
    body.match_indices("Subject").filter_map(move |(idx, key)| {
        let rest = &body[idx + key.len()..];
        let value = rest.trim_start_matches(|c: char| {
            c == '\\' || c == '"' || c == ':' || c.is_whitespace()
        });
        (value.len() < rest.len()).then_some(value)
    })
}

/// Best-effort subject for logging payloads that could not be classified.
pub fn sniff_subject(body: &str) -> String {
    subject_values(body)
        .next()
        .map(|v| v.split(['"', '\\']).next().unwrap_or_default().to_string())
        .unwrap_or_default()
}

/// Outer SNS notification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope {
    #[serde(default, rename = "Type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub topic_arn: Option<String>,
    pub subject: String,
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl Envelope {
    pub fn parse(body: &str) -> Result<Self, MessageError> {
        serde_json::from_str(body).map_err(MessageError::Envelope)
    }
}

/// Variant payload of a classified message.
#[derive(Debug, Clone)]
pub enum MessageEvent {
    AutoScaling(AutoScalingEvent),
    Alarm(AlarmEvent),
}

impl MessageEvent {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageEvent::AutoScaling(_) => MessageKind::AutoScaling,
            MessageEvent::Alarm(_) => MessageKind::Alarm,
        }
    }
}

/// A classified message bound to the queue it came from.
///
/// The action and instance id are fixed at construction. `failed` only ever
/// goes from false to true, and finalization happens at most once.
pub struct Message {
    queue: ResolvedQueue,
    receipt_handle: String,
    envelope: Envelope,
    event: MessageEvent,
    instance_id: Option<String>,
    action: Option<ActionKey>,
    failed: AtomicBool,
    errors: Mutex<Vec<String>>,
    finalized: AtomicBool,
    extensions: Mutex<Extensions>,
    instances: Arc<dyn InstanceDirectory>,
    attempts: u32,
    instance: OnceCell<Option<InstanceDetails>>,
    span: Span,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("queue", &self.queue)
            .field("receipt_handle", &self.receipt_handle)
            .field("envelope", &self.envelope)
            .field("event", &self.event)
            .field("instance_id", &self.instance_id)
            .field("action", &self.action)
            .field("failed", &self.failed())
            .field("errors", &self.errors())
            .field("finalized", &self.is_finalized())
            .field("instance", &self.instance.get())
            .finish_non_exhaustive()
    }
}

impl Message {
    /// Parse and classify a raw payload as `kind`.
    ///
    /// Alarm messages resolve their instance through the group directory,
    /// retrying transient failures up to `attempts` times. The same bound
    /// applies to later [`Message::instance_name`] lookups.
    pub async fn build(
        kind: MessageKind,
        raw: &RawMessage,
        queue: &ResolvedQueue,
        directories: &Directories,
        attempts: u32,
    ) -> Result<Self, MessageError> {
        let envelope = Envelope::parse(&raw.body)?;

        let (event, instance_id, action) = match kind {
            MessageKind::AutoScaling => {
                let event = AutoScalingEvent::parse(&envelope.message)?;
                info!(
                    subject = %envelope.subject,
                    cause = ?event.cause,
                    event = ?event.event,
                    "message_received"
                );
                let instance_id = event.instance_id().map(str::to_string);
                let action = event.action();
                (MessageEvent::AutoScaling(event), instance_id, action)
            }
            MessageKind::Alarm => {
                let event = AlarmEvent::parse(&envelope.message)?;
                info!(
                    subject = %envelope.subject,
                    alarm = ?event.alarm_name,
                    state = ?event.new_state_value,
                    "message_received"
                );
                let instance_id = event.lookup_instance_id(directories.groups.as_ref(), attempts).await?;
                let action = event.action();
                (MessageEvent::Alarm(event), instance_id, action)
            }
        };

        let span = info_span!(
            "message",
            listener = %queue.listener,
            queue = %queue.name,
            instance_id = ?instance_id,
            message_id = ?envelope.message_id,
            action = ?action.map(|a| a.as_str()),
        );

        let message = Message {
            queue: queue.clone(),
            receipt_handle: raw.receipt_handle.clone(),
            envelope,
            event,
            instance_id,
            action,
            failed: AtomicBool::new(false),
            errors: Mutex::new(Vec::new()),
            finalized: AtomicBool::new(false),
            extensions: Mutex::new(Extensions::default()),
            instances: Arc::clone(&directories.instances),
            attempts,
            instance: OnceCell::new(),
            span,
        };

        if message.action.is_none() {
            info!(parent: &message.span, subject = %message.envelope.subject, "message_ignored");
            message.fail(None);
        }

        Ok(message)
    }

    pub fn kind(&self) -> MessageKind {
        self.event.kind()
    }

    pub fn event(&self) -> &MessageEvent {
        &self.event
    }

    pub fn auto_scaling(&self) -> Option<&AutoScalingEvent> {
        match &self.event {
            MessageEvent::AutoScaling(event) => Some(event),
            MessageEvent::Alarm(_) => None,
        }
    }

    pub fn alarm(&self) -> Option<&AlarmEvent> {
        match &self.event {
            MessageEvent::Alarm(event) => Some(event),
            MessageEvent::AutoScaling(_) => None,
        }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn subject(&self) -> &str {
        &self.envelope.subject
    }

    pub fn message_id(&self) -> Option<&str> {
        self.envelope.message_id.as_deref()
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    pub fn action(&self) -> Option<ActionKey> {
        self.action
    }

    /// EC2 details for the message's instance, described at most once.
    ///
    /// `None` when the message names no instance or EC2 does not know it.
    /// Failed lookups are not cached, so a later call tries again.
    pub async fn instance(&self, attempts: u32) -> Result<Option<&InstanceDetails>, UpstreamError> {
        let Some(instance_id) = self.instance_id.as_deref() else {
            return Ok(None);
        };

        let details = self
            .instance
            .get_or_try_init(|| async {
                let details = retry(attempts, || self.instances.describe_instance(instance_id)).await?;
                debug!(
                    parent: &self.span,
                    found = details.is_some(),
                    state = ?details.as_ref().and_then(|d| d.state.as_deref()),
                    "instance_described"
                );
                Ok::<_, UpstreamError>(details)
            })
            .await?;
        Ok(details.as_ref())
    }

    /// `Name` tag of the message's instance.
    pub async fn instance_name(&self) -> Result<Option<&str>, UpstreamError> {
        Ok(self.instance(self.attempts).await?.and_then(|i| i.name()))
    }

    pub fn queue(&self) -> &ResolvedQueue {
        &self.queue
    }

    pub fn listener(&self) -> &str {
        &self.queue.listener
    }

    pub fn receipt_handle(&self) -> &str {
        &self.receipt_handle
    }

    /// Correlation span; plugin calls run inside it.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Mark processing as failed, optionally recording why.
    pub fn fail(&self, error: Option<String>) {
        debug!(parent: &self.span, error = ?error, "message_failed");
        if let Some(error) = error {
            self.errors.lock().push(error);
        }
        self.failed.store(true, Ordering::SeqCst);
    }

    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Errors recorded through [`Message::fail`].
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    /// Plugin side-table. Do not hold the guard across an await.
    pub fn extensions(&self) -> MutexGuard<'_, Extensions> {
        self.extensions.lock()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }

    /// Acknowledge or leave the message. Only the first call has an effect.
    pub async fn finalize(&self, client: &dyn QueueClient, settings: &Settings) -> Option<Disposition> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            warn!(parent: &self.span, "message_already_finalized");
            return None;
        }

        let failed = self.failed();
        if failed {
            warn!(parent: &self.span, errors = ?self.errors(), "message_finalizing_failed");
        }

        debug!(parent: &self.span, "message_finalizing");
        let disposition =
            finalize::finalize(client, settings, &self.queue.url, &self.receipt_handle, failed)
                .instrument(self.span.clone())
                .await;
        Some(disposition)
    }
}
