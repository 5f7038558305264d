//! Per-message pipeline: classify, build, run plugins, finalize.
//!
//! Failures never escape this module. Unclassifiable or malformed payloads
//! are finalized straight away so they are not redelivered forever; plugin
//! failures mark the message failed and the pipeline carries on.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, error, info, Instrument};

use crate::config::Settings;
use crate::directory::Directories;
use crate::error::{MessageError, PluginError};
use crate::finalize::{self, Disposition};
use crate::message::{sniff_subject, ActionKey, Message, MessageKind};
use crate::plugin::{ActionPlugin, ActionTable};
use crate::queue::{QueueClient, RawMessage, ResolvedQueue};

/// Plugin phases, run strictly in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    RunBefore,
    Perform,
    RunAfter,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::RunBefore, Phase::Perform, Phase::RunAfter];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::RunBefore => "run_before",
            Phase::Perform => "perform",
            Phase::RunAfter => "run_after",
        }
    }
}

/// How one message left the pipeline.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Classified and run through its plugins (or none, if no action applied)
    Completed {
        message: Arc<Message>,
        disposition: Option<Disposition>,
    },
    /// Subject matched no known variant
    Poison {
        error: MessageError,
        disposition: Disposition,
    },
    /// Recognized variant that could not be built
    Malformed {
        error: MessageError,
        disposition: Disposition,
    },
}

impl ProcessOutcome {
    /// Counted as a success by the listener.
    pub fn succeeded(&self) -> bool {
        match self {
            ProcessOutcome::Completed { message, .. } => !message.failed(),
            _ => false,
        }
    }
}

/// Shared, per-listener processing dependencies.
#[derive(Clone)]
pub struct Processor {
    settings: Arc<Settings>,
    client: Arc<dyn QueueClient>,
    directories: Directories,
    actions: Arc<ActionTable>,
}

impl Processor {
    pub fn new(
        settings: Arc<Settings>,
        client: Arc<dyn QueueClient>,
        directories: Directories,
        actions: Arc<ActionTable>,
    ) -> Self {
        Self {
            settings,
            client,
            directories,
            actions,
        }
    }

    /// Run one raw message through the whole pipeline.
    pub async fn process(&self, queue: &ResolvedQueue, raw: RawMessage) -> ProcessOutcome {
        debug!(
            listener = %queue.listener,
            queue = %queue.name,
            transport_id = ?raw.transport_id,
            "message_found"
        );

        let Some(kind) = MessageKind::sniff(&raw.body) else {
            let subject = sniff_subject(&raw.body);
            error!(
                listener = %queue.listener,
                queue = %queue.name,
                subject = %subject,
                "message_unknown_subject"
            );
            let disposition = self.finalize_raw(queue, &raw).await;
            return ProcessOutcome::Poison {
                error: MessageError::UnknownSubject { subject },
                disposition,
            };
        };

        let message = match Message::build(
            kind,
            &raw,
            queue,
            &self.directories,
            self.settings.upstream_retries,
        )
        .await
        {
            Ok(message) => Arc::new(message),
            Err(error) => {
                error!(
                    listener = %queue.listener,
                    queue = %queue.name,
                    kind = kind.as_str(),
                    error = %error,
                    "message_build_failed"
                );
                let disposition = self.finalize_raw(queue, &raw).await;
                return ProcessOutcome::Malformed { error, disposition };
            }
        };

        info!(
            parent: message.span(),
            listener = %queue.listener,
            action = ?message.action().map(|a| a.as_str()),
            subject = %message.subject(),
            "message_processing"
        );

        if let Some(action) = message.action() {
            self.run_plugins(&message, action).await;
        }

        let disposition = message.finalize(self.client.as_ref(), &self.settings).await;
        ProcessOutcome::Completed {
            message,
            disposition,
        }
    }

    /// Finalize a payload that never became a [`Message`].
    async fn finalize_raw(&self, queue: &ResolvedQueue, raw: &RawMessage) -> Disposition {
        finalize::finalize(
            self.client.as_ref(),
            &self.settings,
            &queue.url,
            &raw.receipt_handle,
            false,
        )
        .await
    }

    /// Build the action's plugins and drive them through every phase.
    async fn run_plugins(&self, message: &Arc<Message>, action: ActionKey) {
        let plugins: Vec<Box<dyn ActionPlugin>> = self
            .actions
            .plugins_for(action)
            .iter()
            .filter_map(|descriptor| {
                debug!(parent: message.span(), plugin = descriptor.id(), "plugin_building");
                let built = panic::catch_unwind(AssertUnwindSafe(|| {
                    descriptor.build(Arc::clone(message), Arc::clone(&self.settings))
                }))
                .unwrap_or_else(|panic| {
                    Err(PluginError::Failed {
                        plugin: descriptor.id().to_string(),
                        message: format!("constructor panicked: {}", panic_message(&*panic)),
                    })
                });

                match built {
                    Ok(plugin) => Some(plugin),
                    Err(e) => {
                        error!(
                            parent: message.span(),
                            plugin = descriptor.id(),
                            error = %e,
                            "plugin_build_failed"
                        );
                        message.fail(Some(e.to_string()));
                        None
                    }
                }
            })
            .collect();

        for phase in Phase::ALL {
            for plugin in &plugins {
                run_phase(message, plugin.as_ref(), phase, action).await;
            }
        }
    }
}

/// Run one plugin call, containing errors and panics.
async fn run_phase(message: &Message, plugin: &dyn ActionPlugin, phase: Phase, action: ActionKey) {
    let started = Instant::now();
    let call = match phase {
        Phase::RunBefore => plugin.run_before(),
        Phase::Perform => plugin.perform(action),
        Phase::RunAfter => plugin.run_after(),
    };

    let result = AssertUnwindSafe(call)
        .catch_unwind()
        .instrument(message.span().clone())
        .await
        .unwrap_or_else(|panic| {
            Err(PluginError::Failed {
                plugin: plugin.name().to_string(),
                message: format!("panicked: {}", panic_message(&*panic)),
            })
        });

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(()) => debug!(
            parent: message.span(),
            plugin = plugin.name(),
            phase = phase.as_str(),
            elapsed_ms = elapsed_ms,
            "plugin_phase_complete"
        ),
        Err(e) => {
            error!(
                parent: message.span(),
                plugin = plugin.name(),
                phase = phase.as_str(),
                elapsed_ms = elapsed_ms,
                error = %e,
                "plugin_phase_failed"
            );
            message.fail(Some(e.to_string()));
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
