//! The acknowledge-or-leave decision made once per message.

use tracing::{error, info};

use crate::config::Settings;
use crate::queue::QueueClient;

/// What finalization did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Failed with `save_failures` on: left on the queue
    Retained,
    /// `dry_run` on: logged only
    DryRun,
    /// Delete issued (or the message was already gone)
    Acknowledged,
    /// Delete issued and rejected by the transport
    AckFailed,
}

/// Decide without side effects. `Acknowledged` means "issue the delete".
pub fn decide(failed: bool, settings: &Settings) -> Disposition {
    if failed && settings.save_failures {
        Disposition::Retained
    } else if settings.dry_run {
        Disposition::DryRun
    } else {
        Disposition::Acknowledged
    }
}

/// Decide and, when appropriate, delete the message.
pub async fn finalize(
    client: &dyn QueueClient,
    settings: &Settings,
    queue_url: &str,
    receipt_handle: &str,
    failed: bool,
) -> Disposition {
    match decide(failed, settings) {
        Disposition::Retained => {
            error!(queue_url = %queue_url, "message_failed_not_deleting");
            Disposition::Retained
        }
        Disposition::DryRun => {
            info!(queue_url = %queue_url, "message_dry_run");
            Disposition::DryRun
        }
        _ => {
            info!(queue_url = %queue_url, "message_deleting");
            match client.delete_message(queue_url, receipt_handle).await {
                Ok(()) => Disposition::Acknowledged,
                Err(e) => {
                    error!(queue_url = %queue_url, error = %e, "message_delete_failed");
                    Disposition::AckFailed
                }
            }
        }
    }
}
