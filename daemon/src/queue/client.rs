//! The transport seam: everything the daemon asks of a queue service.

use async_trait::async_trait;

use super::types::RawMessage;
use crate::error::QueueError;

/// Operations the listener and processor need from the queue service.
///
/// [`SqsQueueClient`](super::SqsQueueClient) is the production
/// implementation; tests substitute in-memory ones.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Every queue URL visible to the account.
    async fn list_queue_urls(&self) -> Result<Vec<String>, QueueError>;

    /// Apply long-poll and visibility settings to a queue.
    async fn set_queue_attributes(
        &self,
        queue_url: &str,
        wait_time: i32,
        visibility_timeout: i32,
    ) -> Result<(), QueueError>;

    /// Long-poll for a batch of messages, blocking up to `wait_time` seconds.
    async fn receive_messages(
        &self,
        queue_url: &str,
        wait_time: i32,
        visibility_timeout: i32,
    ) -> Result<Vec<RawMessage>, QueueError>;

    /// Delete a message by receipt handle.
    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<(), QueueError>;
}
