//! [`QueueClient`] backed by `aws-sdk-sqs`.

use async_trait::async_trait;
use aws_sdk_sqs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::types::QueueAttributeName;
use aws_sdk_sqs::Client;
use tracing::{debug, info};

use super::client::QueueClient;
use super::types::{RawMessage, MAX_BATCH_SIZE};
use crate::error::QueueError;

const QUEUE_DOES_NOT_EXIST: [&str; 2] = ["AWS.SimpleQueueService.NonExistentQueue", "QueueDoesNotExist"];
const RECEIPT_HANDLE_INVALID: &str = "ReceiptHandleIsInvalid";

/// SQS client for one account and region.
#[derive(Clone)]
pub struct SqsQueueClient {
    client: Client,
}

impl SqsQueueClient {
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(sdk_config),
        }
    }
}

/// Map an SDK failure into a [`QueueError`].
fn map_sdk_error<E, R>(operation: &str, queue: &str, err: SdkError<E, R>) -> QueueError
where
    E: std::error::Error + ProvideErrorMetadata + 'static,
    R: std::fmt::Debug,
{
    let code = err.code().unwrap_or_default();
    if QUEUE_DOES_NOT_EXIST.contains(&code) {
        return QueueError::QueueDoesNotExist {
            queue: queue.to_string(),
        };
    }
    if code == RECEIPT_HANDLE_INVALID {
        return QueueError::ReceiptHandleInvalid;
    }

    let message = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::ServiceError(_) => QueueError::Service {
            operation: operation.to_string(),
            message,
        },
        _ => QueueError::Transport {
            operation: operation.to_string(),
            message,
        },
    }
}

#[async_trait]
impl QueueClient for SqsQueueClient {
    async fn list_queue_urls(&self) -> Result<Vec<String>, QueueError> {
        let mut urls = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_queues()
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| map_sdk_error("ListQueues", "*", e))?;

            urls.extend(output.queue_urls().iter().cloned());

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        debug!(count = urls.len(), "sqs_queues_listed");
        Ok(urls)
    }

    async fn set_queue_attributes(
        &self,
        queue_url: &str,
        wait_time: i32,
        visibility_timeout: i32,
    ) -> Result<(), QueueError> {
        self.client
            .set_queue_attributes()
            .queue_url(queue_url)
            .attributes(
                QueueAttributeName::ReceiveMessageWaitTimeSeconds,
                wait_time.to_string(),
            )
            .attributes(
                QueueAttributeName::VisibilityTimeout,
                visibility_timeout.to_string(),
            )
            .send()
            .await
            .map_err(|e| map_sdk_error("SetQueueAttributes", queue_url, e))?;

        Ok(())
    }

    async fn receive_messages(
        &self,
        queue_url: &str,
        wait_time: i32,
        visibility_timeout: i32,
    ) -> Result<Vec<RawMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .wait_time_seconds(wait_time)
            .visibility_timeout(visibility_timeout)
            .max_number_of_messages(MAX_BATCH_SIZE)
            .send()
            .await
            .map_err(|e| map_sdk_error("ReceiveMessage", queue_url, e))?;

        let messages = output
            .messages()
            .iter()
            .map(|m| RawMessage {
                body: m.body().unwrap_or_default().to_string(),
                receipt_handle: m.receipt_handle().unwrap_or_default().to_string(),
                transport_id: m.message_id().map(str::to_string),
            })
            .collect();

        Ok(messages)
    }

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<(), QueueError> {
        match self
            .client
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => match map_sdk_error("DeleteMessage", queue_url, e) {
                QueueError::ReceiptHandleInvalid => {
                    info!(queue_url = %queue_url, "sqs_message_already_deleted");
                    Ok(())
                }
                other => Err(other),
            },
        }
    }
}
