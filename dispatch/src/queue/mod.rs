//! The message-queue capability used by the broker and the worker.
//!
//! The contract is a named queue with at-least-once delivery and a
//! visibility timeout: a received message stays hidden from other
//! consumers until the timeout elapses or it is deleted, and its
//! visibility can be extended while work is in progress.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::config::DispatchConfig;
use crate::error::Error;

mod memory;
mod sqs;

pub use memory::MemoryQueueService;
pub use sqs::SqsQueueService;

/// A message as handed out by [QueueService::receive_message].
#[derive(Clone, Debug)]
pub struct QueueMessage {
    pub body: String,

    /// Identifies this *delivery* of the message for visibility
    /// changes and deletion. A redelivery gets a fresh handle.
    pub receipt_handle: String,

    /// How often the message has been delivered, including this time.
    pub receive_count: u32,
}

#[async_trait]
pub trait QueueService: Send + Sync {
    /// Create the named queue if needed and return its URL. Creating
    /// an existing queue is not an error.
    async fn create_queue(&self, name: &str) -> Result<String, Error>;

    async fn delete_queue(&self, queue_url: &str) -> Result<(), Error>;

    async fn send_message(&self, queue_url: &str, body: &str) -> Result<(), Error>;

    /// Long-poll for at most one message, waiting up to `wait`. A
    /// returned message is leased for `visibility`.
    async fn receive_message(
        &self,
        queue_url: &str,
        wait: Duration,
        visibility: Duration,
    ) -> Result<Option<QueueMessage>, Error>;

    /// Reset the lease on a received message to `visibility` from now.
    async fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility: Duration,
    ) -> Result<(), Error>;

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<(), Error>;
}

/// Construct a [QueueService] from a URI.
///
/// Supported:
/// - `memory://` — in-process queues, for tests and local wiring.
/// - `sqs://` — Amazon SQS, region and credentials from `config`.
pub fn from_addr(uri: &str, config: &DispatchConfig) -> Result<Arc<dyn QueueService>, Error> {
    let url = Url::parse(uri)
        .map_err(|e| Error::InvalidAddress(uri.to_string(), e.to_string()))?;

    match url.scheme() {
        "memory" => Ok(Arc::new(MemoryQueueService::default())),
        "sqs" => Ok(Arc::new(SqsQueueService::new(config)?)),
        scheme => Err(Error::InvalidAddress(
            uri.to_string(),
            format!("unsupported queue scheme '{}'", scheme),
        )),
    }
}
