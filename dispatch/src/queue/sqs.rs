use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rusoto_core::credential::ProfileProvider;
use rusoto_core::{HttpClient, Region, RusotoError};
use rusoto_sqs::{
    ChangeMessageVisibilityRequest, CreateQueueRequest, DeleteMessageRequest, DeleteQueueRequest,
    ReceiveMessageRequest, SendMessageRequest, Sqs, SqsClient,
};
use tracing::warn;

use super::{QueueMessage, QueueService};
use crate::config::DispatchConfig;
use crate::error::Error;

const RECEIVE_COUNT_ATTRIBUTE: &str = "ApproximateReceiveCount";

/// [QueueService] backed by Amazon SQS.
pub struct SqsQueueService {
    client: SqsClient,
}

impl SqsQueueService {
    pub fn new(config: &DispatchConfig) -> Result<Self, Error> {
        let region: Region = config
            .region
            .parse()
            .map_err(|e| Error::Queue(format!("invalid region '{}': {}", config.region, e)))?;

        let client = if config.profile.is_empty() {
            SqsClient::new(region)
        } else {
            let mut provider =
                ProfileProvider::new().map_err(|e| Error::Queue(e.to_string()))?;
            provider.set_profile(config.profile.clone());
            let dispatcher =
                HttpClient::new().map_err(|e| Error::Queue(e.to_string()))?;
            SqsClient::new_with(dispatcher, provider, region)
        };

        Ok(SqsQueueService { client })
    }
}

/// Retry dispatch-level failures a couple of times before giving up;
/// service-level errors surface immediately.
async fn retrying<T, E, F, Fut>(op: &str, mut call: F) -> Result<T, RusotoError<E>>
where
    E: std::error::Error,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RusotoError<E>>>,
{
    let mut attempt: u32 = 0;
    loop {
        match call().await {
            Err(RusotoError::HttpDispatch(e)) if attempt < 2 => {
                attempt += 1;
                warn!(error = %e, attempt, "{}: transient error, retrying", op);
                tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
            }
            other => return other,
        }
    }
}

fn queue_error<E: std::error::Error + 'static>(queue_url: &str, err: RusotoError<E>) -> Error {
    let detail = match &err {
        RusotoError::Unknown(response) => response.body_as_str().to_string(),
        other => other.to_string(),
    };

    if detail.contains("NonExistentQueue") {
        Error::NoSuchQueue(queue_url.to_string())
    } else {
        Error::Queue(detail)
    }
}

#[async_trait]
impl QueueService for SqsQueueService {
    async fn create_queue(&self, name: &str) -> Result<String, Error> {
        let result = retrying("CreateQueue", || {
            self.client.create_queue(CreateQueueRequest {
                queue_name: name.to_string(),
                ..Default::default()
            })
        })
        .await
        .map_err(|e| queue_error(name, e))?;

        result
            .queue_url
            .ok_or_else(|| Error::Queue(format!("no queue URL returned for '{}'", name)))
    }

    async fn delete_queue(&self, queue_url: &str) -> Result<(), Error> {
        self.client
            .delete_queue(DeleteQueueRequest {
                queue_url: queue_url.to_string(),
            })
            .await
            .map_err(|e| queue_error(queue_url, e))
    }

    async fn send_message(&self, queue_url: &str, body: &str) -> Result<(), Error> {
        retrying("SendMessage", || {
            self.client.send_message(SendMessageRequest {
                queue_url: queue_url.to_string(),
                message_body: body.to_string(),
                ..Default::default()
            })
        })
        .await
        .map_err(|e| queue_error(queue_url, e))?;

        Ok(())
    }

    async fn receive_message(
        &self,
        queue_url: &str,
        wait: Duration,
        visibility: Duration,
    ) -> Result<Option<QueueMessage>, Error> {
        let result = self
            .client
            .receive_message(ReceiveMessageRequest {
                queue_url: queue_url.to_string(),
                wait_time_seconds: Some(wait.as_secs() as i64),
                max_number_of_messages: Some(1),
                visibility_timeout: Some(visibility.as_secs() as i64),
                attribute_names: Some(vec![RECEIVE_COUNT_ATTRIBUTE.to_string()]),
                ..Default::default()
            })
            .await
            .map_err(|e| queue_error(queue_url, e))?;

        let message = match result.messages.into_iter().flatten().next() {
            Some(message) => message,
            None => return Ok(None),
        };

        let receive_count = message
            .attributes
            .as_ref()
            .and_then(|attrs| attrs.get(RECEIVE_COUNT_ATTRIBUTE))
            .and_then(|count| count.parse().ok())
            .unwrap_or(1);

        Ok(Some(QueueMessage {
            body: message.body.unwrap_or_default(),
            receipt_handle: message.receipt_handle.unwrap_or_default(),
            receive_count,
        }))
    }

    async fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility: Duration,
    ) -> Result<(), Error> {
        self.client
            .change_message_visibility(ChangeMessageVisibilityRequest {
                queue_url: queue_url.to_string(),
                receipt_handle: receipt_handle.to_string(),
                visibility_timeout: visibility.as_secs() as i64,
            })
            .await
            .map_err(|e| queue_error(queue_url, e))
    }

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<(), Error> {
        self.client
            .delete_message(DeleteMessageRequest {
                queue_url: queue_url.to_string(),
                receipt_handle: receipt_handle.to_string(),
            })
            .await
            .map_err(|e| queue_error(queue_url, e))
    }
}
