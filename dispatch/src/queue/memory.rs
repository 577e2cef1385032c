use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{QueueMessage, QueueService};
use crate::error::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
struct StoredMessage {
    body: String,
    /// While set and in the future, the message is leased and hidden
    /// from receivers. Once the lease expires the message becomes
    /// deliverable again, under a fresh receipt handle.
    invisible_until: Option<Instant>,
    receipt_handle: Option<String>,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct Queue {
    messages: VecDeque<StoredMessage>,
    next_receipt: u64,
}

/// In-process [QueueService] with real visibility-timeout semantics:
/// an undeleted message reappears after its lease expires, so
/// delivery is at-least-once just like with the hosted service.
#[derive(Clone, Default)]
pub struct MemoryQueueService {
    queues: Arc<Mutex<HashMap<String, Queue>>>,
}

impl MemoryQueueService {
    fn with_queue<T>(
        &self,
        queue_url: &str,
        f: impl FnOnce(&mut Queue) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut queues = self.queues.lock().expect("queue map poisoned");
        match queues.get_mut(queue_url) {
            Some(queue) => f(queue),
            None => Err(Error::NoSuchQueue(queue_url.to_string())),
        }
    }
}

#[async_trait]
impl QueueService for MemoryQueueService {
    async fn create_queue(&self, name: &str) -> Result<String, Error> {
        let url = format!("memory://{}", name);
        self.queues
            .lock()
            .expect("queue map poisoned")
            .entry(url.clone())
            .or_default();
        Ok(url)
    }

    async fn delete_queue(&self, queue_url: &str) -> Result<(), Error> {
        match self
            .queues
            .lock()
            .expect("queue map poisoned")
            .remove(queue_url)
        {
            Some(_) => Ok(()),
            None => Err(Error::NoSuchQueue(queue_url.to_string())),
        }
    }

    async fn send_message(&self, queue_url: &str, body: &str) -> Result<(), Error> {
        self.with_queue(queue_url, |queue| {
            queue.messages.push_back(StoredMessage {
                body: body.to_string(),
                invisible_until: None,
                receipt_handle: None,
                receive_count: 0,
            });
            Ok(())
        })
    }

    async fn receive_message(
        &self,
        queue_url: &str,
        wait: Duration,
        visibility: Duration,
    ) -> Result<Option<QueueMessage>, Error> {
        let deadline = Instant::now() + wait;

        loop {
            let received = self.with_queue(queue_url, |queue| {
                let now = Instant::now();
                for message in queue.messages.iter_mut() {
                    if matches!(message.invisible_until, Some(until) if until > now) {
                        continue;
                    }

                    queue.next_receipt += 1;
                    let receipt_handle = format!("receipt-{}", queue.next_receipt);
                    message.invisible_until = Some(now + visibility);
                    message.receipt_handle = Some(receipt_handle.clone());
                    message.receive_count += 1;

                    return Ok(Some(QueueMessage {
                        body: message.body.clone(),
                        receipt_handle,
                        receive_count: message.receive_count,
                    }));
                }
                Ok(None)
            })?;

            if received.is_some() {
                return Ok(received);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(remaining)).await;
        }
    }

    async fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility: Duration,
    ) -> Result<(), Error> {
        self.with_queue(queue_url, |queue| {
            for message in queue.messages.iter_mut() {
                if message.receipt_handle.as_deref() == Some(receipt_handle) {
                    message.invisible_until = Some(Instant::now() + visibility);
                    return Ok(());
                }
            }
            Err(Error::Queue(format!(
                "receipt handle '{}' is not current",
                receipt_handle
            )))
        })
    }

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<(), Error> {
        self.with_queue(queue_url, |queue| {
            let before = queue.messages.len();
            queue
                .messages
                .retain(|m| m.receipt_handle.as_deref() != Some(receipt_handle));
            if queue.messages.len() == before {
                return Err(Error::Queue(format!(
                    "receipt handle '{}' is not current",
                    receipt_handle
                )));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_queue_is_idempotent() {
        let service = MemoryQueueService::default();
        let a = service.create_queue("work").await.unwrap();
        service.send_message(&a, "hello").await.unwrap();
        let b = service.create_queue("work").await.unwrap();
        assert_eq!(a, b);

        // Re-creating did not drop the queued message.
        let msg = service
            .receive_message(&b, Duration::ZERO, Duration::from_secs(30))
            .await
            .unwrap()
            .expect("message must still be there");
        assert_eq!("hello", msg.body);
    }

    #[tokio::test]
    async fn leased_message_is_hidden_from_peers() {
        let service = MemoryQueueService::default();
        let url = service.create_queue("work").await.unwrap();
        service.send_message(&url, "job").await.unwrap();

        let first = service
            .receive_message(&url, Duration::ZERO, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = service
            .receive_message(&url, Duration::ZERO, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(second.is_none(), "leased message must not be redelivered");
    }

    #[tokio::test]
    async fn undeleted_message_reappears_after_lease_expiry() {
        let service = MemoryQueueService::default();
        let url = service.create_queue("work").await.unwrap();
        service.send_message(&url, "job").await.unwrap();

        let first = service
            .receive_message(&url, Duration::ZERO, Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(1, first.receive_count);

        tokio::time::sleep(Duration::from_millis(40)).await;

        let second = service
            .receive_message(&url, Duration::ZERO, Duration::from_secs(30))
            .await
            .unwrap()
            .expect("message must be redelivered");
        assert_eq!(2, second.receive_count);
        assert_ne!(first.receipt_handle, second.receipt_handle);
    }

    #[tokio::test]
    async fn deleted_message_stays_gone() {
        let service = MemoryQueueService::default();
        let url = service.create_queue("work").await.unwrap();
        service.send_message(&url, "job").await.unwrap();

        let msg = service
            .receive_message(&url, Duration::ZERO, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        service.delete_message(&url, &msg.receipt_handle).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(service
            .receive_message(&url, Duration::ZERO, Duration::from_secs(30))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn sending_to_a_deleted_queue_fails() {
        let service = MemoryQueueService::default();
        let url = service.create_queue("gone").await.unwrap();
        service.delete_queue(&url).await.unwrap();

        match service.send_message(&url, "too late").await {
            Err(Error::NoSuchQueue(_)) => {}
            other => panic!("expected NoSuchQueue, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn empty_long_poll_returns_none() {
        let service = MemoryQueueService::default();
        let url = service.create_queue("idle").await.unwrap();

        let received = service
            .receive_message(&url, Duration::from_millis(30), Duration::from_secs(30))
            .await
            .unwrap();
        assert!(received.is_none());
    }
}
