//! The client side of remote building: publish one derivation, wait
//! for its result on a private queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, instrument, warn};

use styx_compat::{check_interrupt, BuildResult, Derivation, PathInfo, StorePath, WorkMessage};

use crate::config::DispatchConfig;
use crate::error::Error;
use crate::queue::QueueService;
use crate::store::Store;
use crate::unix_now;

pub struct Broker {
    queue: Arc<dyn QueueService>,
    queue_name: String,
    receive_wait: Duration,
}

impl Broker {
    pub fn new(queue: Arc<dyn QueueService>, config: &DispatchConfig) -> Self {
        Broker {
            queue,
            queue_name: config.queue_name.clone(),
            receive_wait: Duration::from_secs(config.receive_wait),
        }
    }

    /// Dispatch one derivation to the worker pool and block until its
    /// result arrives.
    ///
    /// The invocation owns a private result queue, named uniquely so
    /// concurrent brokers on one host cannot collide, and deletes it
    /// on every exit path. At most one result is consumed; duplicates
    /// a second worker might produce die with the queue.
    #[instrument(skip(self, drv), fields(drv_path = %drv_path))]
    pub async fn build_derivation(
        &self,
        drv_path: &StorePath,
        drv: &Derivation,
    ) -> Result<BuildResult, Error> {
        let work_queue = self.queue.create_queue(&self.queue_name).await?;

        let result_queue_name = format!(
            "{}-tmp-{}-{:08x}",
            self.queue_name,
            unix_now(),
            rand::random::<u32>()
        );
        let result_queue = self.queue.create_queue(&result_queue_name).await?;

        let result = self
            .dispatch_and_wait(&work_queue, &result_queue, drv_path, drv)
            .await;

        // Failure to delete must not mask the build result.
        if let Err(e) = self.queue.delete_queue(&result_queue).await {
            warn!(result_queue, error = %e, "failed to delete result queue");
        }

        result
    }

    async fn dispatch_and_wait(
        &self,
        work_queue: &str,
        result_queue: &str,
        drv_path: &StorePath,
        drv: &Derivation,
    ) -> Result<BuildResult, Error> {
        let message = WorkMessage {
            drv_path: drv_path.clone(),
            drv: drv.clone(),
            result_queue: result_queue.to_string(),
        };
        self.queue
            .send_message(work_queue, &message.to_wire())
            .await?;

        loop {
            check_interrupt()?;

            let received = self
                .queue
                .receive_message(result_queue, self.receive_wait, self.receive_wait)
                .await?;

            if let Some(msg) = received {
                debug!(body = %msg.body, "got result message");
                return Ok(BuildResult::from_wire(&msg.body)?);
            }
        }
    }
}

/// The remote store a client actually talks to: storage requests go
/// to the binary cache, build requests to the queue. What used to be
/// one object wearing both hats is plain composition here.
pub struct RemoteBuildStore {
    cache: Arc<dyn Store>,
    broker: Broker,
}

impl RemoteBuildStore {
    pub fn new(cache: Arc<dyn Store>, broker: Broker) -> Self {
        RemoteBuildStore { cache, broker }
    }
}

#[async_trait]
impl Store for RemoteBuildStore {
    async fn query_path_info(&self, path: &StorePath) -> Result<PathInfo, Error> {
        self.cache.query_path_info(path).await
    }

    async fn add_to_store(&self, info: PathInfo, contents: Bytes) -> Result<(), Error> {
        self.cache.add_to_store(info, contents).await
    }

    async fn export_path(&self, path: &StorePath) -> Result<(PathInfo, Bytes), Error> {
        self.cache.export_path(path).await
    }

    async fn build_derivation(
        &self,
        drv_path: &StorePath,
        drv: &Derivation,
    ) -> Result<BuildResult, Error> {
        self.broker.build_derivation(drv_path, drv).await
    }
}
