//! The worker loop: lease a work message, stage inputs, build, stage
//! outputs, reply, commit.
//!
//! Per message, the lease machine runs
//! `receive -> build -> reply -> delete`, with a background task
//! extending the message's visibility for as long as the build runs.
//! Failures inside one message never take the loop down; they are
//! reported to the client as a failed [BuildResult] instead.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use styx_compat::{
    interrupted, BuildResult, BuildStatus, StorePath, WorkMessage,
};

use crate::config::DispatchConfig;
use crate::error::Error;
use crate::queue::{QueueMessage, QueueService};
use crate::store::{copy_paths, Store};
use crate::unix_now;

/// Pause after a failed receive before trying again.
const RECEIVE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Pause after a failed lease renewal before retrying it.
const RENEWAL_RETRY_DELAY: Duration = Duration::from_secs(10);

pub struct Worker {
    queue: Arc<dyn QueueService>,
    /// Staging side: where inputs come from and outputs go to.
    remote: Arc<dyn Store>,
    /// Build side.
    local: Arc<dyn Store>,
    config: DispatchConfig,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn QueueService>,
        remote: Arc<dyn Store>,
        local: Arc<dyn Store>,
        config: DispatchConfig,
    ) -> Self {
        Worker {
            queue,
            remote,
            local,
            config,
        }
    }

    fn lease(&self) -> Duration {
        Duration::from_secs(self.config.visibility_timeout)
    }

    /// Run until interrupted. The loop only exits between messages;
    /// a lease in progress is finished first.
    pub async fn run(&self) -> Result<(), Error> {
        let work_queue = self.queue.create_queue(&self.config.queue_name).await?;
        info!(work_queue, "processing work queue");

        loop {
            if interrupted() {
                info!("interrupted, leaving work loop");
                return Ok(());
            }

            let received = self
                .queue
                .receive_message(
                    &work_queue,
                    Duration::from_secs(self.config.receive_wait),
                    self.lease(),
                )
                .await;

            match received {
                Ok(None) => continue,
                Ok(Some(message)) => self.process_message(&work_queue, message).await,
                Err(e) if e.is_interrupted() => return Ok(()),
                Err(e) => {
                    warn!(error = %e, "receiving work message failed");
                    tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
                }
            }
        }
    }

    /// Handle one leased message end-to-end. Never fails: every error
    /// either becomes a failure reply or leaves the message for
    /// redelivery.
    #[instrument(skip(self, message), fields(receipt = %message.receipt_handle))]
    pub async fn process_message(&self, work_queue: &str, message: QueueMessage) {
        let extender_stop = CancellationToken::new();
        let extender = tokio::spawn(extend_lease(
            self.queue.clone(),
            work_queue.to_string(),
            message.receipt_handle.clone(),
            self.lease(),
            extender_stop.clone(),
        ));

        let reply = self.run_message(&message).await;

        // Commit only once the reply is out (or provably pointless).
        let mut commit = true;
        if let Some((result_queue, result)) = reply {
            match self
                .queue
                .send_message(&result_queue, &result.to_wire())
                .await
            {
                Ok(()) => {}
                Err(Error::NoSuchQueue(_)) => {
                    // The broker is gone and took its queue with it;
                    // nobody is left to want this message.
                    warn!(result_queue, "result queue is gone, dropping reply");
                }
                Err(e) => {
                    warn!(error = %e, "sending result failed, leaving message for redelivery");
                    commit = false;
                }
            }
        }

        extender_stop.cancel();
        if let Err(e) = extender.await {
            warn!(error = %e, "lease extender panicked");
        }

        if commit {
            info!("deleting message");
            if let Err(e) = self
                .queue
                .delete_message(work_queue, &message.receipt_handle)
                .await
            {
                warn!(error = %e, "deleting work message failed");
            }
        }
    }

    /// Decode and execute one message. `None` means there is nothing
    /// to reply (undecodable message, no result queue known).
    async fn run_message(&self, message: &QueueMessage) -> Option<(String, BuildResult)> {
        let work = match WorkMessage::from_wire(&message.body) {
            Ok(work) => work,
            Err(e) => {
                warn!(error = %e, "discarding malformed work message");
                return None;
            }
        };

        if message.receive_count > self.config.max_deliveries {
            warn!(
                receive_count = message.receive_count,
                "poison message, reporting failure"
            );
            let now = unix_now();
            return Some((
                work.result_queue,
                BuildResult::failure(
                    BuildStatus::MiscFailure,
                    format!("build gave up after {} deliveries", message.receive_count),
                    now,
                    now,
                ),
            ));
        }

        let start_time = unix_now();
        let result = match self.perform_build(&work).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "build failed");
                BuildResult::failure(BuildStatus::MiscFailure, e.to_string(), start_time, unix_now())
            }
        };

        Some((work.result_queue, result))
    }

    async fn perform_build(&self, work: &WorkMessage) -> Result<BuildResult, Error> {
        // Paths were syntactically validated during decoding; only
        // now does any I/O happen.
        let inputs: Vec<StorePath> = work.drv.input_sources.iter().cloned().collect();

        info!(drv_path = %work.drv_path, "copying inputs");
        copy_paths(self.remote.as_ref(), self.local.as_ref(), inputs).await?;

        info!(drv_path = %work.drv_path, "building");
        let result = self
            .local
            .build_derivation(&work.drv_path, &work.drv)
            .await?;

        if result.is_success() {
            info!(drv_path = %work.drv_path, "copying outputs");
            copy_paths(
                self.local.as_ref(),
                self.remote.as_ref(),
                work.drv.output_paths(),
            )
            .await?;
        }

        Ok(result)
    }
}

/// Keep a leased message invisible while the build runs, by resetting
/// its visibility to the full lease every half-lease. Renewal
/// failures are retried after a short back-off; a persistently failing
/// renewal eventually means redelivery, which is safe because
/// re-published outputs are a no-op.
async fn extend_lease(
    queue: Arc<dyn QueueService>,
    queue_url: String,
    receipt_handle: String,
    lease: Duration,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(lease / 2) => {}
        }

        loop {
            match queue
                .change_message_visibility(&queue_url, &receipt_handle, lease)
                .await
            {
                Ok(()) => {
                    info!(receipt = %receipt_handle, "extended message lease");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "extending lease failed, retrying");
                    tokio::select! {
                        _ = stop.cancelled() => return,
                        _ = tokio::time::sleep(RENEWAL_RETRY_DELAY) => {}
                    }
                }
            }
        }
    }
}
