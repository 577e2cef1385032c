//! The dispatch plane of remote building: a broker that publishes
//! derivations onto a shared work queue and waits for results on a
//! private queue, and a worker loop that leases work, builds through
//! a local store, and stages artifacts through a binary cache.
//!
//! Delivery is at-least-once; effects are made idempotent by content
//! addressing, so a redelivered build re-publishes identical bytes at
//! identical keys.

use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod binary_cache;
pub mod broker;
pub mod config;
pub mod error;
pub mod queue;
pub mod store;
pub mod worker;

pub use binary_cache::BinaryCache;
pub use broker::{Broker, RemoteBuildStore};
pub use config::DispatchConfig;
pub use error::Error;
pub use worker::Worker;

/// One-shot process-wide initialisation: wires SIGINT to the
/// cooperative interrupt flag. Long-polls and wait loops notice the
/// flag at their next check; a second SIGINT exits hard.
///
/// Must be called from within a tokio runtime. Later calls are
/// no-ops.
pub fn init() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        tokio::spawn(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt requested, finishing current work");
                styx_compat::trigger_interrupt();
            }
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        });
    });
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
