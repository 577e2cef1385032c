//! Shared data model of the build-dispatch system: store paths,
//! derivations, build results, and the JSON wire messages exchanged
//! between the build broker and the worker loop.
//!
//! Everything in here is a plain value type. The dispatch machinery
//! (queues, object stores, the worker) lives in `styx-dispatch`, the
//! evaluator in `styx-eval`.

pub mod build_result;
pub mod derivation;
pub mod escape;
pub mod interrupt;
pub mod messages;
pub mod nixbase32;
pub mod path_info;
pub mod store_path;

pub use build_result::{BuildResult, BuildStatus};
pub use derivation::{Derivation, Output};
pub use interrupt::{
    check_interrupt, interrupted, reset_interrupt, trigger_interrupt, Interrupted,
};
pub use messages::WorkMessage;
pub use path_info::PathInfo;
pub use store_path::StorePath;

/// Errors produced when decoding a wire message.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message is not valid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),
}
