//! The store interface the dispatch core builds against.
//!
//! A store is only the *collaborator* here: the worker stages inputs
//! out of one store into another, asks the local one to build, and
//! stages outputs back. The content-addressed filesystem store itself
//! lives elsewhere; [MemoryStore] stands in for it in tests and local
//! wiring, [BinaryCacheStore] adapts the object-store capability.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use url::Url;

use styx_compat::{BuildResult, Derivation, PathInfo, StorePath};

use crate::config::DispatchConfig;
use crate::error::Error;

mod binary_cache_store;
mod memory;

pub use binary_cache_store::BinaryCacheStore;
pub use memory::{BuildHook, MemoryStore};

#[async_trait]
pub trait Store: Send + Sync {
    /// Metadata for a valid path. An unknown path is the
    /// [Error::InvalidPath] sentinel, any other error is a real
    /// failure.
    async fn query_path_info(&self, path: &StorePath) -> Result<PathInfo, Error>;

    /// Register a path with its contents.
    async fn add_to_store(&self, info: PathInfo, contents: Bytes) -> Result<(), Error>;

    /// Contents and metadata of a valid path, for copying elsewhere.
    async fn export_path(&self, path: &StorePath) -> Result<(PathInfo, Bytes), Error>;

    /// Realise a derivation. Only actual build-capable stores
    /// implement this; caches return an error.
    async fn build_derivation(
        &self,
        drv_path: &StorePath,
        drv: &Derivation,
    ) -> Result<BuildResult, Error>;

    async fn is_valid_path(&self, path: &StorePath) -> Result<bool, Error> {
        match self.query_path_info(path).await {
            Ok(_) => Ok(true),
            Err(Error::InvalidPath(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Copy the closures of `paths` from `src` to `dst`.
///
/// References are copied before their referrers, and anything already
/// valid in the destination is skipped, so re-publishing outputs that
/// a previous worker produced is a no-op.
pub async fn copy_paths(
    src: &dyn Store,
    dst: &dyn Store,
    paths: impl IntoIterator<Item = StorePath>,
) -> Result<(), Error> {
    let mut order: Vec<StorePath> = Vec::new();
    let mut visited: BTreeSet<StorePath> = BTreeSet::new();

    // Depth-first, post-order: references land in `order` before the
    // paths needing them.
    let mut stack: Vec<(StorePath, bool)> =
        paths.into_iter().map(|p| (p, false)).collect();

    while let Some((path, expanded)) = stack.pop() {
        if expanded {
            order.push(path);
            continue;
        }
        if !visited.insert(path.clone()) {
            continue;
        }

        let info = src.query_path_info(&path).await?;
        stack.push((path.clone(), true));
        for reference in info.references {
            // Self-references are the usual cycle; anything else in
            // `visited` is already handled too.
            if reference != path {
                stack.push((reference, false));
            }
        }
    }

    for path in order {
        if dst.is_valid_path(&path).await? {
            debug!(path = %path, "already valid, skipping");
            continue;
        }
        let (info, contents) = src.export_path(&path).await?;
        dst.add_to_store(info, contents).await?;
    }

    Ok(())
}

/// Construct a [Store] from a URI.
///
/// Supported:
/// - `memory://` — in-memory store with a synthetic builder.
/// - any object-store URL (`s3://bucket/prefix`, `file:///path`) — a
///   [BinaryCacheStore] over that location.
pub fn from_addr(uri: &str, config: &DispatchConfig) -> Result<Arc<dyn Store>, Error> {
    let url = Url::parse(uri)
        .map_err(|e| Error::InvalidAddress(uri.to_string(), e.to_string()))?;

    match url.scheme() {
        "memory" => Ok(Arc::new(MemoryStore::default())),
        _ => Ok(Arc::new(BinaryCacheStore::from_url(&url, config)?)),
    }
}
