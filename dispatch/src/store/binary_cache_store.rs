use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use styx_compat::{BuildResult, Derivation, PathInfo, StorePath};

use super::Store;
use crate::binary_cache::BinaryCache;
use crate::config::DispatchConfig;
use crate::error::Error;

/// [Store] over a [BinaryCache]: path metadata lives in
/// `<digest>.narinfo` documents, contents under `nar/<digest>.nar`.
pub struct BinaryCacheStore {
    cache: BinaryCache,
}

fn narinfo_key(path: &StorePath) -> String {
    format!("{}.narinfo", path.digest_part())
}

fn nar_key(path: &StorePath) -> String {
    format!("nar/{}.nar", path.digest_part())
}

impl BinaryCacheStore {
    pub fn new(cache: BinaryCache) -> Self {
        BinaryCacheStore { cache }
    }

    pub fn from_url(url: &Url, config: &DispatchConfig) -> Result<Self, Error> {
        Ok(BinaryCacheStore {
            cache: BinaryCache::from_url(url, config)?,
        })
    }

    /// Every path with a path-info document in the cache. Listing is
    /// paginated by the underlying object store.
    pub async fn query_all_valid_paths(&self) -> Result<Vec<StorePath>, Error> {
        let mut paths = Vec::new();
        for key in self.cache.list_prefix("").await? {
            if !key.ends_with(".narinfo") || key.contains('/') {
                continue;
            }
            let info: PathInfo = serde_json::from_slice(&self.cache.get_file(&key).await?)
                .map_err(|e| Error::Store(format!("malformed path info '{}': {}", key, e)))?;
            paths.push(info.path);
        }
        Ok(paths)
    }
}

#[async_trait]
impl Store for BinaryCacheStore {
    async fn query_path_info(&self, path: &StorePath) -> Result<PathInfo, Error> {
        // Optimistically fetch the document; it is small, so a GET is
        // no slower than a HEAD probe followed by a GET.
        match self.cache.get_file(&narinfo_key(path)).await {
            Ok(doc) => serde_json::from_slice(&doc)
                .map_err(|e| Error::Store(format!("malformed path info for '{}': {}", path, e))),
            Err(Error::NoSuchCacheFile(_)) => Err(Error::InvalidPath(path.to_absolute_path())),
            Err(e) => Err(e),
        }
    }

    async fn add_to_store(&self, info: PathInfo, contents: Bytes) -> Result<(), Error> {
        // Contents first: a visible path-info document implies the
        // contents are fetchable.
        self.cache
            .upsert_file(&nar_key(&info.path), contents, "application/x-nix-nar")
            .await?;

        let doc = serde_json::to_vec(&info)
            .map_err(|e| Error::Store(format!("encoding path info: {}", e)))?;
        self.cache
            .upsert_file(&narinfo_key(&info.path), doc.into(), "text/x-nix-narinfo")
            .await
    }

    async fn export_path(&self, path: &StorePath) -> Result<(PathInfo, Bytes), Error> {
        let info = self.query_path_info(path).await?;
        let contents = self.cache.get_file(&nar_key(path)).await?;
        Ok((info, contents))
    }

    async fn build_derivation(
        &self,
        _drv_path: &StorePath,
        _drv: &Derivation,
    ) -> Result<BuildResult, Error> {
        Err(Error::Store(
            "binary cache stores cannot build derivations".to_string(),
        ))
    }
}
