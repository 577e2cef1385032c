//! The object-store capability: a flat namespace of keys holding
//! path-info documents, contents, and build logs, with optional
//! per-suffix compression.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use object_store::path::Path;
use object_store::{
    Attribute, Attributes, ObjectStore, PutMultipartOpts, PutOptions, WriteMultipart,
};
use tracing::{debug, instrument};
use url::Url;

use styx_compat::check_interrupt;

use crate::config::DispatchConfig;
use crate::error::Error;

/// Maximum in-flight parts during a multipart upload.
const UPLOAD_CONCURRENCY: usize = 4;

pub struct BinaryCache {
    object_store: Arc<dyn ObjectStore>,
    base_path: Path,
    buffer_size: usize,
    narinfo_compression: String,
    ls_compression: String,
    log_compression: String,
}

impl BinaryCache {
    /// Open the object store behind `url` (any scheme supported by
    /// [object_store::parse_url_opts]; `memory:///` works for tests).
    /// A path suffix of the URL becomes the key prefix.
    pub fn from_url(url: &Url, config: &DispatchConfig) -> Result<Self, Error> {
        let mut options: Vec<(String, String)> = Vec::new();
        if url.scheme() == "s3" && !config.region.is_empty() {
            options.push(("region".to_string(), config.region.clone()));
        }

        let (object_store, base_path) = object_store::parse_url_opts(url, options)?;

        Ok(BinaryCache {
            object_store: Arc::new(object_store),
            base_path,
            buffer_size: config.buffer_size,
            narinfo_compression: config.narinfo_compression.clone(),
            ls_compression: config.ls_compression.clone(),
            log_compression: config.log_compression.clone(),
        })
    }

    fn object_path(&self, key: &str) -> Path {
        if self.base_path.as_ref().is_empty() {
            Path::from(key)
        } else {
            Path::from(format!("{}/{}", self.base_path, key))
        }
    }

    fn compression_for(&self, key: &str) -> &str {
        if key.ends_with(".narinfo") {
            &self.narinfo_compression
        } else if key.ends_with(".ls") {
            &self.ls_compression
        } else if key.starts_with("log/") {
            &self.log_compression
        } else {
            ""
        }
    }

    #[instrument(skip(self))]
    pub async fn file_exists(&self, key: &str) -> Result<bool, Error> {
        match self.object_store.head(&self.object_path(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch a file, undoing any content encoding it was stored with.
    /// A miss is reported as [Error::NoSuchCacheFile].
    #[instrument(skip(self))]
    pub async fn get_file(&self, key: &str) -> Result<Bytes, Error> {
        let result = match self.object_store.get(&self.object_path(key)).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(Error::NoSuchCacheFile(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let encoding = result
            .attributes
            .get(&Attribute::ContentEncoding)
            .map(|v| v.to_string())
            .unwrap_or_default();

        let data = result.bytes().await?;
        decompress(&encoding, data)
    }

    /// Store a file, compressing it according to the per-suffix
    /// configuration. Uploads larger than the configured buffer size
    /// go through a multipart upload, checking for interruption
    /// between parts.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn upsert_file(&self, key: &str, data: Bytes, mime: &str) -> Result<(), Error> {
        let method = self.compression_for(key).to_string();
        let body = compress(&method, data)?;

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, mime.to_string().into());
        if !method.is_empty() {
            attributes.insert(Attribute::ContentEncoding, method.clone().into());
        }

        let path = self.object_path(key);

        if body.len() > self.buffer_size {
            let upload = self
                .object_store
                .put_multipart_opts(
                    &path,
                    PutMultipartOpts {
                        attributes,
                        ..Default::default()
                    },
                )
                .await?;

            let mut writer = WriteMultipart::new_with_chunk_size(upload, self.buffer_size);
            for part in body.chunks(self.buffer_size) {
                check_interrupt()?;
                writer.wait_for_capacity(UPLOAD_CONCURRENCY).await?;
                writer.write(part);
            }
            writer.finish().await?;
        } else {
            self.object_store
                .put_opts(
                    &path,
                    body.into(),
                    PutOptions {
                        attributes,
                        ..Default::default()
                    },
                )
                .await?;
        }

        debug!(key, "uploaded");
        Ok(())
    }

    /// All keys below `prefix`, relative to the cache root. The
    /// underlying store paginates internally.
    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let full_prefix = self.object_path(prefix);
        let base = self.base_path.as_ref();

        let mut keys = Vec::new();
        let mut listing = self.object_store.list(Some(&full_prefix));
        while let Some(meta) = listing.next().await {
            check_interrupt()?;
            let meta = meta?;
            let location = meta.location.as_ref();
            let relative = match base.is_empty() {
                true => location,
                false => location
                    .strip_prefix(base)
                    .and_then(|l| l.strip_prefix('/'))
                    .unwrap_or(location),
            };
            keys.push(relative.to_string());
        }

        Ok(keys)
    }
}

fn compress(method: &str, data: Bytes) -> Result<Bytes, Error> {
    match method {
        "" | "none" => Ok(data),
        "zstd" => Ok(zstd::stream::encode_all(data.as_ref(), 0)
            .map(Bytes::from)
            .map_err(Error::Io)?),
        other => Err(Error::UnsupportedCompression(other.to_string())),
    }
}

fn decompress(method: &str, data: Bytes) -> Result<Bytes, Error> {
    match method {
        "" | "none" => Ok(data),
        "zstd" => Ok(zstd::stream::decode_all(data.as_ref())
            .map(Bytes::from)
            .map_err(Error::Io)?),
        other => Err(Error::UnsupportedCompression(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_cache(config: DispatchConfig) -> BinaryCache {
        BinaryCache::from_url(&Url::parse("memory:///").unwrap(), &config).unwrap()
    }

    #[tokio::test]
    async fn missing_file_is_a_cache_miss() {
        let cache = memory_cache(DispatchConfig::default());

        assert!(!cache.file_exists("nope.narinfo").await.unwrap());
        match cache.get_file("nope.narinfo").await {
            Err(Error::NoSuchCacheFile(key)) => assert_eq!("nope.narinfo", key),
            other => panic!("expected NoSuchCacheFile, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn roundtrips_plain_files() {
        let cache = memory_cache(DispatchConfig::default());

        cache
            .upsert_file("nar/abc.nar", Bytes::from_static(b"contents"), "application/x-nix-nar")
            .await
            .unwrap();

        assert!(cache.file_exists("nar/abc.nar").await.unwrap());
        assert_eq!(
            Bytes::from_static(b"contents"),
            cache.get_file("nar/abc.nar").await.unwrap()
        );
    }

    #[tokio::test]
    async fn narinfo_compression_is_transparent() {
        let cache = memory_cache(DispatchConfig {
            narinfo_compression: "zstd".to_string(),
            ..Default::default()
        });

        let doc = Bytes::from(vec![b'x'; 4096]);
        cache
            .upsert_file("abc.narinfo", doc.clone(), "text/x-nix-narinfo")
            .await
            .unwrap();
        assert_eq!(doc, cache.get_file("abc.narinfo").await.unwrap());
    }

    #[tokio::test]
    async fn large_files_take_the_multipart_path() {
        let cache = memory_cache(DispatchConfig {
            buffer_size: 1024,
            ..Default::default()
        });

        let big = Bytes::from(vec![7u8; 10 * 1024 + 3]);
        cache
            .upsert_file("nar/big.nar", big.clone(), "application/x-nix-nar")
            .await
            .unwrap();
        assert_eq!(big, cache.get_file("nar/big.nar").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_compression_method_is_rejected() {
        let cache = memory_cache(DispatchConfig {
            log_compression: "lzip".to_string(),
            ..Default::default()
        });

        match cache
            .upsert_file("log/x", Bytes::from_static(b"log"), "text/plain")
            .await
        {
            Err(Error::UnsupportedCompression(m)) => assert_eq!("lzip", m),
            other => panic!("expected UnsupportedCompression, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn list_prefix_returns_relative_keys() {
        let cache = memory_cache(DispatchConfig::default());

        for key in ["a.narinfo", "b.narinfo", "nar/a.nar"] {
            cache
                .upsert_file(key, Bytes::from_static(b"x"), "text/plain")
                .await
                .unwrap();
        }

        let mut keys = cache.list_prefix("nar").await.unwrap();
        keys.sort();
        assert_eq!(vec!["nar/a.nar"], keys);
    }
}
