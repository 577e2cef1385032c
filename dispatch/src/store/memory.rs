use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::info;

use styx_compat::{BuildResult, BuildStatus, Derivation, PathInfo, StorePath};

use super::Store;
use crate::error::Error;
use crate::unix_now;

/// Replaces the default builder of a [MemoryStore], e.g. to simulate
/// build failures. Returning `Err` models the builder machinery
/// itself blowing up, as opposed to a build that ran and failed.
pub type BuildHook = Box<
    dyn Fn(&MemoryStore, &StorePath, &Derivation) -> Result<BuildResult, Error> + Send + Sync,
>;

/// An in-memory [Store] whose builder materialises every output
/// deterministically from the derivation's canonical encoding. Used
/// by tests and for local wiring; the real sandboxed builder is not
/// this crate's business.
#[derive(Default)]
pub struct MemoryStore {
    contents: RwLock<HashMap<StorePath, (PathInfo, Bytes)>>,
    build_hook: RwLock<Option<BuildHook>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn set_build_hook(&self, hook: BuildHook) {
        *self.build_hook.write().expect("hook lock poisoned") = Some(hook);
    }

    pub fn insert(&self, info: PathInfo, contents: Bytes) {
        self.contents
            .write()
            .expect("store lock poisoned")
            .insert(info.path.clone(), (info, contents));
    }

    fn default_build(&self, drv: &Derivation) -> BuildResult {
        let start_time = unix_now();

        let mut all_valid = true;
        {
            let contents = self.contents.read().expect("store lock poisoned");
            for output in drv.outputs.values() {
                all_valid &= contents.contains_key(&output.path);
            }
        }
        if all_valid && !drv.outputs.is_empty() {
            return BuildResult::success(BuildStatus::AlreadyValid, start_time, unix_now());
        }

        for (name, output) in &drv.outputs {
            let contents = Bytes::from(format!("{}:{}", name, drv.to_canonical_json()));
            let info = PathInfo {
                path: output.path.clone(),
                references: Default::default(),
                nar_size: contents.len() as u64,
            };
            self.insert(info, contents);
        }

        BuildResult::success(BuildStatus::Built, start_time, unix_now())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn query_path_info(&self, path: &StorePath) -> Result<PathInfo, Error> {
        self.contents
            .read()
            .expect("store lock poisoned")
            .get(path)
            .map(|(info, _)| info.clone())
            .ok_or_else(|| Error::InvalidPath(path.to_absolute_path()))
    }

    async fn add_to_store(&self, info: PathInfo, contents: Bytes) -> Result<(), Error> {
        self.insert(info, contents);
        Ok(())
    }

    async fn export_path(&self, path: &StorePath) -> Result<(PathInfo, Bytes), Error> {
        self.contents
            .read()
            .expect("store lock poisoned")
            .get(path)
            .cloned()
            .ok_or_else(|| Error::InvalidPath(path.to_absolute_path()))
    }

    async fn build_derivation(
        &self,
        drv_path: &StorePath,
        drv: &Derivation,
    ) -> Result<BuildResult, Error> {
        info!(drv_path = %drv_path, "building");

        let hook = self.build_hook.read().expect("hook lock poisoned");
        match hook.as_ref() {
            Some(hook) => hook(self, drv_path, drv),
            None => Ok(self.default_build(drv)),
        }
    }
}
