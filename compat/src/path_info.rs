use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::store_path::StorePath;

/// Metadata a store keeps about one valid path: what it references and
/// how large its serialisation is. This is the document stored next to
/// the contents in a binary cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathInfo {
    pub path: StorePath,

    #[serde(default)]
    pub references: BTreeSet<StorePath>,

    #[serde(rename = "narSize", default)]
    pub nar_size: u64,
}

impl PathInfo {
    pub fn new(path: StorePath) -> Self {
        PathInfo {
            path,
            references: BTreeSet::new(),
            nar_size: 0,
        }
    }
}
