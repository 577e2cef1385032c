//! Parallel traversal of an attribute tree, collecting every
//! derivation reachable from the root.
//!
//! Nested sets are only entered when they opt in via a truthy
//! `recurseForDerivations` attribute (the root is always entered). A
//! derivation failing its own assertion is skipped, not an error.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rand::seq::SliceRandom;
use tracing::debug;

use crate::env::Bindings;
use crate::errors::{Error, ErrorKind, EvalResult};
use crate::pool::{PoolHandle, ThreadPool};
use crate::state::EvalState;
use crate::value::{Value, ValueId};

/// One derivation found by [search_derivations].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchEntry {
    /// Dotted path of attribute names leading to the derivation.
    pub attr_path: String,
    pub name: String,
    pub drv_path: String,
}

struct Search {
    state: Arc<EvalState>,
    seen: Mutex<HashSet<ValueId>>,
    first_error: Mutex<Option<Error>>,
    callback: Box<dyn Fn(SearchEntry) + Send + Sync>,
    pool: PoolHandle,
}

/// Traverse the attribute tree rooted at `root` with `workers`
/// threads, invoking `callback` once per derivation found.
///
/// The callback runs on pool threads and must synchronise its own
/// output. The traversal order is deliberately randomised; only the
/// *set* of entries is deterministic.
pub fn search_derivations(
    state: Arc<EvalState>,
    root: ValueId,
    workers: usize,
    callback: impl Fn(SearchEntry) + Send + Sync + 'static,
) -> EvalResult<()> {
    let pool = ThreadPool::new(workers);

    let search = Arc::new(Search {
        state,
        seen: Mutex::new(HashSet::new()),
        first_error: Mutex::new(None),
        callback: Box::new(callback),
        pool: pool.handle(),
    });

    {
        let search = search.clone();
        pool.enqueue(move || Search::visit(&search, root, String::new()));
    }
    pool.process();

    let result = search.first_error.lock().expect("error slot poisoned").take();
    match result {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

impl Search {
    fn visit(self: &Arc<Self>, id: ValueId, attr_path: String) {
        {
            let mut seen = self.seen.lock().expect("seen set poisoned");
            if !seen.insert(id) {
                return;
            }
        }

        match self.visit_value(id, &attr_path) {
            Ok(()) => {}
            // A derivation that fails its own assertion is skipped.
            Err(Error {
                kind: ErrorKind::Assertion,
                ..
            }) => {
                debug!(attr_path, "skipping failed assertion");
            }
            Err(e) => {
                let mut slot = self.first_error.lock().expect("error slot poisoned");
                slot.get_or_insert(e);
            }
        }
    }

    fn visit_value(self: &Arc<Self>, id: ValueId, attr_path: &str) -> EvalResult<()> {
        let value = self.state.force_value(id)?;

        if self.state.is_derivation(&value)? {
            let attrs = value.as_attrs().expect("derivations are attribute sets");
            let entry = SearchEntry {
                attr_path: attr_path.to_string(),
                name: self.force_attr_string(attrs, "name")?,
                drv_path: self.force_attr_string(attrs, "drvPath")?,
            };
            (self.callback)(entry);
            return Ok(());
        }

        if let Value::Attrs(attrs) = value {
            // Below the root, only recurse where the set asks for it.
            if !attr_path.is_empty() {
                match attrs.get("recurseForDerivations") {
                    Some(attr) => {
                        if !self.state.force_bool(attr.value)? {
                            return Ok(());
                        }
                    }
                    None => return Ok(()),
                }
            }

            let mut children: Vec<(ValueId, String)> = attrs
                .iter()
                .map(|(name, attr)| {
                    let child_path = if attr_path.is_empty() {
                        name.to_string()
                    } else {
                        format!("{}.{}", attr_path, name)
                    };
                    (attr.value, child_path)
                })
                .collect();

            // Shuffling spreads sibling subtrees across the pool,
            // reducing worst-case serial dependency chains.
            children.shuffle(&mut rand::thread_rng());

            for (child, child_path) in children {
                let search = self.clone();
                self.pool
                    .enqueue(move || Search::visit(&search, child, child_path));
            }
        }

        Ok(())
    }

    fn force_attr_string(&self, attrs: &Bindings, name: &str) -> EvalResult<String> {
        match attrs.get(name) {
            Some(attr) => self.state.force_string(attr.value),
            None => Err(ErrorKind::MissingAttribute(name.to_string()).into()),
        }
    }
}
