use std::collections::btree_map::{self, BTreeMap};
use std::sync::{Arc, OnceLock};

use crate::errors::Pos;
use crate::symbol::Symbol;
use crate::value::ValueId;

/// One named slot in an attribute set or scope, together with the
/// position it was bound at.
#[derive(Clone, Copy, Debug)]
pub struct Attr {
    pub value: ValueId,
    pub pos: Pos,
}

/// An ordered mapping from symbol to [Attr], with unique keys. Both
/// attribute sets and scope frames are backed by this.
#[derive(Clone, Debug, Default)]
pub struct Bindings(BTreeMap<Symbol, Attr>);

impl Bindings {
    pub fn new() -> Self {
        Bindings::default()
    }

    pub fn insert(&mut self, name: Symbol, attr: Attr) -> Option<Attr> {
        self.0.insert(name, attr)
    }

    pub fn get(&self, name: &str) -> Option<&Attr> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, Symbol, Attr> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a Bindings {
    type Item = (&'a Symbol, &'a Attr);
    type IntoIter = btree_map::Iter<'a, Symbol, Attr>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<(Symbol, Attr)> for Bindings {
    fn from_iter<T: IntoIterator<Item = (Symbol, Attr)>>(iter: T) -> Self {
        Bindings(iter.into_iter().collect())
    }
}

/// A scope in the chain of scopes an expression is evaluated in.
///
/// Recursive constructs (`let`, `rec { }`, lambda formals with
/// defaults) allocate their thunks against a scope whose bindings are
/// filled in afterwards; the [OnceLock] makes that two-step
/// construction safe, since no thunk is forced before construction
/// completes.
#[derive(Debug)]
pub struct Env {
    up: Option<Arc<Env>>,
    bindings: OnceLock<Bindings>,
}

impl Env {
    pub fn root() -> Arc<Env> {
        Arc::new(Env {
            up: None,
            bindings: OnceLock::from(Bindings::new()),
        })
    }

    pub fn with_bindings(up: Option<Arc<Env>>, bindings: Bindings) -> Arc<Env> {
        Arc::new(Env {
            up,
            bindings: OnceLock::from(bindings),
        })
    }

    /// A scope whose bindings arrive later, via [Env::initialise].
    pub fn deferred(up: Option<Arc<Env>>) -> Arc<Env> {
        Arc::new(Env {
            up,
            bindings: OnceLock::new(),
        })
    }

    pub fn initialise(&self, bindings: Bindings) {
        if self.bindings.set(bindings).is_err() {
            panic!("scope initialised twice");
        }
    }

    pub fn lookup(&self, name: &str) -> Option<ValueId> {
        let mut env = self;
        loop {
            if let Some(attr) = env.bindings.get().and_then(|b| b.get(name)) {
                return Some(attr.value);
            }
            match &env.up {
                Some(up) => env = up,
                None => return None,
            }
        }
    }
}
