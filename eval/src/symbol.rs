use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt::{self, Display};
use std::sync::{Arc, Mutex};

/// An interned attribute or variable name.
///
/// Symbols interned through the same [SymbolTable] share their backing
/// allocation, making equality checks cheap on the hot path. Ordering
/// and hashing go through the string contents, so symbols from
/// different tables still compare correctly.
#[derive(Clone, Debug, Eq)]
pub struct Symbol(Arc<str>);

impl Symbol {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl std::hash::Hash for Symbol {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Symbol {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Default)]
pub struct SymbolTable {
    symbols: Mutex<HashSet<Arc<str>>>,
}

impl SymbolTable {
    pub fn intern(&self, name: &str) -> Symbol {
        let mut symbols = self.symbols.lock().expect("symbol table lock poisoned");

        if let Some(existing) = symbols.get(name) {
            return Symbol(existing.clone());
        }

        let interned: Arc<str> = Arc::from(name);
        symbols.insert(interned.clone());
        Symbol(interned)
    }
}
