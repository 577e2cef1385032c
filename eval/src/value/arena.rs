//! The arena backing all value nodes of one evaluation session.
//!
//! Every node carries a single atomic tag word encoding its state:
//!
//! ```text
//! {Thunk|App} --CAS--> Blackhole --success--> Done
//!      ^                   |
//!      '-----failure-------'
//! ```
//!
//! The compare-and-swap into `Blackhole` grants the winning thread the
//! exclusive right to evaluate the node; the store of `Done` (release)
//! is the publication point, after which the payload slot is
//! initialised and read-only for the node's lifetime. On failure the
//! pending computation is put back and the tag restored, so a later
//! force retries (and re-raises) the computation.
//!
//! Edges between nodes are plain [ValueId] indices. The arena outlives
//! all nodes, so cyclic graphs (through self-reference) need no
//! reference counting.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use crate::env::Env;
use crate::expr::Expr;
use crate::value::Value;

pub const TAG_THUNK: u8 = 0;
pub const TAG_APP: u8 = 1;
pub const TAG_BLACKHOLE: u8 = 2;
pub const TAG_DONE: u8 = 3;

/// Index of a node in its [ValueArena].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub(crate) u32);

/// A suspended computation, consumed exactly once by the thread that
/// wins the blackhole CAS.
#[derive(Clone, Debug)]
pub enum Pending {
    Thunk { expr: Arc<Expr>, env: Arc<Env> },
    App { function: ValueId, argument: ValueId },
}

pub(crate) struct ValueNode {
    tag: AtomicU8,
    pending: Mutex<Option<Pending>>,
    value: OnceLock<Value>,
}

impl ValueNode {
    pub(crate) fn tag(&self) -> u8 {
        self.tag.load(Ordering::Acquire)
    }

    /// Attempt the `{Thunk|App} -> Blackhole` transition. Success
    /// grants the caller the exclusive right to evaluate.
    pub(crate) fn try_blackhole(&self, from: u8) -> bool {
        self.tag
            .compare_exchange(from, TAG_BLACKHOLE, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub(crate) fn take_pending(&self) -> Option<Pending> {
        self.pending.lock().expect("pending slot lock poisoned").take()
    }

    pub(crate) fn restore(&self, from: u8, pending: Pending) {
        // The pending slot has to be refilled before the tag flips
        // back, or a racing forcer could win the CAS and find it
        // empty.
        *self.pending.lock().expect("pending slot lock poisoned") = Some(pending);

        if self
            .tag
            .compare_exchange(TAG_BLACKHOLE, from, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            // Only the owning thread may leave the blackhole state;
            // anything else indicates memory corruption.
            std::process::abort();
        }
    }

    pub(crate) fn publish(&self, value: Value) {
        if self.value.set(value).is_err() {
            unreachable!("value node published twice");
        }
        self.tag.store(TAG_DONE, Ordering::Release);
    }

    /// The evaluated value. Only legal after observing [TAG_DONE].
    pub(crate) fn value(&self) -> Value {
        self.value
            .get()
            .expect("value node read before publication")
            .clone()
    }
}

#[derive(Default)]
pub struct ValueArena {
    nodes: RwLock<Vec<Arc<ValueNode>>>,
}

impl ValueArena {
    fn push(&self, node: ValueNode) -> ValueId {
        let mut nodes = self.nodes.write().expect("arena lock poisoned");
        let id = ValueId(u32::try_from(nodes.len()).expect("arena exhausted"));
        nodes.push(Arc::new(node));
        id
    }

    pub(crate) fn node(&self, id: ValueId) -> Arc<ValueNode> {
        self.nodes.read().expect("arena lock poisoned")[id.0 as usize].clone()
    }

    /// Allocate an already-evaluated node.
    pub fn alloc_value(&self, value: Value) -> ValueId {
        let node = ValueNode {
            tag: AtomicU8::new(TAG_DONE),
            pending: Mutex::new(None),
            value: OnceLock::from(value),
        };
        self.push(node)
    }

    pub fn alloc_thunk(&self, expr: Arc<Expr>, env: Arc<Env>) -> ValueId {
        let node = ValueNode {
            tag: AtomicU8::new(TAG_THUNK),
            pending: Mutex::new(Some(Pending::Thunk { expr, env })),
            value: OnceLock::new(),
        };
        self.push(node)
    }

    pub fn alloc_app(&self, function: ValueId, argument: ValueId) -> ValueId {
        let node = ValueNode {
            tag: AtomicU8::new(TAG_APP),
            pending: Mutex::new(Some(Pending::App { function, argument })),
            value: OnceLock::new(),
        };
        self.push(node)
    }
}
