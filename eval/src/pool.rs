//! A fixed worker pool with a shared queue.
//!
//! Jobs may enqueue further jobs through a [PoolHandle];
//! [ThreadPool::process] returns once the queue has drained and no
//! job is running anymore.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send>;

struct PoolState {
    queue: VecDeque<Job>,
    active: usize,
    draining: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    /// Wakes workers when work arrives or draining starts.
    work: Condvar,
    /// Wakes [ThreadPool::process] when the pool goes quiet.
    quiet: Condvar,
}

pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct PoolHandle {
    shared: Arc<Shared>,
}

impl PoolHandle {
    pub fn enqueue(&self, job: impl FnOnce() + Send + 'static) {
        let mut state = self.shared.state.lock().expect("pool lock poisoned");
        state.queue.push_back(Box::new(job));
        self.shared.work.notify_one();
    }
}

impl ThreadPool {
    /// Spawn `size` workers. A size of zero is treated as one.
    pub fn new(size: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                active: 0,
                draining: false,
            }),
            work: Condvar::new(),
            quiet: Condvar::new(),
        });

        let workers = (0..size.max(1))
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || worker_loop(shared))
            })
            .collect();

        ThreadPool { shared, workers }
    }

    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn enqueue(&self, job: impl FnOnce() + Send + 'static) {
        self.handle().enqueue(job)
    }

    /// Block until all enqueued work (including work enqueued by that
    /// work) has completed, then shut the workers down.
    pub fn process(self) {
        {
            let mut state = self.shared.state.lock().expect("pool lock poisoned");
            while !(state.queue.is_empty() && state.active == 0) {
                state = self
                    .shared
                    .quiet
                    .wait(state)
                    .expect("pool lock poisoned");
            }
            state.draining = true;
            self.shared.work.notify_all();
        }

        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut state = shared.state.lock().expect("pool lock poisoned");
            loop {
                if let Some(job) = state.queue.pop_front() {
                    state.active += 1;
                    break job;
                }
                if state.draining {
                    return;
                }
                state = shared.work.wait(state).expect("pool lock poisoned");
            }
        };

        job();

        let mut state = shared.state.lock().expect("pool lock poisoned");
        state.active -= 1;
        if state.active == 0 && state.queue.is_empty() {
            shared.quiet.notify_all();
        }
    }
}

/// Pool size used by the search traversal, from the `CORES`
/// environment variable (default 1).
pub fn pool_size_from_env() -> usize {
    std::env::var("CORES")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&n| n > 0)
        .unwrap_or(1)
}
