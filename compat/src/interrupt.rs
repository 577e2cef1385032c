//! Process-wide cooperative cancellation.
//!
//! A single flag, set from the signal handler (or a test), polled by
//! every long-running loop: queue long-polls, blackhole wait loops in
//! the evaluator, and upload progress. Operations notice the flag at
//! their next check and unwind with [Interrupted].

use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("interrupted by the user")]
pub struct Interrupted;

/// Request cancellation of all interruptible operations.
pub fn trigger_interrupt() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Fails with [Interrupted] once [trigger_interrupt] has been called.
pub fn check_interrupt() -> Result<(), Interrupted> {
    if interrupted() {
        Err(Interrupted)
    } else {
        Ok(())
    }
}

/// Clear the flag again. Only tests and the program entry (before
/// installing the signal handler) have a reason to call this.
pub fn reset_interrupt() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}
