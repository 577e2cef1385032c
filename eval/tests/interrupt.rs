//! Interrupt behaviour of the blackhole wait loop.
//!
//! This lives in its own test binary because the interrupt flag is
//! process-global.

use std::sync::Arc;
use std::time::Duration;

use styx_compat::{reset_interrupt, trigger_interrupt};
use styx_eval::errors::ErrorKind;
use styx_eval::value::{Primop, Value, ValueId};
use styx_eval::EvalState;

fn slow_primop(_state: &EvalState, _args: &[ValueId]) -> styx_eval::EvalResult<Value> {
    std::thread::sleep(Duration::from_millis(500));
    Ok(Value::Int(1))
}

/// A thread parked on another thread's blackhole notices the
/// interrupt instead of spinning forever.
#[test]
fn blackhole_wait_is_interruptible() {
    reset_interrupt();

    let state = Arc::new(EvalState::new());
    let primop = state.arena.alloc_value(Value::Primop(Primop {
        name: "slow",
        arity: 1,
        args: vec![],
        func: slow_primop,
    }));
    let arg = state.arena.alloc_value(Value::Null);
    let app = state.arena.alloc_app(primop, arg);

    let owner = {
        let state = state.clone();
        std::thread::spawn(move || state.force_value(app))
    };

    // Give the owner time to blackhole the node, then let a second
    // forcer pile up on it.
    std::thread::sleep(Duration::from_millis(100));
    let waiter = {
        let state = state.clone();
        std::thread::spawn(move || state.force_value(app))
    };

    std::thread::sleep(Duration::from_millis(100));
    trigger_interrupt();

    let err = waiter
        .join()
        .unwrap()
        .expect_err("waiter must be interrupted");
    assert_eq!(ErrorKind::Interrupted(styx_compat::Interrupted), err.kind);

    // The owning thread is not at an interrupt check inside the
    // primop, so it still publishes its result.
    assert!(matches!(owner.join().unwrap(), Ok(Value::Int(1))));

    reset_interrupt();
}
