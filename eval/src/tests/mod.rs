use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::env::{Attr, Bindings, Env};
use crate::errors::{ErrorKind, Pos};
use crate::expr::{Expr, Formals};
use crate::search::search_derivations;
use crate::state::EvalState;
use crate::value::{Primop, Value, ValueId};

fn eval_str(state: &EvalState, expr: &Expr) -> Value {
    state.eval(expr, &Env::root()).expect("eval must succeed")
}

#[test]
fn literals_evaluate_to_themselves() {
    let state = EvalState::new();
    assert!(matches!(eval_str(&state, &Expr::int(42)), Value::Int(42)));
    assert!(matches!(eval_str(&state, &Expr::null()), Value::Null));
}

#[test]
fn let_bindings_are_lazy() {
    let state = EvalState::new();
    let x = state.intern("x");
    let boom = state.intern("boom");

    // `boom` is unbound, but nothing ever demands it.
    let expr = Expr::let_in(
        vec![
            (x.clone(), Expr::int(1)),
            (boom.clone(), Expr::var(state.intern("undefined"))),
        ],
        Expr::var(x),
    );

    assert!(matches!(eval_str(&state, &expr), Value::Int(1)));
}

#[test]
fn let_bindings_see_each_other() {
    let state = EvalState::new();
    let x = state.intern("x");
    let y = state.intern("y");

    // let x = y; y = 7; in x
    let expr = Expr::let_in(
        vec![(x.clone(), Expr::var(y.clone())), (y, Expr::int(7))],
        Expr::var(x),
    );

    assert!(matches!(eval_str(&state, &expr), Value::Int(7)));
}

/// `let x = x; in x` must raise infinite recursion instead of hanging.
#[test]
fn self_recursion_is_detected() {
    let state = EvalState::new();
    let x = state.intern("x");

    let expr = Expr::let_in(vec![(x.clone(), Expr::var(x.clone()))], Expr::var(x));

    let err = state.eval(&expr, &Env::root()).expect_err("must fail");
    assert_eq!(ErrorKind::InfiniteRecursion, err.kind);
}

#[test]
fn select_with_default_falls_back() {
    let state = EvalState::new();
    let a = state.intern("a");
    let b = state.intern("b");

    let attrs = Expr::attrs(vec![(a, Expr::int(1))]);
    let expr = Arc::new(crate::expr::Expr::Select {
        subject: attrs,
        name: b,
        default: Some(Expr::int(99)),
        pos: Pos::NONE,
    });

    assert!(matches!(eval_str(&state, &expr), Value::Int(99)));
}

#[test]
fn select_missing_attribute_is_an_error() {
    let state = EvalState::new();
    let attrs = Expr::attrs(vec![]);
    let expr = Expr::select(attrs, state.intern("nope"));

    let err = state.eval(&expr, &Env::root()).expect_err("must fail");
    assert_eq!(ErrorKind::MissingAttribute("nope".to_string()), err.kind);
}

#[test]
fn force_attrs_reports_the_actual_type() {
    let state = EvalState::new();
    let id = state.arena.alloc_value(Value::Int(3));

    let err = state
        .force_attrs(id, Some(Pos::new(4, 2)))
        .expect_err("must fail");
    assert_eq!(
        ErrorKind::TypeError {
            expected: "set",
            actual: "int"
        },
        err.kind
    );
    assert_eq!(Some(Pos::new(4, 2)), err.pos);
}

static CONCURRENT_CALLS: AtomicUsize = AtomicUsize::new(0);

fn counting_primop(_state: &EvalState, _args: &[ValueId]) -> crate::EvalResult<Value> {
    CONCURRENT_CALLS.fetch_add(1, Ordering::SeqCst);
    // Widen the race window so competing forcers pile up on the
    // blackhole.
    std::thread::sleep(Duration::from_millis(20));
    Ok(Value::Int(42))
}

/// If many threads force the same application node, exactly one of
/// them runs the computation; all observe the result.
#[test]
fn concurrent_force_evaluates_once() {
    let state = Arc::new(EvalState::new());

    let primop = state.arena.alloc_value(Value::Primop(Primop {
        name: "count",
        arity: 1,
        args: vec![],
        func: counting_primop,
    }));
    let arg = state.arena.alloc_value(Value::Null);
    let app = state.arena.alloc_app(primop, arg);

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let state = state.clone();
            std::thread::spawn(move || state.force_value(app).expect("force must succeed"))
        })
        .collect();

    for thread in threads {
        assert!(matches!(thread.join().unwrap(), Value::Int(42)));
    }
    assert_eq!(1, CONCURRENT_CALLS.load(Ordering::SeqCst));
}

static FAILING_CALLS: AtomicUsize = AtomicUsize::new(0);

fn failing_primop(_state: &EvalState, _args: &[ValueId]) -> crate::EvalResult<Value> {
    FAILING_CALLS.fetch_add(1, Ordering::SeqCst);
    Err(ErrorKind::EvalError("boom".to_string()).into())
}

/// A failed evaluation leaves the node suspended again; the next
/// force retries (and re-raises) the computation.
#[test]
fn failed_force_restores_the_thunk() {
    let state = EvalState::new();

    let primop = state.arena.alloc_value(Value::Primop(Primop {
        name: "fail",
        arity: 1,
        args: vec![],
        func: failing_primop,
    }));
    let arg = state.arena.alloc_value(Value::Null);
    let app = state.arena.alloc_app(primop, arg);

    state.force_value(app).expect_err("must fail");
    state.force_value(app).expect_err("must fail again");
    assert_eq!(2, FAILING_CALLS.load(Ordering::SeqCst));
}

#[test]
fn lambda_formals_with_defaults() {
    let state = EvalState::new();
    let a = state.intern("a");
    let b = state.intern("b");

    // ({ a, b ? a }: b) { a = 5; }
    let lambda = Arc::new(crate::expr::Expr::Lambda {
        argument: None,
        formals: Some(Formals {
            arguments: vec![
                (a.clone(), None),
                (b.clone(), Some(Expr::var(a.clone()))),
            ],
            ellipsis: false,
        }),
        body: Expr::var(b),
    });
    let call = Expr::apply(lambda, Expr::attrs(vec![(a, Expr::int(5))]));

    assert!(matches!(eval_str(&state, &call), Value::Int(5)));
}

#[test]
fn lambda_rejects_unexpected_arguments() {
    let state = EvalState::new();
    let a = state.intern("a");
    let extra = state.intern("extra");

    let lambda = Arc::new(crate::expr::Expr::Lambda {
        argument: None,
        formals: Some(Formals {
            arguments: vec![(a.clone(), None)],
            ellipsis: false,
        }),
        body: Expr::var(a.clone()),
    });
    let call = Expr::apply(
        lambda,
        Expr::attrs(vec![(a, Expr::int(1)), (extra, Expr::int(2))]),
    );

    let err = state.eval(&call, &Env::root()).expect_err("must fail");
    assert_eq!(ErrorKind::UnexpectedArgument("extra".to_string()), err.kind);
}

#[test]
fn auto_call_supplies_matched_formals() {
    let state = EvalState::new();
    let a = state.intern("a");

    let lambda = Arc::new(crate::expr::Expr::Lambda {
        argument: None,
        formals: Some(Formals {
            arguments: vec![(a.clone(), None)],
            ellipsis: false,
        }),
        body: Expr::var(a.clone()),
    });
    let id = state
        .arena
        .alloc_thunk(lambda, Env::root());

    let mut args = Bindings::new();
    args.insert(
        a,
        Attr {
            value: state.arena.alloc_value(Value::Int(11)),
            pos: Pos::NONE,
        },
    );

    let result = state.auto_call_function(&args, id).expect("must succeed");
    assert!(matches!(result, Value::Int(11)));
}

#[test]
fn auto_call_leaves_non_functions_alone() {
    let state = EvalState::new();
    let id = state.arena.alloc_value(Value::Int(3));
    let result = state
        .auto_call_function(&Bindings::new(), id)
        .expect("must succeed");
    assert!(matches!(result, Value::Int(3)));
}

fn derivation_expr(state: &EvalState, name: &str) -> Arc<Expr> {
    Expr::attrs(vec![
        (state.intern("type"), Expr::string("derivation")),
        (state.intern("name"), Expr::string(name)),
        (
            state.intern("drvPath"),
            Expr::string(format!("/nix/store/aaaa-{}.drv", name)),
        ),
    ])
}

#[test]
fn is_derivation_checks_the_type_attribute() {
    let state = EvalState::new();

    let drv = eval_str(&state, &derivation_expr(&state, "hello"));
    assert!(state.is_derivation(&drv).unwrap());

    let not_drv = eval_str(
        &state,
        &Expr::attrs(vec![(state.intern("type"), Expr::string("fish"))]),
    );
    assert!(!state.is_derivation(&not_drv).unwrap());

    assert!(!state.is_derivation(&Value::Int(1)).unwrap());
}

fn collect_search(state: Arc<EvalState>, root: ValueId, workers: usize) -> Vec<String> {
    let found = Arc::new(Mutex::new(Vec::new()));
    let found2 = found.clone();

    search_derivations(state, root, workers, move |entry| {
        found2.lock().unwrap().push(entry.attr_path);
    })
    .expect("search must succeed");

    let mut paths = Arc::try_unwrap(found).unwrap().into_inner().unwrap();
    paths.sort();
    paths
}

/// Only sets carrying `recurseForDerivations = true` are entered
/// below the root, regardless of traversal order.
#[test]
fn search_respects_recurse_marker() {
    let state = Arc::new(EvalState::new());

    let tree = Expr::attrs(vec![
        (state.intern("a"), derivation_expr(&state, "one")),
        (
            state.intern("b"),
            Expr::attrs(vec![
                (state.intern("recurseForDerivations"), Expr::bool(true)),
                (state.intern("c"), derivation_expr(&state, "two")),
            ]),
        ),
        (
            state.intern("d"),
            Expr::attrs(vec![(state.intern("c"), derivation_expr(&state, "three"))]),
        ),
    ]);

    let root_value = state.eval(&tree, &Env::root()).unwrap();
    let root = state.arena.alloc_value(root_value);

    assert_eq!(vec!["a", "b.c"], collect_search(state, root, 4));
}

/// A derivation whose evaluation trips an assertion is skipped, not
/// an error.
#[test]
fn search_swallows_assertion_failures() {
    let state = Arc::new(EvalState::new());

    let tree = Expr::attrs(vec![
        (state.intern("good"), derivation_expr(&state, "good")),
        (
            state.intern("bad"),
            Expr::assert_(Expr::bool(false), derivation_expr(&state, "bad")),
        ),
    ]);

    let root_value = state.eval(&tree, &Env::root()).unwrap();
    let root = state.arena.alloc_value(root_value);

    assert_eq!(vec!["good"], collect_search(state, root, 2));
}

/// Other errors below the root do surface.
#[test]
fn search_propagates_real_errors() {
    let state = Arc::new(EvalState::new());

    let tree = Expr::attrs(vec![(
        state.intern("broken"),
        Expr::var(state.intern("undefined")),
    )]);

    let root_value = state.eval(&tree, &Env::root()).unwrap();
    let root = state.arena.alloc_value(root_value);

    let err = search_derivations(state, root, 2, |_| {}).expect_err("must fail");
    assert_eq!(
        ErrorKind::UnknownVariable("undefined".to_string()),
        err.kind
    );
}
