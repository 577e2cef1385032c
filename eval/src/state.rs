use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;

use styx_compat::check_interrupt;

use crate::env::{Attr, Bindings, Env};
use crate::errors::{Error, ErrorKind, EvalResult, Pos};
use crate::expr::{Expr, Literal};
use crate::symbol::{Symbol, SymbolTable};
use crate::value::arena::{TAG_APP, TAG_BLACKHOLE, TAG_DONE, TAG_THUNK};
use crate::value::{type_error, Closure, Pending, Primop, Value, ValueArena, ValueId};

thread_local! {
    /// Nodes the current thread is in the middle of forcing, keyed by
    /// owning state so unrelated sessions on one thread don't alias.
    /// A blackhole found in here is self-recursion; a blackhole not in
    /// here belongs to another thread and is waited out.
    static FORCING: RefCell<HashSet<(usize, u32)>> = RefCell::new(HashSet::new());
}

/// One evaluation session: the value arena, the symbol table, and the
/// operations driving expressions to head-normal form.
///
/// An [EvalState] may be shared across threads; each distinct thunk is
/// evaluated at most once no matter how many threads demand it.
pub struct EvalState {
    pub arena: ValueArena,
    symbols: SymbolTable,
}

impl Default for EvalState {
    fn default() -> Self {
        EvalState::new()
    }
}

impl EvalState {
    pub fn new() -> Self {
        EvalState {
            arena: ValueArena::default(),
            symbols: SymbolTable::default(),
        }
    }

    pub fn intern(&self, name: &str) -> Symbol {
        self.symbols.intern(name)
    }

    fn forcing_key(&self, id: ValueId) -> (usize, u32) {
        (self as *const EvalState as usize, id.0)
    }

    fn is_forcing(&self, id: ValueId) -> bool {
        let key = self.forcing_key(id);
        FORCING.with(|set| set.borrow().contains(&key))
    }

    /// Ensure `id` is in head-normal form and return its value.
    ///
    /// Exactly one thread performs the computation of any given node;
    /// all others either observe the published result or wait while a
    /// blackhole is pending. Re-entry from the same thread means the
    /// computation demands itself and raises infinite recursion.
    pub fn force_value(&self, id: ValueId) -> EvalResult<Value> {
        loop {
            check_interrupt()?;

            let node = self.arena.node(id);
            match node.tag() {
                TAG_DONE => return Ok(node.value()),

                TAG_BLACKHOLE => {
                    if self.is_forcing(id) {
                        return Err(ErrorKind::InfiniteRecursion.into());
                    }
                    // Another thread holds the node. Yield and look
                    // again; the tag may flip to Done (published) or
                    // back to Thunk (the peer failed).
                    std::thread::yield_now();
                }

                start_tag @ (TAG_THUNK | TAG_APP) => {
                    if !node.try_blackhole(start_tag) {
                        // Lost the race, restart from the top.
                        continue;
                    }

                    let key = self.forcing_key(id);
                    FORCING.with(|set| set.borrow_mut().insert(key));
                    let _guard = ForcingGuard(key);

                    let pending = node
                        .take_pending()
                        .expect("blackholed node has no pending computation");

                    match self.run_pending(&pending) {
                        Ok(value) => {
                            node.publish(value.clone());
                            debug_assert_eq!(TAG_DONE, node.tag());
                            return Ok(value);
                        }
                        Err(e) => {
                            node.restore(start_tag, pending);
                            return Err(e);
                        }
                    }
                }

                tag => unreachable!("value node with invalid tag {}", tag),
            }
        }
    }

    fn run_pending(&self, pending: &Pending) -> EvalResult<Value> {
        match pending {
            Pending::Thunk { expr, env } => self.eval(expr, env),
            Pending::App { function, argument } => {
                let f = self.force_value(*function)?;
                self.call_function(&f, *argument)
            }
        }
    }

    /// Force, then insist on an attribute set.
    pub fn force_attrs(&self, id: ValueId, pos: Option<Pos>) -> EvalResult<Arc<Bindings>> {
        match self.force_value(id).map_err(|e| annotate(e, pos))? {
            Value::Attrs(attrs) => Ok(attrs),
            other => Err(annotate(type_error("set", &other), pos)),
        }
    }

    /// Force, then insist on a list.
    pub fn force_list(&self, id: ValueId, pos: Option<Pos>) -> EvalResult<Arc<Vec<ValueId>>> {
        match self.force_value(id).map_err(|e| annotate(e, pos))? {
            Value::List(list) => Ok(list),
            other => Err(annotate(type_error("list", &other), pos)),
        }
    }

    pub fn force_bool(&self, id: ValueId) -> EvalResult<bool> {
        match self.force_value(id)? {
            Value::Bool(b) => Ok(b),
            other => Err(type_error("bool", &other)),
        }
    }

    pub fn force_string(&self, id: ValueId) -> EvalResult<String> {
        match self.force_value(id)? {
            Value::String(s) => Ok(s),
            other => Err(type_error("string", &other)),
        }
    }

    /// Drive an expression to head-normal form in the given scope.
    pub fn eval(&self, expr: &Expr, env: &Arc<Env>) -> EvalResult<Value> {
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                Literal::Int(i) => Value::Int(*i),
                Literal::Bool(b) => Value::Bool(*b),
                Literal::String(s) => Value::String(s.clone()),
                Literal::Path(p) => Value::Path(p.clone()),
                Literal::Null => Value::Null,
            }),

            Expr::Var(name, pos) => match env.lookup(name.as_str()) {
                Some(id) => self.force_value(id).map_err(|e| e.at(*pos)),
                None => Err(Error::new(
                    ErrorKind::UnknownVariable(name.to_string()),
                    *pos,
                )),
            },

            Expr::List(elements) => Ok(Value::list(
                elements
                    .iter()
                    .map(|e| self.arena.alloc_thunk(e.clone(), env.clone()))
                    .collect(),
            )),

            Expr::Attrs { recursive, entries } => {
                let scope = if *recursive {
                    Env::deferred(Some(env.clone()))
                } else {
                    env.clone()
                };

                let mut bindings = Bindings::new();
                for (name, expr, pos) in entries {
                    let id = self.arena.alloc_thunk(expr.clone(), scope.clone());
                    bindings.insert(name.clone(), Attr { value: id, pos: *pos });
                }

                if *recursive {
                    scope.initialise(bindings.clone());
                }

                Ok(Value::attrs(bindings))
            }

            Expr::Let { bindings, body } => {
                let scope = Env::deferred(Some(env.clone()));

                let mut frame = Bindings::new();
                for (name, expr) in bindings {
                    let id = self.arena.alloc_thunk(expr.clone(), scope.clone());
                    frame.insert(
                        name.clone(),
                        Attr {
                            value: id,
                            pos: Pos::NONE,
                        },
                    );
                }
                scope.initialise(frame);

                self.eval(body, &scope)
            }

            Expr::Select {
                subject,
                name,
                default,
                pos,
            } => {
                let value = self.eval(subject, env)?;
                let attrs = match value {
                    Value::Attrs(attrs) => attrs,
                    other => return Err(annotate(type_error("set", &other), Some(*pos))),
                };

                match attrs.get(name.as_str()) {
                    Some(attr) => self.force_value(attr.value),
                    None => match default {
                        Some(default) => self.eval(default, env),
                        None => Err(Error::new(
                            ErrorKind::MissingAttribute(name.to_string()),
                            *pos,
                        )),
                    },
                }
            }

            Expr::Lambda {
                argument,
                formals,
                body,
            } => Ok(Value::Lambda(Arc::new(Closure {
                argument: argument.clone(),
                formals: formals.clone(),
                body: body.clone(),
                env: env.clone(),
            }))),

            Expr::Apply { function, argument } => {
                let f = self.eval(function, env)?;
                let arg = self.arena.alloc_thunk(argument.clone(), env.clone());
                self.call_function(&f, arg)
            }

            Expr::If {
                condition,
                then_body,
                else_body,
            } => {
                let cond = self.eval(condition, env)?;
                match cond {
                    Value::Bool(true) => self.eval(then_body, env),
                    Value::Bool(false) => self.eval(else_body, env),
                    other => Err(type_error("bool", &other)),
                }
            }

            Expr::Assert {
                condition,
                body,
                pos,
            } => {
                let cond = self.eval(condition, env)?;
                match cond {
                    Value::Bool(true) => self.eval(body, env),
                    Value::Bool(false) => Err(Error::new(ErrorKind::Assertion, *pos)),
                    other => Err(annotate(type_error("bool", &other), Some(*pos))),
                }
            }
        }
    }

    /// Apply a function value to an argument node.
    pub fn call_function(&self, f: &Value, arg: ValueId) -> EvalResult<Value> {
        match f {
            Value::Lambda(closure) => {
                let scope = Env::deferred(Some(closure.env.clone()));
                let mut frame = Bindings::new();

                if let Some(name) = &closure.argument {
                    frame.insert(
                        name.clone(),
                        Attr {
                            value: arg,
                            pos: Pos::NONE,
                        },
                    );
                }

                if let Some(formals) = &closure.formals {
                    let attrs = self.force_attrs(arg, None)?;

                    for (name, default) in &formals.arguments {
                        match attrs.get(name.as_str()) {
                            Some(attr) => {
                                frame.insert(name.clone(), *attr);
                            }
                            None => match default {
                                Some(default) => {
                                    // Defaults may refer to the other
                                    // formals, so they close over the
                                    // call scope itself.
                                    let id =
                                        self.arena.alloc_thunk(default.clone(), scope.clone());
                                    frame.insert(
                                        name.clone(),
                                        Attr {
                                            value: id,
                                            pos: Pos::NONE,
                                        },
                                    );
                                }
                                None => {
                                    return Err(ErrorKind::MissingArgument(name.to_string()).into())
                                }
                            },
                        }
                    }

                    if !formals.ellipsis {
                        for (name, _) in attrs.iter() {
                            if !formals.arguments.iter().any(|(f, _)| f == name) {
                                return Err(
                                    ErrorKind::UnexpectedArgument(name.to_string()).into()
                                );
                            }
                        }
                    }
                }

                scope.initialise(frame);
                self.eval(&closure.body, &scope)
            }

            Value::Primop(primop) => {
                let mut args = primop.args.clone();
                args.push(arg);
                if args.len() == primop.arity {
                    (primop.func)(self, &args)
                } else {
                    Ok(Value::Primop(Primop {
                        args,
                        ..primop.clone()
                    }))
                }
            }

            other => Err(type_error("lambda", other)),
        }
    }

    /// Call a function with an automatically constructed argument set:
    /// every formal present in `args` is taken from there, the rest
    /// fall back to their defaults. Values that are not functions with
    /// formals are returned forced but otherwise untouched.
    pub fn auto_call_function(&self, args: &Bindings, id: ValueId) -> EvalResult<Value> {
        let value = self.force_value(id)?;

        let formals = match &value {
            Value::Lambda(closure) => match &closure.formals {
                Some(formals) => formals.clone(),
                None => return Ok(value),
            },
            _ => return Ok(value),
        };

        let mut actual = Bindings::new();
        for (name, default) in &formals.arguments {
            match args.get(name.as_str()) {
                Some(attr) => {
                    actual.insert(name.clone(), *attr);
                }
                None => {
                    if default.is_none() {
                        return Err(ErrorKind::MissingArgument(name.to_string()).into());
                    }
                }
            }
        }

        let arg = self.arena.alloc_value(Value::attrs(actual));
        self.call_function(&value, arg)
    }

    /// An attribute set is a derivation iff its `type` attribute is
    /// the string `"derivation"`.
    pub fn is_derivation(&self, value: &Value) -> EvalResult<bool> {
        let attrs = match value.as_attrs() {
            Some(attrs) => attrs,
            None => return Ok(false),
        };

        match attrs.get("type") {
            Some(attr) => match self.force_value(attr.value)? {
                Value::String(s) => Ok(s == "derivation"),
                _ => Ok(false),
            },
            None => Ok(false),
        }
    }
}

struct ForcingGuard((usize, u32));

impl Drop for ForcingGuard {
    fn drop(&mut self) {
        FORCING.with(|set| set.borrow_mut().remove(&self.0));
    }
}

fn annotate(e: Error, pos: Option<Pos>) -> Error {
    match pos {
        Some(pos) => e.at(pos),
        None => e,
    }
}

#[allow(unused)]
fn _assert_sync() {
    fn is_sync<T: Sync + Send>() {}
    is_sync::<EvalState>();
}
