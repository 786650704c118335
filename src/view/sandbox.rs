//! Embedded scripting sandbox for map/reduce evaluation.
//!
//! The contract is small: compile a function from source text, expose a
//! native `emit(key, value?)` that appends to a request-local buffer,
//! and convert values between JSON and script land. Functions are rhai
//! closure expressions:
//!
//! ```text
//! |doc, meta| emit(doc.amount, ())
//! |keys, values, rereduce| { let sum = 0; for v in values { sum += v; } sum }
//! ```
//!
//! A [Sandbox] is request-local. It is deliberately not Send, sharing
//! one across requests is a bug.

use rhai::{Dynamic, Engine, FnPtr, AST};
use serde_json::Value;

use std::{cell::RefCell, rc::Rc};

use crate::{Error, Result};

/// One scripting context: an engine with `emit` wired up, plus the emit
/// buffer it appends to.
pub struct Sandbox {
    engine: Engine,
    emits: Rc<RefCell<Vec<(Dynamic, Dynamic)>>>,
}

/// A function compiled within a [Sandbox].
pub struct SandboxFn {
    ast: AST,
    fp: FnPtr,
}

impl Default for Sandbox {
    fn default() -> Sandbox {
        Sandbox::new()
    }
}

impl Sandbox {
    pub fn new() -> Sandbox {
        let mut engine = Engine::new();
        let emits: Rc<RefCell<Vec<(Dynamic, Dynamic)>>> = Rc::new(RefCell::new(vec![]));

        {
            let emits = Rc::clone(&emits);
            engine.register_fn("emit", move |key: Dynamic, value: Dynamic| {
                emits.borrow_mut().push((key, value));
            });
        }
        {
            let emits = Rc::clone(&emits);
            engine.register_fn("emit", move |key: Dynamic| {
                emits.borrow_mut().push((key, Dynamic::UNIT));
            });
        }

        Sandbox { engine, emits }
    }

    /// Compile `src`, a closure expression, into a callable function.
    pub fn compile(&self, src: &str) -> Result<SandboxFn> {
        let ast = err_at!(FailScript, self.engine.compile(src))?;
        let fp: FnPtr = err_at!(FailScript, self.engine.eval_ast(&ast))?;
        Ok(SandboxFn { ast, fp })
    }

    /// Invoke a map function with `(doc, meta)`. Return the rows the
    /// function emitted, in emit order.
    pub fn call_map(
        &self,
        func: &SandboxFn,
        doc: &Value,
        meta: &Value,
    ) -> Result<Vec<(Value, Value)>> {
        self.emits.borrow_mut().clear();

        let doc = err_at!(FailScript, rhai::serde::to_dynamic(doc))?;
        let meta = err_at!(FailScript, rhai::serde::to_dynamic(meta))?;
        let _: Dynamic =
            err_at!(FailScript, func.fp.call(&self.engine, &func.ast, (doc, meta)))?;

        let mut rows = vec![];
        for (key, value) in self.emits.borrow_mut().drain(..) {
            let key: Value = err_at!(FailScript, rhai::serde::from_dynamic(&key))?;
            let value: Value = err_at!(FailScript, rhai::serde::from_dynamic(&value))?;
            rows.push((key, value));
        }
        Ok(rows)
    }

    /// Invoke a reduce function with `(keys, values, rereduce)`.
    pub fn call_reduce(
        &self,
        func: &SandboxFn,
        keys: &[Value],
        values: &[Value],
        rereduce: bool,
    ) -> Result<Value> {
        let keys = err_at!(FailScript, rhai::serde::to_dynamic(keys))?;
        let values = err_at!(FailScript, rhai::serde::to_dynamic(values))?;

        let res: Dynamic = err_at!(
            FailScript,
            func.fp.call(&self.engine, &func.ast, (keys, values, rereduce))
        )?;
        err_at!(FailScript, rhai::serde::from_dynamic(&res))
    }
}

#[cfg(test)]
#[path = "sandbox_test.rs"]
mod sandbox_test;
