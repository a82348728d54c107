//! This module contains the registry of built-in functions: the named
//! handlers that calls dispatch to when the callee has no body in the
//! module.
//!
//! The default set covers the analysis primitives (`__sym_assert`,
//! `__sym_assume`) and the C allocation interface (`malloc`, `free`).
//! Clients can register additional handlers, e.g. to model the parts of a
//! runtime their programs call into.

use std::{collections::HashMap, rc::Rc};

use crate::{
    error::execution::Error,
    interpreter::{
        exec::{boolify, normalize_width, report_and_assume},
        transform::{Arg, TransformBuilder},
    },
    ir::{assertion::Assertion, types::Type, ICmpPredicate, Op},
    memory::{AllocationKind, HeapIndex, RuntimeValue},
    module::{IrType, Operand, ValueId},
};

/// The shape of a call site handed to a built-in handler.
#[derive(Clone, Debug)]
pub struct CallInfo {
    /// The SSA value receiving the call's result, if any.
    pub dest: Option<ValueId>,

    /// The call's arguments.
    pub args: Vec<Operand>,

    /// The call's return type.
    pub ret: IrType,
}

/// A handler compiling one built-in call into pipeline operations.
pub type BuiltinHandler =
    Rc<dyn Fn(&mut TransformBuilder, &CallInfo) -> Result<(), Error>>;

/// The name-keyed table of built-in handlers.
#[derive(Clone, Default)]
pub struct Builtins {
    handlers: HashMap<String, BuiltinHandler>,
}

impl std::fmt::Debug for Builtins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Builtins").field("names", &names).finish()
    }
}

impl Builtins {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the registry with the default handlers installed.
    #[must_use]
    pub fn default_set() -> Self {
        let mut builtins = Self::new();
        builtins.register("__sym_assert", Rc::new(build_assert));
        builtins.register("__sym_assume", Rc::new(build_assume));
        builtins.register("malloc", Rc::new(build_malloc));
        builtins.register("free", Rc::new(build_free));
        builtins
    }

    /// Registers (or replaces) a handler under `name`.
    pub fn register(&mut self, name: impl Into<String>, handler: BuiltinHandler) {
        self.handlers.insert(name.into(), handler);
    }

    /// Checks whether a handler exists for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Compiles the call to `name` into `tb`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no handler is registered for `name`, or the
    /// handler rejects the call.
    pub fn build(
        &self,
        name: &str,
        tb: &mut TransformBuilder,
        info: &CallInfo,
    ) -> Result<(), Error> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| Error::MissingFunctionBody { name: name.into() })?;
        handler(tb, info)
    }
}

/// The assertion primitive: `__sym_assert(cond)`.
///
/// Where `cond == 0` is reachable a failure is logged with its witnessing
/// model; execution then continues under the assumption that the
/// assertion held, so one path can witness several assertion failures.
fn build_assert(tb: &mut TransformBuilder, info: &CallInfo) -> Result<(), Error> {
    let condition = info.args.first().cloned().ok_or(Error::TypeMismatch {
        expected: "one condition argument".into(),
        found: "no arguments".into(),
    })?;

    let _ = tb.transform(move |state, icx| {
        let cond = state
            .lookup(&Arg::Operand(condition.clone()))?
            .scalar()?
            .to_expr(state.ctx.heaps())?;
        let holds = boolify(&cond);
        let failing = holds.negate();
        report_and_assume(state, icx, &failing, "assertion failed");
        Ok(())
    });
    Ok(())
}

/// The assumption primitive: `__sym_assume(cond)` constrains the path
/// condition without any check.
fn build_assume(tb: &mut TransformBuilder, info: &CallInfo) -> Result<(), Error> {
    let condition = info.args.first().cloned().ok_or(Error::TypeMismatch {
        expected: "one condition argument".into(),
        found: "no arguments".into(),
    })?;

    let _ = tb.transform(move |state, _| {
        let cond = state
            .lookup(&Arg::Operand(condition.clone()))?
            .scalar()?
            .to_expr(state.ctx.heaps())?;
        state.ctx.add(boolify(&cond));
        Ok(())
    });
    Ok(())
}

/// The `malloc(size)` model: a fresh heap allocation of uninitialised
/// bytes.
///
/// The returned pointer is always non-null; modelling allocation failure
/// is left to programs that want it, via an explicit symbolic choice.
fn build_malloc(tb: &mut TransformBuilder, info: &CallInfo) -> Result<(), Error> {
    let size = info.args.first().cloned().ok_or(Error::TypeMismatch {
        expected: "one size argument".into(),
        found: "no arguments".into(),
    })?;
    let dest = info.dest;

    let _ = tb.transform(move |state, _| {
        let width = state.ctx.layout().pointer_bits;
        let requested = state
            .lookup(&Arg::Operand(size.clone()))?
            .scalar()?
            .to_expr(state.ctx.heaps())?;
        let size = normalize_width(&requested, width);

        let data = Op::alloc_array(&size, &Op::undef(Type::int(8)));
        let id = state
            .ctx
            .allocate(HeapIndex::MAIN, size, data, AllocationKind::Heap);

        let ptr = crate::memory::Pointer::resolved(HeapIndex::MAIN, id, Op::int(width, 0));
        if let Some(dest) = dest {
            state.ctx.top_frame_mut()?.insert(dest, RuntimeValue::pointer(ptr));
        }
        Ok(())
    });
    Ok(())
}

/// The `free(ptr)` model.
///
/// The pointer is resolved like any other access, forking per candidate
/// allocation; freeing through an interior pointer is reported as a
/// failure. The allocation is then removed, so later accesses through
/// stale pointers fail their validity checks.
fn build_free(tb: &mut TransformBuilder, info: &CallInfo) -> Result<(), Error> {
    let pointer = info.args.first().cloned().ok_or(Error::TypeMismatch {
        expected: "one pointer argument".into(),
        found: "no arguments".into(),
    })?;

    let resolved = tb.resolve(Arg::Operand(pointer), IrType::Int(8), false);
    let _ = tb.transform(move |state, icx| {
        let ptr = state
            .lookup(&Arg::Value(resolved))?
            .scalar()?
            .pointer()?
            .clone();

        let offset = ptr.offset()?;
        let width = offset.ty().bitwidth();
        let interior = Assertion::new(Op::icmp(
            ICmpPredicate::Ne,
            offset,
            &Op::int(width, 0),
        ));
        report_and_assume(state, icx, &interior, "free of an interior pointer");

        state
            .ctx
            .heaps_mut()
            .heap_mut(ptr.heap())
            .remove(ptr.alloc()?);
        Ok(())
    });
    Ok(())
}

#[cfg(test)]
mod test {
    use crate::interpreter::builtins::Builtins;

    #[test]
    fn the_default_set_contains_the_analysis_primitives() {
        let builtins = Builtins::default_set();
        assert!(builtins.contains("__sym_assert"));
        assert!(builtins.contains("__sym_assume"));
        assert!(builtins.contains("malloc"));
        assert!(builtins.contains("free"));
        assert!(!builtins.contains("memcpy"));
    }
}
