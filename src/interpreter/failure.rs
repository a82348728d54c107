//! This module contains failure reporting: the record of a witnessed
//! misbehaviour of the program under analysis, and the loggers that persist
//! such records.

use std::{
    collections::BTreeMap,
    path::PathBuf,
};

use downcast_rs::{impl_downcast, Downcast};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    interpreter::context::Context,
    ir::{assertion::Assertion, value::Value, OpKind, OpRef, Symbol},
    solver::Model,
};

/// A witnessed failure: the assertion that was satisfiable when it should
/// not have been, and a human-readable description.
#[derive(Clone, Debug)]
pub struct Failure {
    /// The offending assertion.
    pub assertion: Assertion,

    /// A description of what went wrong, e.g. `"division by zero"`.
    pub message: String,
}

impl Failure {
    /// Constructs a failure record.
    #[must_use]
    pub fn new(assertion: Assertion, message: impl Into<String>) -> Self {
        let message = message.into();
        Self { assertion, message }
    }
}

/// The sink failures are reported into.
///
/// The model is present whenever the solver produced one; it is absent for
/// failures reported under an `Unknown` verdict in strict mode. What a
/// logger does with the report (collect it, write a reproducer to disk,
/// feed a fuzzer) is its own business.
///
/// The trait is bounded by [`Downcast`] so that a client holding the boxed
/// logger can recover its concrete type, e.g. to read a
/// [`CollectingLogger`] back after a run.
pub trait FailureLogger
where
    Self: Downcast,
{
    /// Reports a failure witnessed on `ctx`.
    fn log_failure(&mut self, model: Option<&dyn Model>, ctx: &Context, failure: &Failure);
}

impl_downcast!(FailureLogger);

/// A fully evaluated failure report, with the witnessing inputs pulled out
/// of the model.
#[derive(Clone, Debug, Serialize)]
pub struct FailureRecord {
    /// The failure description.
    pub message: String,

    /// The offending assertion, rendered.
    pub assertion: String,

    /// The location the path had reached.
    pub location: String,

    /// The concrete witness: one value per symbolic input that appears in
    /// the path condition or the offending assertion.
    pub inputs: BTreeMap<String, Value>,
}

impl FailureRecord {
    /// Builds a record from a report, evaluating every symbol reachable
    /// from the path condition and the offending assertion.
    #[must_use]
    pub fn build(model: Option<&dyn Model>, ctx: &Context, failure: &Failure) -> Self {
        let mut symbols = Vec::new();
        collect_symbols(failure.assertion.value(), &mut symbols);
        for assertion in ctx.assertions().iter() {
            collect_symbols(assertion.value(), &mut symbols);
        }

        let mut inputs = BTreeMap::new();
        if let Some(model) = model {
            for symbol in symbols {
                if let Some(value) = model.lookup(&symbol, None) {
                    inputs.insert(symbol.to_string(), value);
                }
            }
        }

        Self {
            message: failure.message.clone(),
            assertion: failure.assertion.to_string(),
            location: ctx.location().to_string(),
            inputs,
        }
    }
}

/// Collects every symbol referenced by an expression, in first-visit
/// order.
fn collect_symbols(op: &OpRef, out: &mut Vec<Symbol>) {
    let mut push = |symbol: &Symbol| {
        if !out.contains(symbol) {
            out.push(symbol.clone());
        }
    };

    match op.kind() {
        OpKind::Constant(symbol) => push(symbol),
        OpKind::ConstantArray { symbol, size } => {
            push(symbol);
            collect_symbols(size, out);
        }
        OpKind::ConstantInt(_) | OpKind::ConstantFloat(_) | OpKind::Undef => {}
        OpKind::Unary { operand, .. } => collect_symbols(operand, out),
        OpKind::Binary { lhs, rhs, .. }
        | OpKind::ICmp { lhs, rhs, .. }
        | OpKind::FCmp { lhs, rhs, .. } => {
            collect_symbols(lhs, out);
            collect_symbols(rhs, out);
        }
        OpKind::Select {
            cond,
            true_value,
            false_value,
        } => {
            collect_symbols(cond, out);
            collect_symbols(true_value, out);
            collect_symbols(false_value, out);
        }
        OpKind::FixedArray { elements } => {
            for element in elements {
                collect_symbols(element, out);
            }
        }
        OpKind::AllocArray { size, default } => {
            collect_symbols(size, out);
            collect_symbols(default, out);
        }
        OpKind::Load { array, index } => {
            collect_symbols(array, out);
            collect_symbols(index, out);
        }
        OpKind::Store {
            array,
            index,
            value,
        } => {
            collect_symbols(array, out);
            collect_symbols(index, out);
            collect_symbols(value, out);
        }
    }
}

/// A logger that keeps every report in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct CollectingLogger {
    failures: Vec<FailureRecord>,
}

impl CollectingLogger {
    /// Creates a logger with no recorded failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the recorded failures in report order.
    #[must_use]
    pub fn failures(&self) -> &[FailureRecord] {
        self.failures.as_slice()
    }

    /// Gets the number of recorded failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Checks whether no failures have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl FailureLogger for CollectingLogger {
    fn log_failure(&mut self, model: Option<&dyn Model>, ctx: &Context, failure: &Failure) {
        self.failures.push(FailureRecord::build(model, ctx, failure));
    }
}

/// A logger that writes one JSON reproducer file per failure into a
/// directory.
///
/// File names are fresh UUIDs, so concurrent engines can share a
/// directory. Write errors are traced and otherwise swallowed: a failing
/// disk must not take the analysis down with it.
#[derive(Clone, Debug)]
pub struct DirectoryLogger {
    root: PathBuf,
}

impl DirectoryLogger {
    /// Creates a logger writing into `root`, creating the directory if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the directory cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }
}

impl FailureLogger for DirectoryLogger {
    fn log_failure(&mut self, model: Option<&dyn Model>, ctx: &Context, failure: &Failure) {
        let record = FailureRecord::build(model, ctx, failure);
        let path = self.root.join(format!("{}.json", Uuid::new_v4()));

        let result = serde_json::to_string_pretty(&record)
            .map_err(std::io::Error::other)
            .and_then(|json| std::fs::write(&path, json));
        match result {
            Ok(()) => tracing::debug!(path = %path.display(), "Wrote failure reproducer"),
            Err(error) => {
                tracing::error!(%error, path = %path.display(), "Failed to write reproducer");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use crate::{
        interpreter::{
            context::Context,
            failure::{collect_symbols, DirectoryLogger, Failure, FailureLogger},
        },
        ir::{assertion::Assertion, types::Type, ICmpPredicate, Op, Symbol},
        module::{builder::FunctionBuilder, IrType, Module},
    };

    #[test]
    fn symbol_collection_visits_every_leaf_once() {
        let x = Op::symbol(Symbol::named("x"), Type::int(32));
        let y = Op::symbol(Symbol::named("y"), Type::int(32));
        let expr = Op::icmp(ICmpPredicate::Eq, &Op::add(&x, &y), &Op::add(&y, &x));
        let assertion = Assertion::new(expr);

        let mut symbols = Vec::new();
        collect_symbols(assertion.value(), &mut symbols);

        assert_eq!(symbols.len(), 2);
        assert!(symbols.contains(&Symbol::named("x")));
        assert!(symbols.contains(&Symbol::named("y")));
    }

    #[test]
    fn directory_logger_writes_one_reproducer_per_failure() -> anyhow::Result<()> {
        let mut fb = FunctionBuilder::new("main", &[], IrType::Void);
        fb.ret(None);
        let module = Rc::new(Module::new(
            "test",
            crate::module::DataLayout::default(),
            [fb.build()?],
        ));
        let ctx = Context::for_entry(module, "main", vec![])?;

        let dir = tempfile::tempdir()?;
        let mut logger = DirectoryLogger::new(dir.path())?;

        let x = Op::symbol(Symbol::named("x"), Type::int(32));
        let failing = Assertion::new(Op::icmp(ICmpPredicate::Eq, &x, &Op::int(32, 0)));
        logger.log_failure(None, &ctx, &Failure::new(failing, "division by zero"));

        let entries: Vec<_> = std::fs::read_dir(dir.path())?.collect();
        assert_eq!(entries.len(), 1);
        let path = entries[0].as_ref().unwrap().path();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("json"));

        let contents = std::fs::read_to_string(path)?;
        assert!(contents.contains("division by zero"));

        Ok(())
    }
}
