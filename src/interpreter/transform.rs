//! This module contains the [`TransformBuilder`]: the pipeline through
//! which every instruction's semantics are expressed.
//!
//! An instruction is compiled into a short sequence of typed operations
//! over a [`ContextState`] (a context plus a scratch value map). Each
//! operation may fork: it receives a state and pushes zero or more
//! continuation states. The executor drives a LIFO worklist, so the call
//! depth is bounded by the pipeline length rather than by how much the
//! states branch. States that fall off the end of the pipeline are the
//! step's outputs.

use std::collections::HashMap;

use derivative::Derivative;
use itertools::Itertools;

use crate::{
    error::execution::Error,
    interpreter::{context::Context, facade::InterpreterContext},
    ir::{assertion::Assertion, ICmpPredicate, Op},
    memory::RuntimeValue,
    module::{IrType, Operand, ValueId},
};

/// A handle to a value produced by an earlier pipeline operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Value(u32);

/// An argument of a pipeline operation: either a program operand looked up
/// against the state's frame, or the product of an earlier operation.
#[derive(Clone, Debug)]
pub enum Arg {
    /// A program operand.
    Operand(Operand),

    /// A value produced earlier in this pipeline.
    Value(Value),
}

impl From<Operand> for Arg {
    fn from(value: Operand) -> Self {
        Self::Operand(value)
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// One in-flight state of a pipeline execution.
#[derive(Clone, Debug)]
pub struct ContextState {
    /// The context this state owns.
    pub ctx: Context,

    values: HashMap<u32, RuntimeValue>,

    /// The index of the next pipeline operation to execute.
    inst: usize,
}

impl ContextState {
    fn new(ctx: Context) -> Self {
        Self {
            ctx,
            values: HashMap::new(),
            inst: 0,
        }
    }

    /// Looks up an argument: pipeline values come from the scratch map,
    /// operands from the context's top frame.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the argument has not been defined.
    pub fn lookup(&self, arg: &Arg) -> Result<RuntimeValue, Error> {
        match arg {
            Arg::Value(value) => self
                .values
                .get(&value.0)
                .cloned()
                .ok_or(Error::UndefinedValue { id: value.0 }),
            Arg::Operand(operand) => {
                let layout = self.ctx.layout();
                self.ctx.top_frame()?.operand_value(operand, &layout)
            }
        }
    }

    /// Stores a pipeline value.
    pub fn insert(&mut self, value: Value, runtime: RuntimeValue) {
        self.values.insert(value.0, runtime);
    }

    /// Gets the handle of the operation currently executing.
    ///
    /// Valid only while an operation runs, as the executor advances the
    /// index before invoking it.
    #[must_use]
    pub fn current(&self) -> Value {
        Value(self.inst as u32 - 1)
    }

    /// Forks this state over a different context, sharing the scratch
    /// values and the pipeline position.
    #[must_use]
    pub fn fork_with(&self, ctx: Context) -> Self {
        Self {
            ctx,
            values: self.values.clone(),
            inst: self.inst,
        }
    }
}

type StepFn = Box<
    dyn Fn(
        ContextState,
        &mut InterpreterContext<'_>,
        &mut dyn FnMut(ContextState),
    ) -> Result<(), Error>,
>;

/// The outcome of executing a pipeline against an interpreter context.
#[derive(Debug)]
pub enum StepResult {
    /// Exactly one state survived and replaced the interpreter's context.
    Continue,

    /// Several states survived; they become new contexts for the store.
    Fork(Vec<Context>),

    /// No state survived; the path ends here.
    Dead,
}

/// A recorded pipeline of possibly-forking operations.
#[derive(Derivative, Default)]
#[derivative(Debug)]
pub struct TransformBuilder {
    #[derivative(Debug = "ignore")]
    operations: Vec<StepFn>,
}

impl TransformBuilder {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an operation that may push zero or more continuation
    /// states.
    ///
    /// A state that is not pushed back is dropped, which kills that branch
    /// of the step.
    pub fn transform_fork(
        &mut self,
        f: impl Fn(
                ContextState,
                &mut InterpreterContext<'_>,
                &mut dyn FnMut(ContextState),
            ) -> Result<(), Error>
            + 'static,
    ) -> Value {
        self.operations.push(Box::new(f));
        Value(self.operations.len() as u32 - 1)
    }

    /// Appends an operation that mutates the state in place and always
    /// continues.
    pub fn transform(
        &mut self,
        f: impl Fn(&mut ContextState, &mut InterpreterContext<'_>) -> Result<(), Error> + 'static,
    ) -> Value {
        self.transform_fork(move |mut state, icx, push| {
            f(&mut state, icx)?;
            push(state);
            Ok(())
        })
    }

    /// Appends an operation binding `dest` in the frame to the value of
    /// `arg`.
    pub fn assign(&mut self, dest: ValueId, arg: impl Into<Arg>) {
        let arg = arg.into();
        let _ = self.transform(move |state, _| {
            let value = state.lookup(&arg)?;
            state.ctx.top_frame_mut()?.insert(dest, value);
            Ok(())
        });
    }

    /// Appends an operation binding `dest` in the frame to a fixed value.
    pub fn assign_value(&mut self, dest: ValueId, value: RuntimeValue) {
        let _ = self.transform(move |state, _| {
            state.ctx.top_frame_mut()?.insert(dest, value.clone());
            Ok(())
        });
    }

    /// Appends the pointer-resolution operation.
    ///
    /// The operation checks that accessing `store_size(ty)` bytes through
    /// the pointer can be valid, logging a failure when invalidity is
    /// reachable (and, with `die_on_failure`, ending the path there). It
    /// then forks the state once per candidate allocation, constraining
    /// each fork with the inbounds assertion and, for a previously
    /// unresolved pointer, the equality tying the address to the chosen
    /// candidate. The operation's value is the resolved pointer in each
    /// fork.
    pub fn resolve(&mut self, ptr: impl Into<Arg>, ty: IrType, die_on_failure: bool) -> Value {
        let ptr = ptr.into();
        self.transform_fork(move |mut state, icx, push| {
            let layout = state.ctx.layout();
            let len = layout.store_size(&ty);
            let result_id = state.current();
            let unresolved = state.lookup(&ptr)?.scalar()?.pointer()?.clone();

            let valid = state.ctx.heaps().check_valid(&unresolved, len)?;
            {
                let mut view = icx.with_other(&mut state.ctx);
                if view.log_failure(&valid.negate(), "invalid pointer load/store")
                    && die_on_failure
                {
                    // An out-of-bounds address can usually overlap just
                    // about any other allocation, and exploring those
                    // aliases rarely witnesses anything new.
                    return Ok(());
                }
            }

            let candidates = {
                let mut view = icx.with_other(&mut state.ctx);
                view.ptr_resolve(&unresolved)?
            };
            tracing::trace!(candidates = candidates.len(), "Pointer resolved");

            let forks = state.ctx.fork(candidates.len());
            for (mut fork, resolved) in forks.into_iter().zip_eq(candidates) {
                let inbounds = {
                    let alloc = fork.heaps().ptr_allocation(&resolved)?;
                    alloc.check_inbounds(resolved.offset()?, len)
                };
                fork.add(inbounds);

                if !unresolved.is_resolved() {
                    let address = unresolved.value(fork.heaps())?;
                    let chosen = resolved.value(fork.heaps())?;
                    fork.add(Assertion::new(Op::icmp(
                        ICmpPredicate::Eq,
                        &address,
                        &chosen,
                    )));
                }

                let mut next = state.fork_with(fork);
                next.insert(result_id, RuntimeValue::pointer(resolved));
                push(next);
            }
            Ok(())
        })
    }

    /// Appends a typed read through a resolved pointer; the operation's
    /// value is the value read.
    pub fn read(&mut self, ptr: impl Into<Arg>, ty: IrType) -> Value {
        let ptr = ptr.into();
        self.transform(move |state, _| {
            let pointer = state.lookup(&ptr)?.scalar()?.pointer()?.clone();
            let layout = state.ctx.layout();
            let value = state.ctx.heaps().read(&pointer, &ty, &layout)?;
            let id = state.current();
            state.insert(id, value);
            Ok(())
        })
    }

    /// Appends a typed write of `value` through a resolved pointer.
    pub fn write(&mut self, ptr: impl Into<Arg>, value: impl Into<Arg>, ty: IrType) {
        let ptr = ptr.into();
        let value = value.into();
        let _ = self.transform(move |state, _| {
            let pointer = state.lookup(&ptr)?.scalar()?.pointer()?.clone();
            let payload = state.lookup(&value)?;
            let layout = state.ctx.layout();
            state.ctx.heaps_mut().write(&pointer, &ty, &payload, &layout)?;
            Ok(())
        });
    }

    /// Executes the recorded pipeline against the interpreter's current
    /// context.
    ///
    /// # Errors
    ///
    /// Forwards the first engine fault raised by any operation.
    pub fn execute(&self, icx: &mut InterpreterContext<'_>) -> Result<StepResult, Error> {
        let mut worklist = vec![ContextState::new(icx.context().fork_once())];
        let mut outputs: Vec<Context> = Vec::new();

        while let Some(mut state) = worklist.pop() {
            if state.inst >= self.operations.len() {
                outputs.push(state.ctx);
                continue;
            }

            let operation = &self.operations[state.inst];
            state.inst += 1;

            // The operation decides which states continue by pushing them.
            let mut pushed = Vec::new();
            operation(state, icx, &mut |s| pushed.push(s))?;
            worklist.extend(pushed);
        }

        match outputs.len() {
            0 => Ok(StepResult::Dead),
            1 => {
                *icx.context_mut() = outputs.pop().expect("One output is present");
                Ok(StepResult::Continue)
            }
            _ => Ok(StepResult::Fork(outputs)),
        }
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use crate::{
        interpreter::{
            context::{Context, EntryArg},
            facade::{Environment, InterpreterContext},
            failure::CollectingLogger,
            policy::AlwaysExecutePolicy,
            store::FifoContextStore,
            transform::{StepResult, TransformBuilder},
            ExecutionStats,
            InterpreterOptions,
        },
        ir::Op,
        memory::RuntimeValue,
        module::{builder::FunctionBuilder, IrType, Module},
        solver::z3::Z3Solver,
    };

    fn environment() -> Environment {
        Environment {
            solver: Z3Solver::new().into_shared(),
            logger: Box::new(CollectingLogger::new()),
            policy: Box::new(AlwaysExecutePolicy),
            store: Box::new(FifoContextStore::new()),
            options: InterpreterOptions::default(),
            stats: ExecutionStats::default(),
        }
    }

    fn context() -> Context {
        let mut fb = FunctionBuilder::new("main", &[("x", IrType::Int(32))], IrType::Int(32));
        fb.ret(Some(fb.param(0)));
        let module = Rc::new(Module::new(
            "test",
            crate::module::DataLayout::default(),
            [fb.build().unwrap()],
        ));
        Context::for_entry(module, "main", vec![EntryArg::Symbolic { name: "x".into() }])
            .unwrap()
    }

    #[test]
    fn an_empty_pipeline_continues_with_one_output() -> anyhow::Result<()> {
        let mut ctx = context();
        let mut env = environment();
        let mut icx = InterpreterContext::new(&mut ctx, &mut env);

        let tb = TransformBuilder::new();
        let result = tb.execute(&mut icx)?;
        assert!(matches!(result, StepResult::Continue));

        Ok(())
    }

    #[test]
    fn a_dropping_operation_kills_the_path() -> anyhow::Result<()> {
        let mut ctx = context();
        let mut env = environment();
        let mut icx = InterpreterContext::new(&mut ctx, &mut env);

        let mut tb = TransformBuilder::new();
        let _ = tb.transform_fork(|_state, _icx, _push| Ok(()));

        let result = tb.execute(&mut icx)?;
        assert!(matches!(result, StepResult::Dead));

        Ok(())
    }

    #[test]
    fn a_forking_operation_produces_multiple_contexts() -> anyhow::Result<()> {
        let mut ctx = context();
        let mut env = environment();
        let mut icx = InterpreterContext::new(&mut ctx, &mut env);

        let mut tb = TransformBuilder::new();
        let _ = tb.transform_fork(|state, _icx, push| {
            push(state.fork_with(state.ctx.fork_once()));
            push(state);
            Ok(())
        });

        let result = tb.execute(&mut icx)?;
        let StepResult::Fork(contexts) = result else {
            panic!("Expected a fork");
        };
        assert_eq!(contexts.len(), 2);

        Ok(())
    }

    #[test]
    fn pipeline_values_flow_between_operations() -> anyhow::Result<()> {
        let mut ctx = context();
        let mut env = environment();
        let mut icx = InterpreterContext::new(&mut ctx, &mut env);

        let mut tb = TransformBuilder::new();
        let produced = tb.transform(|state, _| {
            let id = state.current();
            state.insert(id, RuntimeValue::expr(Op::int(32, 9)));
            Ok(())
        });
        let dest = ctx_dest();
        tb.assign(dest, produced);

        let result = tb.execute(&mut icx)?;
        assert!(matches!(result, StepResult::Continue));
        assert_eq!(
            ctx.top_frame()?.lookup(dest),
            Some(&RuntimeValue::expr(Op::int(32, 9)))
        );

        Ok(())
    }

    fn ctx_dest() -> crate::module::ValueId {
        crate::module::ValueId::new(77)
    }
}
