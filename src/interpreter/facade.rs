//! This module contains the [`InterpreterContext`]: the transient handle an
//! instruction implementation works through.
//!
//! The facade bundles a mutable borrow of one [`Context`] with a mutable
//! borrow of the interpreter's environment (solver, logger, policy, store,
//! options). It is deliberately cheap to construct, because the transform
//! executor makes a fresh sibling facade (via [`InterpreterContext::with_other`])
//! for every state it steps.

use derivative::Derivative;

use crate::{
    error::execution::Error,
    interpreter::{
        context::{Context, StackFrame},
        failure::{Failure, FailureLogger},
        policy::{CompletionReason, ExecutionPolicy},
        store::ExecutionContextStore,
        ExecutionStats,
        InterpreterOptions,
        UnknownHandling,
    },
    ir::assertion::Assertion,
    memory::{Pointer, RuntimeValue},
    module::{DataLayout, Module, Operand, ValueId},
    solver::{SharedSolver, SolverResult, SolverResultKind},
};

/// The interpreter-owned collaborators shared by every path.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Environment {
    /// The solver handle.
    #[derivative(Debug = "ignore")]
    pub solver: SharedSolver,

    /// The failure sink.
    #[derivative(Debug = "ignore")]
    pub logger: Box<dyn FailureLogger>,

    /// The execution policy.
    #[derivative(Debug = "ignore")]
    pub policy: Box<dyn ExecutionPolicy>,

    /// The queue of pending contexts.
    #[derivative(Debug = "ignore")]
    pub store: Box<dyn ExecutionContextStore>,

    /// The interpreter options.
    pub options: InterpreterOptions,

    /// Aggregate counters over the whole run.
    pub stats: ExecutionStats,
}

/// A borrowed handle over one context and the shared environment.
#[derive(Debug)]
pub struct InterpreterContext<'a> {
    ctx: &'a mut Context,
    env: &'a mut Environment,
}

impl<'a> InterpreterContext<'a> {
    /// Creates a facade over `ctx` and `env`.
    pub fn new(ctx: &'a mut Context, env: &'a mut Environment) -> Self {
        Self { ctx, env }
    }

    /// Creates a sibling facade over a different context, sharing the
    /// environment.
    ///
    /// The sibling borrows from `self`, so the original facade is
    /// inaccessible while the sibling lives.
    pub fn with_other<'b>(&'b mut self, ctx: &'b mut Context) -> InterpreterContext<'b> {
        InterpreterContext {
            ctx,
            env: self.env,
        }
    }

    /// Gets the context under execution.
    #[must_use]
    pub fn context(&self) -> &Context {
        self.ctx
    }

    /// Gets the context under execution for modification.
    pub fn context_mut(&mut self) -> &mut Context {
        self.ctx
    }

    /// Gets the module being executed.
    #[must_use]
    pub fn module(&self) -> &std::rc::Rc<Module> {
        self.ctx.module()
    }

    /// Gets the data layout of the module.
    #[must_use]
    pub fn layout(&self) -> DataLayout {
        self.ctx.layout()
    }

    /// Gets the interpreter options.
    #[must_use]
    pub fn options(&self) -> InterpreterOptions {
        self.env.options
    }

    /// Gets the top stack frame.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the context is terminal.
    pub fn top_frame(&self) -> Result<&StackFrame, Error> {
        self.ctx.top_frame()
    }

    /// Gets the top stack frame for modification.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the context is terminal.
    pub fn top_frame_mut(&mut self) -> Result<&mut StackFrame, Error> {
        self.ctx.top_frame_mut()
    }

    /// Pushes a frame onto the context's call stack.
    pub fn push_frame(&mut self, frame: StackFrame) {
        self.ctx.push_frame(frame);
    }

    /// Pops the top frame, delivering `value` to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the context is already terminal.
    pub fn pop_frame(&mut self, value: Option<RuntimeValue>) -> Result<(), Error> {
        self.ctx.pop(value)
    }

    /// Materialises an operand against the top frame.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the context is terminal or the operand is
    /// undefined.
    pub fn lookup(&self, operand: &Operand) -> Result<RuntimeValue, Error> {
        let layout = self.layout();
        self.ctx.top_frame()?.operand_value(operand, &layout)
    }

    /// Binds an SSA value in the top frame.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the context is terminal.
    pub fn insert(&mut self, id: ValueId, value: RuntimeValue) -> Result<(), Error> {
        self.ctx.top_frame_mut()?.insert(id, value);
        Ok(())
    }

    /// Appends an assertion to the path condition.
    pub fn add(&mut self, assertion: Assertion) {
        self.ctx.add(assertion);
    }

    /// Asks the solver whether the path condition plus `extra` is
    /// satisfiable.
    pub fn check(&mut self, extra: &Assertion) -> SolverResult {
        let solver = self.env.solver.clone();
        self.ctx.check(solver.as_ref(), extra)
    }

    /// Asks the solver for a model of the path condition plus `extra`.
    pub fn resolve(&mut self, extra: &Assertion) -> SolverResult {
        let solver = self.env.solver.clone();
        self.ctx.resolve(solver.as_ref(), extra)
    }

    /// Reports a path completion to the policy and marks the context so
    /// the run loop does not report it again.
    pub fn complete_path(&mut self, reason: CompletionReason, assertion: Option<&Assertion>) {
        self.env.policy.on_path_complete(self.ctx, reason, assertion);
        self.ctx.set_completion(reason);
        if reason == CompletionReason::Unknown {
            self.env.stats.unknowns += 1;
        }
    }

    /// Checks whether `assertion` is reachable under the path condition
    /// and, if so, reports it as a failure.
    ///
    /// On SAT the model, context, and failure go to the logger, and the
    /// policy sees a [`CompletionReason::Fail`]. A solver `Unknown` is
    /// treated per [`UnknownHandling`]: in strict mode it is reported as a
    /// failure without a model and the path completes as `Unknown`;
    /// otherwise it is ignored.
    ///
    /// Returns whether a failure was recorded.
    pub fn log_failure(&mut self, assertion: &Assertion, message: &str) -> bool {
        let result = self.resolve(assertion);
        match result.kind() {
            SolverResultKind::Sat => {
                let failure = Failure::new(assertion.clone(), message);
                self.env
                    .logger
                    .log_failure(result.model(), self.ctx, &failure);
                self.env.stats.failures += 1;
                self.env
                    .policy
                    .on_path_complete(self.ctx, CompletionReason::Fail, Some(assertion));
                self.ctx.set_completion(CompletionReason::Fail);
                tracing::debug!(message, "Failure witnessed");
                true
            }
            SolverResultKind::Unknown
                if self.env.options.unknown_handling == UnknownHandling::TreatAsFailure =>
            {
                let failure = Failure::new(assertion.clone(), message);
                self.env.logger.log_failure(None, self.ctx, &failure);
                self.env.stats.failures += 1;
                self.complete_path(CompletionReason::Unknown, Some(assertion));
                true
            }
            _ => false,
        }
    }

    /// Gets the allocation a resolved pointer refers to.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the pointer is unresolved or dangling.
    pub fn ptr_allocation(&self, ptr: &Pointer) -> Result<&crate::memory::Allocation, Error> {
        self.ctx.heaps().ptr_allocation(ptr)
    }

    /// Resolves a pointer against its candidate allocations.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a resolved pointer's allocation no longer
    /// exists.
    pub fn ptr_resolve(&mut self, ptr: &Pointer) -> Result<Vec<Pointer>, Error> {
        let solver = self.env.solver.clone();
        self.ctx.ptr_resolve(solver.as_ref(), ptr)
    }
}
