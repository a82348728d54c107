//! This module contains the path-forking interpreter: the engine that
//! explores the feasible paths of a program over symbolic inputs.
//!
//! The interpreter repeatedly dequeues a [`context::Context`] from its
//! store, asks the policy whether to run it, and steps it instruction by
//! instruction through the [`transform::TransformBuilder`] pipelines.
//! Steps that fork hand their new contexts back to the store; terminal,
//! failed, dead, and undecidable paths are reported to the policy with
//! their [`policy::CompletionReason`].

pub mod builtins;
pub mod context;
pub mod exec;
pub mod facade;
pub mod failure;
pub mod policy;
pub mod store;
pub mod transform;

use std::rc::Rc;

use derivative::Derivative;

pub use builtins::{BuiltinHandler, Builtins, CallInfo};
pub use context::{Context, EntryArg, StackFrame};
pub use facade::{Environment, InterpreterContext};
pub use failure::{CollectingLogger, DirectoryLogger, Failure, FailureLogger, FailureRecord};
pub use policy::{
    AlwaysExecutePolicy,
    CompletionReason,
    ExecutionPolicy,
    RecordingPolicy,
    StopOnFirstFailurePolicy,
};
pub use store::{ExecutionContextStore, FifoContextStore, LifoContextStore};
pub use transform::{StepResult, TransformBuilder};

use crate::{
    constant::DEFAULT_MAX_STACK_DEPTH,
    error::{self, container::Locatable, execution::Error},
    module::Module,
    solver::SharedSolver,
    watchdog::{DynWatchdog, LazyWatchdog},
};

/// How a solver `Unknown` verdict on a safety check is treated.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum UnknownHandling {
    /// Report a failure without a model and close the path as unknown.
    TreatAsFailure,

    /// Treat the check as safe and carry on; the completion reason still
    /// records that the path saw an undecided query.
    #[default]
    PruneSafe,
}

/// The configuration of an interpreter instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InterpreterOptions {
    /// The treatment of undecided safety checks.
    ///
    /// Defaults to [`UnknownHandling::PruneSafe`].
    pub unknown_handling: UnknownHandling,

    /// The number of call frames after which a path is closed as
    /// unknowable rather than explored further.
    ///
    /// Defaults to [`DEFAULT_MAX_STACK_DEPTH`].
    pub max_stack_depth: usize,
}

impl InterpreterOptions {
    /// Sets the `unknown_handling` option to `value`.
    #[must_use]
    pub fn with_unknown_handling(mut self, value: UnknownHandling) -> Self {
        self.unknown_handling = value;
        self
    }

    /// Sets the `max_stack_depth` option to `value`.
    #[must_use]
    pub fn with_max_stack_depth(mut self, value: usize) -> Self {
        self.max_stack_depth = value;
        self
    }
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            unknown_handling: UnknownHandling::default(),
            max_stack_depth: DEFAULT_MAX_STACK_DEPTH,
        }
    }
}

/// Aggregate counters over one engine run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ExecutionStats {
    /// The number of paths that ran to an end of any kind.
    pub paths: usize,

    /// The number of failures reported to the logger.
    pub failures: usize,

    /// The number of paths closed because of an undecided query or a
    /// resource limit.
    pub unknowns: usize,
}

/// The symbolic execution engine.
///
/// An interpreter owns a module, a solver handle, and the pluggable
/// boundary collaborators (store, policy, logger, watchdog). Queue entry
/// points with [`Self::add_entry`], then explore with [`Self::run`].
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Interpreter {
    module: Rc<Module>,
    env: Environment,
    builtins: Builtins,
    #[derivative(Debug = "ignore")]
    watchdog: DynWatchdog,
}

impl Interpreter {
    /// Creates an interpreter over `module` with the default collaborators:
    /// a FIFO store, a policy that runs everything, an in-memory failure
    /// collector, and no cancellation.
    #[must_use]
    pub fn new(module: Rc<Module>, solver: SharedSolver) -> Self {
        let env = Environment {
            solver,
            logger: Box::new(CollectingLogger::new()),
            policy: Box::new(AlwaysExecutePolicy),
            store: Box::new(FifoContextStore::new()),
            options: InterpreterOptions::default(),
            stats: ExecutionStats::default(),
        };
        Self {
            module,
            env,
            builtins: Builtins::default_set(),
            watchdog: LazyWatchdog.in_rc(),
        }
    }

    /// Replaces the context store.
    #[must_use]
    pub fn with_store(mut self, store: Box<dyn ExecutionContextStore>) -> Self {
        self.env.store = store;
        self
    }

    /// Replaces the execution policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Box<dyn ExecutionPolicy>) -> Self {
        self.env.policy = policy;
        self
    }

    /// Replaces the failure logger.
    #[must_use]
    pub fn with_logger(mut self, logger: Box<dyn FailureLogger>) -> Self {
        self.env.logger = logger;
        self
    }

    /// Replaces the options.
    #[must_use]
    pub fn with_options(mut self, options: InterpreterOptions) -> Self {
        self.env.options = options;
        self
    }

    /// Replaces the watchdog.
    #[must_use]
    pub fn with_watchdog(mut self, watchdog: DynWatchdog) -> Self {
        self.watchdog = watchdog;
        self
    }

    /// Replaces the built-in registry.
    #[must_use]
    pub fn with_builtins(mut self, builtins: Builtins) -> Self {
        self.builtins = builtins;
        self
    }

    /// Gets the failure logger, e.g. to read a [`CollectingLogger`] back
    /// after a run.
    #[must_use]
    pub fn logger(&self) -> &dyn FailureLogger {
        self.env.logger.as_ref()
    }

    /// Gets the execution policy, downcastable to its concrete type.
    #[must_use]
    pub fn policy(&self) -> &dyn ExecutionPolicy {
        self.env.policy.as_ref()
    }

    /// Gets the counters accumulated so far.
    #[must_use]
    pub fn stats(&self) -> ExecutionStats {
        self.env.stats
    }

    /// Queues a root context for `function`, with its arguments bound per
    /// `args`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the entry context cannot be constructed.
    pub fn add_entry(&mut self, function: &str, args: Vec<EntryArg>) -> error::Result<()> {
        let location = crate::error::CodeLocation::new(function, 0, 0);
        let ctx = Context::for_entry(self.module.clone(), function, args)
            .locate(location)
            .map_err(error::Errors::from)?;
        self.env.store.add_context(ctx);
        Ok(())
    }

    /// Explores every queued path to completion.
    ///
    /// Exploration ends when the store drains, the policy declares the run
    /// complete, or the watchdog requests a stop (which is an error, since
    /// coverage is then unknown).
    ///
    /// # Errors
    ///
    /// Returns [`Err`] on engine faults and watchdog stops. Failures of
    /// the program under analysis are _not_ errors; they are delivered
    /// through the logger and counted in the returned stats.
    pub fn run(&mut self) -> error::Result<ExecutionStats> {
        while !self.env.policy.is_complete() {
            let Some(ctx) = self.env.store.next_context() else {
                break;
            };

            if self.watchdog.should_stop() {
                let location = ctx.location();
                return Err(Error::StoppedByWatchdog.locate(location).into());
            }

            if !self.env.policy.should_execute(&ctx) {
                self.env
                    .policy
                    .on_path_complete(&ctx, CompletionReason::Dead, None);
                self.env.stats.paths += 1;
                continue;
            }

            self.run_path(ctx)?;
        }

        Ok(self.env.stats)
    }

    /// Steps one context until it ends or forks.
    fn run_path(&mut self, mut ctx: Context) -> error::Result<()> {
        let poll_interval = self.watchdog.poll_every().max(1);
        let mut steps = 0usize;

        loop {
            if ctx.is_terminal() {
                self.env
                    .policy
                    .on_path_complete(&ctx, CompletionReason::Success, None);
                self.env.stats.paths += 1;
                tracing::trace!("Path returned");
                return Ok(());
            }

            if steps > 0 && steps % poll_interval == 0 && self.watchdog.should_stop() {
                let location = ctx.location();
                return Err(Error::StoppedByWatchdog.locate(location).into());
            }
            steps += 1;

            let result = {
                let mut icx = InterpreterContext::new(&mut ctx, &mut self.env);
                exec::step(&mut icx, &self.builtins).map_err(error::Errors::from)?
            };

            match result {
                StepResult::Continue => {}
                StepResult::Fork(contexts) => {
                    tracing::trace!(forks = contexts.len(), "Step forked");
                    for forked in contexts {
                        self.env.store.add_context(forked);
                    }
                    return Ok(());
                }
                StepResult::Dead => {
                    if ctx.completion().is_none() {
                        self.env
                            .policy
                            .on_path_complete(&ctx, CompletionReason::Dead, None);
                    }
                    self.env.stats.paths += 1;
                    tracing::trace!("Path ended");
                    return Ok(());
                }
            }
        }
    }
}
