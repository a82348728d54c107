//! This module contains the execution policy: the pluggable decision-maker
//! for which paths run and when exploration is finished.

use downcast_rs::{impl_downcast, Downcast};

use crate::{
    interpreter::context::Context,
    ir::assertion::Assertion,
};

/// The reason a path stopped executing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompletionReason {
    /// The entry function returned.
    Success,

    /// A failure was logged on the path.
    Fail,

    /// The path became infeasible or was pruned.
    Dead,

    /// The solver could not decide the path, or a resource limit closed
    /// it.
    Unknown,
}

/// The decision-maker consulted by the interpreter around every path.
///
/// # Object Safety and Downcasting
///
/// The trait is object safe, and bounded by [`Downcast`] so that clients
/// (and tests) holding the boxed policy can recover their concrete type to
/// inspect whatever state it accumulated.
pub trait ExecutionPolicy
where
    Self: Downcast,
{
    /// Decides whether a dequeued context should execute at all.
    ///
    /// Returning `false` prunes the path; it completes with
    /// [`CompletionReason::Dead`] without running.
    fn should_execute(&mut self, ctx: &Context) -> bool;

    /// Observes the completion of a path.
    ///
    /// For [`CompletionReason::Fail`] the offending assertion is supplied.
    fn on_path_complete(
        &mut self,
        ctx: &Context,
        reason: CompletionReason,
        assertion: Option<&Assertion>,
    );

    /// Decides whether exploration as a whole should stop, regardless of
    /// how many contexts remain queued.
    fn is_complete(&self) -> bool;
}

impl_downcast!(ExecutionPolicy);

/// A policy that runs every path to completion.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AlwaysExecutePolicy;

impl ExecutionPolicy for AlwaysExecutePolicy {
    fn should_execute(&mut self, _ctx: &Context) -> bool {
        true
    }

    fn on_path_complete(
        &mut self,
        _ctx: &Context,
        _reason: CompletionReason,
        _assertion: Option<&Assertion>,
    ) {
    }

    fn is_complete(&self) -> bool {
        false
    }
}

/// A policy that stops exploration once any path fails.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StopOnFirstFailurePolicy {
    failed: bool,
}

impl StopOnFirstFailurePolicy {
    /// Creates the policy in its initial, not-yet-failed state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionPolicy for StopOnFirstFailurePolicy {
    fn should_execute(&mut self, _ctx: &Context) -> bool {
        !self.failed
    }

    fn on_path_complete(
        &mut self,
        _ctx: &Context,
        reason: CompletionReason,
        _assertion: Option<&Assertion>,
    ) {
        if reason == CompletionReason::Fail {
            self.failed = true;
        }
    }

    fn is_complete(&self) -> bool {
        self.failed
    }
}

/// A policy that records every completion it observes, for inspection by
/// tests and diagnostics.
#[derive(Clone, Debug, Default)]
pub struct RecordingPolicy {
    completions: Vec<(CompletionReason, Option<Assertion>)>,
}

impl RecordingPolicy {
    /// Creates a policy with no recorded completions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the recorded completions in the order they were observed.
    #[must_use]
    pub fn completions(&self) -> &[(CompletionReason, Option<Assertion>)] {
        self.completions.as_slice()
    }

    /// Counts the completions with the given reason.
    #[must_use]
    pub fn count(&self, reason: CompletionReason) -> usize {
        self.completions.iter().filter(|(r, _)| *r == reason).count()
    }
}

impl ExecutionPolicy for RecordingPolicy {
    fn should_execute(&mut self, _ctx: &Context) -> bool {
        true
    }

    fn on_path_complete(
        &mut self,
        _ctx: &Context,
        reason: CompletionReason,
        assertion: Option<&Assertion>,
    ) {
        self.completions.push((reason, assertion.cloned()));
    }

    fn is_complete(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use crate::{
        interpreter::{
            context::Context,
            policy::{
                CompletionReason,
                ExecutionPolicy,
                RecordingPolicy,
                StopOnFirstFailurePolicy,
            },
        },
        module::{builder::FunctionBuilder, IrType, Module},
    };

    fn trivial_context() -> Context {
        let mut fb = FunctionBuilder::new("main", &[], IrType::Void);
        fb.ret(None);
        let module = Rc::new(Module::new(
            "test",
            crate::module::DataLayout::default(),
            [fb.build().unwrap()],
        ));
        Context::for_entry(module, "main", vec![]).unwrap()
    }

    #[test]
    fn stop_on_first_failure_halts_after_a_fail() {
        let mut policy = StopOnFirstFailurePolicy::new();
        let ctx = trivial_context();

        assert!(!policy.is_complete());
        assert!(policy.should_execute(&ctx));

        policy.on_path_complete(&ctx, CompletionReason::Success, None);
        assert!(!policy.is_complete());

        policy.on_path_complete(&ctx, CompletionReason::Fail, None);
        assert!(policy.is_complete());
        assert!(!policy.should_execute(&ctx));
    }

    #[test]
    fn recording_policy_counts_by_reason() {
        let mut policy = RecordingPolicy::new();
        let ctx = trivial_context();

        policy.on_path_complete(&ctx, CompletionReason::Success, None);
        policy.on_path_complete(&ctx, CompletionReason::Dead, None);
        policy.on_path_complete(&ctx, CompletionReason::Success, None);

        assert_eq!(policy.count(CompletionReason::Success), 2);
        assert_eq!(policy.count(CompletionReason::Dead), 1);
        assert_eq!(policy.count(CompletionReason::Fail), 0);
    }

    #[test]
    fn downcasting_recovers_the_concrete_policy() {
        let boxed: Box<dyn ExecutionPolicy> = Box::new(RecordingPolicy::new());
        let concrete = boxed.downcast_ref::<RecordingPolicy>();
        assert!(concrete.is_some());
    }
}
