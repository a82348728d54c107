//! Explores `int f(int x) { return 10 / x; }` with `x` symbolic and checks
//! that the division is witnessed as reachable with `x == 0`.

mod common;

use symbolic_executor::{
    interpreter::{CompletionReason, EntryArg, StopOnFirstFailurePolicy},
    ir::BinaryOp,
    module::{builder::FunctionBuilder, IrType, Operand},
};

fn divide_by_symbolic() -> FunctionBuilder {
    let mut fb = FunctionBuilder::new("f", &[("x", IrType::Int(32))], IrType::Int(32));
    let quotient = fb.binary(BinaryOp::SDiv, Operand::i32(10), fb.param(0));
    fb.ret(Some(quotient));
    fb
}

#[test]
fn witnesses_the_division_with_x_equal_to_zero() -> anyhow::Result<()> {
    let mut interpreter = common::interpreter_for(divide_by_symbolic().build()?);
    interpreter.add_entry("f", vec![EntryArg::Symbolic { name: "x".into() }])?;

    let stats = interpreter.run()?;
    assert_eq!(stats.failures, 1);
    // The path continues past the division under the assumption that the
    // divisor was non-zero, and returns.
    assert_eq!(stats.paths, 1);

    let failures = common::collected_failures(&interpreter);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].message, "division by zero");
    assert!(common::witness_int(&failures[0], "x").is_zero());

    assert_eq!(common::recorded(&interpreter).count(CompletionReason::Fail), 1);
    assert_eq!(
        common::recorded(&interpreter).count(CompletionReason::Success),
        1
    );

    Ok(())
}

#[test]
fn a_failure_stopping_policy_ends_the_run() -> anyhow::Result<()> {
    let mut interpreter = common::interpreter_for(divide_by_symbolic().build()?)
        .with_policy(Box::new(StopOnFirstFailurePolicy::new()));
    interpreter.add_entry("f", vec![EntryArg::Symbolic { name: "x".into() }])?;
    // A second queued path that would also fail; the policy stops the run
    // before it gets dequeued.
    interpreter.add_entry("f", vec![EntryArg::Symbolic { name: "x2".into() }])?;

    let stats = interpreter.run()?;
    assert_eq!(stats.failures, 1);

    Ok(())
}

#[test]
fn a_concrete_nonzero_divisor_is_safe() -> anyhow::Result<()> {
    let mut interpreter = common::interpreter_for(divide_by_symbolic().build()?);
    interpreter.add_entry(
        "f",
        vec![EntryArg::Concrete(
            symbolic_executor::memory::RuntimeValue::expr(symbolic_executor::ir::Op::int(32, 5)),
        )],
    )?;

    let stats = interpreter.run()?;
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.paths, 1);

    Ok(())
}
