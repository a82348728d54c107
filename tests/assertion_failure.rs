//! Explores a program that asserts `x != 42` over a symbolic `x` and
//! checks that the violation is witnessed with exactly `x == 42`.

mod common;

use symbolic_executor::{
    interpreter::{CompletionReason, EntryArg},
    ir::{value::IntValue, ICmpPredicate},
    module::{builder::FunctionBuilder, IrType, Operand},
};

#[test]
fn witnesses_the_assertion_with_the_forbidden_value() -> anyhow::Result<()> {
    let mut fb = FunctionBuilder::new("f", &[("x", IrType::Int(32))], IrType::Void);
    let ok = fb.icmp(ICmpPredicate::Ne, fb.param(0), Operand::i32(42));
    fb.call("__sym_assert", IrType::Void, vec![ok]);
    fb.ret(None);

    let mut interpreter = common::interpreter_for(fb.build()?);
    interpreter.add_entry("f", vec![EntryArg::Symbolic { name: "x".into() }])?;

    let stats = interpreter.run()?;
    assert_eq!(stats.failures, 1);
    // Execution continues past a failed assertion under the assumption
    // that it held, so the path still returns.
    assert_eq!(stats.paths, 1);

    let failures = common::collected_failures(&interpreter);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].message, "assertion failed");
    assert_eq!(
        common::witness_int(&failures[0], "x"),
        IntValue::from_u64(32, 42)
    );

    assert_eq!(common::recorded(&interpreter).count(CompletionReason::Fail), 1);

    Ok(())
}

#[test]
fn an_unreachable_assertion_stays_silent() -> anyhow::Result<()> {
    let mut fb = FunctionBuilder::new("f", &[("x", IrType::Int(32))], IrType::Void);
    let bounded = fb.icmp(ICmpPredicate::Ult, fb.param(0), Operand::i32(10));
    fb.call("__sym_assume", IrType::Void, vec![bounded]);
    let ok = fb.icmp(ICmpPredicate::Ne, fb.param(0), Operand::i32(42));
    fb.call("__sym_assert", IrType::Void, vec![ok]);
    fb.ret(None);

    let mut interpreter = common::interpreter_for(fb.build()?);
    interpreter.add_entry("f", vec![EntryArg::Symbolic { name: "x".into() }])?;

    let stats = interpreter.run()?;
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.paths, 1);

    Ok(())
}
