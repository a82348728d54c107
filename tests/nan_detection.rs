//! Explores a program whose assertion can only fail when a symbolic float
//! is NaN, and checks the witness read back from the model.

mod common;

use symbolic_executor::{
    interpreter::EntryArg,
    ir::{value::Value, BinaryOp, FCmpPredicate, Op},
    module::{builder::FunctionBuilder, IrType, Operand},
};

#[test]
fn a_self_unequal_float_is_witnessed_by_a_nan() -> anyhow::Result<()> {
    let mut fb = FunctionBuilder::new("f", &[("f", IrType::f32())], IrType::Void);
    // `f != f` holds exactly for NaNs; assert its negation so the failure
    // witness must be one.
    let self_unequal = fb.fcmp(FCmpPredicate::Ne, fb.param(0), fb.param(0));
    let ordinary = fb.binary(BinaryOp::Xor, self_unequal, Operand::int(1, 1));
    fb.call("__sym_assert", IrType::Void, vec![ordinary]);
    fb.ret(None);

    let mut interpreter = common::interpreter_for(fb.build()?);
    interpreter.add_entry("f", vec![EntryArg::Symbolic { name: "f".into() }])?;

    let stats = interpreter.run()?;
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.paths, 1);

    let failures = common::collected_failures(&interpreter);
    assert_eq!(failures[0].message, "assertion failed");

    let Some(Value::Float(witness)) = failures[0].inputs.get("f") else {
        panic!("Expected a float witness, got {:?}", failures[0].inputs);
    };
    // The model's value must be a NaN in canonical form: all-ones
    // exponent, non-zero significand, positive sign.
    assert!(witness.is_nan());
    assert!(!witness.sign());

    Ok(())
}

#[test]
fn a_concrete_nan_argument_folds_the_comparison_away() -> anyhow::Result<()> {
    let mut fb = FunctionBuilder::new("f", &[("f", IrType::f32())], IrType::Void);
    let self_unequal = fb.fcmp(FCmpPredicate::Ne, fb.param(0), fb.param(0));
    fb.call("__sym_assert", IrType::Void, vec![self_unequal]);
    fb.ret(None);

    // With a concrete NaN argument `f != f` folds to true, so the
    // assertion holds without ever consulting the solver.
    let nan = symbolic_executor::ir::value::FloatValue::nan(8, 24);
    let mut interpreter = common::interpreter_for(fb.build()?);
    interpreter.add_entry(
        "f",
        vec![EntryArg::Concrete(
            symbolic_executor::memory::RuntimeValue::expr(Op::constant_float(nan)),
        )],
    )?;

    let stats = interpreter.run()?;
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.paths, 1);

    Ok(())
}
