//! Explores `int f(int i) { int a[4]; return a[i]; }` with `i` symbolic
//! and checks that the out-of-bounds read is witnessed.

mod common;

use ethnum::U256;
use symbolic_executor::{
    interpreter::EntryArg,
    ir::ICmpPredicate,
    module::{builder::FunctionBuilder, IrType, Operand},
};

fn read_at_symbolic_index(assume_inbounds: bool) -> FunctionBuilder {
    let mut fb = FunctionBuilder::new("f", &[("i", IrType::Int(32))], IrType::Int(32));
    if assume_inbounds {
        let ok = fb.icmp(ICmpPredicate::Ult, fb.param(0), Operand::i32(4));
        fb.call("__sym_assume", IrType::Void, vec![ok]);
    }
    let array_ty = IrType::array(IrType::Int(32), 4);
    let array = fb.alloca(array_ty.clone());
    let slot = fb.gep(array_ty, array, vec![Operand::i32(0), fb.param(0)]);
    let value = fb.load(IrType::Int(32), slot);
    fb.ret(Some(value));
    fb
}

#[test]
fn witnesses_a_read_outside_the_array() -> anyhow::Result<()> {
    let mut interpreter = common::interpreter_for(read_at_symbolic_index(false).build()?);
    interpreter.add_entry("f", vec![EntryArg::Symbolic { name: "i".into() }])?;

    let stats = interpreter.run()?;
    assert_eq!(stats.failures, 1);

    let failures = common::collected_failures(&interpreter);
    assert_eq!(failures[0].message, "invalid pointer load/store");

    // Whatever index the solver picked, it must lie outside [0, 3].
    let index = common::witness_int(&failures[0], "i");
    assert!(index.bits() >= U256::from(4u32));

    Ok(())
}

#[test]
fn an_index_constrained_into_bounds_is_safe() -> anyhow::Result<()> {
    let mut interpreter = common::interpreter_for(read_at_symbolic_index(true).build()?);
    interpreter.add_entry("f", vec![EntryArg::Symbolic { name: "i".into() }])?;

    let stats = interpreter.run()?;
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.paths, 1);

    Ok(())
}
