//! Explores a read through a pointer chosen symbolically between two
//! allocations, and checks that resolution forks once per candidate.

mod common;

use symbolic_executor::{
    interpreter::{CompletionReason, EntryArg},
    module::{builder::FunctionBuilder, IrType, Operand},
};

#[test]
fn reading_through_an_aliasing_pointer_forks_per_candidate() -> anyhow::Result<()> {
    let mut fb = FunctionBuilder::new("f", &[("c", IrType::Int(1))], IrType::Int(64));
    let a = fb.alloca(IrType::Int(64));
    let b = fb.alloca(IrType::Int(64));
    fb.store(IrType::Int(64), Operand::i64(1), a.clone());
    fb.store(IrType::Int(64), Operand::i64(2), b.clone());
    let p = fb.select(fb.param(0), a, b);
    let v = fb.load(IrType::Int(64), p);
    fb.ret(Some(v));

    let mut interpreter = common::interpreter_for(fb.build()?);
    interpreter.add_entry("f", vec![EntryArg::Symbolic { name: "c".into() }])?;

    let stats = interpreter.run()?;
    assert_eq!(stats.failures, 0);
    // One terminal path per allocation the pointer can refer to.
    assert_eq!(stats.paths, 2);
    assert_eq!(
        common::recorded(&interpreter).count(CompletionReason::Success),
        2
    );

    Ok(())
}

#[test]
fn a_concretely_chosen_pointer_does_not_fork() -> anyhow::Result<()> {
    let mut fb = FunctionBuilder::new("f", &[], IrType::Int(64));
    let a = fb.alloca(IrType::Int(64));
    let b = fb.alloca(IrType::Int(64));
    fb.store(IrType::Int(64), Operand::i64(1), a.clone());
    fb.store(IrType::Int(64), Operand::i64(2), b);
    let v = fb.load(IrType::Int(64), a);
    fb.ret(Some(v));

    let mut interpreter = common::interpreter_for(fb.build()?);
    interpreter.add_entry("f", vec![])?;

    let stats = interpreter.run()?;
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.paths, 1);

    Ok(())
}
