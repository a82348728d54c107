//! Explores `if (x > 0) return 1; else return -1;` with `x` symbolic and
//! checks that both sides produce a terminal path constrained to their
//! branch.

mod common;

use symbolic_executor::{
    interpreter::{CompletionReason, EntryArg, Interpreter, LifoContextStore},
    ir::ICmpPredicate,
    module::{builder::FunctionBuilder, Function, IrType, Operand},
};

fn sign_of_symbolic() -> anyhow::Result<Function> {
    let mut fb = FunctionBuilder::new("sign", &[("x", IrType::Int(32))], IrType::Int(32));
    let positive = fb.add_block("positive");
    let negative = fb.add_block("negative");

    let cond = fb.icmp(ICmpPredicate::Sgt, fb.param(0), Operand::i32(0));
    fb.cond_br(cond, positive, negative);

    fb.select_block(positive);
    fb.ret(Some(Operand::i32(1)));

    fb.select_block(negative);
    fb.ret(Some(Operand::int(32, u64::from(u32::MAX))));

    Ok(fb.build()?)
}

#[test]
fn both_branches_terminate_with_their_assertion() -> anyhow::Result<()> {
    let mut interpreter = common::interpreter_for(sign_of_symbolic()?);
    interpreter.add_entry("sign", vec![EntryArg::Symbolic { name: "x".into() }])?;

    let stats = interpreter.run()?;
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.paths, 2);
    assert_eq!(
        common::recorded(&interpreter).count(CompletionReason::Success),
        2
    );

    Ok(())
}

#[test]
fn a_constant_condition_prunes_the_dead_branch() -> anyhow::Result<()> {
    let mut interpreter = common::interpreter_for(sign_of_symbolic()?);
    interpreter.add_entry(
        "sign",
        vec![EntryArg::Concrete(
            symbolic_executor::memory::RuntimeValue::expr(symbolic_executor::ir::Op::int(32, 7)),
        )],
    )?;

    let stats = interpreter.run()?;
    assert_eq!(stats.paths, 1);
    assert_eq!(
        common::recorded(&interpreter).count(CompletionReason::Success),
        1
    );

    Ok(())
}

#[test]
fn exploration_order_does_not_change_the_terminal_set() -> anyhow::Result<()> {
    let run = |interpreter: &mut Interpreter| -> anyhow::Result<usize> {
        interpreter.add_entry("sign", vec![EntryArg::Symbolic { name: "x".into() }])?;
        let stats = interpreter.run()?;
        Ok(stats.paths)
    };

    let mut breadth_first = common::interpreter_for(sign_of_symbolic()?);
    let mut depth_first = common::interpreter_for(sign_of_symbolic()?)
        .with_store(Box::new(LifoContextStore::new()));

    assert_eq!(run(&mut breadth_first)?, run(&mut depth_first)?);

    Ok(())
}
