//! Exercises calls, returns, switches, phis, and the recursion depth
//! limit.

mod common;

use symbolic_executor::{
    interpreter::{CompletionReason, EntryArg, InterpreterOptions},
    ir::{BinaryOp, ICmpPredicate},
    module::{
        builder::{FunctionBuilder, ModuleBuilder},
        IrType,
        Operand,
        SwitchCase,
    },
};

#[test]
fn calls_bind_arguments_and_returns_bind_results() -> anyhow::Result<()> {
    let mut callee = FunctionBuilder::new("add1", &[("v", IrType::Int(32))], IrType::Int(32));
    let incremented = callee.binary(BinaryOp::Add, callee.param(0), Operand::i32(1));
    callee.ret(Some(incremented));

    let mut caller = FunctionBuilder::new("main", &[("x", IrType::Int(32))], IrType::Void);
    let result = caller
        .call("add1", IrType::Int(32), vec![caller.param(0)])
        .unwrap();
    let expected = caller.binary(BinaryOp::Add, caller.param(0), Operand::i32(1));
    let same = caller.icmp(ICmpPredicate::Eq, result, expected);
    caller.call("__sym_assert", IrType::Void, vec![same]);
    caller.ret(None);

    let mut mb = ModuleBuilder::new("scenario");
    mb.add_function(callee.build()?)?;
    mb.add_function(caller.build()?)?;
    let module = std::rc::Rc::new(mb.build());

    let mut interpreter = symbolic_executor::Interpreter::new(
        module,
        symbolic_executor::solver::z3::Z3Solver::new().into_shared(),
    );
    interpreter.add_entry("main", vec![EntryArg::Symbolic { name: "x".into() }])?;

    let stats = interpreter.run()?;
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.paths, 1);

    Ok(())
}

#[test]
fn a_switch_over_a_symbolic_value_forks_per_arm() -> anyhow::Result<()> {
    let mut fb = FunctionBuilder::new("f", &[("x", IrType::Int(32))], IrType::Int(32));
    let one = fb.add_block("one");
    let two = fb.add_block("two");
    let other = fb.add_block("other");

    fb.switch(
        fb.param(0),
        other,
        vec![
            SwitchCase {
                value: symbolic_executor::ir::value::IntValue::from_u64(32, 1),
                target: one,
            },
            SwitchCase {
                value: symbolic_executor::ir::value::IntValue::from_u64(32, 2),
                target: two,
            },
        ],
    );

    fb.select_block(one);
    fb.ret(Some(Operand::i32(10)));
    fb.select_block(two);
    fb.ret(Some(Operand::i32(20)));
    fb.select_block(other);
    fb.ret(Some(Operand::i32(0)));

    let mut interpreter = common::interpreter_for(fb.build()?);
    interpreter.add_entry("f", vec![EntryArg::Symbolic { name: "x".into() }])?;

    let stats = interpreter.run()?;
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.paths, 3);
    assert_eq!(
        common::recorded(&interpreter).count(CompletionReason::Success),
        3
    );

    Ok(())
}

#[test]
fn phis_merge_loop_carried_values() -> anyhow::Result<()> {
    // i = 0; while (i != 3) i += 1; assert(i == 3);
    let mut fb = FunctionBuilder::new("f", &[], IrType::Void);
    let header = fb.add_block("header");
    let body = fb.add_block("body");
    let exit = fb.add_block("exit");
    let next = fb.reserve();

    fb.br(header);

    fb.select_block(header);
    let i = fb.phi(
        IrType::Int(32),
        vec![(0, Operand::i32(0)), (body, Operand::Var(next))],
    );
    let done = fb.icmp(ICmpPredicate::Eq, i.clone(), Operand::i32(3));
    fb.cond_br(done, exit, body);

    fb.select_block(body);
    fb.binary_into(next, BinaryOp::Add, i.clone(), Operand::i32(1));
    fb.br(header);

    fb.select_block(exit);
    let at_limit = fb.icmp(ICmpPredicate::Eq, i, Operand::i32(3));
    fb.call("__sym_assert", IrType::Void, vec![at_limit]);
    fb.ret(None);

    let mut interpreter = common::interpreter_for(fb.build()?);
    interpreter.add_entry("f", vec![])?;

    let stats = interpreter.run()?;
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.paths, 1);

    Ok(())
}

#[test]
fn unbounded_recursion_closes_the_path_as_unknown() -> anyhow::Result<()> {
    let mut fb = FunctionBuilder::new("loop_forever", &[], IrType::Void);
    fb.call("loop_forever", IrType::Void, vec![]);
    fb.ret(None);

    let mut interpreter = common::interpreter_for(fb.build()?)
        .with_options(InterpreterOptions::default().with_max_stack_depth(8));
    interpreter.add_entry("loop_forever", vec![])?;

    let stats = interpreter.run()?;
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.unknowns, 1);
    assert_eq!(
        common::recorded(&interpreter).count(CompletionReason::Unknown),
        1
    );

    Ok(())
}
