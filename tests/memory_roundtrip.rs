//! Exercises the byte-level memory model end to end: stored values read
//! back intact, heap allocation behaves like `malloc`/`free`, and stale
//! pointers are caught.

mod common;

use symbolic_executor::{
    interpreter::EntryArg,
    ir::ICmpPredicate,
    module::{builder::FunctionBuilder, IrType, Operand},
};

#[test]
fn a_stored_symbolic_value_reads_back_unchanged() -> anyhow::Result<()> {
    let mut fb = FunctionBuilder::new("f", &[("x", IrType::Int(32))], IrType::Void);
    let slot = fb.alloca(IrType::Int(32));
    fb.store(IrType::Int(32), fb.param(0), slot.clone());
    let read_back = fb.load(IrType::Int(32), slot);
    let same = fb.icmp(ICmpPredicate::Eq, fb.param(0), read_back);
    fb.call("__sym_assert", IrType::Void, vec![same]);
    fb.ret(None);

    let mut interpreter = common::interpreter_for(fb.build()?);
    interpreter.add_entry("f", vec![EntryArg::Symbolic { name: "x".into() }])?;

    // The byte-wise decomposition and reassembly are inverse, so the
    // assertion cannot fail.
    let stats = interpreter.run()?;
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.paths, 1);

    Ok(())
}

#[test]
fn malloc_store_load_free_is_clean() -> anyhow::Result<()> {
    let mut fb = FunctionBuilder::new("f", &[("x", IrType::Int(64))], IrType::Void);
    let p = fb.call("malloc", IrType::Ptr(0), vec![Operand::i64(8)]).unwrap();
    fb.store(IrType::Int(64), fb.param(0), p.clone());
    let read_back = fb.load(IrType::Int(64), p.clone());
    let same = fb.icmp(ICmpPredicate::Eq, fb.param(0), read_back);
    fb.call("__sym_assert", IrType::Void, vec![same]);
    fb.call("free", IrType::Void, vec![p]);
    fb.ret(None);

    let mut interpreter = common::interpreter_for(fb.build()?);
    interpreter.add_entry("f", vec![EntryArg::Symbolic { name: "x".into() }])?;

    let stats = interpreter.run()?;
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.paths, 1);

    Ok(())
}

#[test]
fn a_use_after_free_is_witnessed() -> anyhow::Result<()> {
    let mut fb = FunctionBuilder::new("f", &[], IrType::Int(64));
    let p = fb.call("malloc", IrType::Ptr(0), vec![Operand::i64(8)]).unwrap();
    fb.call("free", IrType::Void, vec![p.clone()]);
    let stale = fb.load(IrType::Int(64), p);
    fb.ret(Some(stale));

    let mut interpreter = common::interpreter_for(fb.build()?);
    interpreter.add_entry("f", vec![])?;

    let stats = interpreter.run()?;
    assert_eq!(stats.failures, 1);

    let failures = common::collected_failures(&interpreter);
    assert_eq!(failures[0].message, "invalid pointer load/store");

    Ok(())
}

#[test]
fn a_buffer_argument_is_readable_symbolic_memory() -> anyhow::Result<()> {
    let mut fb = FunctionBuilder::new("f", &[("buf", IrType::Ptr(0))], IrType::Void);
    let first = fb.load(IrType::Int(8), fb.param(0));
    // Nothing constrains the buffer's bytes, so asserting a fixed value
    // must be refutable.
    let is_zero = fb.icmp(ICmpPredicate::Eq, first, Operand::int(8, 0));
    fb.call("__sym_assert", IrType::Void, vec![is_zero]);
    fb.ret(None);

    let mut interpreter = common::interpreter_for(fb.build()?);
    interpreter.add_entry(
        "f",
        vec![EntryArg::SymbolicBuffer {
            name: "buf".into(),
            size: 4,
        }],
    )?;

    let stats = interpreter.run()?;
    assert_eq!(stats.failures, 1);
    assert_eq!(common::collected_failures(&interpreter)[0].message, "assertion failed");

    Ok(())
}
