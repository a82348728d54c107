//! This module contains the per-instruction dispatch: each instruction is
//! compiled into a [`TransformBuilder`] pipeline and executed.
//!
//! The convention throughout is that the program counter is advanced past
//! the instruction _before_ its pipeline runs; control-flow pipelines then
//! overwrite it. Undefined behaviour (division by zero, flagged overflow,
//! oversized shifts, misaligned accesses) is phrased as an assertion whose
//! reachable violation is logged as a failure, after which the path
//! continues under the assumption that the behaviour did not occur.

use std::rc::Rc;

use crate::{
    error::{
        container::Locatable,
        execution::{Error, Result},
    },
    interpreter::{
        builtins::{Builtins, CallInfo},
        context::StackFrame,
        facade::InterpreterContext,
        policy::CompletionReason,
        transform::{Arg, ContextState, StepResult, TransformBuilder},
        InterpreterOptions,
    },
    ir::{
        assertion::Assertion,
        types::Type,
        BinaryOp,
        ICmpPredicate,
        Op,
        OpRef,
    },
    memory::{AllocationKind, HeapIndex, Pointer, RuntimeScalar, RuntimeValue},
    module::{
        BlockId,
        CastOp,
        DataLayout,
        InstKind,
        Instruction,
        IrType,
        Module,
        Operand,
        SwitchCase,
        ValueId,
        WrapFlags,
    },
};

/// Executes the instruction at the current program counter.
///
/// # Errors
///
/// Returns [`Err`] on engine faults: a terminal context, a malformed
/// program counter, or a pipeline operation that fails.
pub fn step(icx: &mut InterpreterContext<'_>, builtins: &Builtins) -> Result<StepResult> {
    let location = icx.context().location();

    let instruction = {
        let frame = icx.top_frame().locate(location.clone())?;
        let function = frame.function();
        let block = function
            .blocks
            .get(frame.block)
            .ok_or_else(|| Error::UnknownBlock {
                function: function.name.clone(),
                block: frame.block,
            })
            .locate(location.clone())?;
        block
            .instructions
            .get(frame.inst)
            .ok_or(Error::MissingTerminator)
            .locate(location.clone())?
            .clone()
    };

    icx.top_frame_mut().locate(location.clone())?.inst += 1;

    let mut tb = TransformBuilder::new();
    let module = icx.module().clone();
    let options = icx.options();
    build_instruction(&mut tb, instruction, builtins, &module, options)
        .locate(location.clone())?;

    tb.execute(icx).locate(location)
}

/// Compiles one instruction into pipeline operations.
#[allow(clippy::too_many_lines)] // One arm per opcode.
fn build_instruction(
    tb: &mut TransformBuilder,
    instruction: Instruction,
    builtins: &Builtins,
    module: &Rc<Module>,
    options: InterpreterOptions,
) -> std::result::Result<(), Error> {
    let dest = instruction.dest;
    match instruction.kind {
        InstKind::Binary { op, lhs, rhs, flags } => {
            build_binary(tb, dest, op, lhs, rhs, flags);
        }
        InstKind::ICmp { pred, lhs, rhs } => {
            let _ = tb.transform(move |state, _| {
                let l = operand_expr(state, &lhs)?;
                let r = operand_expr(state, &rhs)?;
                let result = Op::icmp(pred, &l, &r);
                bind(state, dest, RuntimeValue::expr(result))
            });
        }
        InstKind::FCmp { pred, lhs, rhs } => {
            let _ = tb.transform(move |state, _| {
                let l = operand_expr(state, &lhs)?;
                let r = operand_expr(state, &rhs)?;
                let result = Op::fcmp(pred, &l, &r);
                bind(state, dest, RuntimeValue::expr(result))
            });
        }
        InstKind::Select {
            cond,
            true_value,
            false_value,
        } => {
            let _ = tb.transform(move |state, _| {
                let cond = bool_expr(state, &cond)?;
                let t = state.lookup(&Arg::Operand(true_value.clone()))?;
                let f = state.lookup(&Arg::Operand(false_value.clone()))?;

                let value = match (t.scalar()?, f.scalar()?) {
                    (RuntimeScalar::Expr(te), RuntimeScalar::Expr(fe)) => {
                        RuntimeValue::expr(Op::select(cond.value(), te, fe))
                    }
                    // A choice between pointers stays a pointer: the arms
                    // project to their addresses and the pick is resolved
                    // lazily, at the access that consumes it.
                    (ts, fs) => {
                        let heap = match (ts, fs) {
                            (RuntimeScalar::Pointer(p), _) | (_, RuntimeScalar::Pointer(p)) => {
                                p.heap()
                            }
                            _ => unreachable!("At least one arm is a pointer"),
                        };
                        let te = ts.to_expr(state.ctx.heaps())?;
                        let fe = fs.to_expr(state.ctx.heaps())?;
                        let address = Op::select(cond.value(), &te, &fe);
                        RuntimeValue::pointer(Pointer::unresolved(heap, address))
                    }
                };
                bind(state, dest, value)
            });
        }
        InstKind::Cast { op, ty, operand } => {
            build_cast(tb, dest, op, ty, operand);
        }
        InstKind::Phi { .. } => return Err(Error::PhiWithoutPredecessor),
        InstKind::Load { ty, ptr, align } => {
            build_alignment_check(tb, ptr.clone(), &ty, align);
            let resolved = tb.resolve(Arg::Operand(ptr), ty.clone(), true);
            let value = tb.read(resolved, ty);
            if let Some(dest) = dest {
                tb.assign(dest, value);
            }
        }
        InstKind::Store {
            ty,
            value,
            ptr,
            align,
        } => {
            build_alignment_check(tb, ptr.clone(), &ty, align);
            let resolved = tb.resolve(Arg::Operand(ptr), ty.clone(), true);
            tb.write(resolved, Arg::Operand(value), ty);
        }
        InstKind::Alloca { ty, count, align: _ } => {
            let _ = tb.transform(move |state, _| {
                let layout = state.ctx.layout();
                let width = layout.pointer_bits;
                let unit = layout.alloc_size(&ty);

                let size = match &count {
                    None => Op::int(width, u64::from(unit)),
                    Some(count) => {
                        let count = normalize_width(&operand_expr(state, count)?, width);
                        Op::mul(&Op::int(width, u64::from(unit)), &count)
                    }
                };

                let data = Op::alloc_array(&size, &Op::undef(Type::int(8)));
                let id = state
                    .ctx
                    .allocate(HeapIndex::MAIN, size, data, AllocationKind::Stack);
                state
                    .ctx
                    .top_frame_mut()?
                    .record_allocation(HeapIndex::MAIN, id);

                let ptr = Pointer::resolved(HeapIndex::MAIN, id, Op::int(width, 0));
                bind(state, dest, RuntimeValue::pointer(ptr))
            });
        }
        InstKind::GetElementPtr {
            pointee,
            base,
            indices,
        } => {
            build_gep(tb, dest, pointee, base, indices);
        }
        InstKind::Call { function, ty, args } => {
            match module.function(&function).filter(|f| !f.is_declaration()) {
                Some(callee) => {
                    let callee = callee.clone();
                    let _ = tb.transform_fork(move |mut state, icx, push| {
                        if state.ctx.stack_depth() >= options.max_stack_depth {
                            tracing::warn!(
                                function = callee.name,
                                "Call depth limit reached; closing the path"
                            );
                            let mut view = icx.with_other(&mut state.ctx);
                            view.complete_path(CompletionReason::Unknown, None);
                            return Ok(());
                        }

                        let layout = state.ctx.layout();
                        let mut bound = Vec::with_capacity(args.len());
                        for (param, arg) in callee.params.iter().zip(args.iter()) {
                            let value =
                                state.ctx.top_frame()?.operand_value(arg, &layout)?;
                            bound.push((param.id, value));
                        }

                        let mut frame = StackFrame::new(callee.clone(), dest);
                        for (id, value) in bound {
                            frame.insert(id, value);
                        }
                        state.ctx.push_frame(frame);
                        push(state);
                        Ok(())
                    });
                }
                None => {
                    let info = CallInfo {
                        dest,
                        args,
                        ret: ty,
                    };
                    builtins.build(&function, tb, &info)?;
                }
            }
        }
        InstKind::Br { target } => {
            let _ = tb.transform(move |state, _| {
                let layout = state.ctx.layout();
                jump(state.ctx.top_frame_mut()?, target, &layout)
            });
        }
        InstKind::CondBr {
            cond,
            true_target,
            false_target,
        } => {
            let _ = tb.transform_fork(move |state, icx, push| {
                let taken = bool_expr(&state, &cond)?;
                let not_taken = taken.negate();
                fork_branches(
                    state,
                    icx,
                    push,
                    vec![(taken, true_target), (not_taken, false_target)],
                )
            });
        }
        InstKind::Switch {
            value,
            default,
            cases,
        } => {
            let _ = tb.transform_fork(move |state, icx, push| {
                let scrutinee = operand_expr(&state, &value)?;
                let mut branches = Vec::with_capacity(cases.len() + 1);

                let mut none_matched = Op::bool(true);
                for SwitchCase { value, target } in &cases {
                    let case = Op::constant_int(*value);
                    let matched = Op::icmp(ICmpPredicate::Eq, &scrutinee, &case);
                    none_matched = Op::and(&none_matched, &Op::not(&matched));
                    branches.push((Assertion::new(matched), *target));
                }
                branches.push((Assertion::new(none_matched), default));

                fork_branches(state, icx, push, branches)
            });
        }
        InstKind::Ret { value } => {
            let _ = tb.transform(move |state, _| {
                let layout = state.ctx.layout();
                let returned = match &value {
                    Some(operand) => {
                        Some(state.ctx.top_frame()?.operand_value(operand, &layout)?)
                    }
                    None => None,
                };
                state.ctx.pop(returned)
            });
        }
        InstKind::Unreachable => {
            let _ = tb.transform_fork(move |mut state, icx, _push| {
                let mut view = icx.with_other(&mut state.ctx);
                view.log_failure(&Assertion::constant(true), "unreachable code executed");
                // Nothing is pushed: the path cannot continue past here.
                Ok(())
            });
        }
    }
    Ok(())
}

/// Binds the instruction's destination, if it has one.
fn bind(
    state: &mut ContextState,
    dest: Option<ValueId>,
    value: RuntimeValue,
) -> std::result::Result<(), Error> {
    if let Some(dest) = dest {
        state.ctx.top_frame_mut()?.insert(dest, value);
    }
    Ok(())
}

/// Materialises an operand as an integer or float expression, projecting
/// pointers to their addresses.
fn operand_expr(state: &ContextState, operand: &Operand) -> std::result::Result<OpRef, Error> {
    state
        .lookup(&Arg::Operand(operand.clone()))?
        .scalar()?
        .to_expr(state.ctx.heaps())
}

/// Materialises an operand as a boolean assertion, comparing wider
/// integers against zero.
fn bool_expr(state: &ContextState, operand: &Operand) -> std::result::Result<Assertion, Error> {
    let expr = operand_expr(state, operand)?;
    Ok(boolify(&expr))
}

/// Wraps an integer expression as an assertion, comparing against zero
/// unless it already is a boolean.
pub(crate) fn boolify(expr: &OpRef) -> Assertion {
    if expr.ty().is_bool() {
        Assertion::new(expr.clone())
    } else {
        let zero = Op::int(expr.ty().bitwidth(), 0);
        Assertion::new(Op::icmp(ICmpPredicate::Ne, expr, &zero))
    }
}

/// Adjusts an integer expression to `width` bits, zero-extending or
/// truncating as needed.
pub(crate) fn normalize_width(expr: &OpRef, width: u32) -> OpRef {
    let current = expr.ty().bitwidth();
    match current.cmp(&width) {
        std::cmp::Ordering::Equal => expr.clone(),
        std::cmp::Ordering::Less => Op::zext(expr, width),
        std::cmp::Ordering::Greater => Op::trunc(expr, width),
    }
}

/// Reports `failing` as a failure where reachable, then constrains the
/// path with its negation so execution can continue soundly.
pub(crate) fn report_and_assume(
    state: &mut ContextState,
    icx: &mut InterpreterContext<'_>,
    failing: &Assertion,
    message: &str,
) {
    {
        let mut view = icx.with_other(&mut state.ctx);
        view.log_failure(failing, message);
    }
    state.ctx.add(failing.negate());
}

/// Forks `state` once per satisfiable branch, constraining and jumping
/// each fork. With no satisfiable branch the path dies; if an undecided
/// branch was among the candidates the path completes as `Unknown`.
fn fork_branches(
    mut state: ContextState,
    icx: &mut InterpreterContext<'_>,
    push: &mut dyn FnMut(ContextState),
    branches: Vec<(Assertion, BlockId)>,
) -> std::result::Result<(), Error> {
    use crate::solver::SolverResultKind;

    let mut any_unknown = false;
    let mut pushed = 0usize;

    let verdicts: Vec<SolverResultKind> = {
        let mut view = icx.with_other(&mut state.ctx);
        branches
            .iter()
            .map(|(assertion, _)| view.check(assertion).kind())
            .collect()
    };

    for ((assertion, target), verdict) in branches.into_iter().zip(verdicts) {
        match verdict {
            SolverResultKind::Sat => {
                let mut fork = state.ctx.fork_once();
                fork.add(assertion);
                let layout = fork.layout();
                jump(fork.top_frame_mut()?, target, &layout)?;
                push(state.fork_with(fork));
                pushed += 1;
            }
            SolverResultKind::Unknown => any_unknown = true,
            SolverResultKind::Unsat => {}
        }
    }

    if pushed == 0 && any_unknown {
        let mut view = icx.with_other(&mut state.ctx);
        view.complete_path(CompletionReason::Unknown, None);
    }
    Ok(())
}

/// Moves a frame's program counter to the start of `target`, evaluating
/// the target's phis against the block being left.
///
/// All phis are evaluated before any of them is bound, which gives them
/// the simultaneous-assignment semantics the representation requires.
pub(crate) fn jump(
    frame: &mut StackFrame,
    target: BlockId,
    layout: &DataLayout,
) -> std::result::Result<(), Error> {
    let function = frame.function().clone();
    let block = function
        .blocks
        .get(target)
        .ok_or_else(|| Error::UnknownBlock {
            function: function.name.clone(),
            block: target,
        })?;

    let from = frame.block;
    let mut bindings = Vec::new();
    let mut phi_count = 0;
    for instruction in &block.instructions {
        let InstKind::Phi { incoming, .. } = &instruction.kind else {
            break;
        };
        phi_count += 1;

        let (_, operand) = incoming
            .iter()
            .find(|(block, _)| *block == from)
            .ok_or(Error::MissingPhiIncoming { block: from })?;
        let value = frame.operand_value(operand, layout)?;
        if let Some(dest) = instruction.dest {
            bindings.push((dest, value));
        }
    }

    for (dest, value) in bindings {
        frame.insert(dest, value);
    }
    frame.prev_block = Some(from);
    frame.block = target;
    frame.inst = phi_count;
    Ok(())
}

/// Compiles a binary instruction, including its undefined-behaviour
/// checks.
fn build_binary(
    tb: &mut TransformBuilder,
    dest: Option<ValueId>,
    op: BinaryOp,
    lhs: Operand,
    rhs: Operand,
    flags: WrapFlags,
) {
    let _ = tb.transform(move |state, icx| {
        let l = operand_expr(state, &lhs)?;
        let r = operand_expr(state, &rhs)?;

        if !op.is_float() {
            let width = l.ty().bitwidth();
            let zero = Op::int(width, 0);

            match op {
                BinaryOp::UDiv | BinaryOp::URem => {
                    let by_zero = Assertion::new(Op::icmp(ICmpPredicate::Eq, &r, &zero));
                    report_and_assume(state, icx, &by_zero, "division by zero");
                }
                BinaryOp::SDiv | BinaryOp::SRem => {
                    let by_zero = Assertion::new(Op::icmp(ICmpPredicate::Eq, &r, &zero));
                    report_and_assume(state, icx, &by_zero, "division by zero");

                    let min = Op::constant_int(crate::ir::value::IntValue::new(
                        width,
                        ethnum::U256::ONE << (width - 1),
                    ));
                    let minus_one = Op::constant_int(crate::ir::value::IntValue::new(
                        width,
                        ethnum::U256::MAX,
                    ));
                    let overflow = Assertion::new(Op::and(
                        &Op::icmp(ICmpPredicate::Eq, &l, &min),
                        &Op::icmp(ICmpPredicate::Eq, &r, &minus_one),
                    ));
                    report_and_assume(state, icx, &overflow, "signed division overflow");
                }
                BinaryOp::Shl | BinaryOp::LShr | BinaryOp::AShr => {
                    let too_far = Assertion::new(Op::icmp(
                        ICmpPredicate::Uge,
                        &r,
                        &Op::int(width, u64::from(width)),
                    ));
                    report_and_assume(state, icx, &too_far, "shift amount exceeds bit width");
                }
                _ => {}
            }

            if flags.nsw {
                if let Some(overflow) = signed_overflow(op, &l, &r) {
                    report_and_assume(
                        state,
                        icx,
                        &Assertion::new(overflow),
                        "signed integer overflow",
                    );
                }
            }
            if flags.nuw {
                if let Some(overflow) = unsigned_overflow(op, &l, &r) {
                    report_and_assume(
                        state,
                        icx,
                        &Assertion::new(overflow),
                        "unsigned integer overflow",
                    );
                }
            }
        }

        let result = Op::binary(op, &l, &r);
        bind(state, dest, RuntimeValue::expr(result))
    });
}

/// Builds the wrap-detection predicate for a flagged signed operation by
/// redoing it at a width where it cannot wrap.
fn signed_overflow(op: BinaryOp, l: &OpRef, r: &OpRef) -> Option<OpRef> {
    let width = l.ty().bitwidth();
    let wide_width = match op {
        BinaryOp::Add | BinaryOp::Sub => width + 1,
        BinaryOp::Mul => width * 2,
        _ => return None,
    };
    if wide_width > crate::constant::MAXIMUM_INTEGER_WIDTH_BITS {
        return None;
    }

    let wide = Op::binary(op, &Op::sext(l, wide_width), &Op::sext(r, wide_width));
    let narrow = Op::sext(&Op::binary(op, l, r), wide_width);
    Some(Op::icmp(ICmpPredicate::Ne, &wide, &narrow))
}

/// Builds the wrap-detection predicate for a flagged unsigned operation.
fn unsigned_overflow(op: BinaryOp, l: &OpRef, r: &OpRef) -> Option<OpRef> {
    let width = l.ty().bitwidth();
    let wide_width = match op {
        BinaryOp::Add | BinaryOp::Sub => width + 1,
        BinaryOp::Mul => width * 2,
        _ => return None,
    };
    if wide_width > crate::constant::MAXIMUM_INTEGER_WIDTH_BITS {
        return None;
    }

    let wide = Op::binary(op, &Op::zext(l, wide_width), &Op::zext(r, wide_width));
    let narrow = Op::zext(&Op::binary(op, l, r), wide_width);
    Some(Op::icmp(ICmpPredicate::Ne, &wide, &narrow))
}

/// Compiles a conversion instruction.
fn build_cast(
    tb: &mut TransformBuilder,
    dest: Option<ValueId>,
    op: CastOp,
    ty: IrType,
    operand: Operand,
) {
    let _ = tb.transform(move |state, _| {
        let value = match op {
            CastOp::Trunc | CastOp::ZExt | CastOp::SExt => {
                let IrType::Int(width) = ty else {
                    return Err(Error::TypeMismatch {
                        expected: "an integer cast target".into(),
                        found: ty.to_string(),
                    });
                };
                let expr = operand_expr(state, &operand)?;
                let result = match op {
                    CastOp::Trunc => Op::trunc(&expr, width),
                    CastOp::ZExt => Op::zext(&expr, width),
                    CastOp::SExt => Op::sext(&expr, width),
                    _ => unreachable!(),
                };
                RuntimeValue::expr(result)
            }
            CastOp::Bitcast => {
                let target = match &ty {
                    IrType::Int(width) => Type::int(*width),
                    IrType::Float { ebits, sbits } => Type::float(*ebits, *sbits),
                    ty => {
                        return Err(Error::TypeMismatch {
                            expected: "a scalar bitcast target".into(),
                            found: ty.to_string(),
                        })
                    }
                };
                let expr = state
                    .lookup(&Arg::Operand(operand.clone()))?
                    .scalar()?
                    .expr()?
                    .clone();
                RuntimeValue::expr(Op::bitcast(&expr, target))
            }
            CastOp::PtrToInt => {
                let IrType::Int(width) = ty else {
                    return Err(Error::TypeMismatch {
                        expected: "an integer cast target".into(),
                        found: ty.to_string(),
                    });
                };
                let address = operand_expr(state, &operand)?;
                RuntimeValue::expr(normalize_width(&address, width))
            }
            CastOp::IntToPtr => {
                let IrType::Ptr(space) = ty else {
                    return Err(Error::TypeMismatch {
                        expected: "a pointer cast target".into(),
                        found: ty.to_string(),
                    });
                };
                let width = state.ctx.layout().pointer_bits;
                let expr = operand_expr(state, &operand)?;
                RuntimeValue::pointer(Pointer::unresolved(
                    HeapIndex::new(space),
                    normalize_width(&expr, width),
                ))
            }
        };
        bind(state, dest, value)
    });
}

/// Compiles pointer offset arithmetic.
fn build_gep(
    tb: &mut TransformBuilder,
    dest: Option<ValueId>,
    pointee: IrType,
    base: Operand,
    indices: Vec<Operand>,
) {
    let _ = tb.transform(move |state, _| {
        let layout = state.ctx.layout();
        let width = layout.pointer_bits;
        let base = state
            .lookup(&Arg::Operand(base.clone()))?
            .scalar()?
            .pointer()?
            .clone();

        let mut delta = Op::int(width, 0);
        let mut current = pointee.clone();
        for (position, index) in indices.iter().enumerate() {
            if position == 0 {
                let stride = layout.alloc_size(&pointee);
                let index = normalize_width(&operand_expr(state, index)?, width);
                delta = Op::add(&delta, &Op::mul(&Op::int(width, u64::from(stride)), &index));
                continue;
            }

            match current.clone() {
                IrType::Struct { fields, packed } => {
                    let constant = operand_expr(state, index)?;
                    let field = constant
                        .as_constant_int()
                        .map(|v| v.as_u64() as usize)
                        .ok_or_else(|| Error::TypeMismatch {
                            expected: "a constant struct index".into(),
                            found: constant.to_string(),
                        })?;
                    let (offsets, _) = layout.struct_layout(&fields, packed);
                    delta = Op::add(&delta, &Op::int(width, u64::from(offsets[field])));
                    current = fields[field].clone();
                }
                IrType::Array { elem, .. } => {
                    let stride = layout.alloc_size(&elem);
                    let index = normalize_width(&operand_expr(state, index)?, width);
                    delta =
                        Op::add(&delta, &Op::mul(&Op::int(width, u64::from(stride)), &index));
                    current = *elem;
                }
                IrType::Vector { elem, .. } => {
                    let stride = layout.store_size(&elem);
                    let index = normalize_width(&operand_expr(state, index)?, width);
                    delta =
                        Op::add(&delta, &Op::mul(&Op::int(width, u64::from(stride)), &index));
                    current = *elem;
                }
                other => {
                    return Err(Error::TypeMismatch {
                        expected: "an indexable type".into(),
                        found: other.to_string(),
                    })
                }
            }
        }

        let result = if base.is_resolved() {
            Pointer::resolved(
                base.heap(),
                base.alloc()?,
                Op::add(base.offset()?, &delta),
            )
        } else {
            Pointer::unresolved(base.heap(), Op::add(&base.value(state.ctx.heaps())?, &delta))
        };
        bind(state, dest, RuntimeValue::pointer(result))
    });
}

/// Compiles the alignment failure check preceding a memory access.
fn build_alignment_check(tb: &mut TransformBuilder, ptr: Operand, ty: &IrType, align: u32) {
    let natural = align;
    let ty = ty.clone();
    let _ = tb.transform(move |state, icx| {
        let layout = state.ctx.layout();
        let align = if natural == 0 { layout.align(&ty) } else { natural };
        if align <= 1 {
            return Ok(());
        }

        let pointer = state
            .lookup(&Arg::Operand(ptr.clone()))?
            .scalar()?
            .pointer()?
            .clone();
        let Ok(address) = pointer.value(state.ctx.heaps()) else {
            // A dangling pointer has no address to check; the resolve that
            // follows reports the access itself as invalid.
            return Ok(());
        };
        let width = address.ty().bitwidth();
        let mask = Op::int(width, u64::from(align - 1));
        let misaligned = Assertion::new(Op::icmp(
            ICmpPredicate::Ne,
            &Op::and(&address, &mask),
            &Op::int(width, 0),
        ));
        report_and_assume(state, icx, &misaligned, "unaligned memory access");
        Ok(())
    });
}
