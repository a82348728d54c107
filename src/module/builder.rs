//! This module contains the programmatic construction API for the program
//! representation.
//!
//! The builders are how tests and fuzzing harnesses assemble programs
//! without a bitcode loader. They hand out SSA identifiers, keep track of
//! the block under construction, and validate the structural rules (blocks
//! end in exactly one terminator, phis lead their block) when the function
//! is finalised.

use crate::{
    error::module::{Error, Result},
    ir::{BinaryOp, FCmpPredicate, ICmpPredicate},
    module::{
        BasicBlock,
        BlockId,
        CastOp,
        DataLayout,
        Function,
        InstKind,
        Instruction,
        IrType,
        Module,
        Operand,
        Parameter,
        SwitchCase,
        ValueId,
        WrapFlags,
    },
};

/// A builder for a [`Module`].
#[derive(Clone, Debug, Default)]
pub struct ModuleBuilder {
    name: String,
    layout: DataLayout,
    functions: Vec<Function>,
}

impl ModuleBuilder {
    /// Creates a builder for a module with the given `name` and the default
    /// data layout.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let layout = DataLayout::default();
        let functions = vec![];
        Self {
            name,
            layout,
            functions,
        }
    }

    /// Overrides the module's data layout.
    #[must_use]
    pub fn with_layout(mut self, layout: DataLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Adds a finished function to the module.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a function of the same name was already added.
    pub fn add_function(&mut self, function: Function) -> Result<()> {
        if self.functions.iter().any(|f| f.name == function.name) {
            return Err(Error::DuplicateFunction {
                name: function.name,
            });
        }
        self.functions.push(function);
        Ok(())
    }

    /// Finalises the module.
    #[must_use]
    pub fn build(self) -> Module {
        Module::new(self.name, self.layout, self.functions)
    }
}

/// A builder for a single [`Function`].
///
/// The builder starts with an `entry` block selected; instructions are
/// appended to the selected block. Every instruction that defines a value
/// returns the [`Operand`] referring to it.
#[derive(Clone, Debug)]
pub struct FunctionBuilder {
    name: String,
    params: Vec<Parameter>,
    ret: IrType,
    blocks: Vec<BasicBlock>,
    current: BlockId,
    next_value: u32,
}

impl FunctionBuilder {
    /// Creates a builder for a function with the given signature.
    #[must_use]
    pub fn new(name: impl Into<String>, params: &[(&str, IrType)], ret: IrType) -> Self {
        let name = name.into();
        let params = params
            .iter()
            .enumerate()
            .map(|(i, (param_name, ty))| Parameter {
                id: ValueId::new(i as u32),
                name: (*param_name).to_string(),
                ty: ty.clone(),
            })
            .collect::<Vec<_>>();
        let next_value = params.len() as u32;
        let blocks = vec![BasicBlock {
            label: "entry".into(),
            instructions: vec![],
        }];

        Self {
            name,
            params,
            ret,
            blocks,
            current: 0,
            next_value,
        }
    }

    /// Gets the operand referring to the `index`-th parameter.
    ///
    /// # Panics
    ///
    /// Panics if the parameter does not exist; asking is a programmer bug.
    #[must_use]
    pub fn param(&self, index: usize) -> Operand {
        Operand::Var(self.params[index].id)
    }

    /// Appends a new, empty block and returns its identifier without
    /// selecting it.
    pub fn add_block(&mut self, label: impl Into<String>) -> BlockId {
        self.blocks.push(BasicBlock {
            label: label.into(),
            instructions: vec![],
        });
        self.blocks.len() - 1
    }

    /// Selects the block that subsequent instructions are appended to.
    ///
    /// # Panics
    ///
    /// Panics if the block does not exist; selecting it is a programmer bug.
    pub fn select_block(&mut self, block: BlockId) {
        assert!(block < self.blocks.len(), "No such block {block}");
        self.current = block;
    }

    fn fresh(&mut self) -> ValueId {
        let id = ValueId::new(self.next_value);
        self.next_value += 1;
        id
    }

    fn push(&mut self, dest: Option<ValueId>, kind: InstKind) {
        self.blocks[self.current]
            .instructions
            .push(Instruction { dest, kind });
    }

    fn push_defining(&mut self, kind: InstKind) -> Operand {
        let dest = self.fresh();
        self.push(Some(dest), kind);
        Operand::Var(dest)
    }

    /// Reserves an SSA identifier to be defined later.
    ///
    /// Loop-carried values need this: a phi at a loop header refers to an
    /// increment that is only appended after it. Define the reserved
    /// identifier with [`Self::binary_into`].
    pub fn reserve(&mut self) -> ValueId {
        self.fresh()
    }

    /// Appends a binary operation.
    pub fn binary(&mut self, op: BinaryOp, lhs: Operand, rhs: Operand) -> Operand {
        self.binary_flagged(op, lhs, rhs, WrapFlags::default())
    }

    /// Appends a binary operation defining a reserved identifier.
    pub fn binary_into(&mut self, dest: ValueId, op: BinaryOp, lhs: Operand, rhs: Operand) {
        self.push(Some(dest), InstKind::Binary {
            op,
            lhs,
            rhs,
            flags: WrapFlags::default(),
        });
    }

    /// Appends a binary operation carrying wrap flags.
    pub fn binary_flagged(
        &mut self,
        op: BinaryOp,
        lhs: Operand,
        rhs: Operand,
        flags: WrapFlags,
    ) -> Operand {
        self.push_defining(InstKind::Binary {
            op,
            lhs,
            rhs,
            flags,
        })
    }

    /// Appends an integer comparison.
    pub fn icmp(&mut self, pred: ICmpPredicate, lhs: Operand, rhs: Operand) -> Operand {
        self.push_defining(InstKind::ICmp { pred, lhs, rhs })
    }

    /// Appends a float comparison.
    pub fn fcmp(&mut self, pred: FCmpPredicate, lhs: Operand, rhs: Operand) -> Operand {
        self.push_defining(InstKind::FCmp { pred, lhs, rhs })
    }

    /// Appends a select.
    pub fn select(&mut self, cond: Operand, true_value: Operand, false_value: Operand) -> Operand {
        self.push_defining(InstKind::Select {
            cond,
            true_value,
            false_value,
        })
    }

    /// Appends a conversion.
    pub fn cast(&mut self, op: CastOp, ty: IrType, operand: Operand) -> Operand {
        self.push_defining(InstKind::Cast { op, ty, operand })
    }

    /// Appends a phi.
    pub fn phi(&mut self, ty: IrType, incoming: Vec<(BlockId, Operand)>) -> Operand {
        self.push_defining(InstKind::Phi { ty, incoming })
    }

    /// Appends a load with the natural alignment of the type.
    pub fn load(&mut self, ty: IrType, ptr: Operand) -> Operand {
        self.push_defining(InstKind::Load { ty, ptr, align: 0 })
    }

    /// Appends a load with an explicit alignment in bytes.
    pub fn load_aligned(&mut self, ty: IrType, ptr: Operand, align: u32) -> Operand {
        self.push_defining(InstKind::Load { ty, ptr, align })
    }

    /// Appends a store of a value of `ty` with the natural alignment.
    pub fn store(&mut self, ty: IrType, value: Operand, ptr: Operand) {
        self.push(None, InstKind::Store {
            ty,
            value,
            ptr,
            align: 0,
        });
    }

    /// Appends a store with an explicit alignment in bytes.
    pub fn store_aligned(&mut self, ty: IrType, value: Operand, ptr: Operand, align: u32) {
        self.push(None, InstKind::Store {
            ty,
            value,
            ptr,
            align,
        });
    }

    /// Appends a stack allocation of one value of `ty`.
    pub fn alloca(&mut self, ty: IrType) -> Operand {
        self.push_defining(InstKind::Alloca {
            ty,
            count: None,
            align: 0,
        })
    }

    /// Appends a stack allocation of `count` values of `ty`.
    pub fn alloca_n(&mut self, ty: IrType, count: Operand) -> Operand {
        self.push_defining(InstKind::Alloca {
            ty,
            count: Some(count),
            align: 0,
        })
    }

    /// Appends pointer offset arithmetic over `pointee`.
    pub fn gep(&mut self, pointee: IrType, base: Operand, indices: Vec<Operand>) -> Operand {
        self.push_defining(InstKind::GetElementPtr {
            pointee,
            base,
            indices,
        })
    }

    /// Appends a call. Returns the operand holding the result for non-void
    /// callees and [`None`] otherwise.
    pub fn call(
        &mut self,
        function: impl Into<String>,
        ty: IrType,
        args: Vec<Operand>,
    ) -> Option<Operand> {
        let function = function.into();
        if ty == IrType::Void {
            self.push(None, InstKind::Call {
                function,
                ty,
                args,
            });
            None
        } else {
            Some(self.push_defining(InstKind::Call {
                function,
                ty,
                args,
            }))
        }
    }

    /// Appends an unconditional jump.
    pub fn br(&mut self, target: BlockId) {
        self.push(None, InstKind::Br { target });
    }

    /// Appends a conditional jump.
    pub fn cond_br(&mut self, cond: Operand, true_target: BlockId, false_target: BlockId) {
        self.push(None, InstKind::CondBr {
            cond,
            true_target,
            false_target,
        });
    }

    /// Appends a multi-way jump.
    pub fn switch(&mut self, value: Operand, default: BlockId, cases: Vec<SwitchCase>) {
        self.push(None, InstKind::Switch {
            value,
            default,
            cases,
        });
    }

    /// Appends a return.
    pub fn ret(&mut self, value: Option<Operand>) {
        self.push(None, InstKind::Ret { value });
    }

    /// Appends an unreachable marker.
    pub fn unreachable(&mut self) {
        self.push(None, InstKind::Unreachable);
    }

    /// Finalises the function, validating its structure.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if any block is empty, does not end in a terminator,
    /// contains an interior terminator, or has a phi after a non-phi
    /// instruction.
    pub fn build(self) -> Result<Function> {
        for (index, block) in self.blocks.iter().enumerate() {
            let Some(last) = block.instructions.last() else {
                return Err(Error::EmptyBlock {
                    function: self.name.clone(),
                    block: index,
                });
            };
            if !last.kind.is_terminator() {
                return Err(Error::MissingTerminator {
                    function: self.name.clone(),
                    block: index,
                });
            }

            let body = &block.instructions[..block.instructions.len() - 1];
            if body.iter().any(|inst| inst.kind.is_terminator()) {
                return Err(Error::EarlyTerminator {
                    function: self.name.clone(),
                    block: index,
                });
            }

            let mut seen_non_phi = false;
            for inst in &block.instructions {
                let is_phi = matches!(inst.kind, InstKind::Phi { .. });
                if is_phi && seen_non_phi {
                    return Err(Error::MisplacedPhi {
                        function: self.name.clone(),
                        block: index,
                    });
                }
                seen_non_phi |= !is_phi;
            }
        }

        Ok(Function {
            name: self.name,
            params: self.params,
            ret: self.ret,
            blocks: self.blocks,
        })
    }
}

#[cfg(test)]
mod test {
    use crate::{
        error::module::Error,
        ir::ICmpPredicate,
        module::{builder::FunctionBuilder, IrType, Operand},
    };

    #[test]
    fn builds_a_two_block_function() -> anyhow::Result<()> {
        let mut fb = FunctionBuilder::new("sign", &[("x", IrType::Int(32))], IrType::Int(32));
        let positive = fb.add_block("positive");
        let negative = fb.add_block("negative");

        let cond = fb.icmp(ICmpPredicate::Sgt, fb.param(0), Operand::i32(0));
        fb.cond_br(cond, positive, negative);

        fb.select_block(positive);
        fb.ret(Some(Operand::i32(1)));

        fb.select_block(negative);
        fb.ret(Some(Operand::int(32, u64::MAX)));

        let function = fb.build()?;
        assert_eq!(function.blocks.len(), 3);
        assert!(!function.is_declaration());

        Ok(())
    }

    #[test]
    fn rejects_a_block_without_a_terminator() {
        let mut fb = FunctionBuilder::new("broken", &[], IrType::Void);
        let _ = fb.alloca(IrType::Int(8));

        let result = fb.build();
        assert!(matches!(result, Err(Error::MissingTerminator { .. })));
    }

    #[test]
    fn rejects_a_phi_after_ordinary_instructions() {
        let mut fb = FunctionBuilder::new("broken", &[], IrType::Void);
        let slot = fb.alloca(IrType::Int(8));
        let _ = fb.phi(IrType::Int(8), vec![(0, slot)]);
        fb.ret(None);

        let result = fb.build();
        assert!(matches!(result, Err(Error::MisplacedPhi { .. })));
    }
}
