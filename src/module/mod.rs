//! This module contains the program representation the interpreter consumes.
//!
//! The representation is a typed SSA form close to LLVM IR: a module of
//! functions, each a graph of basic blocks holding instructions that define
//! at most one value. Loading real bitcode into this form is the job of an
//! external loader collaborator; this crate only defines the model and a
//! builder API ([`builder::FunctionBuilder`]) for assembling programs
//! programmatically, which is what the tests and harnesses use.

pub mod builder;
pub mod layout;

use std::{collections::BTreeMap, fmt::Display, rc::Rc};

pub use layout::{DataLayout, Endian};

use crate::ir::{
    value::{FloatValue, IntValue},
    BinaryOp,
    FCmpPredicate,
    ICmpPredicate,
};

/// The identifier of an SSA value within a function.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ValueId(u32);

impl ValueId {
    /// Constructs a value identifier from its raw index.
    #[must_use]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Gets the raw index of the identifier.
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl Display for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// The index of a basic block within its function.
pub type BlockId = usize;

/// The type language of the program representation.
///
/// Unlike the flat expression [`crate::ir::types::Type`], program types keep
/// their structure: the interpreter decomposes them into scalar cells when a
/// value of the type crosses the memory boundary.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum IrType {
    /// A two's-complement integer of the given bit width.
    Int(u32),

    /// An IEEE-754 float described by its exponent and significand widths.
    Float { ebits: u32, sbits: u32 },

    /// A pointer into the given address space.
    Ptr(u32),

    /// A fixed-length vector of scalars.
    Vector { elem: Box<IrType>, count: u32 },

    /// A fixed-length array.
    Array { elem: Box<IrType>, count: u32 },

    /// A struct with the given field types.
    Struct { fields: Vec<IrType>, packed: bool },

    /// The absence of a value; only valid as a function return type.
    Void,
}

impl IrType {
    /// Constructs the IEEE-754 `binary32` type.
    #[must_use]
    pub fn f32() -> Self {
        Self::Float { ebits: 8, sbits: 24 }
    }

    /// Constructs the IEEE-754 `binary64` type.
    #[must_use]
    pub fn f64() -> Self {
        Self::Float { ebits: 11, sbits: 53 }
    }

    /// Constructs an array type.
    #[must_use]
    pub fn array(elem: IrType, count: u32) -> Self {
        Self::Array {
            elem: Box::new(elem),
            count,
        }
    }

    /// Checks whether the type is a scalar: an integer, float, or pointer.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float { .. } | Self::Ptr(_))
    }
}

impl Display for IrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(width) => write!(f, "i{width}"),
            Self::Float { ebits: 8, sbits: 24 } => write!(f, "float"),
            Self::Float { ebits: 11, sbits: 53 } => write!(f, "double"),
            Self::Float { ebits, sbits } => write!(f, "f({ebits}, {sbits})"),
            Self::Ptr(0) => write!(f, "ptr"),
            Self::Ptr(space) => write!(f, "ptr addrspace({space})"),
            Self::Vector { elem, count } => write!(f, "<{count} x {elem}>"),
            Self::Array { elem, count } => write!(f, "[{count} x {elem}]"),
            Self::Struct { fields, packed } => {
                if *packed {
                    write!(f, "<")?;
                }
                write!(f, "{{ ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, " }}")?;
                if *packed {
                    write!(f, ">")?;
                }
                Ok(())
            }
            Self::Void => write!(f, "void"),
        }
    }
}

/// An instruction operand: either a reference to an SSA value or an
/// immediate constant.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// A reference to a previously defined SSA value.
    Var(ValueId),

    /// An immediate integer.
    Int(IntValue),

    /// An immediate float.
    Float(FloatValue),

    /// The null pointer of an address space.
    NullPtr { address_space: u32 },

    /// An unspecified value of the given type.
    Undef { ty: IrType },
}

impl Operand {
    /// Constructs an immediate integer operand of `width` bits.
    #[must_use]
    pub fn int(width: u32, value: u64) -> Self {
        Self::Int(IntValue::from_u64(width, value))
    }

    /// Constructs an immediate `i32` operand.
    #[must_use]
    pub fn i32(value: u64) -> Self {
        Self::int(32, value)
    }

    /// Constructs an immediate `i64` operand.
    #[must_use]
    pub fn i64(value: u64) -> Self {
        Self::int(64, value)
    }
}

impl From<ValueId> for Operand {
    fn from(value: ValueId) -> Self {
        Self::Var(value)
    }
}

/// The wrap flags a binary instruction may carry.
///
/// When a flag is set, producing a result that wraps is undefined behaviour
/// in the program under analysis, and the interpreter checks for it.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WrapFlags {
    /// No signed wrap.
    pub nsw: bool,

    /// No unsigned wrap.
    pub nuw: bool,
}

impl WrapFlags {
    /// The flag set carrying only `nsw`.
    #[must_use]
    pub fn nsw() -> Self {
        Self {
            nsw: true,
            nuw: false,
        }
    }

    /// The flag set carrying only `nuw`.
    #[must_use]
    pub fn nuw() -> Self {
        Self {
            nsw: false,
            nuw: true,
        }
    }
}

/// The conversion opcodes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    Bitcast,
    PtrToInt,
    IntToPtr,
}

/// One arm of a switch terminator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SwitchCase {
    /// The constant the scrutinee is compared against.
    pub value: IntValue,

    /// The block to jump to on a match.
    pub target: BlockId,
}

/// The operation an instruction performs.
#[derive(Clone, Debug, PartialEq)]
pub enum InstKind {
    /// An arithmetic, bitwise, or float binary operation.
    Binary {
        op: BinaryOp,
        lhs: Operand,
        rhs: Operand,
        flags: WrapFlags,
    },

    /// An integer (or pointer) comparison.
    ICmp {
        pred: ICmpPredicate,
        lhs: Operand,
        rhs: Operand,
    },

    /// A float comparison.
    FCmp {
        pred: FCmpPredicate,
        lhs: Operand,
        rhs: Operand,
    },

    /// A choice between two values based on a boolean.
    Select {
        cond: Operand,
        true_value: Operand,
        false_value: Operand,
    },

    /// A conversion between types.
    Cast {
        op: CastOp,
        ty: IrType,
        operand: Operand,
    },

    /// A merge of values from predecessor blocks.
    ///
    /// Phis must be the leading instructions of their block; all of a
    /// block's phis are evaluated simultaneously on entry.
    Phi {
        ty: IrType,
        incoming: Vec<(BlockId, Operand)>,
    },

    /// A typed read through a pointer.
    Load {
        ty: IrType,
        ptr: Operand,
        align: u32,
    },

    /// A typed write through a pointer.
    Store {
        ty: IrType,
        value: Operand,
        ptr: Operand,
        align: u32,
    },

    /// A stack allocation of `count` values of `ty` (one if absent).
    Alloca {
        ty: IrType,
        count: Option<Operand>,
        align: u32,
    },

    /// Pointer offset arithmetic over a pointee type.
    GetElementPtr {
        pointee: IrType,
        base: Operand,
        indices: Vec<Operand>,
    },

    /// A call to a named function or built-in.
    Call {
        function: String,
        ty: IrType,
        args: Vec<Operand>,
    },

    /// An unconditional jump.
    Br { target: BlockId },

    /// A two-way conditional jump.
    CondBr {
        cond: Operand,
        true_target: BlockId,
        false_target: BlockId,
    },

    /// A multi-way jump on an integer scrutinee.
    Switch {
        value: Operand,
        default: BlockId,
        cases: Vec<SwitchCase>,
    },

    /// A return from the current function.
    Ret { value: Option<Operand> },

    /// A point the program asserts is never reached.
    Unreachable,
}

impl InstKind {
    /// Checks whether the instruction ends a basic block.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Br { .. }
                | Self::CondBr { .. }
                | Self::Switch { .. }
                | Self::Ret { .. }
                | Self::Unreachable
        )
    }
}

/// A single instruction: an operation plus the SSA value it defines, if any.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    /// The SSA value the instruction defines.
    pub dest: Option<ValueId>,

    /// The operation performed.
    pub kind: InstKind,
}

/// A straight-line sequence of instructions ending in a terminator.
#[derive(Clone, Debug, PartialEq)]
pub struct BasicBlock {
    /// A human-readable label for diagnostics.
    pub label: String,

    /// The instructions of the block.
    pub instructions: Vec<Instruction>,
}

/// A function parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    /// The SSA value the parameter binds in the function body.
    pub id: ValueId,

    /// The parameter's name, used to derive symbolic input names.
    pub name: String,

    /// The parameter's type.
    pub ty: IrType,
}

/// A function: a signature plus, for definitions, a body of basic blocks.
///
/// A function with no blocks is a declaration; calling one dispatches to the
/// built-in registry.
#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    /// The function's name, unique within its module.
    pub name: String,

    /// The function's parameters.
    pub params: Vec<Parameter>,

    /// The function's return type.
    pub ret: IrType,

    /// The basic blocks of the body. Block 0 is the entry block.
    pub blocks: Vec<BasicBlock>,
}

impl Function {
    /// Checks whether the function is a declaration without a body.
    #[must_use]
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// A program: a set of functions sharing one data layout.
#[derive(Clone, Debug)]
pub struct Module {
    /// The module's name.
    pub name: String,

    /// The byte-level layout rules for the module.
    pub layout: DataLayout,

    functions: BTreeMap<String, Rc<Function>>,
}

impl Module {
    /// Constructs a module from its parts.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        layout: DataLayout,
        functions: impl IntoIterator<Item = Function>,
    ) -> Self {
        let name = name.into();
        let functions = functions
            .into_iter()
            .map(|f| (f.name.clone(), Rc::new(f)))
            .collect();
        Self {
            name,
            layout,
            functions,
        }
    }

    /// Looks up a function by name.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&Rc<Function>> {
        self.functions.get(name)
    }

    /// Iterates over the functions of the module in name order.
    pub fn functions(&self) -> impl Iterator<Item = &Rc<Function>> {
        self.functions.values()
    }
}
