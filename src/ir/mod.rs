//! This module contains the symbolic expression graph.
//!
//! Expressions are immutable, typed nodes arranged in a directed acyclic
//! graph. Nodes are content-addressed: building the same expression twice on
//! the same thread yields the same [`Rc`], which makes structural equality a
//! pointer comparison and lets downstream passes (the solver translation,
//! model evaluation) memoize by node identity.
//!
//! All construction goes through the builder functions on [`Op`]. The
//! builders eagerly fold operations whose operands are constants, so client
//! code never needs a separate simplification pass for the common cases.

pub mod assertion;
pub mod types;
pub mod value;

use std::{
    cell::RefCell,
    collections::HashMap,
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    rc::{Rc, Weak},
};

use serde::Serialize;

use crate::ir::{
    types::Type,
    value::{FloatValue, IntValue},
};

/// A shared handle to an interned expression node.
pub type OpRef = Rc<Op>;

/// The name of a symbolic constant.
///
/// Symbols are either human-readable strings (the names given to symbolic
/// inputs) or non-negative integers (fresh names the engine mints
/// internally). The choice is preserved through the solver and the model.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Symbol {
    /// A string-named symbol.
    Named(String),

    /// A numbered symbol.
    Numbered(u64),
}

impl Symbol {
    /// Creates a named symbol.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Creates a numbered symbol.
    ///
    /// # Panics
    ///
    /// Panics if `number` does not fit in 63 bits, as such symbols cannot be
    /// round-tripped through every solver back-end.
    #[must_use]
    pub fn numbered(number: u64) -> Self {
        assert!(number < (1 << 63), "Symbol number {number} does not fit in 63 bits");
        Self::Numbered(number)
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::named(value)
    }
}

impl From<u64> for Symbol {
    fn from(value: u64) -> Self {
        Self::numbered(value)
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{name}"),
            Self::Numbered(number) => write!(f, "#{number}"),
        }
    }
}

/// The unary opcodes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum UnaryOp {
    Not,
    FNeg,
    FIsNaN,
    Trunc,
    ZExt,
    SExt,
    Bitcast,
}

impl UnaryOp {
    fn name(self) -> &'static str {
        match self {
            Self::Not => "not",
            Self::FNeg => "fneg",
            Self::FIsNaN => "fisnan",
            Self::Trunc => "trunc",
            Self::ZExt => "zext",
            Self::SExt => "sext",
            Self::Bitcast => "bitcast",
        }
    }
}

/// The binary opcodes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

impl BinaryOp {
    /// Checks whether the opcode operates on floats.
    #[must_use]
    pub fn is_float(self) -> bool {
        matches!(self, Self::FAdd | Self::FSub | Self::FMul | Self::FDiv | Self::FRem)
    }

    fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::UDiv => "udiv",
            Self::SDiv => "sdiv",
            Self::URem => "urem",
            Self::SRem => "srem",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Shl => "shl",
            Self::LShr => "lshr",
            Self::AShr => "ashr",
            Self::FAdd => "fadd",
            Self::FSub => "fsub",
            Self::FMul => "fmul",
            Self::FDiv => "fdiv",
            Self::FRem => "frem",
        }
    }
}

/// The integer comparison predicates.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ICmpPredicate {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl ICmpPredicate {
    fn name(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Ult => "ult",
            Self::Ule => "ule",
            Self::Ugt => "ugt",
            Self::Uge => "uge",
            Self::Slt => "slt",
            Self::Sle => "sle",
            Self::Sgt => "sgt",
            Self::Sge => "sge",
        }
    }
}

/// The float comparison predicates.
///
/// `Eq` is IEEE equality, which is false when either operand is a NaN and
/// considers the two zeroes equal. `Ne` is its negation, and hence true for
/// NaN operands. The orderings are the ordered comparisons.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FCmpPredicate {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl FCmpPredicate {
    fn name(self) -> &'static str {
        match self {
            Self::Eq => "feq",
            Self::Ne => "fne",
            Self::Lt => "flt",
            Self::Le => "fle",
            Self::Gt => "fgt",
            Self::Ge => "fge",
        }
    }
}

/// The payload of an expression node.
#[derive(Clone, Debug)]
pub enum OpKind {
    /// A constant integer of arbitrary width.
    ConstantInt(IntValue),

    /// A constant IEEE-754 float.
    ConstantFloat(FloatValue),

    /// A symbolic scalar constant.
    Constant(Symbol),

    /// A symbolic array constant of `size` bytes.
    ConstantArray { symbol: Symbol, size: OpRef },

    /// An unspecified value of the node's type.
    Undef,

    /// A unary operation.
    Unary { op: UnaryOp, operand: OpRef },

    /// A binary operation.
    Binary { op: BinaryOp, lhs: OpRef, rhs: OpRef },

    /// An integer comparison, yielding a 1-bit integer.
    ICmp {
        pred: ICmpPredicate,
        lhs: OpRef,
        rhs: OpRef,
    },

    /// A float comparison, yielding a 1-bit integer.
    FCmp {
        pred: FCmpPredicate,
        lhs: OpRef,
        rhs: OpRef,
    },

    /// A ternary choice between two values of the same type.
    Select {
        cond: OpRef,
        true_value: OpRef,
        false_value: OpRef,
    },

    /// An array literal of byte expressions.
    FixedArray { elements: Vec<OpRef> },

    /// An array of `size` bytes, every one of which is `default`.
    AllocArray { size: OpRef, default: OpRef },

    /// A single-byte read of an array at an index.
    Load { array: OpRef, index: OpRef },

    /// A copy of an array with a single byte replaced.
    Store {
        array: OpRef,
        index: OpRef,
        value: OpRef,
    },
}

/// An immutable, typed node of the expression graph.
///
/// Nodes cache a structural hash at construction time, computed from the
/// cached hashes of their children, so hashing and equality never traverse
/// the graph.
#[derive(Clone, Debug)]
pub struct Op {
    hash: u64,
    ty: Type,
    kind: OpKind,
}

impl Op {
    /// Gets the type of the node.
    #[must_use]
    pub fn ty(&self) -> Type {
        self.ty
    }

    /// Gets the payload of the node.
    #[must_use]
    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    /// Gets the constant integer carried by the node, if it is one.
    #[must_use]
    pub fn as_constant_int(&self) -> Option<&IntValue> {
        match &self.kind {
            OpKind::ConstantInt(value) => Some(value),
            _ => None,
        }
    }

    /// Gets the constant float carried by the node, if it is one.
    #[must_use]
    pub fn as_constant_float(&self) -> Option<&FloatValue> {
        match &self.kind {
            OpKind::ConstantFloat(value) => Some(value),
            _ => None,
        }
    }

    /// Checks whether the node is the constant integer `value`.
    #[must_use]
    pub fn is_constant_int(&self, value: u64) -> bool {
        self.as_constant_int()
            .is_some_and(|v| *v == IntValue::from_u64(v.width(), value))
    }
}

impl PartialEq for Op {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.ty == other.ty && kind_eq(&self.kind, &other.kind)
    }
}

impl Eq for Op {}

impl Hash for Op {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// Child nodes are compared by pointer identity. Every child reachable from
/// an interned node is itself interned on the same thread, so pointer
/// equality coincides with structural equality here.
fn kind_eq(a: &OpKind, b: &OpKind) -> bool {
    use OpKind::{
        AllocArray, Binary, Constant, ConstantArray, ConstantFloat, ConstantInt, FCmp, FixedArray,
        ICmp, Load, Select, Store, Unary, Undef,
    };
    match (a, b) {
        (ConstantInt(x), ConstantInt(y)) => x == y,
        (ConstantFloat(x), ConstantFloat(y)) => x == y,
        (Constant(x), Constant(y)) => x == y,
        (
            ConstantArray {
                symbol: xs,
                size: xz,
            },
            ConstantArray {
                symbol: ys,
                size: yz,
            },
        ) => xs == ys && Rc::ptr_eq(xz, yz),
        (Undef, Undef) => true,
        (
            Unary { op: xo, operand: xa },
            Unary { op: yo, operand: ya },
        ) => xo == yo && Rc::ptr_eq(xa, ya),
        (
            Binary {
                op: xo,
                lhs: xl,
                rhs: xr,
            },
            Binary {
                op: yo,
                lhs: yl,
                rhs: yr,
            },
        ) => xo == yo && Rc::ptr_eq(xl, yl) && Rc::ptr_eq(xr, yr),
        (
            ICmp {
                pred: xp,
                lhs: xl,
                rhs: xr,
            },
            ICmp {
                pred: yp,
                lhs: yl,
                rhs: yr,
            },
        ) => xp == yp && Rc::ptr_eq(xl, yl) && Rc::ptr_eq(xr, yr),
        (
            FCmp {
                pred: xp,
                lhs: xl,
                rhs: xr,
            },
            FCmp {
                pred: yp,
                lhs: yl,
                rhs: yr,
            },
        ) => xp == yp && Rc::ptr_eq(xl, yl) && Rc::ptr_eq(xr, yr),
        (
            Select {
                cond: xc,
                true_value: xt,
                false_value: xf,
            },
            Select {
                cond: yc,
                true_value: yt,
                false_value: yf,
            },
        ) => Rc::ptr_eq(xc, yc) && Rc::ptr_eq(xt, yt) && Rc::ptr_eq(xf, yf),
        (FixedArray { elements: xs }, FixedArray { elements: ys }) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| Rc::ptr_eq(x, y))
        }
        (
            AllocArray {
                size: xz,
                default: xd,
            },
            AllocArray {
                size: yz,
                default: yd,
            },
        ) => Rc::ptr_eq(xz, yz) && Rc::ptr_eq(xd, yd),
        (
            Load {
                array: xa,
                index: xi,
            },
            Load {
                array: ya,
                index: yi,
            },
        ) => Rc::ptr_eq(xa, ya) && Rc::ptr_eq(xi, yi),
        (
            Store {
                array: xa,
                index: xi,
                value: xv,
            },
            Store {
                array: ya,
                index: yi,
                value: yv,
            },
        ) => Rc::ptr_eq(xa, ya) && Rc::ptr_eq(xi, yi) && Rc::ptr_eq(xv, yv),
        _ => false,
    }
}

thread_local! {
    /// The intern table for expression nodes.
    ///
    /// Engines are single-threaded, so the thread-local table is the
    /// engine-local table. Entries are weak so that dropping every context
    /// that references an expression also releases the node.
    static INTERN: RefCell<HashMap<u64, Vec<Weak<Op>>>> = RefCell::new(HashMap::new());
}

fn intern(ty: Type, kind: OpKind) -> OpRef {
    let hash = structural_hash(ty, &kind);
    let op = Op { hash, ty, kind };

    INTERN.with(|table| {
        let mut table = table.borrow_mut();
        let bucket = table.entry(hash).or_default();

        // Dead entries are pruned as a side effect of the scan.
        bucket.retain(|weak| weak.strong_count() > 0);
        for weak in bucket.iter() {
            if let Some(existing) = weak.upgrade() {
                if *existing == op {
                    return existing;
                }
            }
        }

        let new = Rc::new(op);
        bucket.push(Rc::downgrade(&new));
        new
    })
}

fn structural_hash(ty: Type, kind: &OpKind) -> u64 {
    use std::collections::hash_map::DefaultHasher;

    let mut state = DefaultHasher::new();
    ty.hash(&mut state);
    std::mem::discriminant(kind).hash(&mut state);
    match kind {
        OpKind::ConstantInt(value) => value.hash(&mut state),
        OpKind::ConstantFloat(value) => value.hash(&mut state),
        OpKind::Constant(symbol) => symbol.hash(&mut state),
        OpKind::ConstantArray { symbol, size } => {
            symbol.hash(&mut state);
            state.write_u64(size.hash);
        }
        OpKind::Undef => {}
        OpKind::Unary { op, operand } => {
            op.hash(&mut state);
            state.write_u64(operand.hash);
        }
        OpKind::Binary { op, lhs, rhs } => {
            op.hash(&mut state);
            state.write_u64(lhs.hash);
            state.write_u64(rhs.hash);
        }
        OpKind::ICmp { pred, lhs, rhs } => {
            pred.hash(&mut state);
            state.write_u64(lhs.hash);
            state.write_u64(rhs.hash);
        }
        OpKind::FCmp { pred, lhs, rhs } => {
            pred.hash(&mut state);
            state.write_u64(lhs.hash);
            state.write_u64(rhs.hash);
        }
        OpKind::Select {
            cond,
            true_value,
            false_value,
        } => {
            state.write_u64(cond.hash);
            state.write_u64(true_value.hash);
            state.write_u64(false_value.hash);
        }
        OpKind::FixedArray { elements } => {
            for element in elements {
                state.write_u64(element.hash);
            }
        }
        OpKind::AllocArray { size, default } => {
            state.write_u64(size.hash);
            state.write_u64(default.hash);
        }
        OpKind::Load { array, index } => {
            state.write_u64(array.hash);
            state.write_u64(index.hash);
        }
        OpKind::Store {
            array,
            index,
            value,
        } => {
            state.write_u64(array.hash);
            state.write_u64(index.hash);
            state.write_u64(value.hash);
        }
    }
    state.finish()
}

impl Op {
    /// Builds a constant integer node.
    #[must_use]
    pub fn constant_int(value: IntValue) -> OpRef {
        intern(Type::int(value.width()), OpKind::ConstantInt(value))
    }

    /// Builds a constant integer node of `width` bits from a `u64`.
    #[must_use]
    pub fn int(width: u32, value: u64) -> OpRef {
        Self::constant_int(IntValue::from_u64(width, value))
    }

    /// Builds the 1-bit integer encoding of a boolean.
    #[must_use]
    pub fn bool(value: bool) -> OpRef {
        Self::constant_int(IntValue::from_bool(value))
    }

    /// Builds a constant float node.
    #[must_use]
    pub fn constant_float(value: FloatValue) -> OpRef {
        intern(value.ty(), OpKind::ConstantFloat(value))
    }

    /// Builds a symbolic scalar constant of the given type.
    ///
    /// # Panics
    ///
    /// Panics if the type is not an integer or float; other types cannot be
    /// solved for.
    #[must_use]
    pub fn symbol(symbol: Symbol, ty: Type) -> OpRef {
        assert!(
            ty.is_int() || ty.is_float(),
            "Cannot make a symbolic constant of type {ty}"
        );
        intern(ty, OpKind::Constant(symbol))
    }

    /// Builds a symbolic array constant of `size` bytes, indexed at the
    /// width of `size`.
    #[must_use]
    pub fn symbol_array(symbol: Symbol, size: OpRef) -> OpRef {
        assert!(size.ty().is_int(), "Array size must be an integer");
        let ty = Type::array(size.ty().bitwidth());
        intern(ty, OpKind::ConstantArray { symbol, size })
    }

    /// Builds an unspecified value of the given type.
    #[must_use]
    pub fn undef(ty: Type) -> OpRef {
        intern(ty, OpKind::Undef)
    }

    /// Builds a bitwise (and, at width 1, logical) complement.
    #[must_use]
    pub fn not(operand: &OpRef) -> OpRef {
        assert!(operand.ty().is_int(), "Complement requires an integer");
        if let Some(value) = operand.as_constant_int() {
            return Self::constant_int(value.not());
        }
        intern(
            operand.ty(),
            OpKind::Unary {
                op: UnaryOp::Not,
                operand: operand.clone(),
            },
        )
    }

    /// Builds a float negation.
    #[must_use]
    pub fn fneg(operand: &OpRef) -> OpRef {
        assert!(operand.ty().is_float(), "Negation requires a float");
        if let Some(value) = operand.as_constant_float() {
            let ty = value.ty();
            let sign = ethnum::U256::ONE
                << (ty.exponent_bits() + ty.significand_bits() - 1);
            return Self::constant_float(FloatValue::from_bits(
                ty.exponent_bits(),
                ty.significand_bits(),
                value.bits() ^ sign,
            ));
        }
        intern(
            operand.ty(),
            OpKind::Unary {
                op: UnaryOp::FNeg,
                operand: operand.clone(),
            },
        )
    }

    /// Builds a NaN test on a float, yielding a boolean.
    #[must_use]
    pub fn fis_nan(operand: &OpRef) -> OpRef {
        assert!(operand.ty().is_float(), "NaN test requires a float");
        if let Some(value) = operand.as_constant_float() {
            return Self::bool(value.is_nan());
        }
        intern(
            Type::bool(),
            OpKind::Unary {
                op: UnaryOp::FIsNaN,
                operand: operand.clone(),
            },
        )
    }

    /// Builds a truncation of an integer to a strictly narrower width.
    #[must_use]
    pub fn trunc(operand: &OpRef, width: u32) -> OpRef {
        if let Some(value) = operand.as_constant_int() {
            return Self::constant_int(value.trunc(width));
        }
        assert!(
            width < operand.ty().bitwidth(),
            "Truncation must narrow the value"
        );
        intern(
            Type::int(width),
            OpKind::Unary {
                op: UnaryOp::Trunc,
                operand: operand.clone(),
            },
        )
    }

    /// Builds a zero extension of an integer to a strictly wider width.
    #[must_use]
    pub fn zext(operand: &OpRef, width: u32) -> OpRef {
        if let Some(value) = operand.as_constant_int() {
            return Self::constant_int(value.zext(width));
        }
        assert!(
            width > operand.ty().bitwidth(),
            "Zero extension must widen the value"
        );
        intern(
            Type::int(width),
            OpKind::Unary {
                op: UnaryOp::ZExt,
                operand: operand.clone(),
            },
        )
    }

    /// Builds a sign extension of an integer to a strictly wider width.
    #[must_use]
    pub fn sext(operand: &OpRef, width: u32) -> OpRef {
        if let Some(value) = operand.as_constant_int() {
            return Self::constant_int(value.sext(width));
        }
        assert!(
            width > operand.ty().bitwidth(),
            "Sign extension must widen the value"
        );
        intern(
            Type::int(width),
            OpKind::Unary {
                op: UnaryOp::SExt,
                operand: operand.clone(),
            },
        )
    }

    /// Builds a reinterpretation of a value as another type of the same bit
    /// width.
    ///
    /// # Panics
    ///
    /// Panics if the source and target are not both scalars of equal total
    /// width.
    #[must_use]
    pub fn bitcast(operand: &OpRef, ty: Type) -> OpRef {
        let from = operand.ty();
        if from == ty {
            return operand.clone();
        }

        let width_of = |t: Type| match t {
            Type::Int { width } => width,
            Type::Float { ebits, sbits } => ebits + sbits,
            _ => panic!("Cannot bitcast type {t}"),
        };
        assert_eq!(width_of(from), width_of(ty), "Bitcast must preserve width");

        match (&operand.kind, ty) {
            (OpKind::ConstantInt(value), Type::Float { ebits, sbits }) => {
                return Self::constant_float(FloatValue::from_bits(ebits, sbits, value.bits()));
            }
            (OpKind::ConstantFloat(value), Type::Int { width }) => {
                return Self::constant_int(IntValue::new(width, value.bits()));
            }
            _ => {}
        }

        intern(
            ty,
            OpKind::Unary {
                op: UnaryOp::Bitcast,
                operand: operand.clone(),
            },
        )
    }

    /// Builds a binary operation.
    ///
    /// Integer operations on two constants fold immediately with
    /// two's-complement wrap semantics at the operand width, except that a
    /// division or remainder by constant zero is left symbolic (the
    /// interpreter raises the failure before the expression matters).
    ///
    /// # Panics
    ///
    /// Panics on mismatched operand types; building such a node is a
    /// programmer bug.
    #[must_use]
    pub fn binary(op: BinaryOp, lhs: &OpRef, rhs: &OpRef) -> OpRef {
        assert_eq!(lhs.ty(), rhs.ty(), "Mismatched operand types for {}", op.name());
        if op.is_float() {
            assert!(lhs.ty().is_float(), "Opcode {} requires floats", op.name());
        } else {
            assert!(lhs.ty().is_int(), "Opcode {} requires integers", op.name());
        }

        if let (Some(l), Some(r)) = (lhs.as_constant_int(), rhs.as_constant_int()) {
            let folded = match op {
                BinaryOp::Add => Some(l.add(r)),
                BinaryOp::Sub => Some(l.sub(r)),
                BinaryOp::Mul => Some(l.mul(r)),
                BinaryOp::UDiv if !r.is_zero() => Some(l.udiv(r)),
                BinaryOp::SDiv if !r.is_zero() && !(l.is_signed_min() && r.is_all_ones()) => {
                    Some(l.sdiv(r))
                }
                BinaryOp::URem if !r.is_zero() => Some(l.urem(r)),
                BinaryOp::SRem if !r.is_zero() => Some(l.srem(r)),
                BinaryOp::And => Some(l.and(r)),
                BinaryOp::Or => Some(l.or(r)),
                BinaryOp::Xor => Some(l.xor(r)),
                BinaryOp::Shl => Some(l.shl(r)),
                BinaryOp::LShr => Some(l.lshr(r)),
                BinaryOp::AShr => Some(l.ashr(r)),
                _ => None,
            };
            if let Some(value) = folded {
                return Self::constant_int(value);
            }
        }

        intern(
            lhs.ty(),
            OpKind::Binary {
                op,
                lhs: lhs.clone(),
                rhs: rhs.clone(),
            },
        )
    }

    /// Builds an addition; see [`Self::binary`].
    #[must_use]
    pub fn add(lhs: &OpRef, rhs: &OpRef) -> OpRef {
        Self::binary(BinaryOp::Add, lhs, rhs)
    }

    /// Builds a subtraction; see [`Self::binary`].
    #[must_use]
    pub fn sub(lhs: &OpRef, rhs: &OpRef) -> OpRef {
        Self::binary(BinaryOp::Sub, lhs, rhs)
    }

    /// Builds a multiplication; see [`Self::binary`].
    #[must_use]
    pub fn mul(lhs: &OpRef, rhs: &OpRef) -> OpRef {
        Self::binary(BinaryOp::Mul, lhs, rhs)
    }

    /// Builds a bitwise conjunction; see [`Self::binary`].
    #[must_use]
    pub fn and(lhs: &OpRef, rhs: &OpRef) -> OpRef {
        Self::binary(BinaryOp::And, lhs, rhs)
    }

    /// Builds a bitwise disjunction; see [`Self::binary`].
    #[must_use]
    pub fn or(lhs: &OpRef, rhs: &OpRef) -> OpRef {
        Self::binary(BinaryOp::Or, lhs, rhs)
    }

    /// Builds an integer comparison, folding when both operands are
    /// constants.
    ///
    /// # Panics
    ///
    /// Panics on mismatched operand widths.
    #[must_use]
    pub fn icmp(pred: ICmpPredicate, lhs: &OpRef, rhs: &OpRef) -> OpRef {
        assert_eq!(lhs.ty(), rhs.ty(), "Mismatched operand types for {}", pred.name());
        assert!(lhs.ty().is_int(), "Comparison {} requires integers", pred.name());

        if let (Some(l), Some(r)) = (lhs.as_constant_int(), rhs.as_constant_int()) {
            return Self::bool(l.compare(pred, r));
        }

        intern(
            Type::bool(),
            OpKind::ICmp {
                pred,
                lhs: lhs.clone(),
                rhs: rhs.clone(),
            },
        )
    }

    /// Builds a float comparison, folding when both operands are constants
    /// of a shape with native support.
    ///
    /// # Panics
    ///
    /// Panics on mismatched operand types.
    #[must_use]
    pub fn fcmp(pred: FCmpPredicate, lhs: &OpRef, rhs: &OpRef) -> OpRef {
        assert_eq!(lhs.ty(), rhs.ty(), "Mismatched operand types for {}", pred.name());
        assert!(lhs.ty().is_float(), "Comparison {} requires floats", pred.name());

        if let (Some(l), Some(r)) = (lhs.as_constant_float(), rhs.as_constant_float()) {
            let folded = match (l.to_f64(), r.to_f64()) {
                (Some(a), Some(b)) => Some(fold_fcmp(pred, a, b)),
                _ => match (l.to_f32(), r.to_f32()) {
                    (Some(a), Some(b)) => Some(fold_fcmp(pred, f64::from(a), f64::from(b))),
                    _ => None,
                },
            };
            if let Some(value) = folded {
                return Self::bool(value);
            }
        }

        intern(
            Type::bool(),
            OpKind::FCmp {
                pred,
                lhs: lhs.clone(),
                rhs: rhs.clone(),
            },
        )
    }

    /// Builds a selection between two values of the same type, folding when
    /// the condition is constant.
    ///
    /// # Panics
    ///
    /// Panics if the condition is not a boolean or the arms disagree on
    /// type.
    #[must_use]
    pub fn select(cond: &OpRef, true_value: &OpRef, false_value: &OpRef) -> OpRef {
        assert!(cond.ty().is_bool(), "Selection condition must be a boolean");
        assert_eq!(
            true_value.ty(),
            false_value.ty(),
            "Selection arms disagree on type"
        );

        if let Some(value) = cond.as_constant_int() {
            return if value.is_zero() {
                false_value.clone()
            } else {
                true_value.clone()
            };
        }

        intern(
            true_value.ty(),
            OpKind::Select {
                cond: cond.clone(),
                true_value: true_value.clone(),
                false_value: false_value.clone(),
            },
        )
    }

    /// Builds an array literal from byte expressions, indexed at
    /// `index_width` bits.
    ///
    /// # Panics
    ///
    /// Panics if any element is not a byte.
    #[must_use]
    pub fn fixed_array(index_width: u32, elements: Vec<OpRef>) -> OpRef {
        assert!(
            elements.iter().all(|e| e.ty() == Type::int(8)),
            "Array elements must be bytes"
        );
        intern(Type::array(index_width), OpKind::FixedArray { elements })
    }

    /// Builds an array of `size` bytes where every byte is `default`.
    ///
    /// # Panics
    ///
    /// Panics if the default is not a byte or the size is not an integer.
    #[must_use]
    pub fn alloc_array(size: &OpRef, default: &OpRef) -> OpRef {
        assert!(size.ty().is_int(), "Array size must be an integer");
        assert_eq!(default.ty(), Type::int(8), "Array default must be a byte");
        intern(
            Type::array(size.ty().bitwidth()),
            OpKind::AllocArray {
                size: size.clone(),
                default: default.clone(),
            },
        )
    }

    /// Builds a single-byte read of `array` at `index`.
    ///
    /// A read that directly matches the most recent write to the same index
    /// folds to the written byte; reads with constant indices skip over
    /// writes to other constant indices.
    ///
    /// # Panics
    ///
    /// Panics if the index width disagrees with the array's index type.
    #[must_use]
    pub fn load(array: &OpRef, index: &OpRef) -> OpRef {
        assert!(array.ty().is_array(), "Load requires an array");
        assert_eq!(
            index.ty(),
            Type::int(array.ty().bitwidth()),
            "Load index width disagrees with the array"
        );

        let mut current = array;
        loop {
            match &current.kind {
                OpKind::Store {
                    array: inner,
                    index: written,
                    value,
                } => {
                    if Rc::ptr_eq(written, index) {
                        return value.clone();
                    }
                    match (written.as_constant_int(), index.as_constant_int()) {
                        (Some(a), Some(b)) if a != b => current = inner,
                        _ => break,
                    }
                }
                OpKind::AllocArray { default, .. } => return default.clone(),
                _ => break,
            }
        }

        intern(
            Type::int(8),
            OpKind::Load {
                array: array.clone(),
                index: index.clone(),
            },
        )
    }

    /// Builds a copy of `array` in which the byte at `index` is `value`.
    ///
    /// # Panics
    ///
    /// Panics if the value is not a byte or the index width disagrees with
    /// the array's index type.
    #[must_use]
    pub fn store(array: &OpRef, index: &OpRef, value: &OpRef) -> OpRef {
        assert!(array.ty().is_array(), "Store requires an array");
        assert_eq!(
            index.ty(),
            Type::int(array.ty().bitwidth()),
            "Store index width disagrees with the array"
        );
        assert_eq!(value.ty(), Type::int(8), "Stored value must be a byte");

        intern(
            array.ty(),
            OpKind::Store {
                array: array.clone(),
                index: index.clone(),
                value: value.clone(),
            },
        )
    }
}

fn fold_fcmp(pred: FCmpPredicate, a: f64, b: f64) -> bool {
    match pred {
        FCmpPredicate::Eq => a == b,
        FCmpPredicate::Ne => a != b || a.is_nan() || b.is_nan(),
        FCmpPredicate::Lt => a < b,
        FCmpPredicate::Le => a <= b,
        FCmpPredicate::Gt => a > b,
        FCmpPredicate::Ge => a >= b,
    }
}

/// Renders the expression as an s-expression, mainly for diagnostics and
/// failure records.
impl Display for Op {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            OpKind::ConstantInt(value) => write!(f, "{value}"),
            OpKind::ConstantFloat(value) => write!(f, "{value}"),
            OpKind::Constant(symbol) => write!(f, "${symbol}"),
            OpKind::ConstantArray { symbol, size } => write!(f, "(array ${symbol} {size})"),
            OpKind::Undef => write!(f, "undef:{}", self.ty),
            OpKind::Unary { op, operand } => write!(f, "({} {operand})", op.name()),
            OpKind::Binary { op, lhs, rhs } => write!(f, "({} {lhs} {rhs})", op.name()),
            OpKind::ICmp { pred, lhs, rhs } => write!(f, "({} {lhs} {rhs})", pred.name()),
            OpKind::FCmp { pred, lhs, rhs } => write!(f, "({} {lhs} {rhs})", pred.name()),
            OpKind::Select {
                cond,
                true_value,
                false_value,
            } => write!(f, "(select {cond} {true_value} {false_value})"),
            OpKind::FixedArray { elements } => {
                write!(f, "(bytes")?;
                for element in elements {
                    write!(f, " {element}")?;
                }
                write!(f, ")")
            }
            OpKind::AllocArray { size, default } => write!(f, "(alloc {size} {default})"),
            OpKind::Load { array, index } => write!(f, "(load {array} {index})"),
            OpKind::Store {
                array,
                index,
                value,
            } => write!(f, "(store {array} {index} {value})"),
        }
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use crate::ir::{
        types::Type,
        value::IntValue,
        BinaryOp,
        ICmpPredicate,
        Op,
        Symbol,
    };

    #[test]
    fn structurally_equal_expressions_are_reference_equal() {
        let x = Op::symbol(Symbol::named("x"), Type::int(32));
        let a = Op::add(&x, &Op::int(32, 7));
        let b = Op::add(&x, &Op::int(32, 7));
        assert!(Rc::ptr_eq(&a, &b));

        let c = Op::add(&x, &Op::int(32, 8));
        assert!(!Rc::ptr_eq(&a, &c));
    }

    #[test]
    fn constant_arithmetic_folds_with_wrap_semantics() {
        let a = Op::int(8, 250);
        let b = Op::int(8, 10);
        let sum = Op::add(&a, &b);
        assert_eq!(sum.as_constant_int(), Some(&IntValue::from_u64(8, 4)));
    }

    #[test]
    fn division_by_constant_zero_stays_symbolic() {
        let a = Op::int(32, 10);
        let z = Op::int(32, 0);
        let div = Op::binary(BinaryOp::UDiv, &a, &z);
        assert!(div.as_constant_int().is_none());
    }

    #[test]
    fn comparisons_fold_per_signedness() {
        let minus_one = Op::constant_int(IntValue::from_u64(32, 0xffff_ffff));
        let one = Op::int(32, 1);
        assert!(Op::icmp(ICmpPredicate::Slt, &minus_one, &one).is_constant_int(1));
        assert!(Op::icmp(ICmpPredicate::Ult, &minus_one, &one).is_constant_int(0));
    }

    #[test]
    fn select_folds_on_constant_condition() {
        let t = Op::int(32, 1);
        let f = Op::int(32, 2);
        assert!(Rc::ptr_eq(&Op::select(&Op::bool(true), &t, &f), &t));
        assert!(Rc::ptr_eq(&Op::select(&Op::bool(false), &t, &f), &f));
    }

    #[test]
    fn load_of_matching_store_folds_to_the_written_byte() {
        let size = Op::int(64, 16);
        let array = Op::symbol_array(Symbol::named("mem"), size);
        let index = Op::symbol(Symbol::named("i"), Type::int(64));
        let byte = Op::int(8, 0x2a);

        let written = Op::store(&array, &index, &byte);
        let read = Op::load(&written, &index);
        assert!(Rc::ptr_eq(&read, &byte));
    }

    #[test]
    fn load_skips_stores_at_distinct_constant_indices() {
        let size = Op::int(64, 16);
        let array = Op::symbol_array(Symbol::named("mem"), size);
        let byte_a = Op::int(8, 0xaa);
        let byte_b = Op::int(8, 0xbb);

        let written = Op::store(&array, &Op::int(64, 0), &byte_a);
        let written = Op::store(&written, &Op::int(64, 1), &byte_b);
        let read = Op::load(&written, &Op::int(64, 0));
        assert!(Rc::ptr_eq(&read, &byte_a));
    }

    #[test]
    fn load_from_constant_array_folds_to_the_default() {
        let zero = Op::int(8, 0);
        let array = Op::alloc_array(&Op::int(64, 32), &zero);
        let index = Op::symbol(Symbol::named("i"), Type::int(64));
        assert!(Rc::ptr_eq(&Op::load(&array, &index), &zero));
    }

    #[test]
    fn casts_fold_on_constants() {
        let v = Op::int(8, 0x80);
        assert!(Op::zext(&v, 16).is_constant_int(0x80));
        assert!(Op::sext(&v, 16).is_constant_int(0xff80));
        assert!(Op::trunc(&Op::int(16, 0x1ff), 8).is_constant_int(0xff));
    }
}
