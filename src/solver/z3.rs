//! This module contains the default solver back-end, built on the `z3`
//! crate.
//!
//! # Encoding
//!
//! Integers become bit-vectors of their IR width. Boolean-valued
//! subexpressions are kept as native booleans wherever possible and
//! normalized to 1-bit vectors only on demand, which keeps the common
//! control-flow assertions in the solver's boolean core. Floats become
//! floating-point sorts, and arrays become `Array(BV(index_width), BV(8))`
//! so memory stays byte-granular.
//!
//! Constants wider than 64 bits are assembled from 64-bit limbs by
//! concatenation, avoiding any lossy trip through the native integer API.
//! Symbolic constants are memoized per name so that two references to the
//! same [`Symbol`] are the same solver constant.
//!
//! Float arithmetic is translated under an explicit round-nearest-even
//! rounding-mode term, the rounding mode of the execution semantics. The
//! rounding-mode term and the floating-point operations the wrapper crate
//! does not surface (`fp.rem` and the IEEE-754 bit conversions behind
//! bitcasts) are minted once per float shape from parsed SMT-LIB templates
//! and instantiated per use by substitution.
//!
//! # Model readback
//!
//! Numerals are read back by parsing their SMT-LIB rendering, which is the
//! one extraction surface guaranteed for every sort. NaN values lose their
//! sign and payload in that trip; they are normalized to the canonical
//! quiet NaN (positive sign, all-ones exponent, non-zero significand).

use std::collections::HashMap;

use ethnum::U256;
use z3::{
    ast::{Array, Ast, Bool, Dynamic, Float, BV},
    Config,
    Context,
    Params,
    SatResult,
    Sort,
};

use crate::{
    constant::DEFAULT_SOLVER_TIMEOUT_MS,
    ir::{
        assertion::{Assertion, AssertionList},
        types::Type,
        value::{FloatValue, IntValue, Value},
        BinaryOp,
        FCmpPredicate,
        ICmpPredicate,
        Op,
        OpKind,
        OpRef,
        Symbol,
        UnaryOp,
    },
    solver::{Model, Solver, SolverResult},
};

/// The default SMT back-end.
///
/// A fresh `z3` context and solver are created for every [`Solver::resolve`]
/// call, so no solver-internal state survives between top-level queries.
#[derive(Clone, Debug)]
pub struct Z3Solver {
    timeout_ms: u32,
}

impl Z3Solver {
    /// Constructs a back-end with the default query timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout_ms: DEFAULT_SOLVER_TIMEOUT_MS,
        }
    }

    /// Sets the per-query timeout in milliseconds.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Wraps the back-end into the shared solver handle the interpreter
    /// takes.
    #[must_use]
    pub fn into_shared(self) -> crate::solver::SharedSolver {
        std::rc::Rc::new(self)
    }
}

impl Default for Z3Solver {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver for Z3Solver {
    fn resolve(&self, assertions: &mut AssertionList, extra: &Assertion) -> SolverResult {
        if extra.is_constant_value(false) {
            return SolverResult::unsat();
        }

        let config = Config::new();
        let context = Context::new(&config);
        let solver = z3::Solver::new(&context);

        let mut params = Params::new(&context);
        params.set_u32("timeout", self.timeout_ms);
        solver.set_params(&params);

        let mut translator = Translator::new(&context, &solver);
        for assertion in assertions.iter() {
            let term = translator.visit_bool(assertion.value());
            solver.assert(&term);
        }
        if !extra.is_constant_value(true) {
            let term = translator.visit_bool(extra.value());
            solver.assert(&term);
        }

        let outcome = solver.check();
        tracing::debug!(
            assertions = assertions.len(),
            outcome = ?outcome,
            "Solver query"
        );

        match outcome {
            SatResult::Sat => {
                let Some(z3_model) = solver.get_model() else {
                    return SolverResult::unknown();
                };
                let model = translator.extract_model(&z3_model);
                SolverResult::sat(Box::new(model))
            }
            SatResult::Unsat => SolverResult::unsat(),
            SatResult::Unknown => SolverResult::unknown(),
        }
    }
}

/// A symbolic constant tracked during translation, remembered so that the
/// model extraction can walk every constant that appeared in the query.
enum TrackedConst<'ctx> {
    BitVec { term: BV<'ctx>, width: u32 },
    Float {
        term: Float<'ctx>,
        ebits: u32,
        sbits: u32,
    },
    ByteArray {
        term: Array<'ctx>,
        index_width: u32,
        size: Option<usize>,
    },
}

/// A term in one of the sorts the translation produces.
#[derive(Clone)]
enum Term<'ctx> {
    Bool(Bool<'ctx>),
    BitVec(BV<'ctx>),
    Float(Float<'ctx>),
    Array(Array<'ctx>),
}

impl<'ctx> Term<'ctx> {
    /// Normalizes the term to a bit-vector; booleans become 1-bit vectors.
    fn into_bv(self, context: &'ctx Context) -> BV<'ctx> {
        match self {
            Self::BitVec(bv) => bv,
            Self::Bool(b) => b.ite(&BV::from_u64(context, 1, 1), &BV::from_u64(context, 0, 1)),
            _ => panic!("Expected a bit-vector term"),
        }
    }

    /// Normalizes the term to a boolean; 1-bit vectors become booleans.
    fn into_bool(self, context: &'ctx Context) -> Bool<'ctx> {
        match self {
            Self::Bool(b) => b,
            Self::BitVec(bv) => {
                assert_eq!(bv.get_size(), 1, "Only 1-bit vectors can become booleans");
                bv._eq(&BV::from_u64(context, 1, 1))
            }
            _ => panic!("Expected a boolean term"),
        }
    }

    fn into_float(self) -> Float<'ctx> {
        match self {
            Self::Float(f) => f,
            _ => panic!("Expected a float term"),
        }
    }

    fn into_array(self) -> Array<'ctx> {
        match self {
            Self::Array(a) => a,
            _ => panic!("Expected an array term"),
        }
    }
}

/// The IEEE remainder applied to placeholder floats, instantiated per use
/// by substitution.
struct RemTemplate<'ctx> {
    term: Float<'ctx>,
    a: Float<'ctx>,
    b: Float<'ctx>,
}

/// The float-to-interchange-bits projection applied to a placeholder.
struct ToBitsTemplate<'ctx> {
    term: BV<'ctx>,
    a: Float<'ctx>,
}

/// The interchange-bits-to-float reassembly applied to a placeholder.
struct FromBitsTemplate<'ctx> {
    term: Float<'ctx>,
    bits: BV<'ctx>,
}

/// The expression-to-Z3 translation pass for a single query.
struct Translator<'ctx> {
    context: &'ctx Context,
    solver: &'ctx z3::Solver<'ctx>,
    consts: HashMap<Symbol, TrackedConst<'ctx>>,
    cache: HashMap<*const Op, Term<'ctx>>,
    next_fresh: u32,
    rne: Option<Float<'ctx>>,
    rem_templates: HashMap<(u32, u32), RemTemplate<'ctx>>,
    to_bits_templates: HashMap<(u32, u32), ToBitsTemplate<'ctx>>,
    from_bits_templates: HashMap<(u32, u32), FromBitsTemplate<'ctx>>,
}

impl<'ctx> Translator<'ctx> {
    fn new(context: &'ctx Context, solver: &'ctx z3::Solver<'ctx>) -> Self {
        Self {
            context,
            solver,
            consts: HashMap::new(),
            cache: HashMap::new(),
            next_fresh: 0,
            rne: None,
            rem_templates: HashMap::new(),
            to_bits_templates: HashMap::new(),
            from_bits_templates: HashMap::new(),
        }
    }

    fn visit_bool(&mut self, op: &OpRef) -> Bool<'ctx> {
        self.visit(op).into_bool(self.context)
    }

    fn visit_bv(&mut self, op: &OpRef) -> BV<'ctx> {
        self.visit(op).into_bv(self.context)
    }

    /// Translates an expression, memoized by node identity to keep shared
    /// subgraphs from exploding combinatorially.
    fn visit(&mut self, op: &OpRef) -> Term<'ctx> {
        let key = std::rc::Rc::as_ptr(op);
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }

        let term = self.visit_uncached(op);
        self.cache.insert(key, term.clone());
        term
    }

    #[allow(clippy::too_many_lines)] // One arm per opcode.
    fn visit_uncached(&mut self, op: &OpRef) -> Term<'ctx> {
        match op.kind() {
            OpKind::ConstantInt(value) => Term::BitVec(bv_from_int(self.context, value)),
            OpKind::ConstantFloat(value) => Term::Float(self.float_constant(value)),
            OpKind::Constant(symbol) => self.symbolic_constant(symbol, op.ty()),
            OpKind::ConstantArray { symbol, size } => {
                self.symbolic_array(symbol, size, op.ty().bitwidth())
            }
            OpKind::Undef => match op.ty() {
                Type::Int { width } => Term::BitVec(BV::from_u64(self.context, 0, width)),
                Type::Float { ebits, sbits } => {
                    let zero = BV::from_u64(self.context, 0, ebits + sbits);
                    Term::Float(self.fp_from_ieee_bits(&zero, ebits, sbits))
                }
                ty => panic!("Unsupported undef type {ty}"),
            },
            OpKind::Unary { op: unary, operand } => self.visit_unary(*unary, operand, op.ty()),
            OpKind::Binary { op: binary, lhs, rhs } => self.visit_binary(*binary, lhs, rhs),
            OpKind::ICmp { pred, lhs, rhs } => {
                let l = self.visit_bv(lhs);
                let r = self.visit_bv(rhs);
                let result = match pred {
                    ICmpPredicate::Eq => l._eq(&r),
                    ICmpPredicate::Ne => l._eq(&r).not(),
                    ICmpPredicate::Ult => l.bvult(&r),
                    ICmpPredicate::Ule => l.bvule(&r),
                    ICmpPredicate::Ugt => l.bvugt(&r),
                    ICmpPredicate::Uge => l.bvuge(&r),
                    ICmpPredicate::Slt => l.bvslt(&r),
                    ICmpPredicate::Sle => l.bvsle(&r),
                    ICmpPredicate::Sgt => l.bvsgt(&r),
                    ICmpPredicate::Sge => l.bvsge(&r),
                };
                Term::Bool(result)
            }
            OpKind::FCmp { pred, lhs, rhs } => {
                let l = self.visit(lhs).into_float();
                let r = self.visit(rhs).into_float();
                // IEEE equality is emulated as `le && ge`, which agrees with
                // `fp.eq` on every input including NaNs and signed zeroes.
                let result = match pred {
                    FCmpPredicate::Eq => fp_eq(self.context, &l, &r),
                    FCmpPredicate::Ne => fp_eq(self.context, &l, &r).not(),
                    FCmpPredicate::Lt => l.lt(&r),
                    FCmpPredicate::Le => l.le(&r),
                    FCmpPredicate::Gt => l.gt(&r),
                    FCmpPredicate::Ge => l.ge(&r),
                };
                Term::Bool(result)
            }
            OpKind::Select {
                cond,
                true_value,
                false_value,
            } => {
                let cond = self.visit_bool(cond);
                match (self.visit(true_value), self.visit(false_value)) {
                    (Term::Float(t), Term::Float(f)) => Term::Float(cond.ite(&t, &f)),
                    (Term::Array(t), Term::Array(f)) => Term::Array(cond.ite(&t, &f)),
                    (t, f) => Term::BitVec(cond.ite(
                        &t.into_bv(self.context),
                        &f.into_bv(self.context),
                    )),
                }
            }
            OpKind::FixedArray { elements } => {
                let index_width = op.ty().bitwidth();
                let array = self.fresh_array(index_width);
                for (i, element) in elements.iter().enumerate() {
                    let index = BV::from_u64(self.context, i as u64, index_width);
                    let byte = self.visit_bv(element);
                    let selected = array.select(&index).as_bv().expect("Byte-sorted array");
                    self.solver.assert(&selected._eq(&byte));
                }
                Term::Array(array)
            }
            OpKind::AllocArray { size, default } => {
                let index_width = size.ty().bitwidth();
                let domain = Sort::bitvector(self.context, index_width);
                let default = self.visit_bv(default);
                Term::Array(Array::const_array(self.context, &domain, &default))
            }
            OpKind::Load { array, index } => {
                let array = self.visit(array).into_array();
                let index = self.visit_bv(index);
                Term::BitVec(array.select(&index).as_bv().expect("Byte-sorted array"))
            }
            OpKind::Store {
                array,
                index,
                value,
            } => {
                let array = self.visit(array).into_array();
                let index = self.visit_bv(index);
                let value = self.visit_bv(value);
                Term::Array(array.store(&index, &value))
            }
        }
    }

    fn visit_unary(&mut self, unary: UnaryOp, operand: &OpRef, result_ty: Type) -> Term<'ctx> {
        match unary {
            UnaryOp::Not => match self.visit(operand) {
                Term::Bool(b) => Term::Bool(b.not()),
                term => Term::BitVec(term.into_bv(self.context).bvnot()),
            },
            UnaryOp::FNeg => Term::Float(self.visit(operand).into_float().unary_neg()),
            UnaryOp::FIsNaN => {
                let f = self.visit(operand).into_float();
                // `x <= x` holds exactly when x is not a NaN.
                Term::Bool(f.le(&f).not())
            }
            UnaryOp::Trunc => {
                let bv = self.visit_bv(operand);
                Term::BitVec(bv.extract(result_ty.bitwidth() - 1, 0))
            }
            UnaryOp::ZExt => {
                let bv = self.visit_bv(operand);
                let extra = result_ty.bitwidth() - bv.get_size();
                Term::BitVec(bv.zero_ext(extra))
            }
            UnaryOp::SExt => {
                let bv = self.visit_bv(operand);
                let extra = result_ty.bitwidth() - bv.get_size();
                Term::BitVec(bv.sign_ext(extra))
            }
            UnaryOp::Bitcast => match (operand.ty(), result_ty) {
                (Type::Float { ebits, sbits }, Type::Int { .. }) => {
                    let float = self.visit(operand).into_float();
                    Term::BitVec(self.fp_to_ieee_bits(&float, ebits, sbits))
                }
                (Type::Int { .. }, Type::Float { ebits, sbits }) => {
                    let bits = self.visit_bv(operand);
                    Term::Float(self.fp_from_ieee_bits(&bits, ebits, sbits))
                }
                // The builders only construct int<->float bitcast nodes.
                (from, to) => unreachable!("No bitcast is built between {from} and {to}"),
            },
        }
    }

    fn visit_binary(&mut self, binary: BinaryOp, lhs: &OpRef, rhs: &OpRef) -> Term<'ctx> {
        if binary.is_float() {
            let shape = lhs.ty();
            let l = self.visit(lhs).into_float();
            let r = self.visit(rhs).into_float();
            let result = match binary {
                BinaryOp::FAdd => self.rne().add(&l, &r),
                BinaryOp::FSub => self.rne().sub(&l, &r),
                BinaryOp::FMul => self.rne().mul(&l, &r),
                BinaryOp::FDiv => self.rne().div(&l, &r),
                // The IEEE remainder is exact and takes no rounding mode.
                BinaryOp::FRem => {
                    self.fp_rem(&l, &r, shape.exponent_bits(), shape.significand_bits())
                }
                _ => unreachable!("Float opcode handled above"),
            };
            return Term::Float(result);
        }

        // Conjunction and disjunction of boolean terms stay boolean so the
        // path condition lands in the solver's boolean core.
        if matches!(binary, BinaryOp::And | BinaryOp::Or) {
            let l = self.visit(lhs);
            let r = self.visit(rhs);
            if let (Term::Bool(lb), Term::Bool(rb)) = (&l, &r) {
                let result = match binary {
                    BinaryOp::And => Bool::and(self.context, &[lb, rb]),
                    BinaryOp::Or => Bool::or(self.context, &[lb, rb]),
                    _ => unreachable!(),
                };
                return Term::Bool(result);
            }
            let l = l.into_bv(self.context);
            let r = r.into_bv(self.context);
            let result = match binary {
                BinaryOp::And => l.bvand(&r),
                BinaryOp::Or => l.bvor(&r),
                _ => unreachable!(),
            };
            return Term::BitVec(result);
        }

        let l = self.visit_bv(lhs);
        let r = self.visit_bv(rhs);
        let result = match binary {
            BinaryOp::Add => l.bvadd(&r),
            BinaryOp::Sub => l.bvsub(&r),
            BinaryOp::Mul => l.bvmul(&r),
            BinaryOp::UDiv => l.bvudiv(&r),
            BinaryOp::SDiv => l.bvsdiv(&r),
            BinaryOp::URem => l.bvurem(&r),
            BinaryOp::SRem => l.bvsrem(&r),
            BinaryOp::Xor => l.bvxor(&r),
            BinaryOp::Shl => l.bvshl(&r),
            BinaryOp::LShr => l.bvlshr(&r),
            BinaryOp::AShr => l.bvashr(&r),
            _ => unreachable!("Opcode handled above"),
        };
        Term::BitVec(result)
    }

    fn float_constant(&mut self, value: &FloatValue) -> Float<'ctx> {
        if let Some(v) = value.to_f32() {
            Float::from_f32(self.context, v)
        } else if let Some(v) = value.to_f64() {
            Float::from_f64(self.context, v)
        } else {
            // Constants of other shapes enter through their interchange
            // bits.
            let ebits = value.exponent_bits();
            let sbits = value.significand_bits();
            let raw = IntValue::new(ebits + sbits, value.bits());
            let bits = bv_from_int(self.context, &raw);
            self.fp_from_ieee_bits(&bits, ebits, sbits)
        }
    }

    fn symbolic_constant(&mut self, symbol: &Symbol, ty: Type) -> Term<'ctx> {
        if let Some(existing) = self.consts.get(symbol) {
            return match existing {
                TrackedConst::BitVec { term, .. } => Term::BitVec(term.clone()),
                TrackedConst::Float { term, .. } => Term::Float(term.clone()),
                TrackedConst::ByteArray { term, .. } => Term::Array(term.clone()),
            };
        }

        let name = z3_symbol(self.context, symbol);
        match ty {
            Type::Int { width } => {
                let term = BV::new_const(self.context, name, width);
                self.consts.insert(
                    symbol.clone(),
                    TrackedConst::BitVec {
                        term: term.clone(),
                        width,
                    },
                );
                Term::BitVec(term)
            }
            Type::Float { ebits, sbits } => {
                let term = Float::new_const(self.context, name, ebits, sbits);
                self.consts.insert(
                    symbol.clone(),
                    TrackedConst::Float {
                        term: term.clone(),
                        ebits,
                        sbits,
                    },
                );
                Term::Float(term)
            }
            ty => panic!("Cannot make a symbolic constant of type {ty}"),
        }
    }

    fn symbolic_array(&mut self, symbol: &Symbol, size: &OpRef, index_width: u32) -> Term<'ctx> {
        if let Some(TrackedConst::ByteArray { term, .. }) = self.consts.get(symbol) {
            return Term::Array(term.clone());
        }

        let domain = Sort::bitvector(self.context, index_width);
        let range = Sort::bitvector(self.context, 8);
        let name = z3_symbol(self.context, symbol);
        let term = Array::new_const(self.context, name, &domain, &range);

        let size = size
            .as_constant_int()
            .map(|v| v.as_u64() as usize)
            .filter(|v| *v <= super::MAX_EVAL_ARRAY_BYTES);
        self.consts.insert(
            symbol.clone(),
            TrackedConst::ByteArray {
                term: term.clone(),
                index_width,
                size,
            },
        );
        Term::Array(term)
    }

    fn fresh_array(&mut self, index_width: u32) -> Array<'ctx> {
        let domain = Sort::bitvector(self.context, index_width);
        let range = Sort::bitvector(self.context, 8);
        let name = format!("!bytes{}", self.next_fresh);
        self.next_fresh += 1;
        Array::new_const(self.context, name.as_str(), &domain, &range)
    }

    /// Parses `script` on a scratch solver sharing this query's context
    /// and walks `path` through the children of its single asserted
    /// formula.
    ///
    /// The wrapper crate stops short of a handful of floating-point
    /// constructors; templates parsed this way reach them through the
    /// same engine the query runs on.
    fn parse_template(&self, script: &str, path: &[usize]) -> Dynamic<'ctx> {
        let scratch = z3::Solver::new(self.context);
        scratch.from_string(script);
        let assertions = scratch.get_assertions();
        let root = assertions
            .first()
            .expect("Template scripts assert exactly one formula");

        let mut term = Dynamic::from_ast(root);
        for index in path {
            term = term
                .nth_child(*index)
                .expect("Template paths stay inside the parsed formula");
        }
        term
    }

    /// Gets the round-nearest-even rounding-mode term.
    fn rne(&mut self) -> Float<'ctx> {
        if let Some(rne) = &self.rne {
            return rne.clone();
        }

        let script = "(declare-const |!fpa-rm-probe| (_ FloatingPoint 8 24))\n\
                      (assert (fp.eq (fp.add roundNearestTiesToEven |!fpa-rm-probe| \
                      |!fpa-rm-probe|) |!fpa-rm-probe|))";
        let term = self.parse_template(script, &[0, 0]);
        // Rounding modes travel as `Float` terms in the wrapper, exactly
        // as its own rounding-mode constructors build them.
        let rne = unsafe { Float::wrap(self.context, term.get_z3_ast()) };
        self.rne = Some(rne.clone());
        rne
    }

    /// Builds the IEEE remainder of two floats of the given shape.
    fn fp_rem(
        &mut self,
        lhs: &Float<'ctx>,
        rhs: &Float<'ctx>,
        ebits: u32,
        sbits: u32,
    ) -> Float<'ctx> {
        if !self.rem_templates.contains_key(&(ebits, sbits)) {
            let a_name = format!("!fpa-rem-a-{ebits}-{sbits}");
            let b_name = format!("!fpa-rem-b-{ebits}-{sbits}");
            let script = format!(
                "(declare-const |{a_name}| (_ FloatingPoint {ebits} {sbits}))\n\
                 (declare-const |{b_name}| (_ FloatingPoint {ebits} {sbits}))\n\
                 (assert (fp.eq (fp.rem |{a_name}| |{b_name}|) |{a_name}|))"
            );
            let term = self
                .parse_template(&script, &[0])
                .as_float()
                .expect("fp.rem yields a float");
            let a = Float::new_const(self.context, a_name.as_str(), ebits, sbits);
            let b = Float::new_const(self.context, b_name.as_str(), ebits, sbits);
            self.rem_templates
                .insert((ebits, sbits), RemTemplate { term, a, b });
        }

        let template = &self.rem_templates[&(ebits, sbits)];
        template
            .term
            .substitute(&[(&template.a, lhs), (&template.b, rhs)])
    }

    /// Projects a float of the given shape onto its IEEE-754 interchange
    /// bits.
    fn fp_to_ieee_bits(&mut self, operand: &Float<'ctx>, ebits: u32, sbits: u32) -> BV<'ctx> {
        if !self.to_bits_templates.contains_key(&(ebits, sbits)) {
            let a_name = format!("!fpa-bits-a-{ebits}-{sbits}");
            let zeros = "0".repeat((ebits + sbits) as usize);
            let script = format!(
                "(declare-const |{a_name}| (_ FloatingPoint {ebits} {sbits}))\n\
                 (assert (= (fp.to_ieee_bv |{a_name}|) #b{zeros}))"
            );
            let term = self
                .parse_template(&script, &[0])
                .as_bv()
                .expect("fp.to_ieee_bv yields a bit-vector");
            let a = Float::new_const(self.context, a_name.as_str(), ebits, sbits);
            self.to_bits_templates
                .insert((ebits, sbits), ToBitsTemplate { term, a });
        }

        let template = &self.to_bits_templates[&(ebits, sbits)];
        template.term.substitute(&[(&template.a, operand)])
    }

    /// Reassembles a float of the given shape from its IEEE-754
    /// interchange bits.
    fn fp_from_ieee_bits(&mut self, bits: &BV<'ctx>, ebits: u32, sbits: u32) -> Float<'ctx> {
        if !self.from_bits_templates.contains_key(&(ebits, sbits)) {
            let width = ebits + sbits;
            let name = format!("!fpa-raw-{ebits}-{sbits}");
            let script = format!(
                "(declare-const |{name}| (_ BitVec {width}))\n\
                 (assert (fp.eq ((_ to_fp {ebits} {sbits}) |{name}|) \
                 ((_ to_fp {ebits} {sbits}) |{name}|)))"
            );
            let term = self
                .parse_template(&script, &[0])
                .as_float()
                .expect("to_fp yields a float");
            let placeholder = BV::new_const(self.context, name.as_str(), width);
            self.from_bits_templates.insert(
                (ebits, sbits),
                FromBitsTemplate {
                    term,
                    bits: placeholder,
                },
            );
        }

        let template = &self.from_bits_templates[&(ebits, sbits)];
        template.term.substitute(&[(&template.bits, bits)])
    }

    /// Extracts the assignments of every tracked constant into an owned
    /// model, so the result outlives the solver context.
    fn extract_model(&self, model: &z3::Model<'ctx>) -> Z3Model {
        let mut values = HashMap::new();

        for (symbol, tracked) in &self.consts {
            let value = match tracked {
                TrackedConst::BitVec { term, width } => model
                    .eval(term, true)
                    .and_then(|v| bv_numeral_bits(&v))
                    .map(|bits| Value::Int(IntValue::new(*width, bits))),
                TrackedConst::Float { term, ebits, sbits } => model
                    .eval(term, true)
                    .and_then(|v| parse_fp_numeral(&v.to_string(), *ebits, *sbits)),
                TrackedConst::ByteArray {
                    term,
                    index_width,
                    size,
                } => size.and_then(|size| {
                    let mut data = Vec::with_capacity(size);
                    for i in 0..size {
                        let index = BV::from_u64(self.context, i as u64, *index_width);
                        let byte: Dynamic<'_> = model.eval(&term.select(&index), true)?;
                        let bits = bv_numeral_bits(&byte.as_bv()?)?;
                        data.push(bits.as_u8());
                    }
                    Some(Value::Array {
                        data,
                        index_width: *index_width,
                    })
                }),
            };

            if let Some(value) = value {
                values.insert(symbol.clone(), value);
            }
        }

        Z3Model { values }
    }
}

/// An owned model extracted from a satisfiable Z3 query.
#[derive(Debug)]
pub struct Z3Model {
    values: HashMap<Symbol, Value>,
}

impl Model for Z3Model {
    fn lookup(&self, symbol: &Symbol, size: Option<usize>) -> Option<Value> {
        let value = self.values.get(symbol)?.clone();
        match (value, size) {
            (Value::Array { mut data, index_width }, Some(size)) => {
                data.resize(size, 0);
                Some(Value::Array { data, index_width })
            }
            (value, _) => Some(value),
        }
    }
}

/// IEEE float equality, emulated as `le && ge`. The emulation agrees with
/// `fp.eq` everywhere: NaNs compare unequal to everything and the two
/// zeroes compare equal.
fn fp_eq<'ctx>(context: &'ctx Context, l: &Float<'ctx>, r: &Float<'ctx>) -> Bool<'ctx> {
    Bool::and(context, &[&l.le(r), &l.ge(r)])
}

/// Converts a constant integer into a bit-vector term, going through 64-bit
/// limbs for widths the native API cannot carry.
fn bv_from_int<'ctx>(context: &'ctx Context, value: &IntValue) -> BV<'ctx> {
    let width = value.width();
    if width <= 64 {
        return BV::from_u64(context, value.as_u64(), width);
    }

    // Highest limb first so that concatenation produces the right layout.
    let mut result: Option<BV<'ctx>> = None;
    let mut remaining = width;
    while remaining > 0 {
        let limb_width = if remaining % 64 == 0 { 64 } else { remaining % 64 };
        let shift = remaining - limb_width;
        let limb = (value.bits() >> shift).as_u64();
        let limb = BV::from_u64(context, limb, limb_width);
        result = Some(match result {
            Some(acc) => acc.concat(&limb),
            None => limb,
        });
        remaining -= limb_width;
    }
    result.expect("Width is non-zero")
}

fn z3_symbol(_context: &Context, symbol: &Symbol) -> z3::Symbol {
    match symbol {
        Symbol::Named(name) => z3::Symbol::String(name.clone()),
        Symbol::Numbered(number) => match u32::try_from(*number) {
            Ok(number) => z3::Symbol::Int(number),
            Err(_) => z3::Symbol::String(format!("!n{number}")),
        },
    }
}

/// Reads the bits of an evaluated bit-vector numeral, falling back to the
/// SMT-LIB rendering for vectors wider than 64 bits.
fn bv_numeral_bits(bv: &BV<'_>) -> Option<U256> {
    if let Some(v) = bv.as_u64() {
        return Some(U256::from(v));
    }
    parse_bv_numeral(&bv.to_string())
}

/// Parses the SMT-LIB rendering of a bit-vector numeral: `#x…`, `#b…`, or
/// `(_ bvN width)`.
fn parse_bv_numeral(text: &str) -> Option<U256> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("#x") {
        return U256::from_str_radix(hex, 16).ok();
    }
    if let Some(bin) = text.strip_prefix("#b") {
        return U256::from_str_radix(bin, 2).ok();
    }
    if let Some(inner) = text.strip_prefix("(_ bv") {
        let digits: String = inner.chars().take_while(char::is_ascii_digit).collect();
        return U256::from_str_radix(&digits, 10).ok();
    }
    None
}

/// Parses the SMT-LIB rendering of a floating-point numeral into raw
/// interchange bits.
fn parse_fp_numeral(text: &str, ebits: u32, sbits: u32) -> Option<Value> {
    let text = text.trim();

    if text.contains("NaN") {
        // The sign and payload of a NaN are unrecoverable; normalize to the
        // canonical quiet NaN.
        return Some(Value::Float(FloatValue::nan(ebits, sbits)));
    }

    let total = ebits + sbits;
    let sign_bit = U256::ONE << (total - 1);
    let exp_ones = ((U256::ONE << ebits) - U256::ONE) << (sbits - 1);

    if text.contains("+oo") {
        return Some(Value::Float(FloatValue::from_bits(ebits, sbits, exp_ones)));
    }
    if text.contains("-oo") {
        return Some(Value::Float(FloatValue::from_bits(
            ebits,
            sbits,
            exp_ones | sign_bit,
        )));
    }
    if text.contains("+zero") {
        return Some(Value::Float(FloatValue::from_bits(ebits, sbits, U256::ZERO)));
    }
    if text.contains("-zero") {
        return Some(Value::Float(FloatValue::from_bits(ebits, sbits, sign_bit)));
    }

    // The general form is `(fp #bS #xEE #bMM…)` with each field rendered in
    // binary or hex.
    let inner = text.strip_prefix("(fp")?.strip_suffix(')')?;
    let fields: Vec<&str> = inner.split_whitespace().collect();
    if fields.len() != 3 {
        return None;
    }
    let sign = parse_bv_numeral(fields[0])?;
    let exponent = parse_bv_numeral(fields[1])?;
    let significand = parse_bv_numeral(fields[2])?;

    let bits = (sign << (total - 1)) | (exponent << (sbits - 1)) | significand;
    Some(Value::Float(FloatValue::from_bits(ebits, sbits, bits)))
}

#[cfg(test)]
mod test {
    use ethnum::U256;

    use crate::{
        ir::{
            assertion::{Assertion, AssertionList},
            types::Type,
            value::{FloatValue, IntValue, Value},
            BinaryOp,
            FCmpPredicate,
            ICmpPredicate,
            Op,
            Symbol,
        },
        solver::{z3::Z3Solver, Solver, SolverResultKind},
    };

    fn assert_eq_42(list: &mut AssertionList) -> crate::ir::OpRef {
        let x = Op::symbol(Symbol::named("x"), Type::int(32));
        list.insert(Assertion::new(Op::icmp(
            ICmpPredicate::Eq,
            &x,
            &Op::int(32, 42),
        )));
        x
    }

    #[test]
    fn satisfiable_queries_produce_a_model() {
        let solver = Z3Solver::new();
        let mut list = AssertionList::new();
        let _ = assert_eq_42(&mut list);

        let result = solver.resolve(&mut list, &Assertion::constant(true));
        assert_eq!(result.kind(), SolverResultKind::Sat);

        let model = result.model().expect("SAT results carry a model");
        let value = model.lookup(&Symbol::named("x"), None);
        assert_eq!(value, Some(Value::Int(IntValue::from_u64(32, 42))));
    }

    #[test]
    fn contradictions_are_unsat() {
        let solver = Z3Solver::new();
        let mut list = AssertionList::new();
        let x = assert_eq_42(&mut list);

        let extra = Assertion::new(Op::icmp(ICmpPredicate::Eq, &x, &Op::int(32, 7)));
        let result = solver.check(&mut list, &extra);
        assert_eq!(result.kind(), SolverResultKind::Unsat);

        // The guard restored the list.
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn check_never_retains_a_model() {
        let solver = Z3Solver::new();
        let mut list = AssertionList::new();
        let _ = assert_eq_42(&mut list);

        let result = solver.check(&mut list, &Assertion::constant(true));
        assert_eq!(result.kind(), SolverResultKind::Sat);
        assert!(result.model().is_none());
    }

    #[test]
    fn wide_constants_survive_the_translation() {
        let solver = Z3Solver::new();
        let mut list = AssertionList::new();

        let wide = IntValue::new(128, U256::from_words(0, 0x1234_5678_9abc_def0) << 64);
        let x = Op::symbol(Symbol::named("w"), Type::int(128));
        list.insert(Assertion::new(Op::icmp(
            ICmpPredicate::Eq,
            &x,
            &Op::constant_int(wide),
        )));

        let result = solver.resolve(&mut list, &Assertion::constant(true));
        assert_eq!(result.kind(), SolverResultKind::Sat);

        let model = result.model().unwrap();
        let value = model.lookup(&Symbol::named("w"), None);
        assert_eq!(value, Some(Value::Int(wide)));
    }

    #[test]
    fn a_self_unequal_float_must_be_nan() {
        let solver = Z3Solver::new();
        let mut list = AssertionList::new();

        let f = Op::symbol(Symbol::named("f"), Type::f32());
        list.insert(Assertion::new(Op::fcmp(FCmpPredicate::Ne, &f, &f)));

        let result = solver.resolve(&mut list, &Assertion::constant(true));
        assert_eq!(result.kind(), SolverResultKind::Sat);

        let model = result.model().unwrap();
        let Some(Value::Float(value)) = model.lookup(&Symbol::named("f"), None) else {
            panic!("Expected a float assignment");
        };
        assert!(value.is_nan());
        assert!(!value.sign());
    }

    #[test]
    fn symbolic_arrays_extract_their_bytes() {
        let solver = Z3Solver::new();
        let mut list = AssertionList::new();

        let size = Op::int(64, 4);
        let array = Op::symbol_array(Symbol::named("buf"), size);
        let byte = Op::load(&array, &Op::int(64, 2));
        list.insert(Assertion::new(Op::icmp(
            ICmpPredicate::Eq,
            &byte,
            &Op::int(8, 0x5a),
        )));

        let result = solver.resolve(&mut list, &Assertion::constant(true));
        assert_eq!(result.kind(), SolverResultKind::Sat);

        let model = result.model().unwrap();
        let Some(Value::Array { data, .. }) = model.lookup(&Symbol::named("buf"), Some(4)) else {
            panic!("Expected an array assignment");
        };
        assert_eq!(data.len(), 4);
        assert_eq!(data[2], 0x5a);
    }

    #[test]
    fn float_addition_rounds_to_nearest_even() {
        let solver = Z3Solver::new();
        let mut list = AssertionList::new();

        // 2^24 + 3 lies exactly halfway between the two representable
        // neighbours, where nearest-even and truncation disagree.
        let big = Op::constant_float(FloatValue::from_f32(16_777_216.0));
        let three = Op::constant_float(FloatValue::from_f32(3.0));
        let sum = Op::binary(BinaryOp::FAdd, &big, &three);

        let x = Op::symbol(Symbol::named("x"), Type::f32());
        list.insert(Assertion::new(Op::fcmp(FCmpPredicate::Eq, &sum, &x)));

        let result = solver.resolve(&mut list, &Assertion::constant(true));
        assert_eq!(result.kind(), SolverResultKind::Sat);

        let model = result.model().unwrap();
        assert_eq!(
            model.lookup(&Symbol::named("x"), None),
            Some(Value::Float(FloatValue::from_f32(16_777_220.0)))
        );
    }

    #[test]
    fn frem_translates_to_the_ieee_remainder() {
        let solver = Z3Solver::new();
        let mut list = AssertionList::new();

        let five = Op::constant_float(FloatValue::from_f32(5.0));
        let two = Op::constant_float(FloatValue::from_f32(2.0));
        let rem = Op::binary(BinaryOp::FRem, &five, &two);

        let x = Op::symbol(Symbol::named("x"), Type::f32());
        list.insert(Assertion::new(Op::fcmp(FCmpPredicate::Eq, &rem, &x)));

        let result = solver.resolve(&mut list, &Assertion::constant(true));
        assert_eq!(result.kind(), SolverResultKind::Sat);

        let model = result.model().unwrap();
        assert_eq!(
            model.lookup(&Symbol::named("x"), None),
            Some(Value::Float(FloatValue::from_f32(1.0)))
        );
    }

    #[test]
    fn bitcasts_cross_the_solver_boundary() {
        let solver = Z3Solver::new();

        // Float to int: the symbol's bits are pinned by the integer side.
        let mut list = AssertionList::new();
        let f = Op::symbol(Symbol::named("f"), Type::f32());
        let as_int = Op::bitcast(&f, Type::int(32));
        list.insert(Assertion::new(Op::icmp(
            ICmpPredicate::Eq,
            &as_int,
            &Op::int(32, 0x3fc0_0000),
        )));

        let result = solver.resolve(&mut list, &Assertion::constant(true));
        assert_eq!(result.kind(), SolverResultKind::Sat);
        let model = result.model().unwrap();
        assert_eq!(
            model.lookup(&Symbol::named("f"), None),
            Some(Value::Float(FloatValue::from_f32(1.5)))
        );

        // Int to float: the symbol is pinned by the float side.
        let mut list = AssertionList::new();
        let b = Op::symbol(Symbol::named("b"), Type::int(32));
        let as_float = Op::bitcast(&b, Type::f32());
        list.insert(Assertion::new(Op::fcmp(
            FCmpPredicate::Eq,
            &as_float,
            &Op::constant_float(FloatValue::from_f32(1.5)),
        )));

        let result = solver.resolve(&mut list, &Assertion::constant(true));
        assert_eq!(result.kind(), SolverResultKind::Sat);
        let model = result.model().unwrap();
        assert_eq!(
            model.lookup(&Symbol::named("b"), None),
            Some(Value::Int(IntValue::from_u64(32, 0x3fc0_0000)))
        );
    }

    #[test]
    fn unsigned_and_signed_comparisons_disagree_on_negative_values() {
        let solver = Z3Solver::new();
        let mut list = AssertionList::new();

        let x = Op::symbol(Symbol::named("x"), Type::int(8));
        list.insert(Assertion::new(Op::icmp(
            ICmpPredicate::Slt,
            &x,
            &Op::int(8, 0),
        )));
        list.insert(Assertion::new(Op::icmp(
            ICmpPredicate::Ugt,
            &x,
            &Op::int(8, 0x7f),
        )));

        let result = solver.resolve(&mut list, &Assertion::constant(true));
        assert_eq!(result.kind(), SolverResultKind::Sat);
    }
}
