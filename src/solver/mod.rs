//! This module contains the narrow interface the engine sees of an SMT
//! solver, together with the model evaluation machinery that turns a
//! satisfying assignment back into concrete [`Value`]s.
//!
//! The engine only ever asks two questions: [`Solver::check`] ("is the path
//! condition plus this assertion satisfiable?") and [`Solver::resolve`]
//! (the same question, but keep the witness). Everything else about the
//! underlying engine (tactics, timeouts, sort encodings) is a back-end
//! concern. The default back-end is [`z3::Z3Solver`].

pub mod z3;

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use thiserror::Error;

use crate::ir::{
    assertion::{Assertion, AssertionList},
    types::Type,
    value::{FloatValue, IntValue, Value},
    BinaryOp,
    FCmpPredicate,
    Op,
    OpKind,
    OpRef,
    Symbol,
    UnaryOp,
};

/// The outcome kind of a solver query.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SolverResultKind {
    /// The conjunction is satisfiable.
    Sat,

    /// The conjunction is unsatisfiable.
    Unsat,

    /// The solver could not decide within its budget.
    Unknown,
}

/// The outcome of a solver query: a kind, plus a model when the query was
/// satisfiable and the caller asked to keep it.
#[derive(Debug)]
pub struct SolverResult {
    kind: SolverResultKind,
    model: Option<Box<dyn Model>>,
}

impl SolverResult {
    /// Constructs a result from its parts.
    ///
    /// # Panics
    ///
    /// Panics if a model accompanies a non-SAT kind; constructing such a
    /// result is a programmer bug.
    #[must_use]
    pub fn new(kind: SolverResultKind, model: Option<Box<dyn Model>>) -> Self {
        assert!(
            kind == SolverResultKind::Sat || model.is_none(),
            "Only SAT results can carry a model"
        );
        Self { kind, model }
    }

    /// Constructs a SAT result carrying `model`.
    #[must_use]
    pub fn sat(model: Box<dyn Model>) -> Self {
        Self::new(SolverResultKind::Sat, Some(model))
    }

    /// Constructs a SAT result without a model, as produced by `check`.
    #[must_use]
    pub fn sat_without_model() -> Self {
        Self::new(SolverResultKind::Sat, None)
    }

    /// Constructs an UNSAT result.
    #[must_use]
    pub fn unsat() -> Self {
        Self::new(SolverResultKind::Unsat, None)
    }

    /// Constructs an Unknown result.
    #[must_use]
    pub fn unknown() -> Self {
        Self::new(SolverResultKind::Unknown, None)
    }

    /// Gets the outcome kind.
    #[must_use]
    pub fn kind(&self) -> SolverResultKind {
        self.kind
    }

    /// Checks whether the outcome is SAT.
    #[must_use]
    pub fn is_sat(&self) -> bool {
        self.kind == SolverResultKind::Sat
    }

    /// Gets the model, if one was retained.
    #[must_use]
    pub fn model(&self) -> Option<&dyn Model> {
        self.model.as_deref()
    }

    /// Discards the model, keeping only the kind.
    #[must_use]
    pub fn without_model(self) -> Self {
        Self::new(self.kind, None)
    }
}

/// The interface to an SMT back-end.
///
/// Implementations decide satisfiability of the conjunction of an assertion
/// list with one extra assertion. They are free to use the proven/unproven
/// split of the list to skip work, and must treat their own timeouts as
/// [`SolverResultKind::Unknown`] rather than an error.
pub trait Solver {
    /// Decides the conjunction of `assertions` and `extra`, returning a
    /// model on SAT.
    fn resolve(&self, assertions: &mut AssertionList, extra: &Assertion) -> SolverResult;

    /// Decides the conjunction of `assertions` and `extra` without
    /// retaining a model.
    ///
    /// The default implementation short-circuits trivial cases and
    /// otherwise delegates to [`Self::resolve`] under a checkpoint guard,
    /// so the list is unchanged on return.
    fn check(&self, assertions: &mut AssertionList, extra: &Assertion) -> SolverResult {
        if extra.is_constant_value(false) {
            return SolverResult::unsat();
        }
        if assertions.unproven().is_empty() && extra.is_constant_value(true) {
            return SolverResult::sat_without_model();
        }

        let mut guard = assertions.scoped();
        guard.insert(extra.clone());
        if guard.unproven().is_empty() {
            return SolverResult::sat_without_model();
        }

        self.resolve(&mut guard, &Assertion::constant(true))
            .without_model()
    }
}

/// A shared handle to a solver.
///
/// The handle is reference-counted rather than borrowed because it is the
/// one collaborator shared between the interpreter and every facade it
/// creates during a step.
pub type SharedSolver = Rc<dyn Solver>;

/// A satisfying assignment for the symbolic constants of a query.
pub trait Model: std::fmt::Debug {
    /// Looks up the concrete value assigned to `symbol`.
    ///
    /// Array-valued symbols need `size` to bound the extraction; scalar
    /// symbols ignore it. Returns [`None`] if the symbol was not part of
    /// the query or the back-end could not extract it.
    fn lookup(&self, symbol: &Symbol, size: Option<usize>) -> Option<Value>;
}

/// Errors produced while evaluating an expression under a model.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum EvalError {
    #[error("The model assigns no value to symbol {symbol:?}")]
    MissingSymbol { symbol: String },

    #[error("Evaluation of a division by zero")]
    DivisionByZero,

    #[error("The shape {shape:?} is not supported by concrete evaluation")]
    UnsupportedShape { shape: String },
}

/// The upper bound on the number of bytes an array is materialised with
/// during evaluation.
const MAX_EVAL_ARRAY_BYTES: usize = 1 << 20;

/// An evaluator that maps expressions to concrete values under a [`Model`].
///
/// Evaluation substitutes the model's assignments at the symbolic leaves
/// and then folds the graph with the same concrete semantics the builders
/// use. Results are memoized by node identity, so shared subgraphs are
/// evaluated once.
pub struct ModelEvaluator<'m> {
    model: &'m dyn Model,
    cache: RefCell<HashMap<*const Op, Value>>,
}

impl<'m> ModelEvaluator<'m> {
    /// Creates an evaluator over `model`.
    #[must_use]
    pub fn new(model: &'m dyn Model) -> Self {
        let cache = RefCell::new(HashMap::new());
        Self { model, cache }
    }

    /// Evaluates `op` to a concrete value.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a symbol is missing from the model, a division by
    /// zero is reached, or the expression uses a shape concrete evaluation
    /// does not support.
    pub fn evaluate(&self, op: &OpRef) -> Result<Value, EvalError> {
        let key = Rc::as_ptr(op);
        if let Some(hit) = self.cache.borrow().get(&key) {
            return Ok(hit.clone());
        }

        let value = self.evaluate_uncached(op)?;
        self.cache.borrow_mut().insert(key, value.clone());
        Ok(value)
    }

    fn evaluate_uncached(&self, op: &OpRef) -> Result<Value, EvalError> {
        match op.kind() {
            OpKind::ConstantInt(value) => Ok(Value::Int(*value)),
            OpKind::ConstantFloat(value) => Ok(Value::Float(*value)),
            OpKind::Constant(symbol) => {
                self.model
                    .lookup(symbol, None)
                    .ok_or_else(|| EvalError::MissingSymbol {
                        symbol: symbol.to_string(),
                    })
            }
            OpKind::ConstantArray { symbol, size } => {
                let size = self.evaluate_index(size)?;
                self.model
                    .lookup(symbol, Some(size))
                    .ok_or_else(|| EvalError::MissingSymbol {
                        symbol: symbol.to_string(),
                    })
            }
            OpKind::Undef => match op.ty() {
                Type::Int { width } => Ok(Value::Int(IntValue::zero(width))),
                Type::Float { ebits, sbits } => {
                    Ok(Value::Float(FloatValue::from_bits(ebits, sbits, 0u32.into())))
                }
                ty => Err(EvalError::UnsupportedShape {
                    shape: ty.to_string(),
                }),
            },
            OpKind::Unary { op: unary, operand } => self.evaluate_unary(*unary, operand, op.ty()),
            OpKind::Binary { op: binary, lhs, rhs } => self.evaluate_binary(*binary, lhs, rhs),
            OpKind::ICmp { pred, lhs, rhs } => {
                let l = self.evaluate(lhs)?;
                let r = self.evaluate(rhs)?;
                Ok(Value::Int(IntValue::from_bool(
                    l.unwrap_int().compare(*pred, r.unwrap_int()),
                )))
            }
            OpKind::FCmp { pred, lhs, rhs } => {
                let l = self.float_as_f64(lhs)?;
                let r = self.float_as_f64(rhs)?;
                let result = match pred {
                    FCmpPredicate::Eq => l == r,
                    FCmpPredicate::Ne => l != r || l.is_nan() || r.is_nan(),
                    FCmpPredicate::Lt => l < r,
                    FCmpPredicate::Le => l <= r,
                    FCmpPredicate::Gt => l > r,
                    FCmpPredicate::Ge => l >= r,
                };
                Ok(Value::Int(IntValue::from_bool(result)))
            }
            OpKind::Select {
                cond,
                true_value,
                false_value,
            } => {
                let cond = self.evaluate(cond)?;
                if cond.unwrap_int().is_zero() {
                    self.evaluate(false_value)
                } else {
                    self.evaluate(true_value)
                }
            }
            OpKind::FixedArray { elements } => {
                let data = elements
                    .iter()
                    .map(|e| self.evaluate(e).map(|v| v.unwrap_int().as_u64() as u8))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array {
                    data,
                    index_width: op.ty().bitwidth(),
                })
            }
            OpKind::AllocArray { size, default } => {
                let size = self.evaluate_index(size)?;
                let default = self.evaluate(default)?.unwrap_int().as_u64() as u8;
                Ok(Value::Array {
                    data: vec![default; size],
                    index_width: op.ty().bitwidth(),
                })
            }
            OpKind::Load { array, index } => {
                let array = self.evaluate(array)?;
                let index = self.evaluate_index(index)?;
                let Value::Array { data, .. } = array else {
                    return Err(EvalError::UnsupportedShape {
                        shape: "non-array load target".into(),
                    });
                };
                let byte = data.get(index).copied().unwrap_or(0);
                Ok(Value::Int(IntValue::from_u64(8, u64::from(byte))))
            }
            OpKind::Store {
                array,
                index,
                value,
            } => {
                let evaluated = self.evaluate(array)?;
                let index = self.evaluate_index(index)?;
                let byte = self.evaluate(value)?.unwrap_int().as_u64() as u8;
                let Value::Array {
                    mut data,
                    index_width,
                } = evaluated
                else {
                    return Err(EvalError::UnsupportedShape {
                        shape: "non-array store target".into(),
                    });
                };
                if index >= data.len() {
                    if index >= MAX_EVAL_ARRAY_BYTES {
                        return Err(EvalError::UnsupportedShape {
                            shape: format!("array store at index {index}"),
                        });
                    }
                    data.resize(index + 1, 0);
                }
                data[index] = byte;
                Ok(Value::Array { data, index_width })
            }
        }
    }

    fn evaluate_unary(
        &self,
        unary: UnaryOp,
        operand: &OpRef,
        result_ty: Type,
    ) -> Result<Value, EvalError> {
        let value = self.evaluate(operand)?;
        match unary {
            UnaryOp::Not => Ok(Value::Int(value.unwrap_int().not())),
            UnaryOp::FNeg => {
                let float = value.unwrap_float();
                let sign = ethnum::U256::ONE
                    << (float.exponent_bits() + float.significand_bits() - 1);
                Ok(Value::Float(FloatValue::from_bits(
                    float.exponent_bits(),
                    float.significand_bits(),
                    float.bits() ^ sign,
                )))
            }
            UnaryOp::FIsNaN => Ok(Value::Int(IntValue::from_bool(value.unwrap_float().is_nan()))),
            UnaryOp::Trunc => Ok(Value::Int(value.unwrap_int().trunc(result_ty.bitwidth()))),
            UnaryOp::ZExt => Ok(Value::Int(value.unwrap_int().zext(result_ty.bitwidth()))),
            UnaryOp::SExt => Ok(Value::Int(value.unwrap_int().sext(result_ty.bitwidth()))),
            UnaryOp::Bitcast => match (value, result_ty) {
                (Value::Int(v), Type::Float { ebits, sbits }) => {
                    Ok(Value::Float(FloatValue::from_bits(ebits, sbits, v.bits())))
                }
                (Value::Float(v), Type::Int { width }) => {
                    Ok(Value::Int(IntValue::new(width, v.bits())))
                }
                (value, _) => Ok(value),
            },
        }
    }

    fn evaluate_binary(
        &self,
        binary: BinaryOp,
        lhs: &OpRef,
        rhs: &OpRef,
    ) -> Result<Value, EvalError> {
        if binary.is_float() {
            let shape = lhs.ty();
            let l = self.float_as_f64(lhs)?;
            let r = self.float_as_f64(rhs)?;
            let result = match binary {
                BinaryOp::FAdd => l + r,
                BinaryOp::FSub => l - r,
                BinaryOp::FMul => l * r,
                BinaryOp::FDiv => l / r,
                BinaryOp::FRem => l % r,
                _ => unreachable!("Float opcode handled above"),
            };
            let value = if shape == Type::f32() {
                FloatValue::from_f32(result as f32)
            } else {
                FloatValue::from_f64(result)
            };
            return Ok(Value::Float(value));
        }

        let l = self.evaluate(lhs)?;
        let r = self.evaluate(rhs)?;
        let (l, r) = (l.unwrap_int(), r.unwrap_int());
        let result = match binary {
            BinaryOp::Add => l.add(r),
            BinaryOp::Sub => l.sub(r),
            BinaryOp::Mul => l.mul(r),
            BinaryOp::UDiv if r.is_zero() => return Err(EvalError::DivisionByZero),
            BinaryOp::UDiv => l.udiv(r),
            BinaryOp::SDiv if r.is_zero() => return Err(EvalError::DivisionByZero),
            BinaryOp::SDiv => l.sdiv(r),
            BinaryOp::URem if r.is_zero() => return Err(EvalError::DivisionByZero),
            BinaryOp::URem => l.urem(r),
            BinaryOp::SRem if r.is_zero() => return Err(EvalError::DivisionByZero),
            BinaryOp::SRem => l.srem(r),
            BinaryOp::And => l.and(r),
            BinaryOp::Or => l.or(r),
            BinaryOp::Xor => l.xor(r),
            BinaryOp::Shl => l.shl(r),
            BinaryOp::LShr => l.lshr(r),
            BinaryOp::AShr => l.ashr(r),
            _ => unreachable!("Integer opcode handled above"),
        };
        Ok(Value::Int(result))
    }

    fn float_as_f64(&self, op: &OpRef) -> Result<f64, EvalError> {
        let value = self.evaluate(op)?;
        let float = value.unwrap_float();
        float
            .to_f64()
            .or_else(|| float.to_f32().map(f64::from))
            .ok_or_else(|| EvalError::UnsupportedShape {
                shape: float.ty().to_string(),
            })
    }

    fn evaluate_index(&self, op: &OpRef) -> Result<usize, EvalError> {
        let value = self.evaluate(op)?;
        let int = value.unwrap_int();
        let index = int.as_u64() as usize;
        if ethnum::U256::from(index as u64) != int.bits() || index > MAX_EVAL_ARRAY_BYTES {
            return Err(EvalError::UnsupportedShape {
                shape: format!("array extent {}", int),
            });
        }
        Ok(index)
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use crate::{
        ir::{
            types::Type,
            value::{IntValue, Value},
            ICmpPredicate,
            Op,
            Symbol,
        },
        solver::{Model, ModelEvaluator},
    };

    /// A model backed by a plain map, for testing evaluation without a
    /// solver.
    #[derive(Debug, Default)]
    struct MapModel {
        values: HashMap<Symbol, Value>,
    }

    impl Model for MapModel {
        fn lookup(&self, symbol: &Symbol, _size: Option<usize>) -> Option<Value> {
            self.values.get(symbol).cloned()
        }
    }

    #[test]
    fn constants_evaluate_to_themselves() -> anyhow::Result<()> {
        let model = MapModel::default();
        let evaluator = ModelEvaluator::new(&model);

        let op = Op::int(32, 42);
        assert_eq!(evaluator.evaluate(&op)?, Value::Int(IntValue::from_u64(32, 42)));

        Ok(())
    }

    #[test]
    fn symbols_substitute_from_the_model() -> anyhow::Result<()> {
        let mut model = MapModel::default();
        model.values.insert(
            Symbol::named("x"),
            Value::Int(IntValue::from_u64(32, 7)),
        );
        let evaluator = ModelEvaluator::new(&model);

        let x = Op::symbol(Symbol::named("x"), Type::int(32));
        let expr = Op::icmp(ICmpPredicate::Eq, &Op::add(&x, &Op::int(32, 1)), &Op::int(32, 8));
        assert_eq!(evaluator.evaluate(&expr)?, Value::Int(IntValue::from_bool(true)));

        Ok(())
    }

    #[test]
    fn missing_symbols_surface_as_errors() {
        let model = MapModel::default();
        let evaluator = ModelEvaluator::new(&model);

        let x = Op::symbol(Symbol::named("missing"), Type::int(32));
        assert!(evaluator.evaluate(&x).is_err());
    }

    #[test]
    fn store_then_load_evaluates_through_the_byte_array() -> anyhow::Result<()> {
        let model = MapModel::default();
        let evaluator = ModelEvaluator::new(&model);

        let array = Op::alloc_array(&Op::int(64, 4), &Op::int(8, 0));
        let index = Op::int(64, 2);
        let stored = Op::store(&array, &index, &Op::int(8, 0x7f));
        let value = evaluator.evaluate(&stored)?;
        assert_eq!(
            value,
            Value::Array {
                data: vec![0, 0, 0x7f, 0],
                index_width: 64
            }
        );

        Ok(())
    }
}
