//! This module contains the runtime values bound to SSA names during
//! execution.
//!
//! A runtime value is what a frame's variable map holds and what memory
//! reads produce: a scalar (an expression or a pointer), a vector of
//! scalars, or an aggregate of further values mirroring a struct or array
//! type.

use crate::{
    error::execution::Error,
    ir::{value::Value, OpRef},
    memory::{Heaps, Pointer},
    solver::{EvalError, ModelEvaluator},
};

/// A scalar runtime value: either a symbolic expression or a pointer.
#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeScalar {
    /// A symbolic expression.
    Expr(OpRef),

    /// A pointer into one of the context's heaps.
    Pointer(Pointer),
}

impl RuntimeScalar {
    /// Gets the contained expression.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the scalar is a pointer.
    pub fn expr(&self) -> Result<&OpRef, Error> {
        match self {
            Self::Expr(expr) => Ok(expr),
            Self::Pointer(_) => Err(Error::NotAnExpression),
        }
    }

    /// Gets the contained pointer.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the scalar is an expression.
    pub fn pointer(&self) -> Result<&Pointer, Error> {
        match self {
            Self::Pointer(ptr) => Ok(ptr),
            Self::Expr(_) => Err(Error::NotAPointer),
        }
    }

    /// Gets the scalar as an integer expression, projecting pointers to
    /// their address against `heaps`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a resolved pointer refers to an allocation that
    /// no longer exists.
    pub fn to_expr(&self, heaps: &Heaps) -> Result<OpRef, Error> {
        match self {
            Self::Expr(expr) => Ok(expr.clone()),
            Self::Pointer(ptr) => ptr.value(heaps),
        }
    }
}

impl From<OpRef> for RuntimeScalar {
    fn from(value: OpRef) -> Self {
        Self::Expr(value)
    }
}

impl From<Pointer> for RuntimeScalar {
    fn from(value: Pointer) -> Self {
        Self::Pointer(value)
    }
}

/// A runtime value: a scalar, a vector of scalars, or an aggregate.
#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeValue {
    /// A single scalar.
    Scalar(RuntimeScalar),

    /// A fixed-length vector of scalars.
    Vector(Vec<RuntimeScalar>),

    /// The members of a struct or array.
    Aggregate(Vec<RuntimeValue>),
}

impl RuntimeValue {
    /// Wraps an expression as a scalar runtime value.
    #[must_use]
    pub fn expr(value: OpRef) -> Self {
        Self::Scalar(RuntimeScalar::Expr(value))
    }

    /// Wraps a pointer as a scalar runtime value.
    #[must_use]
    pub fn pointer(value: Pointer) -> Self {
        Self::Scalar(RuntimeScalar::Pointer(value))
    }

    /// Gets the contained scalar.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the value is a vector or aggregate.
    pub fn scalar(&self) -> Result<&RuntimeScalar, Error> {
        match self {
            Self::Scalar(scalar) => Ok(scalar),
            _ => Err(Error::NotAScalar),
        }
    }
}

impl RuntimeValue {
    /// Evaluates the value to a concrete [`Value`] under a model.
    ///
    /// Pointer scalars evaluate through their address projection against
    /// `heaps`; vectors and aggregates evaluate element-wise.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the evaluator cannot produce a concrete value,
    /// or a pointer scalar dangles.
    pub fn evaluate(
        &self,
        evaluator: &ModelEvaluator<'_>,
        heaps: &Heaps,
    ) -> Result<Value, EvalError> {
        match self {
            Self::Scalar(scalar) => {
                let expr = scalar.to_expr(heaps).map_err(|error| {
                    EvalError::UnsupportedShape {
                        shape: error.to_string(),
                    }
                })?;
                evaluator.evaluate(&expr)
            }
            Self::Vector(scalars) => {
                let values = scalars
                    .iter()
                    .map(|scalar| {
                        RuntimeValue::Scalar(scalar.clone()).evaluate(evaluator, heaps)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Aggregate(values))
            }
            Self::Aggregate(members) => {
                let values = members
                    .iter()
                    .map(|member| member.evaluate(evaluator, heaps))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Aggregate(values))
            }
        }
    }
}

impl From<RuntimeScalar> for RuntimeValue {
    fn from(value: RuntimeScalar) -> Self {
        Self::Scalar(value)
    }
}

#[cfg(test)]
mod test {
    use crate::{
        ir::{
            assertion::AssertionList,
            value::{IntValue, Value},
            Op,
            Symbol,
        },
        memory::{AllocationKind, HeapIndex, Heaps, Pointer, RuntimeValue},
        solver::{Model, ModelEvaluator},
    };

    /// A model that assigns the same integer to every symbol.
    #[derive(Debug)]
    struct ConstantModel(IntValue);

    impl Model for ConstantModel {
        fn lookup(&self, _symbol: &Symbol, _size: Option<usize>) -> Option<Value> {
            Some(Value::Int(self.0))
        }
    }

    #[test]
    fn pointer_scalars_evaluate_through_their_address() -> anyhow::Result<()> {
        let mut heaps = Heaps::new();
        let mut assertions = AssertionList::new();
        let size = Op::int(64, 8);
        let data = Op::alloc_array(&size, &Op::int(8, 0));
        let id = heaps.allocate(
            HeapIndex::MAIN,
            size,
            data,
            AllocationKind::Heap,
            &mut assertions,
        );

        let ptr = Pointer::resolved(HeapIndex::MAIN, id, Op::int(64, 4));
        let value = RuntimeValue::pointer(ptr);

        let model = ConstantModel(IntValue::from_u64(64, 0x1000));
        let evaluator = ModelEvaluator::new(&model);
        let evaluated = value.evaluate(&evaluator, &heaps)?;

        assert_eq!(evaluated, Value::Int(IntValue::from_u64(64, 0x1004)));
        Ok(())
    }

    #[test]
    fn aggregates_evaluate_element_wise() -> anyhow::Result<()> {
        let heaps = Heaps::new();
        let value = RuntimeValue::Aggregate(vec![
            RuntimeValue::expr(Op::int(8, 1)),
            RuntimeValue::expr(Op::int(8, 2)),
        ]);

        let model = ConstantModel(IntValue::from_u64(8, 0));
        let evaluator = ModelEvaluator::new(&model);
        let evaluated = value.evaluate(&evaluator, &heaps)?;

        assert_eq!(
            evaluated,
            Value::Aggregate(vec![
                Value::Int(IntValue::from_u64(8, 1)),
                Value::Int(IntValue::from_u64(8, 2)),
            ])
        );
        Ok(())
    }
}
