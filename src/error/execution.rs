//! This module contains errors pertaining to the symbolic execution of the
//! program by the interpreter.
//!
//! Everything in here is an _engine fault_: a condition that indicates a bug
//! in the engine, a malformed input program, or an execution that has run
//! into a hard resource limit. Misbehaviour of the program under analysis is
//! never an error in this sense; it is reported through the failure logger
//! instead.

use thiserror::Error;

use crate::error::container;

/// Errors that occur during the execution of a program by the
/// [`crate::interpreter::Interpreter`].
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("A stack frame was requested but the context has none")]
    NoStackFrame,

    #[error("The function {name:?} does not exist in the module")]
    UnknownFunction { name: String },

    #[error("The function {name:?} is a declaration and has no registered built-in handler")]
    MissingFunctionBody { name: String },

    #[error("Basic block {block:?} does not exist in function {function:?}")]
    UnknownBlock { function: String, block: usize },

    #[error("The program counter points past the end of a basic block")]
    MissingTerminator,

    #[error("SSA value %{id:?} was read before being defined")]
    UndefinedValue { id: u32 },

    #[error("A phi instruction was executed without a predecessor block")]
    PhiWithoutPredecessor,

    #[error("A phi instruction has no incoming value for block {block:?}")]
    MissingPhiIncoming { block: usize },

    #[error("Expected a scalar value but found a vector or aggregate")]
    NotAScalar,

    #[error("Expected an expression but found a pointer")]
    NotAnExpression,

    #[error("Expected a pointer but found an expression")]
    NotAPointer,

    #[error("A resolved pointer was required but the pointer is unresolved")]
    UnresolvedPointer,

    #[error("No allocation numbered {id:?} exists in heap {heap:?}")]
    NoSuchAllocation { heap: u32, id: u32 },

    #[error("Integer width {width:?} exceeds the maximum supported width")]
    WidthTooLarge { width: u32 },

    #[error("Type mismatch: expected {expected:?} but found {found:?}")]
    TypeMismatch { expected: String, found: String },

    #[error("The type {ty:?} cannot be stored to or loaded from memory")]
    UnstorableType { ty: String },

    #[error("Maximum call depth of {limit:?} frames exceeded")]
    StackDepthExceeded { limit: usize },

    #[error("Execution was stopped by the watchdog")]
    StoppedByWatchdog,
}

/// An execution error with an associated location in the program.
pub type LocatedError = container::Located<Error>;

/// A container of execution errors used for aggregation of errors during
/// execution.
pub type Errors = container::Errors<LocatedError>;

/// The result type for methods that may have execution errors.
pub type Result<T> = std::result::Result<T, LocatedError>;

/// Make it possible to attach locations to these errors.
impl container::Locatable for Error {
    type Located = LocatedError;

    fn locate(self, location: container::CodeLocation) -> Self::Located {
        container::Located {
            location,
            payload: self,
        }
    }
}
