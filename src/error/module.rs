//! This module contains errors produced while constructing or validating the
//! program representation.

use thiserror::Error;

/// Errors that occur while assembling a [`crate::module::Module`] through the
/// builder interface.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Function {function:?} has no basic blocks but is not a declaration")]
    EmptyFunction { function: String },

    #[error("Block {block:?} in function {function:?} is empty")]
    EmptyBlock { function: String, block: usize },

    #[error("Block {block:?} in function {function:?} does not end with a terminator")]
    MissingTerminator { function: String, block: usize },

    #[error("Block {block:?} in function {function:?} has a terminator before its end")]
    EarlyTerminator { function: String, block: usize },

    #[error("A function named {name:?} already exists in the module")]
    DuplicateFunction { name: String },

    #[error("Phi instructions must be the leading instructions of a block")]
    MisplacedPhi { function: String, block: usize },
}

/// The result type for methods that may produce module construction errors.
pub type Result<T> = std::result::Result<T, Error>;
