//! This module contains the primary error type for the engine's interface. It
//! also re-exports the more specific error types that are subsystem-specific.
//!
//! # Anyhow
//!
//! All of the errors implement [`std::error::Error`], and hence can be used
//! with [`anyhow::Error`] internally. It is _not_ recommended to use that
//! error type in the interface of the library, as this forces clients to also
//! use `anyhow`.

pub mod container;
pub mod execution;
pub mod module;

use std::sync::Arc;

use thiserror::Error;

pub use container::CodeLocation;

/// The interface result type for the library.
///
/// # Usage
///
/// Any function considered to be part of the public interface of the library
/// should return this result type. Note that _all_ of the library is public
/// in order to facilitate use-cases beyond the ones designed for.
pub type Result<T> = std::result::Result<T, Errors>;

/// The interface error type for the library.
///
/// All errors returned from the library interface (and hence encountered by
/// the clients of the library) should be members of this enum.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// Errors from the symbolic execution subsystem of the library.
    #[error(transparent)]
    Execution(#[from] execution::Error),

    /// Errors from constructing the program representation.
    #[error(transparent)]
    Module(#[from] module::Error),

    /// Unknown errors, usually from the dependencies of the library.
    ///
    /// It is wrapped in an [`Arc`] to ensure that it can be cloned like
    /// the other error types in this interface error.
    #[error(transparent)]
    Other(Arc<anyhow::Error>),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(Arc::new(value))
    }
}

/// Make it possible to attach locations to these errors.
impl container::Locatable for Error {
    type Located = LocatedError;

    fn locate(self, location: CodeLocation) -> Self::Located {
        container::Located {
            location,
            payload: self,
        }
    }
}

/// A library error with an associated program location.
pub type LocatedError = container::Located<Error>;

/// Allow simple conversions from located execution errors by re-wrapping the
/// located error around the more general payload.
impl From<execution::LocatedError> for LocatedError {
    fn from(value: execution::LocatedError) -> Self {
        let location = value.location;
        let payload = Error::from(value.payload);
        Self { location, payload }
    }
}

/// Allow simple conversions from located execution errors by re-wrapping the
/// located error around the more general payload in the `Errors` container.
impl From<execution::LocatedError> for Errors {
    fn from(value: execution::LocatedError) -> Self {
        let re_wrapped: LocatedError = value.into();
        re_wrapped.into()
    }
}

/// Allow conversion from the execution errors container to the general errors
/// container.
impl From<execution::Errors> for Errors {
    fn from(value: execution::Errors) -> Self {
        let errs: Vec<execution::LocatedError> = value.into();
        let new_errs: Vec<LocatedError> = errs.into_iter().map(Into::into).collect();

        new_errs.into()
    }
}

/// A container of errors that may occur in the engine.
pub type Errors = container::Errors<LocatedError>;
