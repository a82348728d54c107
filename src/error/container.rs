use std::fmt::{Display, Formatter};

use thiserror::Error;

/// A position in the program being executed, expressed as the function name
/// together with the block and instruction indices of the program counter.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CodeLocation {
    /// The name of the function the location falls in.
    pub function: String,

    /// The index of the basic block within the function.
    pub block: usize,

    /// The index of the instruction within the basic block.
    pub instruction: usize,
}

impl CodeLocation {
    /// Constructs a new location from its components.
    #[must_use]
    pub fn new(function: impl Into<String>, block: usize, instruction: usize) -> Self {
        let function = function.into();
        Self {
            function,
            block,
            instruction,
        }
    }
}

/// Displays the location as `function@block:instruction`.
impl Display for CodeLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.function, self.block, self.instruction)
    }
}

/// An error that is localised to a particular position in the program being
/// executed.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub struct Located<E>
where
    E: Clone,
{
    /// The position in the program where the error occurred.
    pub location: CodeLocation,

    /// The error data.
    pub payload: E,
}

/// Displays the error together with the program position at which it
/// occurred.
impl<E> Display for Located<E>
where
    E: Display + Clone,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.location, self.payload)
    }
}

/// A trait for types that can have a program position attached to them.
pub trait Locatable
where
    Self: Sized,
{
    /// The return type with the attached program position.
    type Located;

    /// Attaches `location` to the error.
    fn locate(self, location: CodeLocation) -> Self::Located;
}

/// A blanket implementation that allows for attaching a location to any
/// result.
impl<T, E> Locatable for Result<T, E>
where
    E: std::error::Error + Clone,
{
    type Located = Result<T, Located<E>>;

    fn locate(self, location: CodeLocation) -> Self::Located {
        self.map_err(|e| Located {
            location,
            payload: e,
        })
    }
}

/// An error that is a collection of errors.
///
/// Errors are kept in the order in which they were added to the container.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub struct Errors<E> {
    payloads: Vec<E>,
}

impl<E> Errors<E> {
    /// Creates a new container for errors.
    #[must_use]
    pub fn new() -> Self {
        let payloads = vec![];
        Self { payloads }
    }

    /// Gets the errors contained within this error.
    #[must_use]
    pub fn payloads(&self) -> &[E] {
        self.payloads.as_slice()
    }

    /// Gets the length of the errors container.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    /// Checks if the errors container is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E> Errors<E>
where
    E: std::error::Error,
{
    /// Adds the provided `error` to the container.
    pub fn add(&mut self, error: E) {
        self.payloads.push(error);
    }

    /// Adds the multiple provided errors to the container.
    pub fn add_many(&mut self, errors: impl Into<Vec<E>>) {
        self.payloads.extend(errors.into());
    }
}

impl<E> Errors<Located<E>>
where
    E: std::error::Error + Clone,
{
    /// Adds an error `payload` at the specific `location` in the program.
    pub fn add_located(&mut self, location: CodeLocation, payload: E) {
        let error = Located { location, payload };
        self.payloads.push(error);
    }
}

/// The default errors container is one containing no errors.
impl<E> Default for Errors<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Allow conversion from any error type to a container of errors.
impl<E> From<E> for Errors<E>
where
    E: std::error::Error,
{
    fn from(value: E) -> Self {
        let mut errors = Self::default();
        errors.add(value);
        errors
    }
}

/// Allow conversion from the errors container to a vector of errors.
impl<E> From<Errors<E>> for Vec<E>
where
    E: std::error::Error,
{
    fn from(value: Errors<E>) -> Self {
        value.payloads
    }
}

/// Allow conversion from a vector of errors to the errors container.
impl<E> From<Vec<E>> for Errors<E>
where
    E: std::error::Error,
{
    fn from(value: Vec<E>) -> Self {
        Self { payloads: value }
    }
}

/// Displays the errors in the sequence in which they occur in the container.
///
/// It has a header specifying how many errors occurred, and then prints one
/// error per line after that. This means that in the case where errors did
/// occur, the output of `fmt` is multi-line.
impl<E> Display for Errors<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.payloads.is_empty() {
            write!(f, "Encountered no errors")?;
        } else {
            writeln!(f, "Encountered {} errors:", self.payloads.len())?;
            for error in &self.payloads {
                writeln!(f, "{error}")?;
            }
        }

        Ok(())
    }
}
