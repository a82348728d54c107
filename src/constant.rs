//! This module contains constants that are needed throughout the codebase.

/// The width of a byte in bits, used when slicing typed values into the
/// byte-granular backing store of an allocation.
pub const BYTE_WIDTH_BITS: u32 = 8;

/// The pointer width assumed by the default data layout.
pub const DEFAULT_POINTER_WIDTH_BITS: u32 = 64;

/// The widest integer type the engine supports.
///
/// Integer values are backed by 256-bit limbs, so any program type wider than
/// this is rejected as an engine fault when it is first encountered.
pub const MAXIMUM_INTEGER_WIDTH_BITS: u32 = 256;

/// The default wall-clock budget for a single solver query, in milliseconds.
///
/// A query that exceeds this budget produces an `Unknown` result rather than
/// an error.
pub const DEFAULT_SOLVER_TIMEOUT_MS: u32 = 30_000;

/// The default number of call frames a context may hold before the engine
/// closes the path as unknowable.
///
/// Symbolic execution of unbounded recursion never terminates on its own, so
/// paths are cut off once they are this deep.
pub const DEFAULT_MAX_STACK_DEPTH: usize = 512;

/// The default number of interpreter steps between polls of the watchdog.
pub const DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS: usize = 64;
