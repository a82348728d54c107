//! This library implements a path-forking symbolic execution engine for an
//! LLVM-style typed SSA program representation. Given a module and one or
//! more entry functions, it explores the feasible paths of the program over
//! symbolic inputs, using an SMT solver to prune infeasible forks and to
//! produce concrete counterexamples that witness undefined behaviour,
//! assertion violations, and invalid memory accesses.
//!
//! # How it Works
//!
//! 1. A program is assembled (or loaded, by an external collaborator) into
//!    the [`module::Module`] representation.
//! 2. Each entry function gets a root [`interpreter::Context`]: a symbolic
//!    machine state of stack frames, byte-granular symbolic heaps, and a
//!    path-condition assertion list.
//! 3. The [`interpreter::Interpreter`] dequeues contexts from its store and
//!    steps them. Every instruction's semantics are expressed as a
//!    [`interpreter::TransformBuilder`] pipeline whose operations may fork
//!    the context: on control flow, on pointer resolution, on any
//!    condition the solver can split.
//! 4. Safety conditions (division by zero, out-of-bounds accesses, the
//!    assertion primitive) are checked with the [`solver::Solver`]; when a
//!    violation is reachable, the satisfying model is handed to the
//!    [`interpreter::FailureLogger`] as a concrete reproducer.
//!
//! # Basic Usage
//!
//! Build a program, create an interpreter over it, queue an entry point
//! with symbolic arguments, and run:
//!
//! ```
//! use std::rc::Rc;
//!
//! use symbolic_executor::{
//!     interpreter::{EntryArg, Interpreter},
//!     ir::BinaryOp,
//!     module::{
//!         builder::{FunctionBuilder, ModuleBuilder},
//!         IrType,
//!         Operand,
//!     },
//!     solver::z3::Z3Solver,
//! };
//!
//! // int div(int x) { return 10 / x; }
//! let mut fb = FunctionBuilder::new("div", &[("x", IrType::Int(32))], IrType::Int(32));
//! let quotient = fb.binary(BinaryOp::SDiv, Operand::i32(10), fb.param(0));
//! fb.ret(Some(quotient));
//!
//! let mut mb = ModuleBuilder::new("example");
//! mb.add_function(fb.build()?)?;
//! let module = Rc::new(mb.build());
//!
//! let mut interpreter = Interpreter::new(module, Z3Solver::new().into_shared());
//! interpreter.add_entry("div", vec![EntryArg::Symbolic { name: "x".into() }])?;
//!
//! // The division is reachable with x == 0, so exactly one failure is
//! // witnessed.
//! let stats = interpreter.run()?;
//! assert_eq!(stats.failures, 1);
//! # Ok::<(), anyhow::Error>(())
//! ```

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming

pub mod constant;
pub mod error;
pub mod interpreter;
pub mod ir;
pub mod memory;
pub mod module;
pub mod solver;
pub mod watchdog;

// Re-exports to provide the library interface.
pub use interpreter::{EntryArg, ExecutionStats, Interpreter, InterpreterOptions};
pub use module::Module;
