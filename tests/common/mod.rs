//! This module contains common testing utilities for the end-to-end
//! scenario tests.
#![allow(unused)]

use std::rc::Rc;

use symbolic_executor::{
    interpreter::{
        CollectingLogger,
        FailureRecord,
        Interpreter,
        RecordingPolicy,
    },
    ir::value::{IntValue, Value},
    module::{builder::ModuleBuilder, Function, Module},
    solver::z3::Z3Solver,
};

/// Wraps a single function into a module and builds an interpreter over
/// it, with a recording policy installed so tests can inspect path
/// completions.
pub fn interpreter_for(function: Function) -> Interpreter {
    let mut mb = ModuleBuilder::new("scenario");
    mb.add_function(function).expect("Function is unique");
    let module = Rc::new(mb.build());

    Interpreter::new(module, Z3Solver::new().into_shared())
        .with_policy(Box::new(RecordingPolicy::new()))
}

/// Gets the failures collected by the default in-memory logger.
pub fn collected_failures(interpreter: &Interpreter) -> &[FailureRecord] {
    interpreter
        .logger()
        .downcast_ref::<CollectingLogger>()
        .expect("The default logger collects in memory")
        .failures()
}

/// Gets the recording policy back out of the interpreter.
pub fn recorded(interpreter: &Interpreter) -> &RecordingPolicy {
    interpreter
        .policy()
        .downcast_ref::<RecordingPolicy>()
        .expect("The recording policy was installed")
}

/// Extracts the integer assigned to `name` in a failure record's witness.
pub fn witness_int(record: &FailureRecord, name: &str) -> IntValue {
    match record.inputs.get(name) {
        Some(Value::Int(value)) => *value,
        other => panic!("Expected an integer witness for {name}, got {other:?}"),
    }
}
