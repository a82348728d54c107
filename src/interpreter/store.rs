//! This module contains the execution context store: the pluggable queue of
//! contexts awaiting exploration.

use std::collections::VecDeque;

use crate::interpreter::context::Context;

/// The queue of pending contexts.
///
/// The store decides the global exploration order: the interpreter hands it
/// every fork and asks it for the next context to run, so a FIFO store
/// explores breadth-first, a LIFO store depth-first, and richer
/// implementations can prioritise however they like. The set of terminal
/// contexts reached is the same for any order; only the order of failure
/// reports changes.
pub trait ExecutionContextStore {
    /// Adds a context to the store.
    fn add_context(&mut self, ctx: Context);

    /// Removes and returns the next context to execute, or [`None`] when
    /// the store is drained.
    fn next_context(&mut self) -> Option<Context>;

    /// Gets the number of contexts currently queued.
    fn len(&self) -> usize;

    /// Checks whether the store has no queued contexts.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A store that explores contexts in the order they were produced.
#[derive(Clone, Debug, Default)]
pub struct FifoContextStore {
    queue: VecDeque<Context>,
}

impl FifoContextStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionContextStore for FifoContextStore {
    fn add_context(&mut self, ctx: Context) {
        self.queue.push_back(ctx);
    }

    fn next_context(&mut self) -> Option<Context> {
        self.queue.pop_front()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

/// A store that always explores the most recently forked context first.
#[derive(Clone, Debug, Default)]
pub struct LifoContextStore {
    stack: Vec<Context>,
}

impl LifoContextStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionContextStore for LifoContextStore {
    fn add_context(&mut self, ctx: Context) {
        self.stack.push(ctx);
    }

    fn next_context(&mut self) -> Option<Context> {
        self.stack.pop()
    }

    fn len(&self) -> usize {
        self.stack.len()
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use crate::{
        interpreter::{
            context::Context,
            store::{ExecutionContextStore, FifoContextStore, LifoContextStore},
        },
        module::{builder::FunctionBuilder, IrType, Module},
    };

    fn contexts(n: usize) -> Vec<Context> {
        let mut fb = FunctionBuilder::new("main", &[], IrType::Void);
        fb.ret(None);
        let module = Rc::new(Module::new(
            "test",
            crate::module::DataLayout::default(),
            [fb.build().unwrap()],
        ));
        (0..n)
            .map(|_| Context::for_entry(module.clone(), "main", vec![]).unwrap())
            .collect()
    }

    #[test]
    fn fifo_store_explores_in_insertion_order() {
        let mut store = FifoContextStore::new();
        for (i, mut ctx) in contexts(3).into_iter().enumerate() {
            ctx.top_frame_mut().unwrap().inst = i;
            store.add_context(ctx);
        }

        assert_eq!(store.len(), 3);
        for expected in 0..3 {
            let ctx = store.next_context().unwrap();
            assert_eq!(ctx.top_frame().unwrap().inst, expected);
        }
        assert!(store.is_empty());
    }

    #[test]
    fn lifo_store_explores_most_recent_first() {
        let mut store = LifoContextStore::new();
        for (i, mut ctx) in contexts(3).into_iter().enumerate() {
            ctx.top_frame_mut().unwrap().inst = i;
            store.add_context(ctx);
        }

        for expected in (0..3).rev() {
            let ctx = store.next_context().unwrap();
            assert_eq!(ctx.top_frame().unwrap().inst, expected);
        }
    }
}
