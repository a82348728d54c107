//! This module contains the [`Context`]: the complete symbolic machine
//! state of one execution path.

use std::{collections::HashMap, rc::Rc};

use crate::{
    error::{execution::Error, CodeLocation},
    ir::{
        assertion::{Assertion, AssertionList},
        types::Type,
        Op,
        Symbol,
    },
    interpreter::policy::CompletionReason,
    memory::{
        AllocId,
        AllocationKind,
        HeapIndex,
        Heaps,
        Pointer,
        RuntimeValue,
    },
    module::{BlockId, DataLayout, Function, IrType, Module, Operand, ValueId},
    solver::{Solver, SolverResult, SolverResultKind},
};

/// One call frame of a context.
#[derive(Clone, Debug)]
pub struct StackFrame {
    function: Rc<Function>,

    /// The basic block the program counter sits in.
    pub block: BlockId,

    /// The index of the next instruction to execute within the block.
    pub inst: usize,

    /// The block control flow arrived from, consulted by phis.
    pub prev_block: Option<BlockId>,

    variables: HashMap<ValueId, RuntimeValue>,
    result_dest: Option<ValueId>,
    allocations: Vec<(HeapIndex, AllocId)>,
}

impl StackFrame {
    /// Creates a frame at the entry of `function`.
    ///
    /// `result_dest` is the SSA value in the _caller's_ frame that receives
    /// this frame's return value when it pops.
    #[must_use]
    pub fn new(function: Rc<Function>, result_dest: Option<ValueId>) -> Self {
        Self {
            function,
            block: 0,
            inst: 0,
            prev_block: None,
            variables: HashMap::new(),
            result_dest,
            allocations: vec![],
        }
    }

    /// Gets the function this frame executes.
    #[must_use]
    pub fn function(&self) -> &Rc<Function> {
        &self.function
    }

    /// Looks up an SSA binding.
    #[must_use]
    pub fn lookup(&self, id: ValueId) -> Option<&RuntimeValue> {
        self.variables.get(&id)
    }

    /// Binds or rebinds an SSA value.
    pub fn insert(&mut self, id: ValueId, value: RuntimeValue) {
        self.variables.insert(id, value);
    }

    /// Records a stack allocation owned by this frame, to be released when
    /// the frame pops.
    pub fn record_allocation(&mut self, heap: HeapIndex, id: AllocId) {
        self.allocations.push((heap, id));
    }

    /// Materialises an operand as a runtime value against this frame's
    /// bindings.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the operand reads an undefined SSA value or has a
    /// non-scalar immediate type.
    pub fn operand_value(
        &self,
        operand: &Operand,
        layout: &DataLayout,
    ) -> Result<RuntimeValue, Error> {
        match operand {
            Operand::Var(id) => self
                .lookup(*id)
                .cloned()
                .ok_or(Error::UndefinedValue { id: id.raw() }),
            Operand::Int(value) => Ok(RuntimeValue::expr(Op::constant_int(*value))),
            Operand::Float(value) => Ok(RuntimeValue::expr(Op::constant_float(*value))),
            Operand::NullPtr { address_space } => Ok(RuntimeValue::pointer(Pointer::unresolved(
                HeapIndex::new(*address_space),
                Op::int(layout.pointer_bits, 0),
            ))),
            Operand::Undef { ty } => match ty {
                IrType::Int(width) => Ok(RuntimeValue::expr(Op::undef(Type::int(*width)))),
                IrType::Float { ebits, sbits } => {
                    Ok(RuntimeValue::expr(Op::undef(Type::float(*ebits, *sbits))))
                }
                IrType::Ptr(space) => Ok(RuntimeValue::pointer(Pointer::unresolved(
                    HeapIndex::new(*space),
                    Op::undef(Type::int(layout.pointer_bits)),
                ))),
                ty => Err(Error::TypeMismatch {
                    expected: "a scalar undef".into(),
                    found: ty.to_string(),
                }),
            },
        }
    }
}

/// An argument handed to the entry function of a path.
#[derive(Clone, Debug)]
pub enum EntryArg {
    /// A concrete (or previously built) value.
    Concrete(RuntimeValue),

    /// A fresh symbolic scalar with the given name.
    Symbolic { name: String },

    /// A pointer to a fresh allocation of `size` bytes of symbolic
    /// contents.
    SymbolicBuffer { name: String, size: u64 },
}

/// The complete symbolic machine state of one execution path: a call
/// stack, the heaps, and the path condition.
///
/// Forking a context is a container-level copy; the expression nodes
/// referenced from assertions, bindings, and heap backing arrays are
/// interned and shared between the copies.
#[derive(Clone, Debug)]
pub struct Context {
    module: Rc<Module>,
    stack: Vec<StackFrame>,
    heaps: Heaps,
    assertions: AssertionList,
    return_value: Option<RuntimeValue>,
    completion: Option<CompletionReason>,
}

impl Context {
    /// Creates the root context for a path through `function`, binding the
    /// entry arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the function does not exist, is a declaration, or
    /// an argument specification does not fit its parameter's type.
    pub fn for_entry(
        module: Rc<Module>,
        function: &str,
        args: Vec<EntryArg>,
    ) -> Result<Self, Error> {
        let func = module
            .function(function)
            .ok_or_else(|| Error::UnknownFunction {
                name: function.into(),
            })?
            .clone();
        if func.is_declaration() {
            return Err(Error::MissingFunctionBody {
                name: function.into(),
            });
        }

        let mut context = Self {
            module: module.clone(),
            stack: vec![],
            heaps: Heaps::new(),
            assertions: AssertionList::new(),
            return_value: None,
            completion: None,
        };

        let mut frame = StackFrame::new(func.clone(), None);
        for (param, arg) in func.params.iter().zip(args) {
            let value = match arg {
                EntryArg::Concrete(value) => value,
                EntryArg::Symbolic { name } => {
                    let ty = match &param.ty {
                        IrType::Int(width) => Type::int(*width),
                        IrType::Float { ebits, sbits } => Type::float(*ebits, *sbits),
                        ty => {
                            return Err(Error::TypeMismatch {
                                expected: "a scalar parameter".into(),
                                found: ty.to_string(),
                            })
                        }
                    };
                    RuntimeValue::expr(Op::symbol(Symbol::named(name), ty))
                }
                EntryArg::SymbolicBuffer { name, size } => {
                    let width = module.layout.pointer_bits;
                    let size = Op::int(width, size);
                    let data = Op::symbol_array(Symbol::named(name), size.clone());
                    let id = context.heaps.allocate(
                        HeapIndex::MAIN,
                        size,
                        data,
                        AllocationKind::Global,
                        &mut context.assertions,
                    );
                    RuntimeValue::pointer(Pointer::resolved(
                        HeapIndex::MAIN,
                        id,
                        Op::int(width, 0),
                    ))
                }
            };
            frame.insert(param.id, value);
        }

        context.stack.push(frame);
        Ok(context)
    }

    /// Gets the module this context executes.
    #[must_use]
    pub fn module(&self) -> &Rc<Module> {
        &self.module
    }

    /// Gets the data layout of the module.
    #[must_use]
    pub fn layout(&self) -> DataLayout {
        self.module.layout
    }

    /// Gets the heaps of the context.
    #[must_use]
    pub fn heaps(&self) -> &Heaps {
        &self.heaps
    }

    /// Gets the heaps of the context for modification.
    pub fn heaps_mut(&mut self) -> &mut Heaps {
        &mut self.heaps
    }

    /// Gets the path condition of the context.
    #[must_use]
    pub fn assertions(&self) -> &AssertionList {
        &self.assertions
    }

    /// Gets the path condition of the context for modification.
    pub fn assertions_mut(&mut self) -> &mut AssertionList {
        &mut self.assertions
    }

    /// Gets the depth of the call stack.
    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Gets the currently executing frame.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the context is terminal.
    pub fn top_frame(&self) -> Result<&StackFrame, Error> {
        self.stack.last().ok_or(Error::NoStackFrame)
    }

    /// Gets the currently executing frame for modification.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the context is terminal.
    pub fn top_frame_mut(&mut self) -> Result<&mut StackFrame, Error> {
        self.stack.last_mut().ok_or(Error::NoStackFrame)
    }

    /// Pushes a frame onto the call stack.
    pub fn push_frame(&mut self, frame: StackFrame) {
        self.stack.push(frame);
    }

    /// Pops the top frame, releasing its stack allocations and delivering
    /// `value` either to the caller's destination SSA value or, when the
    /// stack empties, as the path's return value.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the context is already terminal.
    pub fn pop(&mut self, value: Option<RuntimeValue>) -> Result<(), Error> {
        let frame = self.stack.pop().ok_or(Error::NoStackFrame)?;

        for (heap, id) in &frame.allocations {
            self.heaps.heap_mut(*heap).remove(*id);
        }

        match self.stack.last_mut() {
            Some(caller) => {
                if let (Some(dest), Some(value)) = (frame.result_dest, value) {
                    caller.insert(dest, value);
                }
            }
            None => self.return_value = value,
        }

        Ok(())
    }

    /// Checks whether the path has run to completion.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.stack.is_empty()
    }

    /// Gets the value the entry function returned, for terminal contexts.
    #[must_use]
    pub fn return_value(&self) -> Option<&RuntimeValue> {
        self.return_value.as_ref()
    }

    /// Gets the completion reason a step recorded for this path, if any.
    #[must_use]
    pub fn completion(&self) -> Option<CompletionReason> {
        self.completion
    }

    /// Records the completion reason for this path.
    ///
    /// The first recorded reason wins; the run loop uses this to avoid
    /// reporting a path twice.
    pub fn set_completion(&mut self, reason: CompletionReason) {
        self.completion.get_or_insert(reason);
    }

    /// Appends an assertion to the path condition.
    ///
    /// Inserting an assertion that is already present has no effect.
    pub fn add(&mut self, assertion: Assertion) {
        self.assertions.insert(assertion);
    }

    /// Asks `solver` whether the path condition plus `extra` is
    /// satisfiable, without retaining a model.
    pub fn check(&mut self, solver: &dyn Solver, extra: &Assertion) -> SolverResult {
        solver.check(&mut self.assertions, extra)
    }

    /// Asks `solver` for a model of the path condition plus `extra`.
    ///
    /// On SAT the current assertions are marked proven, which lets later
    /// trivial checks short-circuit.
    pub fn resolve(&mut self, solver: &dyn Solver, extra: &Assertion) -> SolverResult {
        let result = solver.resolve(&mut self.assertions, extra);
        if result.kind() == SolverResultKind::Sat && extra.is_constant_value(true) {
            self.assertions.mark_proven();
        }
        result
    }

    /// Resolves a pointer against the allocations it may alias under the
    /// current path condition.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a resolved pointer's allocation no longer
    /// exists.
    pub fn ptr_resolve(
        &mut self,
        solver: &dyn Solver,
        ptr: &Pointer,
    ) -> Result<Vec<Pointer>, Error> {
        let Self {
            heaps, assertions, ..
        } = self;
        heaps.resolve(solver, ptr, assertions)
    }

    /// Creates an allocation in the given heap, installing its placement
    /// assertions into the path condition.
    pub fn allocate(
        &mut self,
        heap: HeapIndex,
        size: crate::ir::OpRef,
        data: crate::ir::OpRef,
        kind: AllocationKind,
    ) -> AllocId {
        let Self {
            heaps, assertions, ..
        } = self;
        heaps.allocate(heap, size, data, kind, assertions)
    }

    /// Duplicates the context into an independent copy.
    #[must_use]
    pub fn fork_once(&self) -> Self {
        self.clone()
    }

    /// Duplicates the context into `n` independent copies.
    #[must_use]
    pub fn fork(&self, n: usize) -> Vec<Self> {
        (0..n).map(|_| self.clone()).collect()
    }

    /// Gets the location of the program counter, for error attribution.
    #[must_use]
    pub fn location(&self) -> CodeLocation {
        match self.stack.last() {
            Some(frame) => CodeLocation::new(frame.function().name.clone(), frame.block, frame.inst),
            None => CodeLocation::new("<terminal>", 0, 0),
        }
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use crate::{
        interpreter::context::{Context, EntryArg},
        ir::{assertion::Assertion, types::Type, ICmpPredicate, Op, Symbol},
        module::{builder::FunctionBuilder, IrType, Module, Operand},
    };

    fn trivial_module() -> Rc<Module> {
        let mut fb = FunctionBuilder::new("main", &[("x", IrType::Int(32))], IrType::Int(32));
        fb.ret(Some(Operand::i32(0)));
        let function = fb.build().unwrap();
        Rc::new(Module::new(
            "test",
            crate::module::DataLayout::default(),
            [function],
        ))
    }

    fn condition(n: u64) -> Assertion {
        let x = Op::symbol(Symbol::named("x"), Type::int(32));
        Assertion::new(Op::icmp(ICmpPredicate::Eq, &x, &Op::int(32, n)))
    }

    #[test]
    fn entry_contexts_bind_symbolic_arguments() -> anyhow::Result<()> {
        let module = trivial_module();
        let context = Context::for_entry(
            module,
            "main",
            vec![EntryArg::Symbolic { name: "x".into() }],
        )?;

        let frame = context.top_frame()?;
        let param = frame.function().params[0].id;
        assert!(frame.lookup(param).is_some());

        Ok(())
    }

    #[test]
    fn forked_contexts_evolve_independently() -> anyhow::Result<()> {
        let module = trivial_module();
        let mut original = Context::for_entry(
            module,
            "main",
            vec![EntryArg::Symbolic { name: "x".into() }],
        )?;

        let mut forked = original.fork_once();
        forked.add(condition(1));
        original.add(condition(2));

        assert_eq!(original.assertions().len(), 1);
        assert_eq!(forked.assertions().len(), 1);
        assert_ne!(
            original.assertions().unproven()[0],
            forked.assertions().unproven()[0]
        );

        Ok(())
    }

    #[test]
    fn popping_the_last_frame_makes_the_context_terminal() -> anyhow::Result<()> {
        let module = trivial_module();
        let mut context = Context::for_entry(
            module,
            "main",
            vec![EntryArg::Symbolic { name: "x".into() }],
        )?;

        let value = crate::memory::RuntimeValue::expr(Op::int(32, 3));
        context.pop(Some(value.clone()))?;

        assert!(context.is_terminal());
        assert_eq!(context.return_value(), Some(&value));

        Ok(())
    }

    #[test]
    fn buffer_arguments_create_a_global_allocation() -> anyhow::Result<()> {
        let module = trivial_module();
        let context = Context::for_entry(
            module,
            "main",
            vec![EntryArg::SymbolicBuffer {
                name: "buf".into(),
                size: 16,
            }],
        )?;

        let heap = context.heaps().heap(crate::memory::HeapIndex::MAIN).unwrap();
        assert_eq!(heap.len(), 1);
        // Placement assertions for the fresh allocation.
        assert!(!context.assertions().is_empty());

        Ok(())
    }
}
