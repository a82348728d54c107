//! This module contains assertions and the ordered assertion lists that form
//! the path condition of a context.

use std::{
    fmt::{Display, Formatter},
    ops::{Deref, DerefMut},
    rc::Rc,
};

use crate::ir::{Op, OpRef};

/// A boolean-valued predicate attached to a path condition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Assertion {
    value: OpRef,
}

impl Assertion {
    /// Constructs an assertion from a boolean expression.
    ///
    /// # Panics
    ///
    /// Panics if the expression is not boolean-typed; asserting anything
    /// else is a programmer bug.
    #[must_use]
    pub fn new(value: OpRef) -> Self {
        assert!(
            value.ty().is_bool(),
            "Assertions must be boolean but got {}",
            value.ty()
        );
        Self { value }
    }

    /// Constructs the constant assertion for `value`.
    #[must_use]
    pub fn constant(value: bool) -> Self {
        Self::new(Op::bool(value))
    }

    /// Gets the underlying boolean expression.
    #[must_use]
    pub fn value(&self) -> &OpRef {
        &self.value
    }

    /// Checks whether the assertion is the boolean constant `value`.
    #[must_use]
    pub fn is_constant_value(&self, value: bool) -> bool {
        self.value.is_constant_int(u64::from(value))
    }

    /// Builds the negation of this assertion.
    #[must_use]
    pub fn negate(&self) -> Self {
        Self::new(Op::not(&self.value))
    }
}

impl Display for Assertion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// A point in an assertion list that [`AssertionList::restore`] can roll
/// back to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Checkpoint {
    unproven: usize,
    proven: usize,
}

/// An insertion-ordered sequence of assertions, split into a part the
/// solver has already discharged as satisfiable and a part it has not.
///
/// The split only caches satisfiability work: the path condition is always
/// the conjunction of both parts, and permuting the sequence does not change
/// its meaning.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AssertionList {
    unproven: Vec<Assertion>,
    proven: Vec<Assertion>,
}

impl AssertionList {
    /// Creates an empty assertion list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `assertion` to the unproven part of the list.
    ///
    /// Constant-true assertions are dropped, and an assertion that is
    /// already present (structurally, which after interning is pointer
    /// identity) is not added again.
    pub fn insert(&mut self, assertion: Assertion) {
        if assertion.is_constant_value(true) {
            return;
        }
        let duplicate = self
            .iter()
            .any(|existing| Rc::ptr_eq(existing.value(), assertion.value()));
        if duplicate {
            return;
        }
        self.unproven.push(assertion);
    }

    /// Gets the assertions not yet discharged by a solver.
    #[must_use]
    pub fn unproven(&self) -> &[Assertion] {
        self.unproven.as_slice()
    }

    /// Gets the assertions a solver has already found jointly satisfiable.
    #[must_use]
    pub fn proven(&self) -> &[Assertion] {
        self.proven.as_slice()
    }

    /// Moves every unproven assertion into the proven part.
    ///
    /// Callers may only do this after a solver has reported the full
    /// conjunction satisfiable, and never between a checkpoint and its
    /// restore.
    pub fn mark_proven(&mut self) {
        self.proven.append(&mut self.unproven);
    }

    /// Iterates over the assertions, unproven first.
    pub fn iter(&self) -> impl Iterator<Item = &Assertion> {
        self.unproven.iter().chain(self.proven.iter())
    }

    /// Gets the total number of assertions in the list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.unproven.len() + self.proven.len()
    }

    /// Checks whether the list holds no assertions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records the current extent of the list for a later
    /// [`Self::restore`].
    #[must_use]
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            unproven: self.unproven.len(),
            proven: self.proven.len(),
        }
    }

    /// Truncates both parts of the list back to the extent they had when
    /// `checkpoint` was taken.
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.unproven.truncate(checkpoint.unproven);
        self.proven.truncate(checkpoint.proven);
    }

    /// Takes a checkpoint and wraps the list in a guard that restores it
    /// when dropped, covering every exit path of the enclosing scope.
    pub fn scoped(&mut self) -> ScopedRestore<'_> {
        let checkpoint = self.checkpoint();
        ScopedRestore {
            list: self,
            checkpoint,
        }
    }
}

impl<'a> IntoIterator for &'a AssertionList {
    type IntoIter = std::iter::Chain<
        std::slice::Iter<'a, Assertion>,
        std::slice::Iter<'a, Assertion>,
    >;
    type Item = &'a Assertion;

    fn into_iter(self) -> Self::IntoIter {
        self.unproven.iter().chain(self.proven.iter())
    }
}

/// A guard over an assertion list that rolls the list back to a checkpoint
/// when it goes out of scope.
#[derive(Debug)]
pub struct ScopedRestore<'a> {
    list: &'a mut AssertionList,
    checkpoint: Checkpoint,
}

impl Deref for ScopedRestore<'_> {
    type Target = AssertionList;

    fn deref(&self) -> &Self::Target {
        self.list
    }
}

impl DerefMut for ScopedRestore<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.list
    }
}

impl Drop for ScopedRestore<'_> {
    fn drop(&mut self) {
        self.list.restore(self.checkpoint);
    }
}

#[cfg(test)]
mod test {
    use crate::ir::{
        assertion::{Assertion, AssertionList},
        types::Type,
        ICmpPredicate,
        Op,
        Symbol,
    };

    fn example(n: u64) -> Assertion {
        let x = Op::symbol(Symbol::named("x"), Type::int(32));
        Assertion::new(Op::icmp(ICmpPredicate::Eq, &x, &Op::int(32, n)))
    }

    #[test]
    fn insert_appends_to_the_unproven_part() {
        let mut list = AssertionList::new();
        list.insert(example(1));
        list.insert(example(2));

        assert_eq!(list.unproven().len(), 2);
        assert!(list.proven().is_empty());
    }

    #[test]
    fn insert_drops_trivial_and_duplicate_assertions() {
        let mut list = AssertionList::new();
        list.insert(Assertion::constant(true));
        assert!(list.is_empty());

        list.insert(example(1));
        list.insert(example(1));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn restore_rewinds_to_the_checkpoint() {
        let mut list = AssertionList::new();
        list.insert(example(1));

        let before = list.clone();
        let checkpoint = list.checkpoint();
        list.insert(example(2));
        list.insert(example(3));
        list.restore(checkpoint);

        assert_eq!(list, before);
    }

    #[test]
    fn scoped_guard_restores_on_drop() {
        let mut list = AssertionList::new();
        list.insert(example(1));

        {
            let mut guard = list.scoped();
            guard.insert(example(2));
            assert_eq!(guard.len(), 2);
        }

        assert_eq!(list.len(), 1);
    }

    #[test]
    fn iteration_yields_unproven_then_proven() {
        let mut list = AssertionList::new();
        list.insert(example(1));
        list.mark_proven();
        list.insert(example(2));

        let order: Vec<String> = list.iter().map(ToString::to_string).collect();
        assert_eq!(order.len(), 2);
        assert!(order[0].contains("0x2"));
        assert!(order[1].contains("0x1"));
    }
}
