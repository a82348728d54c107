//! This module contains the heaps of a context and the pointers into them.

use std::{collections::BTreeMap, fmt::Display};

use crate::{
    error::execution::Error,
    ir::{
        assertion::{Assertion, AssertionList},
        types::Type,
        ICmpPredicate,
        Op,
        OpRef,
        Symbol,
    },
    memory::allocation::{Allocation, AllocationKind},
    solver::{Solver, SolverResultKind},
};

/// The alignment every allocation's base address is constrained to, in
/// bytes.
///
/// Matching the strictest natural scalar alignment keeps accesses at
/// naturally aligned offsets provably aligned, while still letting the
/// engine witness genuinely misaligned accesses through offset
/// arithmetic.
pub const ALLOCATION_ALIGN_BYTES: u32 = 16;

/// The identifier of a heap, corresponding to an address space of the
/// program.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct HeapIndex(u32);

impl HeapIndex {
    /// The heap of the default address space.
    pub const MAIN: HeapIndex = HeapIndex(0);

    /// Constructs the heap index for an address space.
    #[must_use]
    pub fn new(address_space: u32) -> Self {
        Self(address_space)
    }

    /// Gets the raw address space number.
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl Display for HeapIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "heap{}", self.0)
    }
}

/// The identifier of an allocation within its heap.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AllocId(u32);

impl AllocId {
    /// Gets the raw allocation number.
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl Display for AllocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "a{}", self.0)
    }
}

/// A pointer into a heap.
///
/// A pointer is either _resolved_, in which case it names an allocation and
/// an offset within it, or _unresolved_, in which case it is a bare address
/// expression that has yet to be matched against the candidate allocations
/// of its heap. Two pointers are equal iff they agree on heap, allocation,
/// and offset expression.
#[derive(Clone, Debug, PartialEq)]
pub struct Pointer {
    heap: HeapIndex,
    data: PointerData,
}

#[derive(Clone, Debug, PartialEq)]
enum PointerData {
    Resolved { alloc: AllocId, offset: OpRef },
    Unresolved { address: OpRef },
}

impl Pointer {
    /// Constructs a resolved pointer to `offset` bytes into `alloc`.
    #[must_use]
    pub fn resolved(heap: HeapIndex, alloc: AllocId, offset: OpRef) -> Self {
        Self {
            heap,
            data: PointerData::Resolved { alloc, offset },
        }
    }

    /// Constructs an unresolved pointer holding a bare address expression.
    #[must_use]
    pub fn unresolved(heap: HeapIndex, address: OpRef) -> Self {
        Self {
            heap,
            data: PointerData::Unresolved { address },
        }
    }

    /// Gets the heap the pointer points into.
    #[must_use]
    pub fn heap(&self) -> HeapIndex {
        self.heap
    }

    /// Checks whether the pointer has been resolved to an allocation.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self.data, PointerData::Resolved { .. })
    }

    /// Gets the allocation of a resolved pointer.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the pointer is unresolved.
    pub fn alloc(&self) -> Result<AllocId, Error> {
        match &self.data {
            PointerData::Resolved { alloc, .. } => Ok(*alloc),
            PointerData::Unresolved { .. } => Err(Error::UnresolvedPointer),
        }
    }

    /// Gets the offset expression of a resolved pointer.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the pointer is unresolved.
    pub fn offset(&self) -> Result<&OpRef, Error> {
        match &self.data {
            PointerData::Resolved { offset, .. } => Ok(offset),
            PointerData::Unresolved { .. } => Err(Error::UnresolvedPointer),
        }
    }

    /// Gets the address projection of the pointer: `base + offset` for a
    /// resolved pointer, the bare address expression otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a resolved pointer's allocation no longer exists.
    pub fn value(&self, heaps: &Heaps) -> Result<OpRef, Error> {
        match &self.data {
            PointerData::Resolved { offset, .. } => {
                let alloc = heaps.ptr_allocation(self)?;
                Ok(Op::add(alloc.base(), offset))
            }
            PointerData::Unresolved { address } => Ok(address.clone()),
        }
    }
}

impl Display for Pointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.data {
            PointerData::Resolved { alloc, offset } => {
                write!(f, "{}:{}+{}", self.heap, alloc, offset)
            }
            PointerData::Unresolved { address } => write!(f, "{}:?{}", self.heap, address),
        }
    }
}

/// A single heap: the set of live allocations of one address space.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Heap {
    allocations: BTreeMap<AllocId, Allocation>,
    next: u32,
}

impl Heap {
    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `allocation` into the heap under a fresh identifier.
    pub fn insert(&mut self, allocation: Allocation) -> AllocId {
        let id = AllocId(self.next);
        self.next += 1;
        self.allocations.insert(id, allocation);
        id
    }

    /// Removes an allocation, returning it if it was present.
    pub fn remove(&mut self, id: AllocId) -> Option<Allocation> {
        self.allocations.remove(&id)
    }

    /// Looks up an allocation.
    #[must_use]
    pub fn get(&self, id: AllocId) -> Option<&Allocation> {
        self.allocations.get(&id)
    }

    /// Looks up an allocation for modification.
    pub fn get_mut(&mut self, id: AllocId) -> Option<&mut Allocation> {
        self.allocations.get_mut(&id)
    }

    /// Iterates over the live allocations in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (AllocId, &Allocation)> {
        self.allocations.iter().map(|(id, alloc)| (*id, alloc))
    }

    /// Gets the number of live allocations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    /// Checks whether the heap has no live allocations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }
}

/// The heaps of a context, one per address space in use.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Heaps {
    heaps: BTreeMap<HeapIndex, Heap>,
    next_name: u64,
}

impl Heaps {
    /// Creates an empty set of heaps.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the heap of an address space, if it has ever been allocated
    /// into.
    #[must_use]
    pub fn heap(&self, index: HeapIndex) -> Option<&Heap> {
        self.heaps.get(&index)
    }

    /// Gets the heap of an address space, creating it on first use.
    pub fn heap_mut(&mut self, index: HeapIndex) -> &mut Heap {
        self.heaps.entry(index).or_default()
    }

    /// Creates a new allocation of `size` bytes backed by `data` in the
    /// given heap.
    ///
    /// The allocation's base address is a fresh symbolic constant. The
    /// assertions that position it (non-null, aligned to
    /// [`ALLOCATION_ALIGN_BYTES`], non-wrapping, and disjoint from every
    /// allocation already live in the heap) are appended to `assertions`.
    pub fn allocate(
        &mut self,
        heap: HeapIndex,
        size: OpRef,
        data: OpRef,
        kind: AllocationKind,
        assertions: &mut AssertionList,
    ) -> AllocId {
        let width = size.ty().bitwidth();
        let name = self.next_name;
        self.next_name += 1;
        let base = Op::symbol(Symbol::numbered(name), Type::int(width));

        let zero = Op::int(width, 0);
        assertions.insert(Assertion::new(Op::icmp(ICmpPredicate::Ne, &base, &zero)));

        let mask = Op::int(width, u64::from(ALLOCATION_ALIGN_BYTES - 1));
        assertions.insert(Assertion::new(Op::icmp(
            ICmpPredicate::Eq,
            &Op::and(&base, &mask),
            &zero,
        )));

        let end = Op::add(&base, &size);
        assertions.insert(Assertion::new(Op::icmp(ICmpPredicate::Uge, &end, &base)));

        for (_, other) in self.heap_mut(heap).iter() {
            let other_end = Op::add(other.base(), other.size());
            let below = Op::icmp(ICmpPredicate::Ule, &end, other.base());
            let above = Op::icmp(ICmpPredicate::Uge, &base, &other_end);
            assertions.insert(Assertion::new(Op::or(&below, &above)));
        }

        let allocation = Allocation::new(base, size, data, kind);
        self.heap_mut(heap).insert(allocation)
    }

    /// Gets the allocation a resolved pointer refers to.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the pointer is unresolved or its allocation no
    /// longer exists.
    pub fn ptr_allocation(&self, ptr: &Pointer) -> Result<&Allocation, Error> {
        let id = ptr.alloc()?;
        self.heap(ptr.heap())
            .and_then(|heap| heap.get(id))
            .ok_or(Error::NoSuchAllocation {
                heap: ptr.heap().raw(),
                id: id.raw(),
            })
    }

    /// Gets the allocation a resolved pointer refers to, for modification.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the pointer is unresolved or its allocation no
    /// longer exists.
    pub fn ptr_allocation_mut(&mut self, ptr: &Pointer) -> Result<&mut Allocation, Error> {
        let id = ptr.alloc()?;
        let heap = ptr.heap();
        self.heaps
            .get_mut(&heap)
            .and_then(|h| h.get_mut(id))
            .ok_or(Error::NoSuchAllocation {
                heap: heap.raw(),
                id: id.raw(),
            })
    }

    /// Builds the assertion that accessing `len` bytes through `ptr` is
    /// valid.
    ///
    /// For a resolved pointer this is its allocation's inbounds check; a
    /// resolved pointer whose allocation has been freed is simply invalid.
    /// For an unresolved pointer it is the disjunction, over every
    /// allocation in the pointer's heap, of the inbounds check of the
    /// pointer's address relative to that allocation; with no allocations
    /// the access is invalid.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the pointer is malformed.
    pub fn check_valid(&self, ptr: &Pointer, len: u32) -> Result<Assertion, Error> {
        if ptr.is_resolved() {
            let Ok(alloc) = self.ptr_allocation(ptr) else {
                return Ok(Assertion::constant(false));
            };
            return Ok(alloc.check_inbounds(ptr.offset()?, len));
        }

        let address = ptr.value(self)?;
        let Some(heap) = self.heap(ptr.heap()) else {
            return Ok(Assertion::constant(false));
        };

        let mut valid = Op::bool(false);
        for (_, alloc) in heap.iter() {
            let relative = Op::sub(&address, alloc.base());
            let inbounds = alloc.check_inbounds(&relative, len);
            valid = Op::or(&valid, inbounds.value());
        }
        Ok(Assertion::new(valid))
    }

    /// Resolves a pointer against the allocations it may alias.
    ///
    /// An already-resolved pointer resolves to itself, or to nothing when
    /// its allocation has been freed. Otherwise each allocation of the
    /// pointer's heap is queried in identifier order: the allocation is a
    /// candidate if the path condition extended with "the address falls
    /// inside this allocation" is satisfiable. Each candidate yields a
    /// resolved pointer whose offset is the address relative to that
    /// allocation's base.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the pointer is malformed.
    pub fn resolve(
        &self,
        solver: &dyn Solver,
        ptr: &Pointer,
        assertions: &mut AssertionList,
    ) -> Result<Vec<Pointer>, Error> {
        if ptr.is_resolved() {
            if self.ptr_allocation(ptr).is_err() {
                return Ok(vec![]);
            }
            return Ok(vec![ptr.clone()]);
        }

        let address = ptr.value(self)?;
        let Some(heap) = self.heap(ptr.heap()) else {
            return Ok(vec![]);
        };

        let mut candidates = Vec::new();
        for (id, alloc) in heap.iter() {
            let relative = Op::sub(&address, alloc.base());
            let aliases = alloc.check_inbounds(&relative, 1);

            let result = solver.check(assertions, &aliases);
            tracing::trace!(
                allocation = %id,
                result = ?result.kind(),
                "Pointer aliasing query"
            );
            if result.kind() == SolverResultKind::Sat {
                candidates.push(Pointer::resolved(ptr.heap(), id, relative));
            }
        }

        Ok(candidates)
    }
}

#[cfg(test)]
mod test {
    use crate::{
        ir::{assertion::AssertionList, types::Type, Op, Symbol},
        memory::{
            allocation::AllocationKind,
            heap::{HeapIndex, Heaps, Pointer},
        },
    };

    fn new_allocation(heaps: &mut Heaps, assertions: &mut AssertionList, bytes: u64) -> super::AllocId {
        let size = Op::int(64, bytes);
        let data = Op::alloc_array(&size, &Op::int(8, 0));
        heaps.allocate(HeapIndex::MAIN, size, data, AllocationKind::Heap, assertions)
    }

    #[test]
    fn allocation_installs_placement_assertions() {
        let mut heaps = Heaps::new();
        let mut assertions = AssertionList::new();

        let first = new_allocation(&mut heaps, &mut assertions, 8);
        // Non-null, aligned, and non-wrapping.
        assert_eq!(assertions.len(), 3);

        let second = new_allocation(&mut heaps, &mut assertions, 8);
        // The second allocation also carries a disjointness assertion.
        assert_eq!(assertions.len(), 7);
        assert_ne!(first, second);
    }

    #[test]
    fn resolved_pointers_project_to_base_plus_offset() -> anyhow::Result<()> {
        let mut heaps = Heaps::new();
        let mut assertions = AssertionList::new();
        let id = new_allocation(&mut heaps, &mut assertions, 8);

        let offset = Op::int(64, 4);
        let ptr = Pointer::resolved(HeapIndex::MAIN, id, offset.clone());
        let value = ptr.value(&heaps)?;

        let base = heaps.ptr_allocation(&ptr)?.base().clone();
        assert!(std::rc::Rc::ptr_eq(&value, &Op::add(&base, &offset)));

        Ok(())
    }

    #[test]
    fn validity_of_an_empty_heap_is_trivially_false() -> anyhow::Result<()> {
        let heaps = Heaps::new();
        let address = Op::symbol(Symbol::named("p"), Type::int(64));
        let ptr = Pointer::unresolved(HeapIndex::MAIN, address);

        let valid = heaps.check_valid(&ptr, 1)?;
        assert!(valid.is_constant_value(false));

        Ok(())
    }

    #[test]
    fn dangling_resolved_pointers_are_detected() {
        let mut heaps = Heaps::new();
        let mut assertions = AssertionList::new();
        let id = new_allocation(&mut heaps, &mut assertions, 8);

        let ptr = Pointer::resolved(HeapIndex::MAIN, id, Op::int(64, 0));
        heaps.heap_mut(HeapIndex::MAIN).remove(id);

        assert!(heaps.ptr_allocation(&ptr).is_err());
    }
}
