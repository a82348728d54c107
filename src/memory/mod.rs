//! This module contains the symbolic memory subsystem: allocations, the
//! per-address-space heaps that own them, and the pointers into them.
//!
//! Memory is byte-granular and fully symbolic. Every allocation is backed by
//! an array expression from offsets to bytes, so reads and writes at
//! symbolic offsets stay precise and the solver sees exactly the bytes the
//! program touched. Pointer resolution, which decides the allocations an
//! address expression may refer to, is the engine's main source of forking
//! besides control flow.

pub mod allocation;
pub mod heap;
pub mod value;

pub use allocation::{Allocation, AllocationKind};
pub use heap::{AllocId, Heap, HeapIndex, Heaps, Pointer};
pub use value::{RuntimeScalar, RuntimeValue};

use crate::{
    error::execution::Error,
    ir::OpRef,
    module::{DataLayout, IrType},
};

impl Heaps {
    /// Reads a value of `ty` through a resolved pointer.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the pointer is unresolved, its allocation no
    /// longer exists, or the type cannot be stored in memory.
    pub fn read(
        &self,
        ptr: &Pointer,
        ty: &IrType,
        layout: &DataLayout,
    ) -> Result<RuntimeValue, Error> {
        let alloc = self.ptr_allocation(ptr)?;
        alloc.read(ptr.offset()?, ty, layout)
    }

    /// Writes a value of `ty` through a resolved pointer.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] under the same conditions as [`Self::read`], or if
    /// the value's shape disagrees with `ty`.
    pub fn write(
        &mut self,
        ptr: &Pointer,
        ty: &IrType,
        value: &RuntimeValue,
        layout: &DataLayout,
    ) -> Result<(), Error> {
        let writes = {
            let alloc = self.ptr_allocation(ptr)?;
            alloc.write(ptr.offset()?, ty, value, self, layout)?
        };
        self.ptr_allocation_mut(ptr)?.apply_writes(writes);
        Ok(())
    }

    /// Gets the backing data expression a resolved pointer reads from,
    /// mainly for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the pointer is unresolved or dangling.
    pub fn ptr_data(&self, ptr: &Pointer) -> Result<OpRef, Error> {
        Ok(self.ptr_allocation(ptr)?.data().clone())
    }
}

#[cfg(test)]
mod test {
    use crate::{
        ir::{assertion::AssertionList, Op},
        memory::{AllocationKind, HeapIndex, Heaps, Pointer, RuntimeValue},
        module::{DataLayout, IrType},
    };

    #[test]
    fn heap_level_write_then_read_round_trips() -> anyhow::Result<()> {
        let layout = DataLayout::default();
        let mut heaps = Heaps::new();
        let mut assertions = AssertionList::new();

        let size = Op::int(64, 8);
        let data = Op::alloc_array(&size, &Op::int(8, 0));
        let id = heaps.allocate(
            HeapIndex::MAIN,
            size,
            data,
            AllocationKind::Heap,
            &mut assertions,
        );

        let ptr = Pointer::resolved(HeapIndex::MAIN, id, Op::int(64, 0));
        let value = RuntimeValue::expr(Op::int(64, 0x0102_0304_0506_0708));
        heaps.write(&ptr, &IrType::Int(64), &value, &layout)?;

        assert_eq!(heaps.read(&ptr, &IrType::Int(64), &layout)?, value);
        Ok(())
    }

    #[test]
    fn pointers_stored_in_memory_read_back_as_pointers() -> anyhow::Result<()> {
        let layout = DataLayout::default();
        let mut heaps = Heaps::new();
        let mut assertions = AssertionList::new();

        let size = Op::int(64, 16);
        let data = Op::alloc_array(&size, &Op::int(8, 0));
        let id = heaps.allocate(
            HeapIndex::MAIN,
            size,
            data,
            AllocationKind::Heap,
            &mut assertions,
        );

        let slot = Pointer::resolved(HeapIndex::MAIN, id, Op::int(64, 0));
        let target = Pointer::unresolved(HeapIndex::MAIN, Op::int(64, 0x1000));
        heaps.write(
            &slot,
            &IrType::Ptr(0),
            &RuntimeValue::pointer(target.clone()),
            &layout,
        )?;

        let read = heaps.read(&slot, &IrType::Ptr(0), &layout)?;
        let read_ptr = read.scalar()?.pointer()?.clone();
        assert!(!read_ptr.is_resolved());
        // A concrete address survives the byte-level round trip because the
        // reassembly folds back to the same constant.
        assert_eq!(read_ptr.value(&heaps)?, target.value(&heaps)?);

        Ok(())
    }
}
