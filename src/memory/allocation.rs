//! This module contains the definition of a single symbolic allocation.

use itertools::Itertools;

use crate::{
    error::execution::Error,
    ir::{assertion::Assertion, ICmpPredicate, Op, OpRef},
    memory::{value::RuntimeValue, Heaps},
    module::{DataLayout, Endian, IrType},
};

/// The provenance of an allocation, used to phrase diagnostics and to
/// release stack allocations when their frame pops.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AllocationKind {
    /// Created by an `alloca` and owned by a stack frame.
    Stack,

    /// Created by an allocation built-in such as `malloc`.
    Heap,

    /// Created before execution started, e.g. for a symbolic input buffer.
    Global,
}

/// A contiguous symbolic region of bytes.
///
/// An allocation has a symbolic base address, a symbolic size, and a backing
/// array expression mapping offsets (bit-vectors of the pointer width) to
/// byte expressions. Typed values are decomposed into these bytes on the way
/// in and reassembled on the way out, following the module's data layout.
#[derive(Clone, Debug, PartialEq)]
pub struct Allocation {
    base: OpRef,
    size: OpRef,
    data: OpRef,
    kind: AllocationKind,
}

impl Allocation {
    /// Constructs an allocation from its parts.
    ///
    /// # Panics
    ///
    /// Panics if `base` and `size` widths disagree or `data` is not an
    /// array; constructing such an allocation is a programmer bug.
    #[must_use]
    pub fn new(base: OpRef, size: OpRef, data: OpRef, kind: AllocationKind) -> Self {
        assert_eq!(base.ty(), size.ty(), "Allocation base and size widths disagree");
        assert!(data.ty().is_array(), "Allocation backing must be an array");
        Self {
            base,
            size,
            data,
            kind,
        }
    }

    /// Gets the symbolic base address of the allocation.
    #[must_use]
    pub fn base(&self) -> &OpRef {
        &self.base
    }

    /// Gets the symbolic size of the allocation in bytes.
    #[must_use]
    pub fn size(&self) -> &OpRef {
        &self.size
    }

    /// Gets the backing array expression.
    #[must_use]
    pub fn data(&self) -> &OpRef {
        &self.data
    }

    /// Gets the provenance of the allocation.
    #[must_use]
    pub fn kind(&self) -> AllocationKind {
        self.kind
    }

    /// Replaces the backing array expression after a write.
    pub fn set_data(&mut self, data: OpRef) {
        assert_eq!(data.ty(), self.data.ty(), "Backing array type changed");
        self.data = data;
    }

    /// Builds the assertion that an access of `len` bytes at `offset` stays
    /// inside the allocation.
    ///
    /// The arithmetic is wrap-safe at the pointer width: the access is in
    /// bounds iff `size >= len` and `offset <= size - len`, neither of which
    /// can wrap.
    #[must_use]
    pub fn check_inbounds(&self, offset: &OpRef, len: u32) -> Assertion {
        let width = self.size.ty().bitwidth();
        let len = Op::int(width, u64::from(len));
        let fits = Op::icmp(ICmpPredicate::Uge, &self.size, &len);
        let room = Op::icmp(ICmpPredicate::Ule, offset, &Op::sub(&self.size, &len));
        Assertion::new(Op::and(&fits, &room))
    }

    /// Reads a value of `ty` at `offset` bytes into the allocation.
    ///
    /// Scalars are reassembled from their bytes per the layout's
    /// endianness; pointer-typed cells come back as unresolved pointers;
    /// vectors and aggregates are read field-by-field at their layout
    /// offsets.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `ty` cannot be stored in memory.
    pub fn read(
        &self,
        offset: &OpRef,
        ty: &IrType,
        layout: &DataLayout,
    ) -> Result<RuntimeValue, Error> {
        use crate::memory::{HeapIndex, Pointer};

        let width = self.size.ty().bitwidth();
        let at = |extra: u32| {
            if extra == 0 {
                offset.clone()
            } else {
                Op::add(offset, &Op::int(width, u64::from(extra)))
            }
        };

        match ty {
            IrType::Int(bits) => {
                let expr = self.read_int(offset, *bits, layout);
                Ok(RuntimeValue::expr(expr))
            }
            IrType::Float { ebits, sbits } => {
                let raw = self.read_int(offset, ebits + sbits, layout);
                let float = Op::bitcast(&raw, crate::ir::types::Type::float(*ebits, *sbits));
                Ok(RuntimeValue::expr(float))
            }
            IrType::Ptr(space) => {
                let raw = self.read_int(offset, layout.pointer_bits, layout);
                Ok(RuntimeValue::pointer(Pointer::unresolved(
                    HeapIndex::new(*space),
                    raw,
                )))
            }
            IrType::Vector { elem, count } => {
                let stride = layout.store_size(elem);
                let mut scalars = Vec::with_capacity(*count as usize);
                for i in 0..*count {
                    let value = self.read(&at(i * stride), elem, layout)?;
                    match value {
                        RuntimeValue::Scalar(scalar) => scalars.push(scalar),
                        _ => return Err(Error::NotAScalar),
                    }
                }
                Ok(RuntimeValue::Vector(scalars))
            }
            IrType::Array { elem, count } => {
                let stride = layout.alloc_size(elem);
                let values = (0..*count)
                    .map(|i| self.read(&at(i * stride), elem, layout))
                    .try_collect()?;
                Ok(RuntimeValue::Aggregate(values))
            }
            IrType::Struct { fields, packed } => {
                let (offsets, _) = layout.struct_layout(fields, *packed);
                let values = fields
                    .iter()
                    .zip(offsets)
                    .map(|(field, field_offset)| self.read(&at(field_offset), field, layout))
                    .try_collect()?;
                Ok(RuntimeValue::Aggregate(values))
            }
            IrType::Void => Err(Error::UnstorableType {
                ty: ty.to_string(),
            }),
        }
    }

    /// Computes the byte-level updates that writing `value` of `ty` at
    /// `offset` produces, without applying them.
    ///
    /// The write is split from its application so that encoding can consult
    /// the heaps (pointer scalars are stored as their address projection)
    /// while the allocation still sits inside them. Apply the result with
    /// [`Self::apply_writes`].
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the value's shape disagrees with `ty`, or `ty`
    /// cannot be stored in memory.
    pub fn write(
        &self,
        offset: &OpRef,
        ty: &IrType,
        value: &RuntimeValue,
        heaps: &Heaps,
        layout: &DataLayout,
    ) -> Result<Vec<(OpRef, OpRef)>, Error> {
        let width = self.size.ty().bitwidth();
        let at = |extra: u32| {
            if extra == 0 {
                offset.clone()
            } else {
                Op::add(offset, &Op::int(width, u64::from(extra)))
            }
        };

        match ty {
            IrType::Int(bits) => {
                let expr = value.scalar()?.to_expr(heaps)?;
                Ok(self.encode_int(offset, &expr, *bits, layout))
            }
            IrType::Float { ebits, sbits } => {
                let expr = value.scalar()?.expr()?.clone();
                let bits = ebits + sbits;
                let raw = Op::bitcast(&expr, crate::ir::types::Type::int(bits));
                Ok(self.encode_int(offset, &raw, bits, layout))
            }
            IrType::Ptr(_) => {
                let expr = value.scalar()?.to_expr(heaps)?;
                Ok(self.encode_int(offset, &expr, layout.pointer_bits, layout))
            }
            IrType::Vector { elem, count } => {
                let RuntimeValue::Vector(scalars) = value else {
                    return Err(Error::TypeMismatch {
                        expected: ty.to_string(),
                        found: "non-vector value".into(),
                    });
                };
                let stride = layout.store_size(elem);
                let mut writes = Vec::new();
                for (i, scalar) in (0..*count).zip_eq(scalars) {
                    let member = RuntimeValue::Scalar(scalar.clone());
                    writes.extend(self.write(&at(i * stride), elem, &member, heaps, layout)?);
                }
                Ok(writes)
            }
            IrType::Array { elem, count } => {
                let RuntimeValue::Aggregate(members) = value else {
                    return Err(Error::TypeMismatch {
                        expected: ty.to_string(),
                        found: "non-aggregate value".into(),
                    });
                };
                let stride = layout.alloc_size(elem);
                let mut writes = Vec::new();
                for (i, member) in (0..*count).zip_eq(members) {
                    writes.extend(self.write(&at(i * stride), elem, member, heaps, layout)?);
                }
                Ok(writes)
            }
            IrType::Struct { fields, packed } => {
                let RuntimeValue::Aggregate(members) = value else {
                    return Err(Error::TypeMismatch {
                        expected: ty.to_string(),
                        found: "non-aggregate value".into(),
                    });
                };
                let (offsets, _) = layout.struct_layout(fields, *packed);
                let mut writes = Vec::new();
                for ((field, field_offset), member) in
                    fields.iter().zip(offsets).zip_eq(members)
                {
                    writes.extend(self.write(&at(field_offset), field, member, heaps, layout)?);
                }
                Ok(writes)
            }
            IrType::Void => Err(Error::UnstorableType {
                ty: ty.to_string(),
            }),
        }
    }

    /// Applies byte-level updates produced by [`Self::write`] to the
    /// backing array.
    pub fn apply_writes(&mut self, writes: Vec<(OpRef, OpRef)>) {
        let mut data = self.data.clone();
        for (index, byte) in writes {
            data = Op::store(&data, &index, &byte);
        }
        self.data = data;
    }

    /// Assembles an integer of `bits` bits from the allocation's bytes at
    /// `offset`.
    fn read_int(&self, offset: &OpRef, bits: u32, layout: &DataLayout) -> OpRef {
        let width = self.size.ty().bitwidth();
        let count = (bits + 7) / 8;
        let total = count * 8;

        let mut bytes = (0..count)
            .map(|i| {
                let index = if i == 0 {
                    offset.clone()
                } else {
                    Op::add(offset, &Op::int(width, u64::from(i)))
                };
                Op::load(&self.data, &index)
            })
            .collect::<Vec<_>>();
        if layout.endian == Endian::Big {
            bytes.reverse();
        }

        // Least-significant byte first from here on.
        let mut value = if total == 8 {
            bytes[0].clone()
        } else {
            Op::zext(&bytes[0], total)
        };
        for (i, byte) in bytes.iter().enumerate().skip(1) {
            let shifted = Op::binary(
                crate::ir::BinaryOp::Shl,
                &Op::zext(byte, total),
                &Op::int(total, u64::from(i as u32) * 8),
            );
            value = Op::or(&value, &shifted);
        }

        if bits < total {
            value = Op::trunc(&value, bits);
        }
        value
    }

    /// Splits an integer expression of `bits` bits into per-byte updates at
    /// `offset`.
    fn encode_int(
        &self,
        offset: &OpRef,
        value: &OpRef,
        bits: u32,
        layout: &DataLayout,
    ) -> Vec<(OpRef, OpRef)> {
        let width = self.size.ty().bitwidth();
        let count = (bits + 7) / 8;
        let total = count * 8;
        let wide = if bits < total {
            Op::zext(value, total)
        } else {
            value.clone()
        };

        let mut bytes = (0..count)
            .map(|i| {
                let shifted = if i == 0 {
                    wide.clone()
                } else {
                    Op::binary(
                        crate::ir::BinaryOp::LShr,
                        &wide,
                        &Op::int(total, u64::from(i) * 8),
                    )
                };
                if total == 8 {
                    shifted
                } else {
                    Op::trunc(&shifted, 8)
                }
            })
            .collect::<Vec<_>>();
        if layout.endian == Endian::Big {
            bytes.reverse();
        }

        bytes
            .into_iter()
            .enumerate()
            .map(|(i, byte)| {
                let index = if i == 0 {
                    offset.clone()
                } else {
                    Op::add(offset, &Op::int(width, i as u64))
                };
                (index, byte)
            })
            .collect()
    }
}
