//! This module contains the data layout: the byte-level rules the target
//! imposes on typed memory accesses.

use crate::{
    constant::DEFAULT_POINTER_WIDTH_BITS,
    module::IrType,
};

/// The byte ordering of the target.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Endian {
    Little,
    Big,
}

/// The byte-level layout rules for the module being executed.
///
/// The layout determines how many bytes a typed value occupies in memory,
/// how it is aligned, and where the fields of an aggregate sit. The default
/// layout is the common little-endian 64-bit configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DataLayout {
    /// The byte ordering used when scalars are split into memory bytes.
    pub endian: Endian,

    /// The width of a pointer in bits.
    ///
    /// The width applies to every address space; offsets and allocation
    /// sizes are expressions of this width.
    pub pointer_bits: u32,
}

impl DataLayout {
    /// Constructs a layout with the given endianness and pointer width.
    #[must_use]
    pub fn new(endian: Endian, pointer_bits: u32) -> Self {
        assert!(
            pointer_bits % 8 == 0 && pointer_bits > 0,
            "Pointer width must be a positive multiple of 8"
        );
        Self {
            endian,
            pointer_bits,
        }
    }

    /// Gets the width of a pointer in bytes.
    #[must_use]
    pub fn pointer_bytes(&self) -> u32 {
        self.pointer_bits / 8
    }

    /// Gets the number of bytes a value of `ty` occupies when stored,
    /// excluding any tail padding.
    ///
    /// # Panics
    ///
    /// Panics if asked about `void`, which cannot be stored.
    #[must_use]
    pub fn store_size(&self, ty: &IrType) -> u32 {
        match ty {
            IrType::Int(width) => (width + 7) / 8,
            IrType::Float { ebits, sbits } => (ebits + sbits + 7) / 8,
            IrType::Ptr(_) => self.pointer_bytes(),
            IrType::Vector { elem, count } => self.store_size(elem) * count,
            IrType::Array { elem, count } => self.alloc_size(elem) * count,
            IrType::Struct { fields, packed } => self.struct_layout(fields, *packed).1,
            IrType::Void => panic!("The void type has no store size"),
        }
    }

    /// Gets the alignment of `ty` in bytes.
    #[must_use]
    pub fn align(&self, ty: &IrType) -> u32 {
        match ty {
            IrType::Int(_) | IrType::Float { .. } | IrType::Ptr(_) => {
                self.store_size(ty).next_power_of_two().min(8)
            }
            IrType::Vector { elem, .. } | IrType::Array { elem, .. } => self.align(elem),
            IrType::Struct { packed: true, .. } => 1,
            IrType::Struct { fields, .. } => {
                fields.iter().map(|f| self.align(f)).max().unwrap_or(1)
            }
            IrType::Void => 1,
        }
    }

    /// Gets the number of bytes between consecutive values of `ty` in an
    /// array: the store size rounded up to the alignment.
    #[must_use]
    pub fn alloc_size(&self, ty: &IrType) -> u32 {
        round_up(self.store_size(ty), self.align(ty))
    }

    /// Computes the byte offsets of the fields of a struct, along with the
    /// total padded size of the struct.
    #[must_use]
    pub fn struct_layout(&self, fields: &[IrType], packed: bool) -> (Vec<u32>, u32) {
        let mut offsets = Vec::with_capacity(fields.len());
        let mut offset = 0;
        let mut max_align = 1;

        for field in fields {
            let align = if packed { 1 } else { self.align(field) };
            max_align = max_align.max(align);
            offset = round_up(offset, align);
            offsets.push(offset);
            offset += self.store_size(field);
        }

        (offsets, round_up(offset, max_align))
    }
}

impl Default for DataLayout {
    fn default() -> Self {
        Self::new(Endian::Little, DEFAULT_POINTER_WIDTH_BITS)
    }
}

fn round_up(value: u32, align: u32) -> u32 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod test {
    use crate::module::{layout::DataLayout, IrType};

    #[test]
    fn scalar_sizes_match_their_widths() {
        let layout = DataLayout::default();
        assert_eq!(layout.store_size(&IrType::Int(1)), 1);
        assert_eq!(layout.store_size(&IrType::Int(32)), 4);
        assert_eq!(layout.store_size(&IrType::f32()), 4);
        assert_eq!(layout.store_size(&IrType::f64()), 8);
        assert_eq!(layout.store_size(&IrType::Ptr(0)), 8);
    }

    #[test]
    fn struct_fields_get_padded_offsets() {
        let layout = DataLayout::default();
        let fields = [IrType::Int(8), IrType::Int(32), IrType::Int(8)];
        let (offsets, size) = layout.struct_layout(&fields, false);

        assert_eq!(offsets, vec![0, 4, 8]);
        assert_eq!(size, 12);
    }

    #[test]
    fn packed_structs_have_no_padding() {
        let layout = DataLayout::default();
        let fields = [IrType::Int(8), IrType::Int(32), IrType::Int(8)];
        let (offsets, size) = layout.struct_layout(&fields, true);

        assert_eq!(offsets, vec![0, 1, 5]);
        assert_eq!(size, 6);
    }

    #[test]
    fn array_strides_respect_element_alignment() {
        let layout = DataLayout::default();
        let elem = IrType::Struct {
            fields: vec![IrType::Int(32), IrType::Int(8)],
            packed: false,
        };
        let array = IrType::Array {
            elem: Box::new(elem),
            count: 3,
        };
        assert_eq!(layout.store_size(&array), 24);
    }
}
