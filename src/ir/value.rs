//! This module contains the concrete values that model evaluation produces.
//!
//! A [`Value`] is what a solver model assigns to an expression: an
//! arbitrary-width two's-complement integer, an IEEE-754 float, a byte
//! buffer, or an aggregate of those. The arithmetic on [`IntValue`] is also
//! what the expression builders use for eager constant folding, so the wrap
//! semantics here are the single source of truth for integer arithmetic in
//! the engine.

use std::fmt::{Display, Formatter};

use ethnum::U256;
use serde::Serialize;

use crate::{
    constant::MAXIMUM_INTEGER_WIDTH_BITS,
    ir::{types::Type, ICmpPredicate},
};

/// A concrete two's-complement integer of a fixed bit width between 1 and
/// 256.
///
/// The invariant maintained by every operation is that the backing limbs
/// never carry set bits above `width`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct IntValue {
    width: u32,
    bits: U256,
}

impl IntValue {
    /// Creates a new integer of `width` bits, truncating `bits` to the
    /// width.
    ///
    /// # Panics
    ///
    /// Panics if `width` is zero or wider than the maximum supported width,
    /// as such a request is a programmer bug.
    #[must_use]
    pub fn new(width: u32, bits: U256) -> Self {
        assert!(
            width > 0 && width <= MAXIMUM_INTEGER_WIDTH_BITS,
            "Unsupported integer width {width}"
        );
        let bits = bits & Self::mask(width);
        Self { width, bits }
    }

    /// Creates a new integer of `width` bits from a `u64`.
    #[must_use]
    pub fn from_u64(width: u32, value: u64) -> Self {
        Self::new(width, U256::from(value))
    }

    /// Creates the 1-bit integer encoding of a boolean.
    #[must_use]
    pub fn from_bool(value: bool) -> Self {
        Self::from_u64(1, u64::from(value))
    }

    /// Creates the all-zero integer of `width` bits.
    #[must_use]
    pub fn zero(width: u32) -> Self {
        Self::from_u64(width, 0)
    }

    /// Gets the bit width of the value.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Gets the raw bits of the value, zero-extended to 256 bits.
    #[must_use]
    pub fn bits(&self) -> U256 {
        self.bits
    }

    /// Gets the low 64 bits of the value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.bits.as_u64()
    }

    /// Checks whether the value is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.bits == U256::ZERO
    }

    /// Checks whether the value is all-ones at its width, i.e. -1 as a
    /// signed quantity.
    #[must_use]
    pub fn is_all_ones(&self) -> bool {
        self.bits == Self::mask(self.width)
    }

    /// Checks whether the sign bit of the value is set.
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.bits >> (self.width - 1) & U256::ONE == U256::ONE
    }

    /// Checks whether the value is the most negative signed value of its
    /// width.
    #[must_use]
    pub fn is_signed_min(&self) -> bool {
        self.bits == U256::ONE << (self.width - 1)
    }

    /// Gets the value with every bit above `width` cleared.
    fn mask(width: u32) -> U256 {
        if width == MAXIMUM_INTEGER_WIDTH_BITS {
            U256::MAX
        } else {
            (U256::ONE << width) - U256::ONE
        }
    }

    /// Gets the bits sign-extended to the full 256-bit limb, used internally
    /// for signed operations.
    fn sext_bits(&self) -> U256 {
        if self.is_negative() {
            self.bits | !Self::mask(self.width)
        } else {
            self.bits
        }
    }

    /// Gets the magnitude of the value interpreted as signed, together with
    /// its sign.
    fn signed_magnitude(&self) -> (bool, U256) {
        if self.is_negative() {
            (true, (!self.bits).wrapping_add(U256::ONE) & Self::mask(self.width))
        } else {
            (false, self.bits)
        }
    }

    fn binary(&self, other: &Self, f: impl FnOnce(U256, U256) -> U256) -> Self {
        assert_eq!(self.width, other.width, "Mismatched integer widths");
        Self::new(self.width, f(self.bits, other.bits))
    }

    /// Wrapping addition at the value's width.
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        self.binary(other, U256::wrapping_add)
    }

    /// Wrapping subtraction at the value's width.
    #[must_use]
    pub fn sub(&self, other: &Self) -> Self {
        self.binary(other, U256::wrapping_sub)
    }

    /// Wrapping multiplication at the value's width.
    #[must_use]
    pub fn mul(&self, other: &Self) -> Self {
        self.binary(other, U256::wrapping_mul)
    }

    /// Unsigned division.
    ///
    /// # Panics
    ///
    /// Panics if `other` is zero. The interpreter guards every division with
    /// a zero-divisor check before folding can observe one.
    #[must_use]
    pub fn udiv(&self, other: &Self) -> Self {
        self.binary(other, |a, b| a / b)
    }

    /// Unsigned remainder.
    ///
    /// # Panics
    ///
    /// Panics if `other` is zero; see [`Self::udiv`].
    #[must_use]
    pub fn urem(&self, other: &Self) -> Self {
        self.binary(other, |a, b| a % b)
    }

    /// Signed division, truncating towards zero.
    ///
    /// # Panics
    ///
    /// Panics if `other` is zero; see [`Self::udiv`].
    #[must_use]
    pub fn sdiv(&self, other: &Self) -> Self {
        assert_eq!(self.width, other.width, "Mismatched integer widths");
        let (ls, lm) = self.signed_magnitude();
        let (rs, rm) = other.signed_magnitude();
        let quotient = lm / rm;
        let bits = if ls != rs {
            (!quotient).wrapping_add(U256::ONE)
        } else {
            quotient
        };
        Self::new(self.width, bits)
    }

    /// Signed remainder; the result takes the sign of the dividend.
    ///
    /// # Panics
    ///
    /// Panics if `other` is zero; see [`Self::udiv`].
    #[must_use]
    pub fn srem(&self, other: &Self) -> Self {
        assert_eq!(self.width, other.width, "Mismatched integer widths");
        let (ls, lm) = self.signed_magnitude();
        let (_, rm) = other.signed_magnitude();
        let remainder = lm % rm;
        let bits = if ls {
            (!remainder).wrapping_add(U256::ONE)
        } else {
            remainder
        };
        Self::new(self.width, bits)
    }

    /// Bitwise conjunction.
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        self.binary(other, |a, b| a & b)
    }

    /// Bitwise disjunction.
    #[must_use]
    pub fn or(&self, other: &Self) -> Self {
        self.binary(other, |a, b| a | b)
    }

    /// Bitwise exclusive or.
    #[must_use]
    pub fn xor(&self, other: &Self) -> Self {
        self.binary(other, |a, b| a ^ b)
    }

    /// Bitwise complement at the value's width.
    #[must_use]
    pub fn not(&self) -> Self {
        Self::new(self.width, !self.bits)
    }

    /// Left shift; shifting by the width or more yields zero.
    #[must_use]
    pub fn shl(&self, other: &Self) -> Self {
        assert_eq!(self.width, other.width, "Mismatched integer widths");
        if other.bits >= U256::from(self.width) {
            return Self::zero(self.width);
        }
        Self::new(self.width, self.bits << other.as_u64() as u32)
    }

    /// Logical right shift; shifting by the width or more yields zero.
    #[must_use]
    pub fn lshr(&self, other: &Self) -> Self {
        assert_eq!(self.width, other.width, "Mismatched integer widths");
        if other.bits >= U256::from(self.width) {
            return Self::zero(self.width);
        }
        Self::new(self.width, self.bits >> other.as_u64() as u32)
    }

    /// Arithmetic right shift; shifting by the width or more yields the
    /// sign fill.
    #[must_use]
    pub fn ashr(&self, other: &Self) -> Self {
        assert_eq!(self.width, other.width, "Mismatched integer widths");
        let fill = self.is_negative();
        if other.bits >= U256::from(self.width) {
            let bits = if fill { Self::mask(self.width) } else { U256::ZERO };
            return Self::new(self.width, bits);
        }
        let shift = other.as_u64() as u32;
        let mut bits = self.bits >> shift;
        if fill {
            bits |= Self::mask(self.width) & !(Self::mask(self.width) >> shift);
        }
        Self::new(self.width, bits)
    }

    /// Zero extension to a wider width.
    ///
    /// # Panics
    ///
    /// Panics if `width` is not strictly wider than the current width.
    #[must_use]
    pub fn zext(&self, width: u32) -> Self {
        assert!(width > self.width, "Zero extension must widen the value");
        Self::new(width, self.bits)
    }

    /// Sign extension to a wider width.
    ///
    /// # Panics
    ///
    /// Panics if `width` is not strictly wider than the current width.
    #[must_use]
    pub fn sext(&self, width: u32) -> Self {
        assert!(width > self.width, "Sign extension must widen the value");
        Self::new(width, self.sext_bits())
    }

    /// Truncation to a narrower width.
    ///
    /// # Panics
    ///
    /// Panics if `width` is not strictly narrower than the current width.
    #[must_use]
    pub fn trunc(&self, width: u32) -> Self {
        assert!(width < self.width, "Truncation must narrow the value");
        Self::new(width, self.bits)
    }

    /// Evaluates an integer comparison between `self` and `other`.
    ///
    /// # Panics
    ///
    /// Panics if the operand widths differ; comparing them is a programmer
    /// bug.
    #[must_use]
    pub fn compare(&self, pred: ICmpPredicate, other: &Self) -> bool {
        assert_eq!(self.width, other.width, "Mismatched integer widths");
        let (l, r) = (self.bits, other.bits);
        let (sl, sr) = (self.is_negative(), other.is_negative());
        // For signed orderings: if the signs differ the negative operand is
        // smaller, otherwise the unsigned ordering of the raw bits agrees
        // with the signed one.
        let slt = if sl != sr { sl } else { l < r };
        match pred {
            ICmpPredicate::Eq => l == r,
            ICmpPredicate::Ne => l != r,
            ICmpPredicate::Ult => l < r,
            ICmpPredicate::Ule => l <= r,
            ICmpPredicate::Ugt => l > r,
            ICmpPredicate::Uge => l >= r,
            ICmpPredicate::Slt => slt,
            ICmpPredicate::Sle => slt || l == r,
            ICmpPredicate::Sgt => !(slt || l == r),
            ICmpPredicate::Sge => !slt,
        }
    }

    /// Renders the value as an unsigned decimal string.
    #[must_use]
    pub fn to_decimal_string(&self) -> String {
        self.bits.to_string()
    }
}

/// Pretty-prints the value as `iN 0x…`.
impl Display for IntValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let str = hex::encode(self.bits.to_be_bytes());
        let str = str.trim_start_matches('0');
        let str = if str.is_empty() { "0" } else { str };
        write!(f, "i{} 0x{str}", self.width)
    }
}

impl Serialize for IntValue {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// A concrete IEEE-754 binary float of an arbitrary shape, stored as its raw
/// interchange bits.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct FloatValue {
    ebits: u32,
    sbits: u32,
    bits: U256,
}

impl FloatValue {
    /// Creates a float of the given shape from its raw interchange bits.
    #[must_use]
    pub fn from_bits(ebits: u32, sbits: u32, bits: U256) -> Self {
        let total = ebits + sbits;
        assert!(
            total <= MAXIMUM_INTEGER_WIDTH_BITS,
            "Unsupported float shape ({ebits}, {sbits})"
        );
        let mask = if total == MAXIMUM_INTEGER_WIDTH_BITS {
            U256::MAX
        } else {
            (U256::ONE << total) - U256::ONE
        };
        let bits = bits & mask;
        Self { ebits, sbits, bits }
    }

    /// Creates a `binary32` value.
    #[must_use]
    pub fn from_f32(value: f32) -> Self {
        Self::from_bits(8, 24, U256::from(value.to_bits()))
    }

    /// Creates a `binary64` value.
    #[must_use]
    pub fn from_f64(value: f64) -> Self {
        Self::from_bits(11, 53, U256::from(value.to_bits()))
    }

    /// Creates the canonical quiet NaN of the given shape: positive sign,
    /// all-ones exponent, and the top significand bit set.
    #[must_use]
    pub fn nan(ebits: u32, sbits: u32) -> Self {
        let exponent = ((U256::ONE << ebits) - U256::ONE) << (sbits - 1);
        let quiet = U256::ONE << (sbits - 2);
        Self::from_bits(ebits, sbits, exponent | quiet)
    }

    /// Gets the exponent width of the value.
    #[must_use]
    pub fn exponent_bits(&self) -> u32 {
        self.ebits
    }

    /// Gets the significand width (including the hidden bit) of the value.
    #[must_use]
    pub fn significand_bits(&self) -> u32 {
        self.sbits
    }

    /// Gets the raw interchange bits, zero-extended to 256 bits.
    #[must_use]
    pub fn bits(&self) -> U256 {
        self.bits
    }

    /// Gets the sign bit.
    #[must_use]
    pub fn sign(&self) -> bool {
        self.bits >> (self.ebits + self.sbits - 1) & U256::ONE == U256::ONE
    }

    /// Gets the biased exponent field.
    #[must_use]
    pub fn exponent_field(&self) -> U256 {
        self.bits >> (self.sbits - 1) & ((U256::ONE << self.ebits) - U256::ONE)
    }

    /// Gets the stored significand field (without the hidden bit).
    #[must_use]
    pub fn significand_field(&self) -> U256 {
        self.bits & ((U256::ONE << (self.sbits - 1)) - U256::ONE)
    }

    /// Checks whether the value is a NaN of any kind.
    #[must_use]
    pub fn is_nan(&self) -> bool {
        self.exponent_field() == (U256::ONE << self.ebits) - U256::ONE
            && self.significand_field() != U256::ZERO
    }

    /// Gets the value as an `f32` if it has the `binary32` shape.
    #[must_use]
    pub fn to_f32(&self) -> Option<f32> {
        (self.ebits == 8 && self.sbits == 24).then(|| f32::from_bits(self.bits.as_u32()))
    }

    /// Gets the value as an `f64` if it has the `binary64` shape.
    #[must_use]
    pub fn to_f64(&self) -> Option<f64> {
        (self.ebits == 11 && self.sbits == 53).then(|| f64::from_bits(self.bits.as_u64()))
    }

    /// Gets the expression type of the value.
    #[must_use]
    pub fn ty(&self) -> Type {
        Type::float(self.ebits, self.sbits)
    }
}

impl Display for FloatValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(v) = self.to_f32() {
            write!(f, "{v}f32")
        } else if let Some(v) = self.to_f64() {
            write!(f, "{v}f64")
        } else {
            write!(
                f,
                "f({}, {}) 0x{}",
                self.ebits,
                self.sbits,
                hex::encode(self.bits.to_be_bytes())
            )
        }
    }
}

impl Serialize for FloatValue {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// A concrete datum produced by model evaluation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum Value {
    /// An arbitrary-width integer.
    Int(IntValue),

    /// An IEEE-754 float.
    Float(FloatValue),

    /// A byte buffer, tagged with the index width of the array it was read
    /// from.
    Array { data: Vec<u8>, index_width: u32 },

    /// A heterogeneous collection of values from a vector or aggregate.
    Aggregate(Vec<Value>),
}

impl Value {
    /// Gets the contained integer.
    ///
    /// # Panics
    ///
    /// Panics if the value is not an integer; asking is a programmer bug.
    #[must_use]
    pub fn unwrap_int(&self) -> &IntValue {
        match self {
            Self::Int(v) => v,
            _ => panic!("Value {self:?} is not an integer"),
        }
    }

    /// Gets the contained float.
    ///
    /// # Panics
    ///
    /// Panics if the value is not a float; asking is a programmer bug.
    #[must_use]
    pub fn unwrap_float(&self) -> &FloatValue {
        match self {
            Self::Float(v) => v,
            _ => panic!("Value {self:?} is not a float"),
        }
    }
}

#[cfg(test)]
mod test {
    use ethnum::U256;

    use crate::ir::{
        value::{FloatValue, IntValue},
        ICmpPredicate,
    };

    #[test]
    fn arithmetic_wraps_at_the_declared_width() {
        let a = IntValue::from_u64(8, 200);
        let b = IntValue::from_u64(8, 100);
        assert_eq!(a.add(&b).as_u64(), 44);
        assert_eq!(a.mul(&b).as_u64(), (200u64 * 100) % 256);
        assert_eq!(b.sub(&a).as_u64(), 156);
    }

    #[test]
    fn signed_division_truncates_towards_zero() {
        let minus_seven = IntValue::from_u64(8, 256 - 7);
        let two = IntValue::from_u64(8, 2);
        let q = minus_seven.sdiv(&two);
        let r = minus_seven.srem(&two);
        // -7 / 2 == -3, -7 % 2 == -1.
        assert_eq!(q.as_u64(), 256 - 3);
        assert_eq!(r.as_u64(), 256 - 1);
    }

    #[test]
    fn shifts_saturate_past_the_width() {
        let v = IntValue::from_u64(8, 0x81);
        let big = IntValue::from_u64(8, 9);
        assert!(v.shl(&big).is_zero());
        assert!(v.lshr(&big).is_zero());
        assert!(v.ashr(&big).is_all_ones());
    }

    #[test]
    fn arithmetic_shift_fills_with_the_sign() {
        let v = IntValue::from_u64(8, 0x84);
        let one = IntValue::from_u64(8, 1);
        assert_eq!(v.ashr(&one).as_u64(), 0xc2);
        assert_eq!(v.lshr(&one).as_u64(), 0x42);
    }

    #[test]
    fn signed_comparison_accounts_for_the_sign_bit() {
        let minus_one = IntValue::from_u64(32, 0xffff_ffff);
        let one = IntValue::from_u64(32, 1);
        assert!(minus_one.compare(ICmpPredicate::Slt, &one));
        assert!(minus_one.compare(ICmpPredicate::Ugt, &one));
        assert!(one.compare(ICmpPredicate::Sge, &minus_one));
    }

    #[test]
    fn extension_and_truncation_round_trip() {
        let v = IntValue::from_u64(8, 0x80);
        assert_eq!(v.zext(16).as_u64(), 0x80);
        assert_eq!(v.sext(16).as_u64(), 0xff80);
        assert_eq!(v.sext(16).trunc(8), v);
    }

    #[test]
    fn canonical_nan_has_the_ieee_shape() {
        let nan = FloatValue::nan(8, 24);
        assert!(nan.is_nan());
        assert!(!nan.sign());
        assert_eq!(nan.exponent_field(), U256::from(0xffu32));
        assert!(nan.to_f32().unwrap().is_nan());
    }

    #[test]
    fn float_round_trips_through_bits() {
        let v = FloatValue::from_f64(-1.5);
        assert_eq!(v.to_f64(), Some(-1.5));
        assert!(v.sign());
        assert!(!v.is_nan());
    }
}
