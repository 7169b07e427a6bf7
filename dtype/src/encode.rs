//! Scalar payload encoding.
//!
//! A scalar kernel argument is narrowed to its dtype width and its bits are
//! stored, zero-extended, in a 64-bit slot. The launch ABI then receives the
//! address of that slot, so only the low `dtype.bytes()` bytes are read by the
//! kernel.

use crate::ScalarDType;
use crate::error::{Result, UnknownDTypeSnafu};

/// Host-side value of a scalar kernel argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl ScalarDType {
    /// Encode `value` at this dtype's width.
    ///
    /// Integers are truncated two's-complement style, `fp32` rounds to the
    /// nearest `f32`. Booleans also encode under integer dtypes as `0` or `1`.
    /// A value whose kind does not match the dtype (e.g. a float passed with an
    /// integer tag) fails with `UnknownDType`.
    pub fn encode(self, value: ScalarValue) -> Result<u64> {
        let bits = match (self, value) {
            (Self::Int1 | Self::Bool, ScalarValue::Bool(b)) => b as u64,
            (dtype, ScalarValue::Bool(b)) if dtype.is_int() => b as u64,
            (Self::Float32, ScalarValue::Float(f)) => (f as f32).to_bits() as u64,
            (Self::Float64, ScalarValue::Float(f)) => f.to_bits(),
            (dtype, ScalarValue::Int(v)) if dtype.is_int() => v as u64 & dtype.payload_mask(),
            (dtype, ScalarValue::UInt(v)) if dtype.is_int() => v & dtype.payload_mask(),
            _ => return UnknownDTypeSnafu { tag: self.tag() }.fail(),
        };
        Ok(bits)
    }

    /// Reinterpret the low bytes of a payload at this dtype's width.
    pub fn decode(self, bits: u64) -> ScalarValue {
        match self {
            Self::Int1 | Self::Bool => ScalarValue::Bool(bits as u8 != 0),
            Self::Int8 => ScalarValue::Int(bits as u8 as i8 as i64),
            Self::Int16 => ScalarValue::Int(bits as u16 as i16 as i64),
            Self::Int32 => ScalarValue::Int(bits as u32 as i32 as i64),
            Self::Int64 => ScalarValue::Int(bits as i64),
            Self::UInt8 => ScalarValue::UInt(bits as u8 as u64),
            Self::UInt16 => ScalarValue::UInt(bits as u16 as u64),
            Self::UInt32 => ScalarValue::UInt(bits as u32 as u64),
            Self::UInt64 => ScalarValue::UInt(bits),
            Self::Float32 => ScalarValue::Float(f32::from_bits(bits as u32) as f64),
            Self::Float64 => ScalarValue::Float(f64::from_bits(bits)),
        }
    }
}

/// Encode `value` with a textual dtype tag.
///
/// Unknown tags and tags that do not fit the value's kind fail with an
/// error naming the tag.
pub fn encode(value: impl Into<ScalarValue>, tag: &str) -> Result<u64> {
    let value = value.into();
    let dtype = ScalarDType::from_tag(tag)?;
    dtype.encode(value).map_err(|_| UnknownDTypeSnafu { tag }.build())
}
