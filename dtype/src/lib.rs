//! Scalar parameter dtypes for compiled kernels.
//!
//! Kernel compilers describe every scalar argument of an entry point with a
//! short textual tag (`"i32"`, `"fp32"`, `"int1"`, ...). This crate maps those
//! tags onto [`ScalarDType`] and encodes host values into the 64-bit payload
//! slot that the launch ABI passes by address.

pub mod encode;
pub mod error;
pub mod ext;


pub use encode::{ScalarValue, encode};
pub use error::{Error, Result};
pub use ext::HasDType;

use std::fmt;
use std::str::FromStr;

/// Scalar data types accepted as kernel parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::EnumCount, strum::EnumIter, strum::VariantArray)]
#[cfg_attr(any(test, feature = "proptest"), derive(proptest_derive::Arbitrary))]
pub enum ScalarDType {
    /// 1-bit boolean (`int1`), stored in one byte.
    Int1,
    /// 8-bit boolean (`B`).
    Bool,

    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,

    Float32,
    Float64,
}

impl ScalarDType {
    /// Width of the narrowed value inside the 64-bit payload.
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Int1 | Self::Bool => 1,
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 => 4,
            Self::Int64 | Self::UInt64 => 8,
            Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Int1 | Self::Bool)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub const fn is_int(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Canonical tag for this dtype.
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Int1 => "int1",
            Self::Bool => "B",
            Self::Int8 => "i8",
            Self::UInt8 => "u8",
            Self::Int16 => "i16",
            Self::UInt16 => "u16",
            Self::Int32 => "i32",
            Self::UInt32 => "u32",
            Self::Int64 => "i64",
            Self::UInt64 => "u64",
            Self::Float32 => "fp32",
            Self::Float64 => "fp64",
        }
    }

    /// Parse a kernel-signature tag.
    ///
    /// `i1` is accepted as an alias of `i8`: integer 1-bit arguments travel
    /// as a full byte. Boolean arguments use `int1` or `B` instead.
    pub fn from_tag(tag: &str) -> Result<Self> {
        let dtype = match tag {
            "int1" => Self::Int1,
            "B" => Self::Bool,
            "i1" | "i8" => Self::Int8,
            "u8" => Self::UInt8,
            "i16" => Self::Int16,
            "u16" => Self::UInt16,
            "i32" => Self::Int32,
            "u32" => Self::UInt32,
            "i64" => Self::Int64,
            "u64" => Self::UInt64,
            "fp32" => Self::Float32,
            "fp64" => Self::Float64,
            _ => return error::UnknownDTypeSnafu { tag }.fail(),
        };
        Ok(dtype)
    }

    /// Mask selecting the low `bytes()` bytes of a payload.
    pub const fn payload_mask(&self) -> u64 {
        match self.bytes() {
            8 => u64::MAX,
            n => (1u64 << (n * 8)) - 1,
        }
    }
}

impl FromStr for ScalarDType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_tag(s)
    }
}

impl fmt::Display for ScalarDType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
