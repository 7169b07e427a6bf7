use super::*;

/// Native Rust types with a fixed kernel dtype.
pub trait HasDType: Copy + Into<ScalarValue> {
    const DTYPE: ScalarDType;

    /// Payload bits for this value, identical to `DTYPE.encode(self.into())`.
    fn to_payload(self) -> u64;
}

macro_rules! impl_dtype_ext {
    ($($ty:ty => $dtype:ident as $variant:ident : |$v:ident| $bits:expr),* $(,)?) => {
        $(
            impl HasDType for $ty {
                const DTYPE: ScalarDType = ScalarDType::$dtype;

                fn to_payload(self) -> u64 {
                    let $v = self;
                    $bits
                }
            }

            impl From<$ty> for ScalarValue {
                fn from(value: $ty) -> Self {
                    ScalarValue::$variant(value.into())
                }
            }
        )*
    };
}

impl_dtype_ext! {
    bool => Bool as Bool: |v| v as u64,
    i8 => Int8 as Int: |v| v as u8 as u64,
    i16 => Int16 as Int: |v| v as u16 as u64,
    i32 => Int32 as Int: |v| v as u32 as u64,
    i64 => Int64 as Int: |v| v as u64,
    u8 => UInt8 as UInt: |v| v as u64,
    u16 => UInt16 as UInt: |v| v as u64,
    u32 => UInt32 as UInt: |v| v as u64,
    u64 => UInt64 as UInt: |v| v,
    f32 => Float32 as Float: |v| v.to_bits() as u64,
    f64 => Float64 as Float: |v| v.to_bits(),
}
