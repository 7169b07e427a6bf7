use proptest::prelude::*;

use super::generators::{dtype_and_value, float_dtype, int_dtype};
use crate::{HasDType, ScalarDType, ScalarValue};

fn same_value(lhs: ScalarValue, rhs: ScalarValue) -> bool {
    match (lhs, rhs) {
        (ScalarValue::Float(a), ScalarValue::Float(b)) if a.is_nan() => b.is_nan(),
        (ScalarValue::Float(a), ScalarValue::Float(b)) => a.to_bits() == b.to_bits(),
        _ => lhs == rhs,
    }
}

proptest! {
    #[test]
    fn encode_then_decode_is_identity((dtype, value) in dtype_and_value()) {
        let bits = dtype.encode(value).unwrap();
        prop_assert!(same_value(dtype.decode(bits), value), "{dtype}: {value:?} -> {bits:#x}");
    }

    #[test]
    fn payload_is_zero_extended((dtype, value) in dtype_and_value()) {
        let bits = dtype.encode(value).unwrap();
        prop_assert_eq!(bits & !dtype.payload_mask(), 0);
    }

    #[test]
    fn tag_round_trips(dtype in super::generators::scalar_generator()) {
        prop_assert_eq!(ScalarDType::from_tag(dtype.tag()).unwrap(), dtype);
    }

    #[test]
    fn integer_tags_reject_floats(dtype in int_dtype(), value in any::<f64>()) {
        prop_assert!(dtype.encode(ScalarValue::Float(value)).is_err());
    }

    #[test]
    fn booleans_encode_as_zero_or_one_under_integer_tags(dtype in int_dtype(), value in any::<bool>()) {
        prop_assert_eq!(dtype.encode(ScalarValue::Bool(value)).unwrap(), value as u64);
    }

    #[test]
    fn float_tags_reject_integers(dtype in float_dtype(), value in any::<i64>()) {
        prop_assert!(dtype.encode(ScalarValue::Int(value)).is_err());
    }

    #[test]
    fn native_payload_matches_encode(value in any::<i32>()) {
        prop_assert_eq!(value.to_payload(), i32::DTYPE.encode(value.into()).unwrap());
        prop_assert_eq!((value as u32).to_payload(), u32::DTYPE.encode((value as u32).into()).unwrap());
    }

    #[test]
    fn i32_and_u32_share_bit_patterns(value in any::<i64>()) {
        let signed = ScalarDType::Int32.encode(ScalarValue::Int(value)).unwrap();
        let unsigned = ScalarDType::UInt32.encode(ScalarValue::Int(value)).unwrap();
        prop_assert_eq!(signed, unsigned);
    }
}
