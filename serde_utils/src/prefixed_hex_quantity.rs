//! Integers encoded as Engine API [`QUANTITY`] values.
//!
//! [`QUANTITY`]: https://github.com/ethereum/execution-apis/blob/b7c5d3420e00648f456744d121ffbd929862924d/src/engine/common.md#encoding

use core::{
    fmt::{Formatter, LowerHex, Result as FmtResult},
    marker::PhantomData,
};

use ethereum_types::U256;
use serde::{
    de::{Error as DeserializeError, Visitor},
    Deserializer, Serializer,
};

use crate::shared;

/// Integer types that can be parsed from the digits of a `QUANTITY`.
///
/// `num_traits::Num` would do for primitives, but `ethereum_types::U256` does not implement it.
pub trait Quantity: LowerHex + Sized {
    fn zero() -> Self;

    fn from_hex_digits(digits: &str) -> Result<Self, String>;
}

impl Quantity for u64 {
    fn zero() -> Self {
        0
    }

    fn from_hex_digits(digits: &str) -> Result<Self, String> {
        Self::from_str_radix(digits, 16).map_err(|error| error.to_string())
    }
}

impl Quantity for U256 {
    fn zero() -> Self {
        Self::zero()
    }

    fn from_hex_digits(digits: &str) -> Result<Self, String> {
        Self::from_str_radix(digits, 16).map_err(|error| error.to_string())
    }
}

pub fn deserialize<'de, T: Quantity, D: Deserializer<'de>>(deserializer: D) -> Result<T, D::Error> {
    struct HexVisitor<T>(PhantomData<T>);

    impl<T: Quantity> Visitor<'_> for HexVisitor<T> {
        type Value = T;

        fn expecting(&self, formatter: &mut Formatter) -> FmtResult {
            formatter.write_str(shared::expecting_prefixed_hex_or_bytes(true))
        }

        fn visit_str<E: DeserializeError>(self, string: &str) -> Result<Self::Value, E> {
            let digits = shared::strip_hex_prefix(string)?;

            if digits.is_empty() {
                return Err(E::custom("string contains no hexadecimal digits"));
            }

            if digits == "0" {
                return Ok(T::zero());
            }

            if digits.starts_with('0') {
                return Err(E::custom(
                    "string contains leading zeros after hexadecimal prefix",
                ));
            }

            // `from_str_radix` tolerates a leading `+`.
            if !digits.bytes().all(|byte| byte.is_ascii_hexdigit()) {
                return Err(E::custom("string contains non-hexadecimal characters"));
            }

            T::from_hex_digits(digits).map_err(E::custom)
        }
    }

    deserializer.deserialize_str(HexVisitor(PhantomData))
}

pub fn serialize<S: Serializer>(number: impl LowerHex, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&format_args!("{number:#x}"))
}

#[cfg(test)]
mod tests {
    use serde_json::{value::Serializer as JsonSerializer, Result, Value};
    use test_case::test_case;

    use super::*;

    #[test_case(0, "0x0")]
    #[test_case(1, "0x1")]
    #[test_case(0x1b4, "0x1b4")]
    #[test_case(u64::MAX, "0xffffffffffffffff")]
    fn u64_string_round_trip(number: u64, string: &str) -> Result<()> {
        let json = Value::from(string);

        assert_eq!(deserialize::<u64, _>(json.clone())?, number);
        assert_eq!(serialize(number, JsonSerializer)?, json);

        Ok(())
    }

    #[test_case(U256::zero(), "0x0")]
    #[test_case(U256::from(7_u64), "0x7")]
    #[test_case(U256::from(1_000_000_000_000_u64), "0xe8d4a51000")]
    #[test_case(
        U256::MAX,
        "0xffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff"
    )]
    fn u256_string_round_trip(number: U256, string: &str) -> Result<()> {
        let json = Value::from(string);

        assert_eq!(deserialize::<U256, _>(json.clone())?, number);
        assert_eq!(serialize(number, JsonSerializer)?, json);

        Ok(())
    }

    #[test_case("";                    "empty string")]
    #[test_case("0";                   "missing hexadecimal prefix")]
    #[test_case("0x";                  "missing hexadecimal digits")]
    #[test_case("0x000034";            "leading zeros after hexadecimal prefix")]
    #[test_case("0x+1";                "sign after hexadecimal prefix")]
    #[test_case("0xg";                 "non-hexadecimal digit")]
    #[test_case("0x10000000000000000"; "one digit too many for u64")]
    fn deserialize_u64_fails_on(string: &str) {
        deserialize::<u64, _>(Value::from(string)).expect_err("deserialization should fail");
    }

    #[test]
    fn deserialize_u256_fails_on_overflow() {
        let string = "0x1ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";
        deserialize::<U256, _>(Value::from(string)).expect_err("deserialization should fail");
    }

    #[test]
    fn deserialize_fails_on_numbers() {
        deserialize::<u64, _>(Value::from(52)).expect_err("deserialization should fail");
    }
}
