//! Fixed-size byte strings such as block hashes, addresses and the logs bloom.
//!
//! Works for any type with a fixed length given by its [`Default`] value, which covers the types
//! from `ethereum-types`. Their own `Deserialize` impls accept digits without the `0x` prefix.
//! This module does not.

use core::{
    fmt::{Formatter, Result as FmtResult},
    marker::PhantomData,
};

use serde::{
    de::{Error, Visitor},
    Deserializer, Serializer,
};

use crate::shared;

pub fn deserialize<'de, D: Deserializer<'de>, T: Default + AsMut<[u8]>>(
    deserializer: D,
) -> Result<T, D::Error> {
    struct HashVisitor<T> {
        human_readable: bool,
        phantom: PhantomData<T>,
    }

    impl<T: Default + AsMut<[u8]>> Visitor<'_> for HashVisitor<T> {
        type Value = T;

        fn expecting(&self, formatter: &mut Formatter) -> FmtResult {
            formatter.write_str(shared::expecting_prefixed_hex_or_bytes(self.human_readable))
        }

        fn visit_bytes<E: Error>(self, bytes: &[u8]) -> Result<Self::Value, E> {
            let mut hash = T::default();
            let expected_length = hash.as_mut().len();

            if bytes.len() != expected_length {
                return Err(E::invalid_length(bytes.len(), &self));
            }

            hash.as_mut().copy_from_slice(bytes);

            Ok(hash)
        }

        fn visit_str<E: Error>(self, string: &str) -> Result<Self::Value, E> {
            let digits = shared::strip_hex_prefix(string)?;

            let mut hash = T::default();
            const_hex::decode_to_slice(digits, hash.as_mut()).map_err(E::custom)?;

            Ok(hash)
        }
    }

    let human_readable = deserializer.is_human_readable();

    let visitor = HashVisitor {
        human_readable,
        phantom: PhantomData,
    };

    if human_readable {
        deserializer.deserialize_str(visitor)
    } else {
        deserializer.deserialize_bytes(visitor)
    }
}

pub fn serialize<S: Serializer>(hash: impl AsRef<[u8]>, serializer: S) -> Result<S::Ok, S::Error> {
    if serializer.is_human_readable() {
        serializer.serialize_str(const_hex::encode_prefixed(hash).as_str())
    } else {
        serializer.serialize_bytes(hash.as_ref())
    }
}

/// Same as the parent module, for optional fields. Both `null` and absence mean [`None`].
/// Absence must be allowed separately with `#[serde(default)]`.
pub mod option {
    use core::{
        fmt::{Formatter, Result as FmtResult},
        marker::PhantomData,
    };

    use serde::{de::Visitor, Deserializer, Serializer};

    pub fn deserialize<'de, D: Deserializer<'de>, T: Default + AsMut<[u8]>>(
        deserializer: D,
    ) -> Result<Option<T>, D::Error> {
        struct OptionVisitor<T>(PhantomData<T>);

        impl<'de, T: Default + AsMut<[u8]>> Visitor<'de> for OptionVisitor<T> {
            type Value = Option<T>;

            fn expecting(&self, formatter: &mut Formatter) -> FmtResult {
                formatter.write_str("an optional hash")
            }

            fn visit_none<E>(self) -> Result<Self::Value, E> {
                Ok(None)
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(None)
            }

            fn visit_some<D: Deserializer<'de>>(
                self,
                deserializer: D,
            ) -> Result<Self::Value, D::Error> {
                super::deserialize(deserializer).map(Some)
            }
        }

        deserializer.deserialize_option(OptionVisitor(PhantomData))
    }

    pub fn serialize<S: Serializer, T: AsRef<[u8]>>(
        hash: &Option<T>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match hash {
            Some(hash) => super::serialize(hash, serializer),
            None => serializer.serialize_none(),
        }
    }
}
