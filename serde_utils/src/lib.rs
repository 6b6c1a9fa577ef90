pub use crate::prefixed_hex_quantity::Quantity;

pub mod prefixed_hex_or_bytes_hash;
pub mod prefixed_hex_or_bytes_vec;
pub mod prefixed_hex_quantity;
pub mod string_or_native;

mod shared;
