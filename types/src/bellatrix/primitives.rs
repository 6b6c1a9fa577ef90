use derive_more::{AsRef, Deref, From};
use ethereum_types::U256;
use serde::{Deserialize, Serialize};

pub use ethereum_types::Bloom;

pub type Gas = u64;
pub type Wei = U256;

/// An opaque transaction as included in an execution payload.
#[derive(Clone, PartialEq, Eq, Default, Debug, AsRef, Deref, From, Deserialize, Serialize)]
#[as_ref(forward)]
pub struct Transaction(#[serde(with = "serde_utils::prefixed_hex_or_bytes_vec")] Vec<u8>);

impl Transaction {
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}
