use serde::{Deserialize, Serialize};

use crate::{
    bellatrix::primitives::{Bloom, Gas, Transaction, Wei},
    phase0::{
        containers::{AttesterSlashing, IndexedAttestation},
        primitives::{
            ExecutionAddress, ExecutionBlockHash, ExecutionBlockNumber, Slot, UnixSeconds,
            ValidatorIndex, H256,
        },
    },
};

#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BeaconBlock {
    #[serde(with = "serde_utils::string_or_native")]
    pub slot: Slot,
    #[serde(with = "serde_utils::string_or_native")]
    pub proposer_index: ValidatorIndex,
    pub parent_root: H256,
    pub state_root: H256,
    pub body: BeaconBlockBody,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BeaconBlockBody {
    pub attestations: Vec<IndexedAttestation>,
    pub attester_slashings: Vec<AttesterSlashing>,
    pub execution_payload: ExecutionPayload,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionPayload {
    pub parent_hash: ExecutionBlockHash,
    pub fee_recipient: ExecutionAddress,
    pub state_root: H256,
    pub receipts_root: H256,
    pub logs_bloom: Bloom,
    pub prev_randao: H256,
    #[serde(with = "serde_utils::string_or_native")]
    pub block_number: ExecutionBlockNumber,
    #[serde(with = "serde_utils::string_or_native")]
    pub gas_limit: Gas,
    #[serde(with = "serde_utils::string_or_native")]
    pub gas_used: Gas,
    #[serde(with = "serde_utils::string_or_native")]
    pub timestamp: UnixSeconds,
    #[serde(with = "serde_utils::prefixed_hex_or_bytes_vec")]
    pub extra_data: Vec<u8>,
    pub base_fee_per_gas: Wei,
    pub block_hash: ExecutionBlockHash,
    pub transactions: Vec<Transaction>,
}
