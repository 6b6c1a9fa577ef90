use derive_more::{Display, From};
use ethereum_types::H64;
use serde::{Deserialize, Serialize};
use types::{
    bellatrix::{
        containers::ExecutionPayload,
        primitives::{Bloom, Gas, Transaction, Wei},
    },
    phase0::primitives::{
        ExecutionAddress, ExecutionBlockHash, ExecutionBlockNumber, UnixSeconds, H256,
    },
};

/// [`ExecutionPayloadV1`](https://github.com/ethereum/execution-apis/blob/b7c5d3420e00648f456744d121ffbd929862924d/src/engine/paris.md#executionpayloadv1)
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPayloadV1 {
    #[serde(with = "serde_utils::prefixed_hex_or_bytes_hash")]
    pub parent_hash: ExecutionBlockHash,
    #[serde(with = "serde_utils::prefixed_hex_or_bytes_hash")]
    pub fee_recipient: ExecutionAddress,
    #[serde(with = "serde_utils::prefixed_hex_or_bytes_hash")]
    pub state_root: H256,
    #[serde(with = "serde_utils::prefixed_hex_or_bytes_hash")]
    pub receipts_root: H256,
    #[serde(with = "serde_utils::prefixed_hex_or_bytes_hash")]
    pub logs_bloom: Bloom,
    #[serde(with = "serde_utils::prefixed_hex_or_bytes_hash")]
    pub prev_randao: H256,
    #[serde(with = "serde_utils::prefixed_hex_quantity")]
    pub block_number: ExecutionBlockNumber,
    #[serde(with = "serde_utils::prefixed_hex_quantity")]
    pub gas_limit: Gas,
    #[serde(with = "serde_utils::prefixed_hex_quantity")]
    pub gas_used: Gas,
    #[serde(with = "serde_utils::prefixed_hex_quantity")]
    pub timestamp: UnixSeconds,
    #[serde(with = "serde_utils::prefixed_hex_or_bytes_vec")]
    pub extra_data: Vec<u8>,
    #[serde(with = "serde_utils::prefixed_hex_quantity")]
    pub base_fee_per_gas: Wei,
    #[serde(with = "serde_utils::prefixed_hex_or_bytes_hash")]
    pub block_hash: ExecutionBlockHash,
    pub transactions: Vec<Transaction>,
}

impl From<ExecutionPayload> for ExecutionPayloadV1 {
    fn from(payload: ExecutionPayload) -> Self {
        let ExecutionPayload {
            parent_hash,
            fee_recipient,
            state_root,
            receipts_root,
            logs_bloom,
            prev_randao,
            block_number,
            gas_limit,
            gas_used,
            timestamp,
            extra_data,
            base_fee_per_gas,
            block_hash,
            transactions,
        } = payload;

        Self {
            parent_hash,
            fee_recipient,
            state_root,
            receipts_root,
            logs_bloom,
            prev_randao,
            block_number,
            gas_limit,
            gas_used,
            timestamp,
            extra_data,
            base_fee_per_gas,
            block_hash,
            transactions,
        }
    }
}

impl From<ExecutionPayloadV1> for ExecutionPayload {
    fn from(payload: ExecutionPayloadV1) -> Self {
        let ExecutionPayloadV1 {
            parent_hash,
            fee_recipient,
            state_root,
            receipts_root,
            logs_bloom,
            prev_randao,
            block_number,
            gas_limit,
            gas_used,
            timestamp,
            extra_data,
            base_fee_per_gas,
            block_hash,
            transactions,
        } = payload;

        Self {
            parent_hash,
            fee_recipient,
            state_root,
            receipts_root,
            logs_bloom,
            prev_randao,
            block_number,
            gas_limit,
            gas_used,
            timestamp,
            extra_data,
            base_fee_per_gas,
            block_hash,
            transactions,
        }
    }
}

/// [`ForkchoiceStateV1`](https://github.com/ethereum/execution-apis/blob/b7c5d3420e00648f456744d121ffbd929862924d/src/engine/paris.md#forkchoicestatev1)
#[expect(clippy::struct_field_names)]
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkChoiceStateV1 {
    #[serde(with = "serde_utils::prefixed_hex_or_bytes_hash")]
    pub head_block_hash: ExecutionBlockHash,
    #[serde(with = "serde_utils::prefixed_hex_or_bytes_hash")]
    pub safe_block_hash: ExecutionBlockHash,
    #[serde(with = "serde_utils::prefixed_hex_or_bytes_hash")]
    pub finalized_block_hash: ExecutionBlockHash,
}

/// [`PayloadAttributesV1`](https://github.com/ethereum/execution-apis/blob/b7c5d3420e00648f456744d121ffbd929862924d/src/engine/paris.md#payloadattributesv1)
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadAttributesV1 {
    #[serde(with = "serde_utils::prefixed_hex_quantity")]
    pub timestamp: UnixSeconds,
    #[serde(with = "serde_utils::prefixed_hex_or_bytes_hash")]
    pub prev_randao: H256,
    #[serde(with = "serde_utils::prefixed_hex_or_bytes_hash")]
    pub suggested_fee_recipient: ExecutionAddress,
}

/// [`PayloadStatusV1`](https://github.com/ethereum/execution-apis/blob/b7c5d3420e00648f456744d121ffbd929862924d/src/engine/paris.md#payloadstatusv1)
///
/// Absent optional fields are omitted when serializing. Both `null` and absence are accepted when
/// deserializing, since execution clients differ in which one they send.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadStatusV1 {
    pub status: PayloadValidationStatus,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "serde_utils::prefixed_hex_or_bytes_hash::option"
    )]
    pub latest_valid_hash: Option<ExecutionBlockHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
}

impl PayloadStatusV1 {
    #[must_use]
    pub const fn new(status: PayloadValidationStatus) -> Self {
        Self {
            status,
            latest_valid_hash: None,
            validation_error: None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayloadValidationStatus {
    #[display("VALID")]
    Valid,
    #[display("INVALID")]
    Invalid,
    #[display("SYNCING")]
    Syncing,
    #[display("ACCEPTED")]
    Accepted,
    #[display("INVALID_BLOCK_HASH")]
    InvalidBlockHash,
}

impl PayloadValidationStatus {
    #[must_use]
    pub const fn is_valid(self) -> bool {
        matches!(self, Self::Valid)
    }

    #[must_use]
    pub const fn is_invalid(self) -> bool {
        matches!(self, Self::Invalid | Self::InvalidBlockHash)
    }

    /// `ACCEPTED` means the payload passed basic validation but was not executed.
    /// Fork choice handles it the same way as `SYNCING`.
    #[must_use]
    pub const fn is_syncing(self) -> bool {
        matches!(self, Self::Syncing | Self::Accepted)
    }
}

/// [`engine_forkchoiceUpdatedV1` response](https://github.com/ethereum/execution-apis/blob/b7c5d3420e00648f456744d121ffbd929862924d/src/engine/paris.md#response-1)
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkChoiceUpdatedResponse {
    pub payload_status: PayloadStatusV1,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_id: Option<PayloadId>,
}

/// Identifier of a payload build process started by `engine_forkchoiceUpdatedV1`.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Display, From, Deserialize, Serialize,
)]
#[display("{_0:?}")]
#[serde(transparent)]
pub struct PayloadId(#[serde(with = "serde_utils::prefixed_hex_or_bytes_hash")] pub H64);
