use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{
    error::EngineError,
    types::{
        ExecutionPayloadV1, ForkChoiceStateV1, ForkChoiceUpdatedResponse, PayloadAttributesV1,
        PayloadStatusV1,
    },
};

// <https://github.com/ethereum/execution-apis/blob/b7c5d3420e00648f456744d121ffbd929862924d/src/engine/paris.md#executionpayloadv1>
const MAX_EXTRA_DATA_BYTES: usize = 32;

/// Conversion between Engine API objects and their JSON wire form.
///
/// `decode(encode(value)) == value` holds for every value that passes [`Self::check`].
/// Decoding never substitutes defaults for unknown enumeration values or malformed hex.
/// All failures are reported as [`EngineError::SchemaViolation`].
pub trait EngineMessage: Serialize + DeserializeOwned {
    /// Name of the object in the Engine API specification.
    const NAME: &'static str;

    /// Checks constraints that the types alone do not enforce.
    fn check(&self) -> Result<(), String> {
        Ok(())
    }

    fn to_json(&self) -> Result<Value> {
        self.check().map_err(schema_violation::<Self>)?;
        serde_json::to_value(self).map_err(|error| schema_violation::<Self>(error).into())
    }

    fn from_json(value: Value) -> Result<Self> {
        let message = serde_json::from_value::<Self>(value).map_err(schema_violation::<Self>)?;
        message.check().map_err(schema_violation::<Self>)?;
        Ok(message)
    }

    fn encode(&self) -> Result<Vec<u8>> {
        self.check().map_err(schema_violation::<Self>)?;
        serde_json::to_vec(self).map_err(|error| schema_violation::<Self>(error).into())
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let message = serde_json::from_slice::<Self>(bytes).map_err(schema_violation::<Self>)?;
        message.check().map_err(schema_violation::<Self>)?;
        Ok(message)
    }
}

impl EngineMessage for ExecutionPayloadV1 {
    const NAME: &'static str = "ExecutionPayloadV1";

    fn check(&self) -> Result<(), String> {
        if self.extra_data.len() > MAX_EXTRA_DATA_BYTES {
            return Err(format!(
                "extraData is {} bytes long (maximum: {MAX_EXTRA_DATA_BYTES})",
                self.extra_data.len(),
            ));
        }

        Ok(())
    }
}

impl EngineMessage for PayloadAttributesV1 {
    const NAME: &'static str = "PayloadAttributesV1";
}

impl EngineMessage for PayloadStatusV1 {
    const NAME: &'static str = "PayloadStatusV1";
}

impl EngineMessage for ForkChoiceStateV1 {
    const NAME: &'static str = "ForkchoiceStateV1";
}

impl EngineMessage for ForkChoiceUpdatedResponse {
    const NAME: &'static str = "ForkchoiceUpdatedResponseV1";
}

fn schema_violation<M: EngineMessage>(reason: impl ToString) -> EngineError {
    EngineError::SchemaViolation {
        message: M::NAME,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use core::fmt::Debug;

    use ethereum_types::{H160, H256, H64, U256};
    use hex_literal::hex;
    use serde_json::json;
    use test_case::test_case;
    use types::bellatrix::primitives::{Bloom, Transaction};

    use crate::{types::PayloadId, PayloadValidationStatus};

    use super::*;

    fn assert_conforms<M: EngineMessage + PartialEq + Debug>(message: &M, wire: &Value) -> Result<()> {
        assert_eq!(&message.to_json()?, wire);
        assert_eq!(&serde_json::from_slice::<Value>(&message.encode()?)?, wire);
        assert_eq!(&M::from_json(wire.clone())?, message);
        assert_eq!(&M::decode(&message.encode()?)?, message);
        Ok(())
    }

    fn assert_schema_violation(result: Result<impl Debug>) {
        let error = result.expect_err("decoding should fail");

        assert!(
            error
                .downcast_ref::<EngineError>()
                .is_some_and(EngineError::is_schema_violation),
            "unexpected error: {error:?}",
        );
    }

    fn payload() -> ExecutionPayloadV1 {
        ExecutionPayloadV1 {
            parent_hash: H256(hex!(
                "3b8fb240d288781d4aac94d3fd16809ee413bc99294a085798a589dae51ddd4a"
            )),
            fee_recipient: H160(hex!("a94f5374fce5edbc8e2a8697c15331677e6ebf0b")),
            state_root: H256(hex!(
                "ca3149fa9e37db08d1cd49c9061db1002ef1cd58db2210f2115c8c989b2bdf45"
            )),
            receipts_root: H256(hex!(
                "56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421"
            )),
            logs_bloom: Bloom::zero(),
            prev_randao: H256::zero(),
            block_number: 1,
            gas_limit: 0x1c9c380,
            gas_used: 0,
            timestamp: 0x5,
            extra_data: vec![],
            base_fee_per_gas: U256::from(7_u64),
            block_hash: H256(hex!(
                "3559e851470f6e7bbed1db474980683e8c315bfce99b2a6ef47c057c04de7858"
            )),
            transactions: vec![Transaction::from(vec![0xf8, 0x65])],
        }
    }

    #[test]
    fn execution_payload_v1_conforms_to_engine_api() -> Result<()> {
        let wire = json!({
            "parentHash": "0x3b8fb240d288781d4aac94d3fd16809ee413bc99294a085798a589dae51ddd4a",
            "feeRecipient": "0xa94f5374fce5edbc8e2a8697c15331677e6ebf0b",
            "stateRoot": "0xca3149fa9e37db08d1cd49c9061db1002ef1cd58db2210f2115c8c989b2bdf45",
            "receiptsRoot": "0x56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421",
            "logsBloom": format!("0x{}", "00".repeat(256)),
            "prevRandao": "0x0000000000000000000000000000000000000000000000000000000000000000",
            "blockNumber": "0x1",
            "gasLimit": "0x1c9c380",
            "gasUsed": "0x0",
            "timestamp": "0x5",
            "extraData": "0x",
            "baseFeePerGas": "0x7",
            "blockHash": "0x3559e851470f6e7bbed1db474980683e8c315bfce99b2a6ef47c057c04de7858",
            "transactions": ["0xf865"],
        });

        assert_conforms(&payload(), &wire)
    }

    #[test]
    fn payload_attributes_v1_conforms_to_engine_api() -> Result<()> {
        let attributes = PayloadAttributesV1 {
            timestamp: 0x5,
            prev_randao: H256::zero(),
            suggested_fee_recipient: H160(hex!("a94f5374fce5edbc8e2a8697c15331677e6ebf0b")),
        };

        let wire = json!({
            "timestamp": "0x5",
            "prevRandao": "0x0000000000000000000000000000000000000000000000000000000000000000",
            "suggestedFeeRecipient": "0xa94f5374fce5edbc8e2a8697c15331677e6ebf0b",
        });

        assert_conforms(&attributes, &wire)
    }

    #[test]
    fn payload_status_v1_conforms_to_engine_api() -> Result<()> {
        let status = PayloadStatusV1 {
            status: PayloadValidationStatus::Invalid,
            latest_valid_hash: Some(H256::repeat_byte(0x11)),
            validation_error: Some("invalid state root".to_owned()),
        };

        let wire = json!({
            "status": "INVALID",
            "latestValidHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "validationError": "invalid state root",
        });

        assert_conforms(&status, &wire)
    }

    #[test]
    fn payload_status_v1_omits_absent_optional_fields() -> Result<()> {
        let status = PayloadStatusV1::new(PayloadValidationStatus::Syncing);

        assert_conforms(&status, &json!({ "status": "SYNCING" }))
    }

    #[test]
    fn payload_status_v1_accepts_null_optional_fields() -> Result<()> {
        let wire = json!({
            "status": "ACCEPTED",
            "latestValidHash": null,
            "validationError": null,
        });

        assert_eq!(
            PayloadStatusV1::from_json(wire)?,
            PayloadStatusV1::new(PayloadValidationStatus::Accepted),
        );

        Ok(())
    }

    #[test]
    fn fork_choice_state_v1_conforms_to_engine_api() -> Result<()> {
        let state = ForkChoiceStateV1 {
            head_block_hash: H256::repeat_byte(0x03),
            safe_block_hash: H256::repeat_byte(0x02),
            finalized_block_hash: H256::zero(),
        };

        let wire = json!({
            "headBlockHash": "0x0303030303030303030303030303030303030303030303030303030303030303",
            "safeBlockHash": "0x0202020202020202020202020202020202020202020202020202020202020202",
            "finalizedBlockHash": "0x0000000000000000000000000000000000000000000000000000000000000000",
        });

        assert_conforms(&state, &wire)
    }

    #[test]
    fn fork_choice_updated_response_conforms_to_engine_api() -> Result<()> {
        let response = ForkChoiceUpdatedResponse {
            payload_status: PayloadStatusV1 {
                status: PayloadValidationStatus::Valid,
                latest_valid_hash: Some(H256::repeat_byte(0x03)),
                validation_error: None,
            },
            payload_id: Some(PayloadId(H64(hex!("a247243752eb10b4")))),
        };

        let wire = json!({
            "payloadStatus": {
                "status": "VALID",
                "latestValidHash": "0x0303030303030303030303030303030303030303030303030303030303030303",
            },
            "payloadId": "0xa247243752eb10b4",
        });

        assert_conforms(&response, &wire)
    }

    #[test_case("VALID",              PayloadValidationStatus::Valid)]
    #[test_case("INVALID",            PayloadValidationStatus::Invalid)]
    #[test_case("SYNCING",            PayloadValidationStatus::Syncing)]
    #[test_case("ACCEPTED",           PayloadValidationStatus::Accepted)]
    #[test_case("INVALID_BLOCK_HASH", PayloadValidationStatus::InvalidBlockHash)]
    fn status_is_encoded_as_its_name(name: &str, status: PayloadValidationStatus) -> Result<()> {
        assert_conforms(&PayloadStatusV1::new(status), &json!({ "status": name }))?;
        assert_eq!(status.to_string(), name);
        Ok(())
    }

    #[test_case("UNKNOWN"; "unknown status")]
    #[test_case("valid";   "status in lowercase")]
    #[test_case("";        "empty status")]
    fn decoding_unrecognized_status_fails_with_schema_violation(status: &str) {
        assert_schema_violation(PayloadStatusV1::from_json(json!({ "status": status })));
    }

    #[test]
    fn decoding_status_as_number_fails_with_schema_violation() {
        assert_schema_violation(PayloadStatusV1::decode(br#"{"status":0}"#));
    }

    #[test_case("blockNumber",   json!("0x01");   "quantity with leading zero")]
    #[test_case("blockNumber",   json!("1");      "quantity without prefix")]
    #[test_case("gasLimit",      json!(30);       "quantity as number")]
    #[test_case("baseFeePerGas", json!("0x");     "quantity without digits")]
    #[test_case("blockHash",     json!("0x1234"); "hash too short")]
    #[test_case("blockHash",     json!("03".repeat(32)); "hash without prefix")]
    #[test_case("prevRandao",    json!("00".repeat(32)); "random value without prefix")]
    #[test_case("feeRecipient",  json!("a94f5374fce5edbc8e2a8697c15331677e6ebf0b"); "address without prefix")]
    #[test_case("logsBloom",     json!("00".repeat(256)); "bloom without prefix")]
    #[test_case("feeRecipient",  json!("0xa94f5374fce5edbc8e2a8697c15331677e6ebf0z"); "address with invalid digit")]
    #[test_case("extraData",     json!("0x123");  "data with odd number of digits")]
    #[test_case("extraData",     json!(format!("0x{}", "ab".repeat(33))); "extra data too long")]
    #[test_case("transactions",  json!(["f865"]); "transaction without prefix")]
    fn decoding_malformed_payload_fails_with_schema_violation(field: &str, value: Value) -> Result<()> {
        let mut wire = payload().to_json()?;
        wire[field] = value;
        assert_schema_violation(ExecutionPayloadV1::from_json(wire));
        Ok(())
    }

    #[test_case("headBlockHash")]
    #[test_case("safeBlockHash")]
    #[test_case("finalizedBlockHash")]
    fn decoding_fork_choice_state_with_unprefixed_hash_fails_with_schema_violation(
        field: &str,
    ) -> Result<()> {
        let mut wire = ForkChoiceStateV1::default().to_json()?;
        wire[field] = json!("03".repeat(32));
        assert_schema_violation(ForkChoiceStateV1::from_json(wire));
        Ok(())
    }

    #[test]
    fn decoding_unprefixed_latest_valid_hash_fails_with_schema_violation() {
        assert_schema_violation(PayloadStatusV1::from_json(json!({
            "status": "INVALID",
            "latestValidHash": "03".repeat(32),
        })));
    }

    #[test]
    fn decoding_payload_with_missing_field_fails_with_schema_violation() -> Result<()> {
        let mut wire = payload().to_json()?;

        if let Value::Object(map) = &mut wire {
            map.remove("stateRoot");
        }

        assert_schema_violation(ExecutionPayloadV1::from_json(wire));

        Ok(())
    }

    #[test]
    fn encoding_payload_with_oversized_extra_data_fails() {
        let payload = ExecutionPayloadV1 {
            extra_data: vec![0; 33],
            ..payload()
        };

        assert_schema_violation(payload.encode());
    }
}
