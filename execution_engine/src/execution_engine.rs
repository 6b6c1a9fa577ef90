#![expect(clippy::module_name_repetitions)]

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use anyhow::Result;
use async_trait::async_trait;
use ethereum_types::H64;
use log::debug;
use parking_lot::Mutex;
use types::phase0::primitives::{ExecutionBlockHash, H256};

use crate::{
    error::EngineError,
    types::{
        ExecutionPayloadV1, ForkChoiceStateV1, ForkChoiceUpdatedResponse, PayloadAttributesV1,
        PayloadId, PayloadStatusV1, PayloadValidationStatus,
    },
};

/// Methods of the Engine API that fork choice depends on.
///
/// Implementations report transport failures as [`EngineError`] wrapped in [`anyhow::Error`].
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    const IS_NULL: bool;

    /// [`engine_exchangeCapabilities`](https://github.com/ethereum/execution-apis/blob/9707339bc8222f6d43b3bf0a7a91623f7ce52213/src/engine/common.md#engine_exchangecapabilities)
    async fn exchange_capabilities(&self) -> Result<Vec<String>>;

    /// [`notify_new_payload`](https://github.com/ethereum/consensus-specs/blob/1bfefe301da592375e2e02f65849a96aadec1936/specs/bellatrix/beacon-chain.md#notify_new_payload)
    async fn notify_new_payload(
        &self,
        beacon_block_root: H256,
        payload: ExecutionPayloadV1,
    ) -> Result<PayloadStatusV1>;

    /// [`notify_forkchoice_updated`](https://github.com/ethereum/consensus-specs/blob/1bfefe301da592375e2e02f65849a96aadec1936/specs/bellatrix/fork-choice.md#notify_forkchoice_updated)
    async fn notify_forkchoice_updated(
        &self,
        fork_choice_state: ForkChoiceStateV1,
        payload_attributes: Option<PayloadAttributesV1>,
    ) -> Result<ForkChoiceUpdatedResponse>;

    /// [`engine_getPayloadV1`](https://github.com/ethereum/execution-apis/blob/b7c5d3420e00648f456744d121ffbd929862924d/src/engine/paris.md#engine_getpayloadv1)
    async fn get_payload(&self, payload_id: PayloadId) -> Result<ExecutionPayloadV1>;
}

#[async_trait]
impl<E: ExecutionEngine> ExecutionEngine for Arc<E> {
    const IS_NULL: bool = E::IS_NULL;

    async fn exchange_capabilities(&self) -> Result<Vec<String>> {
        self.as_ref().exchange_capabilities().await
    }

    async fn notify_new_payload(
        &self,
        beacon_block_root: H256,
        payload: ExecutionPayloadV1,
    ) -> Result<PayloadStatusV1> {
        self.as_ref()
            .notify_new_payload(beacon_block_root, payload)
            .await
    }

    async fn notify_forkchoice_updated(
        &self,
        fork_choice_state: ForkChoiceStateV1,
        payload_attributes: Option<PayloadAttributesV1>,
    ) -> Result<ForkChoiceUpdatedResponse> {
        self.as_ref()
            .notify_forkchoice_updated(fork_choice_state, payload_attributes)
            .await
    }

    async fn get_payload(&self, payload_id: PayloadId) -> Result<ExecutionPayloadV1> {
        self.as_ref().get_payload(payload_id).await
    }
}

/// Stands in for an execution engine when none is configured.
///
/// Every payload is reported as `SYNCING`, which makes fork choice import blocks optimistically.
#[derive(Clone, Copy)]
pub struct NullExecutionEngine;

#[async_trait]
impl ExecutionEngine for NullExecutionEngine {
    const IS_NULL: bool = true;

    async fn exchange_capabilities(&self) -> Result<Vec<String>> {
        Ok(vec![])
    }

    async fn notify_new_payload(
        &self,
        _beacon_block_root: H256,
        _payload: ExecutionPayloadV1,
    ) -> Result<PayloadStatusV1> {
        Ok(PayloadStatusV1::new(PayloadValidationStatus::Syncing))
    }

    async fn notify_forkchoice_updated(
        &self,
        _fork_choice_state: ForkChoiceStateV1,
        _payload_attributes: Option<PayloadAttributesV1>,
    ) -> Result<ForkChoiceUpdatedResponse> {
        Ok(ForkChoiceUpdatedResponse {
            payload_status: PayloadStatusV1::new(PayloadValidationStatus::Syncing),
            payload_id: None,
        })
    }

    async fn get_payload(&self, payload_id: PayloadId) -> Result<ExecutionPayloadV1> {
        Err(EngineError::unknown_payload(payload_id).into())
    }
}

/// Canned reply of [`MockExecutionEngine`].
#[derive(Clone, Debug)]
pub enum MockResponse {
    Status(PayloadStatusV1),
    Error(EngineError),
    /// Never reply. Used to exercise timeouts.
    Hang,
}

impl From<PayloadValidationStatus> for MockResponse {
    fn from(status: PayloadValidationStatus) -> Self {
        Self::Status(PayloadStatusV1::new(status))
    }
}

impl From<EngineError> for MockResponse {
    fn from(error: EngineError) -> Self {
        Self::Error(error)
    }
}

/// A request received by [`MockExecutionEngine`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum MockRequest {
    NewPayload {
        beacon_block_root: H256,
        block_hash: ExecutionBlockHash,
    },
    ForkChoiceUpdated {
        fork_choice_state: ForkChoiceStateV1,
        payload_attributes: Option<PayloadAttributesV1>,
    },
    GetPayload(PayloadId),
}

/// A scriptable execution engine for tests.
///
/// Replies are queued per execution block hash. Once a queue is drained, the default status is
/// returned. `engine_forkchoiceUpdatedV1` replies are keyed by the head block hash.
pub struct MockExecutionEngine {
    default_status: PayloadValidationStatus,
    responses: Mutex<HashMap<ExecutionBlockHash, VecDeque<MockResponse>>>,
    payloads: Mutex<HashMap<PayloadId, ExecutionPayloadV1>>,
    requests: Mutex<Vec<MockRequest>>,
}

impl Default for MockExecutionEngine {
    fn default() -> Self {
        Self::new(PayloadValidationStatus::Valid)
    }
}

impl MockExecutionEngine {
    #[must_use]
    pub fn new(default_status: PayloadValidationStatus) -> Self {
        Self {
            default_status,
            responses: Mutex::default(),
            payloads: Mutex::default(),
            requests: Mutex::default(),
        }
    }

    pub fn respond(&self, block_hash: ExecutionBlockHash, response: impl Into<MockResponse>) {
        self.responses
            .lock()
            .entry(block_hash)
            .or_default()
            .push_back(response.into());
    }

    pub fn insert_payload(&self, payload_id: PayloadId, payload: ExecutionPayloadV1) {
        self.payloads.lock().insert(payload_id, payload);
    }

    #[must_use]
    pub fn requests(&self) -> Vec<MockRequest> {
        self.requests.lock().clone()
    }

    async fn reply(&self, block_hash: ExecutionBlockHash) -> Result<PayloadStatusV1> {
        let response = self
            .responses
            .lock()
            .get_mut(&block_hash)
            .and_then(VecDeque::pop_front);

        match response {
            Some(MockResponse::Status(status)) => Ok(status),
            Some(MockResponse::Error(error)) => Err(error.into()),
            Some(MockResponse::Hang) => core::future::pending().await,
            None => Ok(PayloadStatusV1::new(self.default_status)),
        }
    }
}

#[async_trait]
impl ExecutionEngine for MockExecutionEngine {
    const IS_NULL: bool = false;

    async fn exchange_capabilities(&self) -> Result<Vec<String>> {
        Ok(vec![
            "engine_forkchoiceUpdatedV1".to_owned(),
            "engine_getPayloadV1".to_owned(),
            "engine_newPayloadV1".to_owned(),
        ])
    }

    async fn notify_new_payload(
        &self,
        beacon_block_root: H256,
        payload: ExecutionPayloadV1,
    ) -> Result<PayloadStatusV1> {
        let block_hash = payload.block_hash;

        debug!("mock engine received newPayload (block_hash: {block_hash:?})");

        self.requests.lock().push(MockRequest::NewPayload {
            beacon_block_root,
            block_hash,
        });

        self.reply(block_hash).await
    }

    async fn notify_forkchoice_updated(
        &self,
        fork_choice_state: ForkChoiceStateV1,
        payload_attributes: Option<PayloadAttributesV1>,
    ) -> Result<ForkChoiceUpdatedResponse> {
        self.requests.lock().push(MockRequest::ForkChoiceUpdated {
            fork_choice_state,
            payload_attributes,
        });

        let payload_status = self.reply(fork_choice_state.head_block_hash).await?;

        let payload_id = payload_attributes
            .filter(|_| payload_status.status.is_valid())
            .map(|attributes| PayloadId(H64::from_low_u64_be(attributes.timestamp)));

        Ok(ForkChoiceUpdatedResponse {
            payload_status,
            payload_id,
        })
    }

    async fn get_payload(&self, payload_id: PayloadId) -> Result<ExecutionPayloadV1> {
        self.requests.lock().push(MockRequest::GetPayload(payload_id));

        let payload = self.payloads.lock().get(&payload_id).cloned();

        payload.ok_or_else(|| EngineError::unknown_payload(payload_id).into())
    }
}
