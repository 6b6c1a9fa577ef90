use core::time::Duration;

use execution_engine::PayloadValidationStatus;
use thiserror::Error;
use types::phase0::primitives::{ExecutionBlockHash, H256};

#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum Error {
    #[error("state transition for block {block_root:?} did not finish within {timeout:?}")]
    StateTransitionTimedOut { block_root: H256, timeout: Duration },
    #[error("state transition rejected block {block_root:?}")]
    StateTransitionFailed { block_root: H256 },
    #[error(
        "execution engine reported payload of block {block_root:?} as invalid \
         (block_hash: {execution_block_hash:?}, latest_valid_hash: {latest_valid_hash:?}, \
         validation_error: {validation_error:?})"
    )]
    InvalidPayload {
        block_root: H256,
        execution_block_hash: ExecutionBlockHash,
        latest_valid_hash: Option<ExecutionBlockHash>,
        validation_error: Option<String>,
    },
    #[error(
        "execution engine did not start building a payload on top of {head_block_hash:?} \
         (status: {status})"
    )]
    PayloadNotBuilding {
        head_block_hash: ExecutionBlockHash,
        status: PayloadValidationStatus,
    },
    #[error(
        "cannot build a payload on top of block {block_root:?} \
         because it has no execution payload"
    )]
    HeadWithoutPayload { block_root: H256 },
    #[error("fork choice halted after an internal consistency error")]
    MutatorHalted,
}
