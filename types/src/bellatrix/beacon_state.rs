use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::phase0::{
    containers::Checkpoint,
    primitives::{ExecutionBlockHash, Gwei, Slot, ValidatorIndex, H256},
};

/// The parts of a post-block state that fork choice reads.
///
/// Producing it is the job of the state transition function.
#[derive(Clone, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BeaconState {
    #[serde(with = "serde_utils::string_or_native")]
    pub slot: Slot,
    pub latest_block_root: H256,
    pub latest_execution_payload_block_hash: ExecutionBlockHash,
    pub current_justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
    /// Effective balances of active validators, indexed by validator index.
    pub balances: Arc<[Gwei]>,
}

impl BeaconState {
    #[must_use]
    pub fn balance(&self, validator_index: ValidatorIndex) -> Option<Gwei> {
        let index = usize::try_from(validator_index).ok()?;
        self.balances.get(index).copied()
    }
}
