use core::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use execution_engine::ExecutionEngine;
use fork_choice_store::{ChainLink, Store};
use types::{
    nonstandard::PayloadStatus,
    phase0::{
        containers::Checkpoint,
        primitives::{Slot, H256},
    },
};

use crate::{
    controller::Controller, pipeline::PipelineState, state_transition::StateTransition,
    storage::Storage,
};

// None of these wait for block processing. They read whatever snapshot was published last.
impl<E, T, S> Controller<E, T, S>
where
    E: ExecutionEngine,
    T: StateTransition,
    S: Storage,
{
    #[must_use]
    pub fn store_snapshot(&self) -> Arc<Store> {
        self.store_snapshot.load_full()
    }

    #[must_use]
    pub fn slot(&self) -> Slot {
        self.store_snapshot().slot()
    }

    pub fn head(&self) -> Result<ChainLink> {
        self.store_snapshot().head().cloned()
    }

    pub fn head_root(&self) -> Result<H256> {
        self.store_snapshot().head_root()
    }

    pub fn justified_checkpoint(&self) -> Result<Checkpoint> {
        self.store_snapshot().justified_checkpoint()
    }

    pub fn best_justified_checkpoint(&self) -> Result<Checkpoint> {
        self.store_snapshot().best_justified_checkpoint()
    }

    pub fn finalized_checkpoint(&self) -> Result<Checkpoint> {
        self.store_snapshot().finalized_checkpoint()
    }

    pub fn payload_status(&self, block_root: H256) -> Result<PayloadStatus> {
        self.store_snapshot().payload_status(block_root)
    }

    #[must_use]
    pub fn contains_block(&self, block_root: H256) -> bool {
        self.store_snapshot().contains_block(block_root)
    }

    #[must_use]
    pub fn is_rejected(&self, block_root: H256) -> bool {
        self.store_snapshot().is_rejected(block_root)
    }

    /// Whether block processing stopped after an internal consistency error.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// States visited by the most recent call to [`Controller::process_block`].
    #[must_use]
    pub fn last_pipeline_states(&self) -> Vec<PipelineState> {
        self.last_pipeline_states.lock().clone()
    }
}
