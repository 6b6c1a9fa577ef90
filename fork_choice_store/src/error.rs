use thiserror::Error;
use types::{
    nonstandard::CheckpointKind,
    phase0::{
        containers::Checkpoint,
        primitives::{Slot, H256},
    },
};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum Error {
    #[error("nil justified checkpoint returned from store")]
    NilJustifiedCheckpoint,
    #[error("nil best justified checkpoint returned from store")]
    NilBestJustifiedCheckpoint,
    #[error("nil finalized checkpoint returned from store")]
    NilFinalizedCheckpoint,
    #[error("cycle detected in block tree at block {block_root:?}")]
    CycleDetected { block_root: H256 },
    #[error("weight of block {block_root:?} would drop below zero")]
    WeightUnderflow { block_root: H256 },
    #[error("head {block_root:?} has no chain link in store")]
    MissingChainLink { block_root: H256 },
    #[error("parent of block is unknown (block_root: {block_root:?}, parent_root: {parent_root:?})")]
    UnknownParent { block_root: H256, parent_root: H256 },
    #[error("block {block_root:?} has been pruned or descends from a pruned block")]
    PrunedAncestor { block_root: H256 },
    #[error("block {block_root:?} is already known")]
    BlockAlreadyKnown { block_root: H256 },
    #[error(
        "block is from the future \
         (block_root: {block_root:?}, block_slot: {block_slot}, current_slot: {current_slot})"
    )]
    BlockFromFuture {
        block_root: H256,
        block_slot: Slot,
        current_slot: Slot,
    },
    #[error(
        "block is not later than its parent \
         (block_root: {block_root:?}, block_slot: {block_slot}, parent_slot: {parent_slot})"
    )]
    BlockNotAfterParent {
        block_root: H256,
        block_slot: Slot,
        parent_slot: Slot,
    },
    #[error(
        "block skips too many slots \
         (block_root: {block_root:?}, block_slot: {block_slot}, parent_slot: {parent_slot}, \
          max_empty_slots: {max_empty_slots})"
    )]
    TooManyEmptySlots {
        block_root: H256,
        block_slot: Slot,
        parent_slot: Slot,
        max_empty_slots: u64,
    },
    #[error(
        "block does not descend from finalized checkpoint \
         (block_root: {block_root:?}, finalized_checkpoint: {finalized_checkpoint:?})"
    )]
    BlockNotDescendantOfFinalized {
        block_root: H256,
        finalized_checkpoint: Checkpoint,
    },
    #[error("block {block_root:?} was previously marked invalid")]
    BlockMarkedInvalid { block_root: H256 },
    #[error(
        "parent of block was marked invalid (block_root: {block_root:?}, parent_root: {parent_root:?})"
    )]
    ParentMarkedInvalid { block_root: H256, parent_root: H256 },
    #[error("{kind} checkpoint would move backwards (old: {old:?}, new: {new:?})")]
    CheckpointRegression {
        kind: CheckpointKind,
        old: Checkpoint,
        new: Checkpoint,
    },
    #[error(
        "checkpoints are out of order \
         (justified: {justified:?}, best_justified: {best_justified:?}, finalized: {finalized:?})"
    )]
    CheckpointsOutOfOrder {
        justified: Checkpoint,
        best_justified: Checkpoint,
        finalized: Checkpoint,
    },
    #[error("block {block_root:?} is unknown")]
    UnknownBlock { block_root: H256 },
    #[error("attestation is for a future slot (slot: {slot}, current_slot: {current_slot})")]
    AttestationForFutureSlot { slot: Slot, current_slot: Slot },
}

impl Error {
    /// Whether the error means the store itself is corrupt.
    ///
    /// Block processing must stop after one of these. All other errors reject a single input.
    #[must_use]
    pub const fn is_internal_consistency(self) -> bool {
        matches!(
            self,
            Self::NilJustifiedCheckpoint
                | Self::NilBestJustifiedCheckpoint
                | Self::NilFinalizedCheckpoint
                | Self::CycleDetected { .. }
                | Self::WeightUnderflow { .. }
                | Self::MissingChainLink { .. },
        )
    }
}
