use core::fmt::{Formatter, Result as FmtResult};
use std::sync::Arc;

use derivative::Derivative;
use types::{
    bellatrix::{beacon_state::BeaconState, containers::BeaconBlock},
    phase0::primitives::{Epoch, ExecutionBlockHash, Gwei, Slot, H256},
};

/// The [weight] of a block combined with its root as a [tiebreaker].
///
/// [weight]:     https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#get_weight
/// [tiebreaker]: https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#get_head
pub type Score = (Gwei, H256);

#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct ChainLink {
    pub block_root: H256,
    #[derivative(Debug(format_with = "fmt_block_concisely"))]
    pub block: Arc<BeaconBlock>,
    #[derivative(Debug(format_with = "fmt_as_wildcard"))]
    pub state: Arc<BeaconState>,
}

impl ChainLink {
    #[must_use]
    pub fn slot(&self) -> Slot {
        self.block.slot
    }

    #[must_use]
    pub fn parent_root(&self) -> H256 {
        self.block.parent_root
    }

    #[must_use]
    pub fn execution_block_hash(&self) -> ExecutionBlockHash {
        self.block.body.execution_payload.block_hash
    }
}

/// [`LatestMessage`](https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#latestmessage)
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LatestMessage {
    pub epoch: Epoch,
    // This is the LMD GHOST vote root and corresponds to `AttestationData.beacon_block_root`.
    pub beacon_block_root: H256,
}

/// What a mutation of [`Store`](crate::Store) did to the head and checkpoints.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StoreChanges {
    pub old_head: H256,
    pub new_head: H256,
    /// Whether the new head does not descend from the old one.
    pub reorganized: bool,
    pub justified_checkpoint_updated: bool,
    pub finalized_checkpoint_updated: bool,
    pub pruned_roots: Vec<H256>,
}

impl StoreChanges {
    /// Changes of a mutation that left the store as it was.
    #[must_use]
    pub const fn unchanged(head: H256) -> Self {
        Self {
            old_head: head,
            new_head: head,
            reorganized: false,
            justified_checkpoint_updated: false,
            finalized_checkpoint_updated: false,
            pruned_roots: vec![],
        }
    }

    #[must_use]
    pub fn is_head_changed(&self) -> bool {
        self.old_head != self.new_head
    }
}

fn fmt_block_concisely(block: &BeaconBlock, formatter: &mut Formatter) -> FmtResult {
    formatter
        .debug_struct("BeaconBlock")
        .field("slot", &block.slot)
        .field("parent_root", &block.parent_root)
        .field("block_hash", &block.body.execution_payload.block_hash)
        .finish_non_exhaustive()
}

fn fmt_as_wildcard<T>(_: T, formatter: &mut Formatter) -> FmtResult {
    formatter.write_str("_")
}
