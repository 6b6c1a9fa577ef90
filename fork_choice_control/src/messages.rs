use std::collections::HashSet;

use anyhow::Result;
use fork_choice_store::{ChainLink, Node, Store};
use futures::channel::mpsc::UnboundedSender;
use log::debug;
use serde::Serialize;
use types::phase0::primitives::{Epoch, Slot, H256};

/// Notifications for the HTTP API and other components interested in fork choice progress.
#[derive(Clone, Debug)]
pub enum ApiMessage {
    Head(HeadEvent),
    FinalizedCheckpoint(FinalizedCheckpointEvent),
    ChainReorg(ChainReorgEvent),
}

impl ApiMessage {
    pub fn send(self, tx: &UnboundedSender<Self>) {
        if tx.unbounded_send(self).is_err() {
            debug!("send to HTTP API failed because the receiver was dropped");
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct HeadEvent {
    #[serde(with = "serde_utils::string_or_native")]
    pub slot: Slot,
    pub block: H256,
    pub state: H256,
    pub epoch_transition: bool,
    pub execution_optimistic: bool,
}

impl HeadEvent {
    pub(crate) fn new(store: &Store, head: &ChainLink) -> Result<Self> {
        let slot = head.slot();

        Ok(Self {
            slot,
            block: head.block_root,
            state: head.block.state_root,
            epoch_transition: store.chain_config().is_epoch_start(slot),
            execution_optimistic: store.payload_status(head.block_root)?.is_optimistic(),
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct FinalizedCheckpointEvent {
    pub block: H256,
    #[serde(with = "serde_utils::string_or_native")]
    pub epoch: Epoch,
    pub execution_optimistic: bool,
}

impl FinalizedCheckpointEvent {
    pub(crate) fn new(store: &Store) -> Result<Self> {
        let finalized_checkpoint = store.finalized_checkpoint()?;

        Ok(Self {
            block: finalized_checkpoint.root,
            epoch: finalized_checkpoint.epoch,
            execution_optimistic: store.payload_status(store.head_root()?)?.is_optimistic(),
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct ChainReorgEvent {
    #[serde(with = "serde_utils::string_or_native")]
    pub slot: Slot,
    #[serde(with = "serde_utils::string_or_native")]
    pub depth: u64,
    pub old_head_block: H256,
    pub new_head_block: H256,
    #[serde(with = "serde_utils::string_or_native")]
    pub epoch: Epoch,
    pub execution_optimistic: bool,
}

impl ChainReorgEvent {
    // `depth` is the distance from the old head to the latest block shared by both chains.
    // Blocks pruned from `new_store` are still present in `old_store`.
    pub(crate) fn new(old_store: &Store, new_store: &Store) -> Result<Self> {
        let old_head = old_store.head()?;
        let new_head = new_store.head()?;
        let new_tree_root = new_store.block_tree().root();

        let mut new_chain = new_store
            .block_tree()
            .ancestors(new_head.block_root)?
            .map(Node::root)
            .collect::<HashSet<_>>();

        if old_store.contains_block(new_tree_root) {
            new_chain.extend(old_store.block_tree().ancestors(new_tree_root)?.map(Node::root));
        }

        let common_ancestor_slot = old_store
            .block_tree()
            .ancestors(old_head.block_root)?
            .find(|node| new_chain.contains(&node.root()))
            .map(Node::slot);

        let common_ancestor_slot = match common_ancestor_slot {
            Some(slot) => slot,
            None => {
                let finalized_epoch = new_store.finalized_checkpoint()?.epoch;
                new_store.chain_config().start_slot_at_epoch(finalized_epoch)
            }
        };

        let slot = new_head.slot();

        Ok(Self {
            slot,
            depth: old_head.slot().abs_diff(common_ancestor_slot),
            old_head_block: old_head.block_root,
            new_head_block: new_head.block_root,
            epoch: new_store.chain_config().epoch_at_slot(slot),
            execution_optimistic: new_store
                .payload_status(new_head.block_root)?
                .is_optimistic(),
        })
    }
}
