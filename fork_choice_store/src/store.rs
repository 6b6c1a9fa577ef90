use std::{collections::HashMap as StdHashMap, sync::Arc};

use anyhow::{bail, ensure, Result};
use im::{HashMap, HashSet};
use log::{debug, warn};
use types::{
    bellatrix::beacon_state::BeaconState,
    config::Config as ChainConfig,
    nonstandard::{BlockWithRoot, CheckpointKind, PayloadStatus},
    phase0::{
        containers::{AttesterSlashing, Checkpoint, IndexedAttestation},
        primitives::{Epoch, ExecutionBlockHash, Gwei, Slot, ValidatorIndex, H256},
    },
};

use crate::{
    block_tree::{BlockTree, Node},
    checkpoints::CheckpointStore,
    error::Error,
    misc::{ChainLink, LatestMessage, StoreChanges},
    store_config::StoreConfig,
};

/// [`Store`] from the Fork Choice specification.
///
/// All fields are persistent or reference counted, so cloning a [`Store`] is cheap.
/// Mutations are meant to be applied to a clone and published only once they all succeed.
///
/// [`Store`]: https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#store
#[derive(Clone)]
pub struct Store {
    chain_config: Arc<ChainConfig>,
    store_config: StoreConfig,
    slot: Slot,
    checkpoints: CheckpointStore,
    tree: BlockTree,
    // Blocks and post-states of every block in `Store.tree`.
    chain_links: HashMap<H256, ChainLink>,
    latest_messages: HashMap<ValidatorIndex, LatestMessage>,
    equivocating_indices: HashSet<ValidatorIndex>,
    // Balances from the state of the justified block.
    // Votes are weighted by these until the justified checkpoint changes.
    justified_balances: Arc<[Gwei]>,
    rejected_block_roots: HashSet<H256>,
}

impl Store {
    /// [`get_forkchoice_store`](https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#get_forkchoice_store)
    pub fn new(
        chain_config: Arc<ChainConfig>,
        store_config: StoreConfig,
        anchor: BlockWithRoot,
        anchor_state: Arc<BeaconState>,
    ) -> Result<Self> {
        let BlockWithRoot { block, root } = anchor;

        ensure!(
            anchor_state.latest_block_root == root,
            "anchor state does not belong to anchor block \
             (block_root: {root:?}, latest_block_root: {:?})",
            anchor_state.latest_block_root,
        );

        let checkpoint = Checkpoint {
            epoch: chain_config.epoch_at_slot(block.slot),
            root,
        };

        let tree = BlockTree::new(
            root,
            block.slot,
            block.body.execution_payload.block_hash,
            PayloadStatus::Valid,
        );

        let anchor = ChainLink {
            block_root: root,
            block,
            state: anchor_state.clone(),
        };

        Ok(Self {
            chain_config,
            store_config,
            slot: anchor.slot(),
            checkpoints: CheckpointStore::new(checkpoint),
            tree,
            chain_links: HashMap::unit(root, anchor),
            latest_messages: HashMap::new(),
            equivocating_indices: HashSet::new(),
            justified_balances: anchor_state.balances.clone(),
            rejected_block_roots: HashSet::new(),
        })
    }

    #[must_use]
    pub fn chain_config(&self) -> &ChainConfig {
        &self.chain_config
    }

    #[must_use]
    pub const fn store_config(&self) -> StoreConfig {
        self.store_config
    }

    #[must_use]
    pub const fn slot(&self) -> Slot {
        self.slot
    }

    #[must_use]
    pub fn current_epoch(&self) -> Epoch {
        self.chain_config.epoch_at_slot(self.slot)
    }

    #[must_use]
    pub const fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn justified_checkpoint(&self) -> Result<Checkpoint> {
        self.checkpoints.justified()
    }

    pub fn best_justified_checkpoint(&self) -> Result<Checkpoint> {
        self.checkpoints.best_justified()
    }

    pub fn finalized_checkpoint(&self) -> Result<Checkpoint> {
        self.checkpoints.finalized()
    }

    #[must_use]
    pub const fn block_tree(&self) -> &BlockTree {
        &self.tree
    }

    #[must_use]
    pub fn chain_link(&self, block_root: H256) -> Option<&ChainLink> {
        self.chain_links.get(&block_root)
    }

    #[must_use]
    pub fn contains_block(&self, block_root: H256) -> bool {
        self.tree.contains(block_root)
    }

    #[must_use]
    pub fn is_rejected(&self, block_root: H256) -> bool {
        self.rejected_block_roots.contains(&block_root)
    }

    #[must_use]
    pub fn latest_message(&self, validator_index: ValidatorIndex) -> Option<LatestMessage> {
        self.latest_messages.get(&validator_index).copied()
    }

    #[must_use]
    pub fn is_equivocating(&self, validator_index: ValidatorIndex) -> bool {
        self.equivocating_indices.contains(&validator_index)
    }

    pub fn payload_status(&self, block_root: H256) -> Result<PayloadStatus> {
        self.tree.node(block_root).map(Node::payload_status)
    }

    pub fn head_root(&self) -> Result<H256> {
        self.tree.head(self.justified_checkpoint()?.root)
    }

    pub fn head(&self) -> Result<&ChainLink> {
        let block_root = self.head_root()?;

        self.chain_link(block_root)
            .ok_or_else(|| Error::MissingChainLink { block_root }.into())
    }

    /// Execution block hash of the justified block. Zero if the block is not in the store.
    pub fn safe_execution_payload_hash(&self) -> Result<ExecutionBlockHash> {
        let root = self.justified_checkpoint()?.root;
        Ok(self.execution_block_hash(root))
    }

    /// Execution block hash of the finalized block. Zero if the block is not in the store.
    pub fn finalized_execution_payload_hash(&self) -> Result<ExecutionBlockHash> {
        let root = self.finalized_checkpoint()?.root;
        Ok(self.execution_block_hash(root))
    }

    /// Checks whether a block can be imported and returns the state to apply it to.
    ///
    /// Corresponds to the assertions at the start of [`on_block`].
    /// Does not mutate the store.
    ///
    /// [`on_block`]: https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#on_block
    pub fn validate_block(&self, block: &BlockWithRoot) -> Result<Arc<BeaconState>> {
        let block_root = block.root;
        let block_slot = block.block.slot;
        let parent_root = block.block.parent_root;

        ensure!(
            !self.is_rejected(block_root),
            Error::BlockMarkedInvalid { block_root },
        );

        ensure!(
            !self.contains_block(block_root),
            Error::BlockAlreadyKnown { block_root },
        );

        // > Blocks cannot be in the future.
        ensure!(
            block_slot <= self.slot,
            Error::BlockFromFuture {
                block_root,
                block_slot,
                current_slot: self.slot,
            },
        );

        let parent_invalid = self.is_rejected(parent_root)
            || self
                .payload_status(parent_root)
                .is_ok_and(PayloadStatus::is_invalid);

        ensure!(
            !parent_invalid,
            Error::ParentMarkedInvalid {
                block_root,
                parent_root,
            },
        );

        if self.tree.is_pruned(parent_root) {
            bail!(Error::PrunedAncestor { block_root });
        }

        // > Parent block must be known
        let Some(parent) = self.chain_link(parent_root) else {
            bail!(Error::UnknownParent {
                block_root,
                parent_root,
            });
        };

        let parent_slot = parent.slot();

        ensure!(
            parent_slot < block_slot,
            Error::BlockNotAfterParent {
                block_root,
                block_slot,
                parent_slot,
            },
        );

        let max_empty_slots = self.store_config.max_empty_slots;

        ensure!(
            block_slot - parent_slot <= max_empty_slots,
            Error::TooManyEmptySlots {
                block_root,
                block_slot,
                parent_slot,
                max_empty_slots,
            },
        );

        // > Check that block is later than the finalized epoch slot
        // > Check block is a descendant of the finalized block at the checkpoint finalized slot
        let finalized_checkpoint = self.finalized_checkpoint()?;
        let finalized_slot = self.finalized_slot()?;

        ensure!(
            finalized_slot < block_slot
                && self.tree.ancestor_at_slot(parent_root, finalized_slot)?
                    == Some(finalized_checkpoint.root),
            Error::BlockNotDescendantOfFinalized {
                block_root,
                finalized_checkpoint,
            },
        );

        Ok(parent.state.clone())
    }

    /// Applies a block previously validated using [`Self::validate_block`] along with the state
    /// produced by the state transition.
    ///
    /// Roughly corresponds to [`on_block`] followed by [`on_attestation`] and
    /// [`on_attester_slashing`] for the operations contained in the block.
    ///
    /// [`on_block`]:             https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#on_block
    /// [`on_attestation`]:       https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#on_attestation
    /// [`on_attester_slashing`]: https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#on_attester_slashing
    pub fn apply_block(
        &mut self,
        block: BlockWithRoot,
        post_state: Arc<BeaconState>,
        payload_status: PayloadStatus,
    ) -> Result<StoreChanges> {
        let BlockWithRoot {
            block,
            root: block_root,
        } = block;

        let old_head = self.head_root()?;
        let old_checkpoints = self.checkpoints;

        self.tree.insert(
            block_root,
            block.parent_root,
            block.slot,
            block.body.execution_payload.block_hash,
            payload_status,
        )?;

        self.chain_links.insert(
            block_root,
            ChainLink {
                block_root,
                block: block.clone(),
                state: post_state.clone(),
            },
        );

        // > Update checkpoints in store if necessary
        self.update_checkpoints(&post_state)?;

        for attestation in &block.body.attestations {
            if let Err(error) = self.validate_attestation(attestation) {
                debug!("ignoring attestation in block {block_root:?}: {error}");
                continue;
            }

            self.update_latest_messages(attestation)?;
        }

        for attester_slashing in &block.body.attester_slashings {
            self.slash(attester_slashing.slashable_indices())?;
        }

        self.finish_update(old_head, old_checkpoints)
    }

    /// [`on_tick`](https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#on_tick)
    ///
    /// Returns [`None`] if `slot` is not later than the current slot.
    pub fn apply_tick(&mut self, slot: Slot) -> Result<Option<StoreChanges>> {
        // If multiple tick updates are performed in quick succession, they can come in any order.
        if slot <= self.slot {
            return Ok(None);
        }

        let old_head = self.head_root()?;
        let old_checkpoints = self.checkpoints;
        let old_epoch = self.current_epoch();

        self.slot = slot;

        // > Update store.justified_checkpoint if a better checkpoint on the store.finalized_checkpoint chain
        if self.current_epoch() > old_epoch {
            let best_justified_checkpoint = self.best_justified_checkpoint()?;

            if best_justified_checkpoint.epoch > self.justified_checkpoint()?.epoch
                && self.is_on_finalized_chain(best_justified_checkpoint.root)?
            {
                self.advance(CheckpointKind::Justified, best_justified_checkpoint)?;
            }
        }

        self.finish_update(old_head, old_checkpoints).map(Some)
    }

    /// [`on_attestation`](https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#on_attestation)
    ///
    /// Signatures and committee membership are expected to have been verified already.
    pub fn apply_attestation(&mut self, attestation: &IndexedAttestation) -> Result<StoreChanges> {
        self.validate_attestation(attestation)?;

        let old_head = self.head_root()?;
        let old_checkpoints = self.checkpoints;

        self.update_latest_messages(attestation)?;

        self.finish_update(old_head, old_checkpoints)
    }

    /// [`on_attester_slashing`](https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#on_attester_slashing)
    pub fn apply_attester_slashing(
        &mut self,
        attester_slashing: &AttesterSlashing,
    ) -> Result<StoreChanges> {
        let old_head = self.head_root()?;
        let old_checkpoints = self.checkpoints;

        self.slash(attester_slashing.slashable_indices())?;

        self.finish_update(old_head, old_checkpoints)
    }

    /// Records a payload status reported by the execution engine for a block already in the store.
    ///
    /// For [`PayloadStatus::Invalid`], `latest_valid_hash` identifies the most recent valid
    /// ancestor. Every block after it on the chain leading to `block_root` is invalidated.
    pub fn apply_payload_status(
        &mut self,
        block_root: H256,
        payload_status: PayloadStatus,
        latest_valid_hash: Option<ExecutionBlockHash>,
    ) -> Result<StoreChanges> {
        let old_head = self.head_root()?;
        let old_checkpoints = self.checkpoints;

        match payload_status {
            PayloadStatus::Valid => self.tree.mark_valid(block_root)?,
            PayloadStatus::Optimistic => {}
            PayloadStatus::Invalid => self.invalidate(block_root, latest_valid_hash)?,
        }

        self.finish_update(old_head, old_checkpoints)
    }

    /// Remembers a block that must never be imported.
    pub fn reject_block(&mut self, block_root: H256) {
        self.rejected_block_roots.insert(block_root);
    }

    /// Replaces all checkpoints, possibly moving them backwards.
    ///
    /// All checkpoint blocks must still be in the store.
    pub fn reset_checkpoints(
        &mut self,
        justified: Checkpoint,
        best_justified: Checkpoint,
        finalized: Checkpoint,
        reason: &str,
    ) -> Result<StoreChanges> {
        for checkpoint in [justified, best_justified, finalized] {
            self.tree.node(checkpoint.root)?;
        }

        let old_head = self.head_root()?;
        let old_checkpoints = self.checkpoints;

        self.checkpoints
            .reset_for_reorg(justified, best_justified, finalized, reason)?;

        self.finish_update(old_head, old_checkpoints)
    }

    fn finish_update(
        &mut self,
        old_head: H256,
        old_checkpoints: CheckpointStore,
    ) -> Result<StoreChanges> {
        let old_justified_checkpoint = old_checkpoints.justified()?;
        let old_finalized_checkpoint = old_checkpoints.finalized()?;
        let justified_checkpoint = self.justified_checkpoint()?;
        let finalized_checkpoint = self.finalized_checkpoint()?;

        ensure!(
            finalized_checkpoint.epoch <= justified_checkpoint.epoch,
            Error::CheckpointsOutOfOrder {
                justified: justified_checkpoint,
                best_justified: self.best_justified_checkpoint()?,
                finalized: finalized_checkpoint,
            },
        );

        let justified_checkpoint_updated = justified_checkpoint != old_justified_checkpoint;
        let finalized_checkpoint_updated = finalized_checkpoint != old_finalized_checkpoint;

        if justified_checkpoint_updated {
            self.update_balances_after_justification()?;
        }

        let pruned_roots = if finalized_checkpoint.epoch > old_finalized_checkpoint.epoch {
            self.prune_after_finalization()?
        } else {
            vec![]
        };

        let new_head = self.head_root()?;

        Ok(StoreChanges {
            old_head,
            new_head,
            reorganized: !self.tree.is_descendant(old_head, new_head),
            justified_checkpoint_updated,
            finalized_checkpoint_updated,
            pruned_roots,
        })
    }

    fn update_checkpoints(&mut self, state: &BeaconState) -> Result<()> {
        let state_justified_checkpoint = state.current_justified_checkpoint;
        let state_finalized_checkpoint = state.finalized_checkpoint;

        // > Update justified checkpoint
        if state_justified_checkpoint.epoch > self.justified_checkpoint()?.epoch
            && self.is_checkpoint_known(state_justified_checkpoint)
        {
            if state_justified_checkpoint.epoch > self.best_justified_checkpoint()?.epoch {
                self.advance(CheckpointKind::BestJustified, state_justified_checkpoint)?;
            }

            if self.should_update_justified_checkpoint(state_justified_checkpoint)? {
                self.advance(CheckpointKind::Justified, state_justified_checkpoint)?;
            }
        }

        // > Update finalized checkpoint
        if state_finalized_checkpoint.epoch > self.finalized_checkpoint()?.epoch
            && self.is_checkpoint_known(state_finalized_checkpoint)
        {
            self.advance(CheckpointKind::Finalized, state_finalized_checkpoint)?;

            // > Potentially update justified if different from store
            let justified_checkpoint = self.justified_checkpoint()?;
            let justified_descends_from_finalized =
                self.is_on_finalized_chain(justified_checkpoint.root)?;

            if state_justified_checkpoint.epoch >= justified_checkpoint.epoch {
                if state_justified_checkpoint.epoch > justified_checkpoint.epoch
                    || !justified_descends_from_finalized
                {
                    self.advance(CheckpointKind::Justified, state_justified_checkpoint)?;
                }
            } else if !justified_descends_from_finalized {
                let best_justified_checkpoint = self.best_justified_checkpoint()?;

                let best_justified_checkpoint = if best_justified_checkpoint.epoch
                    >= state_justified_checkpoint.epoch
                    && self.is_on_finalized_chain(best_justified_checkpoint.root)?
                {
                    best_justified_checkpoint
                } else {
                    state_justified_checkpoint
                };

                self.checkpoints.reset_for_reorg(
                    state_justified_checkpoint,
                    best_justified_checkpoint,
                    state_finalized_checkpoint,
                    "justified checkpoint conflicts with newly finalized checkpoint",
                )?;
            }
        }

        let justified_checkpoint = self.justified_checkpoint()?;

        if self.best_justified_checkpoint()?.epoch < justified_checkpoint.epoch {
            self.advance(CheckpointKind::BestJustified, justified_checkpoint)?;
        }

        Ok(())
    }

    /// [`should_update_justified_checkpoint`](https://github.com/ethereum/consensus-specs/blob/v1.0.0/specs/phase0/fork-choice.md#should_update_justified_checkpoint)
    fn should_update_justified_checkpoint(&self, new_justified_checkpoint: Checkpoint) -> Result<bool> {
        let slots_since_epoch_start = self.chain_config.slots_since_epoch_start(self.slot);

        if slots_since_epoch_start < self.chain_config.safe_slots_to_update_justified {
            return Ok(true);
        }

        let justified_checkpoint = self.justified_checkpoint()?;
        let justified_slot = self
            .chain_config
            .start_slot_at_epoch(justified_checkpoint.epoch);

        let ancestor = self
            .tree
            .ancestor_at_slot(new_justified_checkpoint.root, justified_slot)?;

        Ok(ancestor == Some(justified_checkpoint.root))
    }

    fn advance(&mut self, kind: CheckpointKind, checkpoint: Checkpoint) -> Result<()> {
        let old = self.checkpoints.get(kind)?;

        ensure!(
            old.epoch <= checkpoint.epoch,
            Error::CheckpointRegression {
                kind,
                old,
                new: checkpoint,
            },
        );

        self.checkpoints.update(kind, checkpoint);

        Ok(())
    }

    fn is_checkpoint_known(&self, checkpoint: Checkpoint) -> bool {
        let known = self.contains_block(checkpoint.root);

        if !known {
            warn!("ignoring checkpoint for block not in store: {checkpoint:?}");
        }

        known
    }

    fn is_on_finalized_chain(&self, block_root: H256) -> Result<bool> {
        if !self.tree.contains(block_root) {
            return Ok(false);
        }

        let finalized_root = self.finalized_checkpoint()?.root;
        let ancestor = self.tree.ancestor_at_slot(block_root, self.finalized_slot()?)?;

        Ok(ancestor == Some(finalized_root))
    }

    // The finalized block may precede the start of its epoch if the slots in between are empty.
    // Anchors may also be in the middle of an epoch.
    fn finalized_slot(&self) -> Result<Slot> {
        let finalized_checkpoint = self.finalized_checkpoint()?;
        let epoch_start = self
            .chain_config
            .start_slot_at_epoch(finalized_checkpoint.epoch);

        let block_slot = self
            .tree
            .node(finalized_checkpoint.root)
            .map(Node::slot)
            .unwrap_or_default();

        Ok(epoch_start.max(block_slot))
    }

    fn validate_attestation(&self, attestation: &IndexedAttestation) -> Result<()> {
        let data = attestation.data;

        ensure!(
            data.slot <= self.slot,
            Error::AttestationForFutureSlot {
                slot: data.slot,
                current_slot: self.slot,
            },
        );

        // > Attestations must be for a known block.
        self.tree.node(data.beacon_block_root)?;

        Ok(())
    }

    /// [`update_latest_messages`](https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#update_latest_messages)
    /// combined with the weight changes it implies.
    fn update_latest_messages(&mut self, attestation: &IndexedAttestation) -> Result<()> {
        let new_message = LatestMessage {
            epoch: attestation.data.target.epoch,
            beacon_block_root: attestation.data.beacon_block_root,
        };

        let mut removals = StdHashMap::<H256, Gwei>::new();
        let mut additions = StdHashMap::<H256, Gwei>::new();

        for validator_index in attestation.attesting_indices.iter().copied() {
            if self.is_equivocating(validator_index) {
                continue;
            }

            let old_message = self.latest_message(validator_index);

            if old_message.is_some_and(|old| old.epoch >= new_message.epoch) {
                continue;
            }

            let balance = self.justified_balance(validator_index);

            if let Some(old_message) = old_message {
                if self.counts_toward_weight(old_message.beacon_block_root) {
                    *removals.entry(old_message.beacon_block_root).or_default() += balance;
                }
            }

            if self.counts_toward_weight(new_message.beacon_block_root) {
                *additions.entry(new_message.beacon_block_root).or_default() += balance;
            }

            self.latest_messages.insert(validator_index, new_message);
        }

        for (root, balance) in removals {
            self.tree.remove_weight(root, balance)?;
        }

        for (root, balance) in additions {
            self.tree.add_weight(root, balance)?;
        }

        Ok(())
    }

    fn slash(&mut self, slashable_indices: Vec<ValidatorIndex>) -> Result<()> {
        for validator_index in slashable_indices {
            // Votes of slashed validators should not be used to compute the head.
            if self.equivocating_indices.insert(validator_index).is_some() {
                continue;
            }

            let Some(latest_message) = self.latest_message(validator_index) else {
                continue;
            };

            if self.counts_toward_weight(latest_message.beacon_block_root) {
                let balance = self.justified_balance(validator_index);
                self.tree
                    .remove_weight(latest_message.beacon_block_root, balance)?;
            }
        }

        Ok(())
    }

    fn invalidate(
        &mut self,
        block_root: H256,
        latest_valid_hash: Option<ExecutionBlockHash>,
    ) -> Result<()> {
        let chain = self
            .tree
            .ancestors(block_root)?
            .map(|node| (node.root(), node.execution_block_hash()))
            .collect::<Vec<_>>();

        let latest_valid_position = latest_valid_hash.and_then(|latest_valid_hash| {
            chain
                .iter()
                .position(|(_, block_hash)| *block_hash == latest_valid_hash)
        });

        let first_invalid_root = match latest_valid_position {
            // The block itself is the latest valid one. Nothing to invalidate.
            Some(0) => {
                debug!(
                    "latest valid hash matches block reported as invalid \
                     (block_root: {block_root:?}, latest_valid_hash: {latest_valid_hash:?})",
                );

                return self.tree.mark_valid(block_root);
            }
            Some(position) => {
                let (latest_valid_root, _) = chain[position];
                self.tree.mark_valid(latest_valid_root)?;
                chain[position - 1].0
            }
            None => block_root,
        };

        let invalidated = self.tree.mark_invalid(first_invalid_root)?;

        warn!(
            "execution engine reported invalid payloads \
             (block_root: {block_root:?}, latest_valid_hash: {latest_valid_hash:?}, \
             invalidated: {invalidated:?})",
        );

        self.rederive_weights()
    }

    fn update_balances_after_justification(&mut self) -> Result<()> {
        let justified_checkpoint = self.justified_checkpoint()?;

        match self.chain_link(justified_checkpoint.root) {
            Some(chain_link) => self.justified_balances = chain_link.state.balances.clone(),
            None => warn!(
                "state of justified block is not in store; keeping previous balances \
                 (justified_checkpoint: {justified_checkpoint:?})",
            ),
        }

        self.rederive_weights()
    }

    fn prune_after_finalization(&mut self) -> Result<Vec<H256>> {
        let finalized_checkpoint = self.finalized_checkpoint()?;
        let pruned_roots = self.tree.prune(finalized_checkpoint.root)?;

        for root in &pruned_roots {
            self.chain_links.remove(root);
        }

        let best_justified_checkpoint = self.best_justified_checkpoint()?;

        if !self.tree.contains(best_justified_checkpoint.root) {
            let justified_checkpoint = self.justified_checkpoint()?;

            self.checkpoints.reset_for_reorg(
                justified_checkpoint,
                justified_checkpoint,
                finalized_checkpoint,
                "best justified checkpoint was pruned",
            )?;
        }

        debug!(
            "pruned {} blocks not descending from {finalized_checkpoint:?}",
            pruned_roots.len(),
        );

        Ok(pruned_roots)
    }

    fn rederive_weights(&mut self) -> Result<()> {
        let votes = self
            .latest_messages
            .iter()
            .filter(|(validator_index, _)| !self.is_equivocating(**validator_index))
            .filter(|(_, message)| self.counts_toward_weight(message.beacon_block_root))
            .map(|(validator_index, message)| {
                (
                    message.beacon_block_root,
                    self.justified_balance(*validator_index),
                )
            })
            .collect::<Vec<_>>();

        self.tree.reset_weights(votes)
    }

    fn counts_toward_weight(&self, block_root: H256) -> bool {
        self.tree
            .node(block_root)
            .is_ok_and(|node| !node.payload_status().is_invalid())
    }

    fn justified_balance(&self, validator_index: ValidatorIndex) -> Gwei {
        usize::try_from(validator_index)
            .ok()
            .and_then(|index| self.justified_balances.get(index).copied())
            .unwrap_or_default()
    }

    fn execution_block_hash(&self, block_root: H256) -> ExecutionBlockHash {
        self.tree
            .node(block_root)
            .map(Node::execution_block_hash)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use types::{
        bellatrix::containers::{BeaconBlock, BeaconBlockBody, ExecutionPayload},
        phase0::containers::AttestationData,
    };

    use super::*;

    const GENESIS: H256 = H256::repeat_byte(0xaa);
    const BALANCES: [Gwei; 4] = [10, 20, 30, 40];

    fn root(byte: u8) -> H256 {
        H256::repeat_byte(byte)
    }

    fn checkpoint(epoch: Epoch, root: H256) -> Checkpoint {
        Checkpoint { epoch, root }
    }

    fn genesis_checkpoint() -> Checkpoint {
        checkpoint(0, GENESIS)
    }

    fn store() -> Result<Store> {
        let block = Arc::new(BeaconBlock::default());

        let state = Arc::new(BeaconState {
            latest_block_root: GENESIS,
            balances: BALANCES.into(),
            ..BeaconState::default()
        });

        Store::new(
            Arc::new(ChainConfig::minimal()),
            StoreConfig::default(),
            BlockWithRoot::new(block, GENESIS),
            state,
        )
    }

    fn block(byte: u8, parent_root: H256, slot: Slot) -> BlockWithRoot {
        let block = BeaconBlock {
            slot,
            parent_root,
            body: BeaconBlockBody {
                execution_payload: ExecutionPayload {
                    block_hash: root(byte),
                    ..ExecutionPayload::default()
                },
                ..BeaconBlockBody::default()
            },
            ..BeaconBlock::default()
        };

        BlockWithRoot::new(Arc::new(block), root(byte))
    }

    fn import_with_checkpoints(
        store: &mut Store,
        block: BlockWithRoot,
        current_justified_checkpoint: Checkpoint,
        finalized_checkpoint: Checkpoint,
    ) -> Result<StoreChanges> {
        let pre_state = store.validate_block(&block)?;

        let post_state = Arc::new(BeaconState {
            slot: block.block.slot,
            latest_block_root: block.root,
            latest_execution_payload_block_hash: block.block.body.execution_payload.block_hash,
            current_justified_checkpoint,
            finalized_checkpoint,
            balances: pre_state.balances.clone(),
        });

        store.apply_block(block, post_state, PayloadStatus::Optimistic)
    }

    fn import(store: &mut Store, byte: u8, parent_root: H256, slot: Slot) -> Result<StoreChanges> {
        import_with_checkpoints(
            store,
            block(byte, parent_root, slot),
            genesis_checkpoint(),
            genesis_checkpoint(),
        )
    }

    fn attestation(indices: &[ValidatorIndex], beacon_block_root: H256, epoch: Epoch) -> IndexedAttestation {
        IndexedAttestation {
            attesting_indices: indices.to_vec(),
            data: AttestationData {
                slot: 1,
                beacon_block_root,
                source: genesis_checkpoint(),
                target: checkpoint(epoch, GENESIS),
            },
        }
    }

    fn store_error(result: Result<impl core::fmt::Debug>) -> Error {
        *result
            .expect_err("operation should fail")
            .downcast_ref::<Error>()
            .expect("error should come from the store")
    }

    fn weight(store: &Store, block_root: H256) -> Result<Gwei> {
        Ok(store.block_tree().node(block_root)?.weight())
    }

    #[test]
    fn new_store_is_anchored_at_genesis() -> Result<()> {
        let store = store()?;

        assert_eq!(store.justified_checkpoint()?, genesis_checkpoint());
        assert_eq!(store.best_justified_checkpoint()?, genesis_checkpoint());
        assert_eq!(store.finalized_checkpoint()?, genesis_checkpoint());
        assert_eq!(store.head_root()?, GENESIS);
        assert!(store.payload_status(GENESIS)?.is_valid());

        Ok(())
    }

    #[test]
    fn blocks_from_the_future_are_rejected() -> Result<()> {
        let mut store = store()?;

        assert_eq!(
            store_error(import(&mut store, 1, GENESIS, 1)),
            Error::BlockFromFuture {
                block_root: root(1),
                block_slot: 1,
                current_slot: 0,
            },
        );

        assert!(!store.contains_block(root(1)));

        Ok(())
    }

    #[test]
    fn blocks_are_validated_against_their_parents() -> Result<()> {
        let mut store = store()?;

        store.apply_tick(4)?;
        import(&mut store, 1, GENESIS, 2)?;

        assert_eq!(
            store_error(import(&mut store, 2, root(9), 3)),
            Error::UnknownParent {
                block_root: root(2),
                parent_root: root(9),
            },
        );

        assert_eq!(
            store_error(import(&mut store, 2, root(1), 2)),
            Error::BlockNotAfterParent {
                block_root: root(2),
                block_slot: 2,
                parent_slot: 2,
            },
        );

        assert_eq!(
            store_error(import(&mut store, 1, GENESIS, 3)),
            Error::BlockAlreadyKnown { block_root: root(1) },
        );

        store.reject_block(root(3));

        assert_eq!(
            store_error(import(&mut store, 3, root(1), 3)),
            Error::BlockMarkedInvalid { block_root: root(3) },
        );

        Ok(())
    }

    #[test]
    fn blocks_skipping_too_many_slots_are_rejected() -> Result<()> {
        let mut store = store()?;
        let max_empty_slots = store.store_config().max_empty_slots;

        store.apply_tick(max_empty_slots + 1)?;

        assert_eq!(
            store_error(import(&mut store, 1, GENESIS, max_empty_slots + 1)),
            Error::TooManyEmptySlots {
                block_root: root(1),
                block_slot: max_empty_slots + 1,
                parent_slot: 0,
                max_empty_slots,
            },
        );

        import(&mut store, 1, GENESIS, max_empty_slots)?;

        Ok(())
    }

    #[test]
    fn justified_checkpoint_is_updated_early_in_epoch() -> Result<()> {
        let mut store = store()?;

        store.apply_tick(9)?;
        import(&mut store, 1, GENESIS, 1)?;

        let changes = import_with_checkpoints(
            &mut store,
            block(9, root(1), 9),
            checkpoint(1, root(1)),
            genesis_checkpoint(),
        )?;

        assert!(changes.justified_checkpoint_updated);
        assert!(!changes.finalized_checkpoint_updated);
        assert_eq!(store.justified_checkpoint()?, checkpoint(1, root(1)));
        assert_eq!(store.best_justified_checkpoint()?, checkpoint(1, root(1)));
        assert_eq!(store.head_root()?, root(9));

        Ok(())
    }

    //   genesis
    //    /   \
    //   1     12
    //   |     |
    //   9     17
    #[test]
    fn conflicting_justification_late_in_epoch_waits_for_epoch_boundary() -> Result<()> {
        let mut store = store()?;

        store.apply_tick(9)?;
        import(&mut store, 1, GENESIS, 1)?;
        import(&mut store, 0x12, GENESIS, 2)?;

        import_with_checkpoints(
            &mut store,
            block(9, root(1), 9),
            checkpoint(1, root(1)),
            genesis_checkpoint(),
        )?;

        store.apply_tick(20)?;

        let changes = import_with_checkpoints(
            &mut store,
            block(0x17, root(0x12), 17),
            checkpoint(2, root(0x12)),
            genesis_checkpoint(),
        )?;

        assert!(!changes.justified_checkpoint_updated);
        assert_eq!(store.justified_checkpoint()?, checkpoint(1, root(1)));
        assert_eq!(store.best_justified_checkpoint()?, checkpoint(2, root(0x12)));
        assert_eq!(store.head_root()?, root(9));

        let changes = store
            .apply_tick(24)?
            .expect("tick moves to a later slot");

        assert!(changes.justified_checkpoint_updated);
        assert!(changes.reorganized);
        assert_eq!(changes.old_head, root(9));
        assert_eq!(changes.new_head, root(0x17));
        assert_eq!(store.justified_checkpoint()?, checkpoint(2, root(0x12)));

        Ok(())
    }

    //   genesis
    //    /   \
    //   1     12
    //   |     |
    //   9     17
    //   |
    //   20
    #[test]
    fn pruned_best_justified_checkpoint_is_not_adopted_at_epoch_boundary() -> Result<()> {
        let mut store = store()?;

        store.apply_tick(9)?;
        import(&mut store, 1, GENESIS, 1)?;
        import(&mut store, 0x12, GENESIS, 2)?;

        import_with_checkpoints(
            &mut store,
            block(9, root(1), 9),
            checkpoint(1, root(1)),
            genesis_checkpoint(),
        )?;

        store.apply_tick(20)?;

        import_with_checkpoints(
            &mut store,
            block(0x17, root(0x12), 17),
            checkpoint(2, root(0x12)),
            genesis_checkpoint(),
        )?;

        assert_eq!(store.best_justified_checkpoint()?, checkpoint(2, root(0x12)));

        let changes = import_with_checkpoints(
            &mut store,
            block(0x20, root(9), 20),
            checkpoint(1, root(1)),
            checkpoint(1, root(1)),
        )?;

        assert!(changes.pruned_roots.contains(&root(0x12)));
        assert_eq!(store.justified_checkpoint()?, checkpoint(1, root(1)));
        assert_eq!(store.best_justified_checkpoint()?, checkpoint(1, root(1)));
        assert_eq!(store.finalized_checkpoint()?, checkpoint(1, root(1)));

        let changes = store
            .apply_tick(24)?
            .expect("tick moves to a later slot");

        assert!(!changes.justified_checkpoint_updated);
        assert_eq!(store.justified_checkpoint()?, checkpoint(1, root(1)));
        assert_eq!(store.head_root()?, root(0x20));

        assert!(store.apply_tick(25)?.is_some());
        assert_eq!(store.slot(), 25);

        import(&mut store, 0x25, root(0x20), 25)?;

        assert_eq!(store.head_root()?, root(0x25));

        Ok(())
    }

    //   genesis
    //    /   \
    //   1     12
    //   |     |
    //   9     17
    //   |
    //   19
    //   |
    //   1a
    #[test]
    fn best_justified_checkpoint_survives_conflicting_finalization() -> Result<()> {
        let mut store = store()?;

        store.apply_tick(17)?;
        import(&mut store, 1, GENESIS, 1)?;
        import(&mut store, 0x12, GENESIS, 2)?;
        import(&mut store, 9, root(1), 9)?;

        import_with_checkpoints(
            &mut store,
            block(0x17, root(0x12), 17),
            checkpoint(2, root(0x12)),
            genesis_checkpoint(),
        )?;

        assert_eq!(store.justified_checkpoint()?, checkpoint(2, root(0x12)));

        store.apply_tick(28)?;

        import_with_checkpoints(
            &mut store,
            block(0x19, root(9), 25),
            checkpoint(3, root(9)),
            genesis_checkpoint(),
        )?;

        assert_eq!(store.justified_checkpoint()?, checkpoint(2, root(0x12)));
        assert_eq!(store.best_justified_checkpoint()?, checkpoint(3, root(9)));

        let changes = import_with_checkpoints(
            &mut store,
            block(0x1a, root(0x19), 26),
            checkpoint(1, root(1)),
            checkpoint(1, root(1)),
        )?;

        assert!(changes.justified_checkpoint_updated);
        assert!(changes.finalized_checkpoint_updated);
        assert_eq!(store.justified_checkpoint()?, checkpoint(1, root(1)));
        assert_eq!(store.best_justified_checkpoint()?, checkpoint(3, root(9)));
        assert_eq!(store.finalized_checkpoint()?, checkpoint(1, root(1)));
        assert_eq!(store.head_root()?, root(0x1a));

        store.apply_tick(32)?;

        assert_eq!(store.justified_checkpoint()?, checkpoint(3, root(9)));

        Ok(())
    }

    #[test]
    fn ticks_do_not_move_time_backwards() -> Result<()> {
        let mut store = store()?;

        assert!(store.apply_tick(5)?.is_some());
        assert!(store.apply_tick(5)?.is_none());
        assert!(store.apply_tick(3)?.is_none());
        assert_eq!(store.slot(), 5);

        Ok(())
    }

    #[test]
    fn finalization_prunes_conflicting_blocks() -> Result<()> {
        let mut store = store()?;

        store.apply_tick(9)?;
        import(&mut store, 1, GENESIS, 1)?;
        import(&mut store, 0x12, GENESIS, 2)?;

        let changes = import_with_checkpoints(
            &mut store,
            block(9, root(1), 9),
            checkpoint(1, root(1)),
            checkpoint(1, root(1)),
        )?;

        let mut pruned_roots = changes.pruned_roots.clone();
        pruned_roots.sort();

        assert!(changes.finalized_checkpoint_updated);
        assert_eq!(pruned_roots, [root(0x12), GENESIS]);
        assert_eq!(store.finalized_checkpoint()?, checkpoint(1, root(1)));
        assert!(store.chain_link(GENESIS).is_none());

        assert_eq!(
            store_error(import(&mut store, 0x13, root(0x12), 3)),
            Error::PrunedAncestor {
                block_root: root(0x13),
            },
        );

        Ok(())
    }

    #[test]
    fn stale_checkpoints_in_post_state_are_ignored() -> Result<()> {
        let mut store = store()?;

        store.apply_tick(10)?;
        import(&mut store, 1, GENESIS, 1)?;

        import_with_checkpoints(
            &mut store,
            block(9, root(1), 9),
            checkpoint(1, root(1)),
            checkpoint(1, root(1)),
        )?;

        let before = *store.checkpoints();
        let changes = import(&mut store, 10, root(9), 10)?;

        assert_eq!(*store.checkpoints(), before);
        assert!(!changes.justified_checkpoint_updated);
        assert!(!changes.finalized_checkpoint_updated);
        assert!(store.finalized_checkpoint()?.epoch <= store.justified_checkpoint()?.epoch);

        Ok(())
    }

    #[test]
    fn latest_messages_move_weight_between_forks() -> Result<()> {
        let mut store = store()?;

        store.apply_tick(3)?;
        import(&mut store, 0x0b, GENESIS, 1)?;
        import(&mut store, 0x0c, GENESIS, 1)?;

        assert_eq!(store.head_root()?, root(0x0c));

        store.apply_attestation(&attestation(&[0, 1], root(0x0b), 0))?;

        assert_eq!(store.head_root()?, root(0x0b));

        store.apply_attestation(&attestation(&[2], root(0x0c), 0))?;

        assert_eq!(weight(&store, root(0x0b))?, 30);
        assert_eq!(weight(&store, root(0x0c))?, 30);
        assert_eq!(store.head_root()?, root(0x0c));

        // Not newer than the previous vote.
        store.apply_attestation(&attestation(&[0], root(0x0c), 0))?;

        assert_eq!(weight(&store, root(0x0b))?, 30);

        let changes = store.apply_attestation(&attestation(&[1], root(0x0c), 1))?;

        assert_eq!(weight(&store, root(0x0b))?, 10);
        assert_eq!(weight(&store, root(0x0c))?, 50);
        assert_eq!(weight(&store, GENESIS)?, 60);
        assert!(!changes.is_head_changed());

        Ok(())
    }

    #[test]
    fn attestations_for_unknown_blocks_are_rejected() -> Result<()> {
        let mut store = store()?;

        store.apply_tick(1)?;

        assert_eq!(
            store_error(store.apply_attestation(&attestation(&[0], root(5), 0))),
            Error::UnknownBlock { block_root: root(5) },
        );

        assert!(store.latest_message(0).is_none());

        Ok(())
    }

    #[test]
    fn attestations_from_future_slots_are_rejected() -> Result<()> {
        let mut store = store()?;

        assert_eq!(
            store_error(store.apply_attestation(&attestation(&[0], GENESIS, 0))),
            Error::AttestationForFutureSlot {
                slot: 1,
                current_slot: 0,
            },
        );

        store.apply_tick(1)?;
        store.apply_attestation(&attestation(&[0], GENESIS, 0))?;

        assert_eq!(weight(&store, GENESIS)?, 10);

        Ok(())
    }

    #[test]
    fn attester_slashing_removes_votes_permanently() -> Result<()> {
        let mut store = store()?;

        store.apply_tick(3)?;
        import(&mut store, 0x0b, GENESIS, 1)?;
        import(&mut store, 0x0c, GENESIS, 1)?;

        store.apply_attestation(&attestation(&[0], root(0x0b), 0))?;
        store.apply_attestation(&attestation(&[2, 3], root(0x0c), 0))?;

        let attester_slashing = AttesterSlashing {
            attestation_1: attestation(&[2], root(0x0b), 0),
            attestation_2: attestation(&[2, 3], root(0x0c), 0),
        };

        store.apply_attester_slashing(&attester_slashing)?;

        assert!(store.is_equivocating(2));
        assert!(!store.is_equivocating(3));
        assert_eq!(weight(&store, root(0x0c))?, 40);

        store.apply_attestation(&attestation(&[2], root(0x0b), 1))?;

        assert_eq!(weight(&store, root(0x0b))?, 10);

        Ok(())
    }

    #[test]
    fn block_attestations_are_applied_on_import() -> Result<()> {
        let mut store = store()?;

        store.apply_tick(3)?;
        import(&mut store, 0x0b, GENESIS, 1)?;
        import(&mut store, 0x0c, GENESIS, 1)?;

        let mut carrier = block(0x0d, root(0x0b), 2);

        Arc::make_mut(&mut carrier.block).body.attestations = vec![
            attestation(&[3], root(0x0b), 0),
            attestation(&[1], root(0x99), 0),
        ];

        import_with_checkpoints(
            &mut store,
            carrier,
            genesis_checkpoint(),
            genesis_checkpoint(),
        )?;

        assert_eq!(weight(&store, root(0x0b))?, 40);
        assert!(store.latest_message(1).is_none());
        assert_eq!(store.head_root()?, root(0x0d));

        Ok(())
    }

    //   genesis
    //      |
    //      1
    //     / \
    //    2   12
    //    |
    //    3
    #[test]
    fn invalid_payload_invalidates_chain_after_latest_valid_hash() -> Result<()> {
        let mut store = store()?;

        store.apply_tick(4)?;
        import(&mut store, 1, GENESIS, 1)?;
        import(&mut store, 2, root(1), 2)?;
        import(&mut store, 0x12, root(1), 2)?;
        import(&mut store, 3, root(2), 3)?;

        store.apply_attestation(&attestation(&[3], root(3), 0))?;

        assert_eq!(store.head_root()?, root(3));

        let changes =
            store.apply_payload_status(root(3), PayloadStatus::Invalid, Some(root(1)))?;

        assert!(changes.reorganized);
        assert_eq!(changes.new_head, root(0x12));
        assert!(store.payload_status(root(1))?.is_valid());
        assert!(store.payload_status(root(2))?.is_invalid());
        assert!(store.payload_status(root(3))?.is_invalid());
        assert!(store.payload_status(root(0x12))?.is_optimistic());
        assert_eq!(weight(&store, GENESIS)?, 0);

        assert_eq!(
            store_error(import(&mut store, 4, root(3), 4)),
            Error::ParentMarkedInvalid {
                block_root: root(4),
                parent_root: root(3),
            },
        );

        Ok(())
    }

    #[test]
    fn valid_payload_status_marks_ancestors_valid() -> Result<()> {
        let mut store = store()?;

        store.apply_tick(2)?;
        import(&mut store, 1, GENESIS, 1)?;
        import(&mut store, 2, root(1), 2)?;

        let changes = store.apply_payload_status(root(2), PayloadStatus::Valid, None)?;

        assert!(!changes.is_head_changed());
        assert!(store.payload_status(root(1))?.is_valid());
        assert!(store.payload_status(root(2))?.is_valid());

        Ok(())
    }

    #[test]
    fn checkpoints_can_only_move_backwards_through_reset() -> Result<()> {
        let mut store = store()?;

        store.apply_tick(9)?;
        import(&mut store, 1, GENESIS, 1)?;

        import_with_checkpoints(
            &mut store,
            block(9, root(1), 9),
            checkpoint(1, root(1)),
            genesis_checkpoint(),
        )?;

        let changes = store.reset_checkpoints(
            genesis_checkpoint(),
            genesis_checkpoint(),
            genesis_checkpoint(),
            "test",
        )?;

        assert!(changes.justified_checkpoint_updated);
        assert!(changes.pruned_roots.is_empty());
        assert_eq!(store.justified_checkpoint()?, genesis_checkpoint());

        assert_eq!(
            store_error(store.reset_checkpoints(
                checkpoint(0, root(0x55)),
                genesis_checkpoint(),
                genesis_checkpoint(),
                "test",
            )),
            Error::UnknownBlock {
                block_root: root(0x55),
            },
        );

        Ok(())
    }

    #[test]
    fn execution_payload_hashes_come_from_checkpoint_blocks() -> Result<()> {
        let mut store = store()?;

        store.apply_tick(9)?;
        import(&mut store, 1, GENESIS, 1)?;

        import_with_checkpoints(
            &mut store,
            block(9, root(1), 9),
            checkpoint(1, root(1)),
            genesis_checkpoint(),
        )?;

        assert_eq!(store.safe_execution_payload_hash()?, root(1));
        assert_eq!(store.finalized_execution_payload_hash()?, H256::zero());

        Ok(())
    }
}
