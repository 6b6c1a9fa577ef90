//! Arena-backed block tree used by LMD GHOST.
//!
//! Nodes refer to their parents and children by index into a single [`Vector`].
//! A parent is always inserted before its children, so a parent index is always lower than the
//! index of any of its children. Every walk through the tree checks this, which makes cycles
//! detectable without extra bookkeeping.
//!
//! Weights are subtree weights: the weight of a node is the total balance of the latest messages
//! voting for it or any of its descendants. Best children and best descendants are recomputed
//! along the ancestor chain of every node whose weight or status changes.

use anyhow::{bail, ensure, Result};
use im::{HashMap, HashSet, Vector};
use log::warn;
use types::{
    nonstandard::PayloadStatus,
    phase0::primitives::{ExecutionBlockHash, Gwei, Slot, H256},
};

use crate::{error::Error, misc::Score};

#[derive(Clone, Debug)]
pub struct Node {
    root: H256,
    parent_root: H256,
    parent: Option<usize>,
    children: Vec<usize>,
    slot: Slot,
    execution_block_hash: ExecutionBlockHash,
    payload_status: PayloadStatus,
    weight: Gwei,
    best_child: Option<usize>,
    best_descendant: Option<usize>,
}

impl Node {
    #[must_use]
    pub const fn root(&self) -> H256 {
        self.root
    }

    #[must_use]
    pub const fn parent_root(&self) -> H256 {
        self.parent_root
    }

    #[must_use]
    pub const fn slot(&self) -> Slot {
        self.slot
    }

    #[must_use]
    pub const fn execution_block_hash(&self) -> ExecutionBlockHash {
        self.execution_block_hash
    }

    #[must_use]
    pub const fn payload_status(&self) -> PayloadStatus {
        self.payload_status
    }

    #[must_use]
    pub const fn weight(&self) -> Gwei {
        self.weight
    }

    const fn score(&self) -> Score {
        (self.weight, self.root)
    }

    // Invalid statuses propagate to descendants, so a node has a head candidate in its subtree
    // exactly when it is not invalid itself.
    const fn is_viable(&self) -> bool {
        self.best_descendant.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct BlockTree {
    nodes: Vector<Node>,
    indices: HashMap<H256, usize>,
    pruned: HashSet<H256>,
}

impl BlockTree {
    #[must_use]
    pub fn new(
        root: H256,
        slot: Slot,
        execution_block_hash: ExecutionBlockHash,
        payload_status: PayloadStatus,
    ) -> Self {
        let node = Node {
            root,
            parent_root: H256::zero(),
            parent: None,
            children: vec![],
            slot,
            execution_block_hash,
            payload_status,
            weight: 0,
            best_child: None,
            best_descendant: (!payload_status.is_invalid()).then_some(0),
        };

        Self {
            nodes: Vector::unit(node),
            indices: HashMap::unit(root, 0),
            pruned: HashSet::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The root of the oldest block still in the tree.
    ///
    /// After pruning this is the finalized block.
    #[must_use]
    pub fn root(&self) -> H256 {
        self.nodes[0].root
    }

    #[must_use]
    pub fn contains(&self, root: H256) -> bool {
        self.indices.contains_key(&root)
    }

    #[must_use]
    pub fn is_pruned(&self, root: H256) -> bool {
        self.pruned.contains(&root)
    }

    pub fn node(&self, root: H256) -> Result<&Node> {
        let index = self.index(root)?;
        Ok(&self.nodes[index])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn insert(
        &mut self,
        root: H256,
        parent_root: H256,
        slot: Slot,
        execution_block_hash: ExecutionBlockHash,
        payload_status: PayloadStatus,
    ) -> Result<()> {
        ensure!(
            !self.contains(root),
            Error::BlockAlreadyKnown { block_root: root },
        );

        let Some(parent) = self.indices.get(&parent_root).copied() else {
            if self.is_pruned(parent_root) {
                bail!(Error::PrunedAncestor { block_root: root });
            }

            bail!(Error::UnknownParent {
                block_root: root,
                parent_root,
            });
        };

        let index = self.nodes.len();

        self.nodes.push_back(Node {
            root,
            parent_root,
            parent: Some(parent),
            children: vec![],
            slot,
            execution_block_hash,
            payload_status,
            weight: 0,
            best_child: None,
            best_descendant: (!payload_status.is_invalid()).then_some(index),
        });

        self.indices.insert(root, index);
        self.nodes[parent].children.push(index);

        self.update_best_upward(parent)
    }

    /// Adds `amount` to the weight of the block and all of its ancestors.
    pub fn add_weight(&mut self, root: H256, amount: Gwei) -> Result<()> {
        let index = self.index(root)?;

        for ancestor in self.ancestors_inclusive(index)? {
            let node = &mut self.nodes[ancestor];
            node.weight = node.weight.saturating_add(amount);
        }

        self.update_best_upward(index)
    }

    pub fn remove_weight(&mut self, root: H256, amount: Gwei) -> Result<()> {
        let index = self.index(root)?;

        for ancestor in self.ancestors_inclusive(index)? {
            let node = &mut self.nodes[ancestor];

            node.weight = node
                .weight
                .checked_sub(amount)
                .ok_or(Error::WeightUnderflow {
                    block_root: node.root,
                })?;
        }

        self.update_best_upward(index)
    }

    /// Rebuilds all weights from per-block vote totals.
    ///
    /// Votes for blocks not in the tree are ignored.
    pub fn reset_weights(&mut self, votes: impl IntoIterator<Item = (H256, Gwei)>) -> Result<()> {
        for node in self.nodes.iter_mut() {
            node.weight = 0;
        }

        for (root, amount) in votes {
            if let Some(index) = self.indices.get(&root).copied() {
                let node = &mut self.nodes[index];
                node.weight = node.weight.saturating_add(amount);
            }
        }

        for index in (0..self.nodes.len()).rev() {
            if let Some(parent) = self.checked_parent(index)? {
                let weight = self.nodes[index].weight;
                let parent = &mut self.nodes[parent];
                parent.weight = parent.weight.saturating_add(weight);
            }
        }

        self.recompute_all()
    }

    /// Recomputes best children and best descendants of every node.
    pub fn recompute_all(&mut self) -> Result<()> {
        for index in (0..self.nodes.len()).rev() {
            self.checked_parent(index)?;
            self.update_best(index);
        }

        Ok(())
    }

    /// [`get_head`](https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#get_head)
    /// starting from `justified_root`.
    pub fn head(&self, justified_root: H256) -> Result<H256> {
        let justified = self.index(justified_root)?;

        if let Some(best) = self.nodes[justified].best_descendant {
            if self.is_head_consistent(justified, best) {
                return Ok(self.nodes[best].root);
            }
        }

        warn!(
            "best descendant of justified block is inconsistent; \
             recomputing head from scratch (justified_root: {justified_root:?})",
        );

        self.find_head(justified)
    }

    /// Marks the block and all of its descendants invalid and returns their roots.
    pub fn mark_invalid(&mut self, root: H256) -> Result<Vec<H256>> {
        let index = self.index(root)?;
        let subtree = self.subtree_mask(index)?;
        let mut invalidated = vec![];

        for (index, in_subtree) in subtree.into_iter().enumerate() {
            if in_subtree {
                let node = &mut self.nodes[index];
                node.payload_status = PayloadStatus::Invalid;
                invalidated.push(node.root);
            }
        }

        self.recompute_all()?;

        Ok(invalidated)
    }

    /// Marks the block and all of its ancestors valid.
    ///
    /// Ancestors of a valid payload are valid by definition.
    /// Invalid blocks stay invalid.
    pub fn mark_valid(&mut self, root: H256) -> Result<()> {
        let index = self.index(root)?;

        for ancestor in self.ancestors_inclusive(index)? {
            let node = &mut self.nodes[ancestor];

            match node.payload_status {
                PayloadStatus::Valid => break,
                PayloadStatus::Optimistic => node.payload_status = PayloadStatus::Valid,
                PayloadStatus::Invalid => warn!(
                    "execution engine reported payload valid after marking it invalid \
                     (block_root: {:?})",
                    node.root,
                ),
            }
        }

        Ok(())
    }

    /// Removes every block that does not descend from `finalized_root` and returns their roots.
    pub fn prune(&mut self, finalized_root: H256) -> Result<Vec<H256>> {
        let finalized = self.index(finalized_root)?;
        let keep = self.subtree_mask(finalized)?;

        let mut new_indices = vec![None; self.nodes.len()];
        let mut nodes = Vector::new();
        let mut indices = HashMap::new();
        let mut pruned_roots = vec![];

        for (old_index, node) in self.nodes.iter().enumerate() {
            if keep[old_index] {
                new_indices[old_index] = Some(nodes.len());
                indices.insert(node.root, nodes.len());
                nodes.push_back(node.clone());
            } else {
                pruned_roots.push(node.root);
            }
        }

        for node in nodes.iter_mut() {
            node.parent = node.parent.and_then(|parent| new_indices[parent]);

            node.children = node
                .children
                .iter()
                .filter_map(|child| new_indices[*child])
                .collect();
        }

        self.pruned.extend(pruned_roots.iter().copied());
        self.nodes = nodes;
        self.indices = indices;

        self.recompute_all()?;

        Ok(pruned_roots)
    }

    /// Whether `descendant_root` is `ancestor_root` or one of its descendants.
    #[must_use]
    pub fn is_descendant(&self, ancestor_root: H256, descendant_root: H256) -> bool {
        let (Some(ancestor), Some(descendant)) = (
            self.indices.get(&ancestor_root).copied(),
            self.indices.get(&descendant_root).copied(),
        ) else {
            return false;
        };

        self.ancestors_inclusive(descendant)
            .is_ok_and(|ancestors| ancestors.contains(&ancestor))
    }

    /// The block itself followed by its ancestors, ending with [`BlockTree::root`].
    pub fn ancestors(&self, root: H256) -> Result<impl Iterator<Item = &Node>> {
        let index = self.index(root)?;

        let ancestors = self
            .ancestors_inclusive(index)?
            .into_iter()
            .map(move |ancestor| &self.nodes[ancestor]);

        Ok(ancestors)
    }

    /// [`get_ancestor`](https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#get_ancestor)
    ///
    /// Returns [`None`] if the ancestor at `slot` has been pruned.
    pub fn ancestor_at_slot(&self, root: H256, slot: Slot) -> Result<Option<H256>> {
        let ancestor = self
            .ancestors(root)?
            .find(|node| node.slot <= slot)
            .map(Node::root);

        Ok(ancestor)
    }

    fn index(&self, root: H256) -> Result<usize> {
        if let Some(index) = self.indices.get(&root) {
            return Ok(*index);
        }

        if self.is_pruned(root) {
            bail!(Error::PrunedAncestor { block_root: root });
        }

        bail!(Error::UnknownBlock { block_root: root })
    }

    fn checked_parent(&self, index: usize) -> Result<Option<usize>> {
        let node = &self.nodes[index];

        if let Some(parent) = node.parent {
            ensure!(
                parent < index,
                Error::CycleDetected {
                    block_root: node.root,
                },
            );
        }

        Ok(node.parent)
    }

    // Starts with `index` itself and ends with the root of the tree.
    fn ancestors_inclusive(&self, index: usize) -> Result<Vec<usize>> {
        let mut ancestors = vec![index];
        let mut current = index;

        while let Some(parent) = self.checked_parent(current)? {
            ancestors.push(parent);
            current = parent;
        }

        Ok(ancestors)
    }

    fn subtree_mask(&self, index: usize) -> Result<Vec<bool>> {
        let mut mask = vec![false; self.nodes.len()];

        mask[index] = true;

        for descendant in index + 1..self.nodes.len() {
            if let Some(parent) = self.checked_parent(descendant)? {
                mask[descendant] = mask[parent];
            }
        }

        Ok(mask)
    }

    fn update_best_upward(&mut self, index: usize) -> Result<()> {
        for ancestor in self.ancestors_inclusive(index)? {
            self.update_best(ancestor);
        }

        Ok(())
    }

    fn update_best(&mut self, index: usize) {
        let node = &self.nodes[index];

        let best_child = node
            .children
            .iter()
            .copied()
            .filter(|child| self.nodes[*child].is_viable())
            .max_by_key(|child| self.nodes[*child].score());

        let best_descendant = match best_child {
            Some(child) => self.nodes[child].best_descendant,
            None => (!node.payload_status.is_invalid()).then_some(index),
        };

        let node = &mut self.nodes[index];

        node.best_child = best_child;
        node.best_descendant = best_descendant;
    }

    fn is_head_consistent(&self, justified: usize, head: usize) -> bool {
        head < self.nodes.len()
            && self.nodes[head].best_descendant == Some(head)
            && self
                .ancestors_inclusive(head)
                .is_ok_and(|ancestors| ancestors.contains(&justified))
    }

    fn find_head(&self, justified: usize) -> Result<H256> {
        let mut current = justified;

        loop {
            let best_child = self.nodes[current]
                .children
                .iter()
                .copied()
                .filter(|child| !self.nodes[*child].payload_status.is_invalid())
                .max_by_key(|child| self.nodes[*child].score());

            let Some(child) = best_child else {
                return Ok(self.nodes[current].root);
            };

            ensure!(
                current < child,
                Error::CycleDetected {
                    block_root: self.nodes[child].root,
                },
            );

            current = child;
        }
    }
}
