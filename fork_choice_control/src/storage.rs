use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use log::debug;
use parking_lot::Mutex;
use types::{
    bellatrix::containers::BeaconBlock,
    nonstandard::CheckpointKind,
    phase0::{containers::Checkpoint, primitives::H256},
};

/// Durable repository of blocks and checkpoints.
///
/// Fork choice writes to it after every successful change and never reads from it while
/// processing blocks.
pub trait Storage: Send + Sync {
    fn get(&self, block_root: H256) -> Result<Option<Arc<BeaconBlock>>>;

    fn put(&self, block_root: H256, block: Arc<BeaconBlock>) -> Result<()>;

    fn persist_checkpoint(&self, kind: CheckpointKind, checkpoint: Checkpoint) -> Result<()>;
}

impl<S: Storage> Storage for Arc<S> {
    fn get(&self, block_root: H256) -> Result<Option<Arc<BeaconBlock>>> {
        self.as_ref().get(block_root)
    }

    fn put(&self, block_root: H256, block: Arc<BeaconBlock>) -> Result<()> {
        self.as_ref().put(block_root, block)
    }

    fn persist_checkpoint(&self, kind: CheckpointKind, checkpoint: Checkpoint) -> Result<()> {
        self.as_ref().persist_checkpoint(kind, checkpoint)
    }
}

#[derive(Default)]
pub struct InMemoryStorage {
    blocks: Mutex<HashMap<H256, Arc<BeaconBlock>>>,
    checkpoints: Mutex<HashMap<CheckpointKind, Checkpoint>>,
}

impl InMemoryStorage {
    #[must_use]
    pub fn checkpoint(&self, kind: CheckpointKind) -> Option<Checkpoint> {
        self.checkpoints.lock().get(&kind).copied()
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.lock().len()
    }
}

impl Storage for InMemoryStorage {
    fn get(&self, block_root: H256) -> Result<Option<Arc<BeaconBlock>>> {
        Ok(self.blocks.lock().get(&block_root).cloned())
    }

    fn put(&self, block_root: H256, block: Arc<BeaconBlock>) -> Result<()> {
        self.blocks.lock().insert(block_root, block);
        Ok(())
    }

    fn persist_checkpoint(&self, kind: CheckpointKind, checkpoint: Checkpoint) -> Result<()> {
        debug!("persisting {kind} checkpoint: {checkpoint:?}");
        self.checkpoints.lock().insert(kind, checkpoint);
        Ok(())
    }
}
