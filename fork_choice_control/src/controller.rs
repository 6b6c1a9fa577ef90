// Writers are serialized by `Controller.writer`. Each of them clones the latest snapshot of `Store`,
// mutates the clone and publishes it with a single `ArcSwap::store` once every step has succeeded.
// Readers load the snapshot without waiting for writers.
//
// Dropping a writer future before it publishes the clone leaves the published snapshot untouched.
// Nothing in `Store` is shared mutably between snapshots.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use arc_swap::ArcSwap;
use execution_engine::{
    EngineError, ExecutionEngine, ExecutionPayloadV1, ForkChoiceUpdatedResponse,
    PayloadAttributesV1, PayloadId, PayloadStatusV1,
};
use fork_choice_store::{Error as StoreError, Store, StoreChanges, StoreConfig};
use futures::channel::mpsc::UnboundedSender;
use log::{error, info, warn};
use parking_lot::Mutex;
use prometheus_metrics::Metrics;
use strum::IntoEnumIterator as _;
use tokio::sync::Mutex as AsyncMutex;
use types::{
    bellatrix::beacon_state::BeaconState,
    config::Config as ChainConfig,
    nonstandard::{BlockWithRoot, CheckpointKind, PayloadStatus},
    phase0::{
        containers::{AttesterSlashing, Checkpoint, IndexedAttestation},
        primitives::{ExecutionBlockHash, Slot, H256},
    },
};

use crate::{
    block_processor::{self, BlockProcessor, ProcessedBlock},
    controller_config::ControllerConfig,
    engine_notifier::{EngineNotifier, EngineReply, EngineVerdict},
    error::Error,
    messages::{ApiMessage, ChainReorgEvent, FinalizedCheckpointEvent, HeadEvent},
    pipeline::{Pipeline, PipelineState},
    state_transition::StateTransition,
    storage::Storage,
};

pub struct Controller<E, T, S> {
    config: ControllerConfig,
    // The latest consistent snapshot of the store.
    pub(crate) store_snapshot: ArcSwap<Store>,
    writer: AsyncMutex<()>,
    pub(crate) halted: AtomicBool,
    pub(crate) last_pipeline_states: Mutex<Vec<PipelineState>>,
    execution_engine: E,
    state_transition: T,
    storage: S,
    metrics: Option<Arc<Metrics>>,
    api_tx: UnboundedSender<ApiMessage>,
}

impl<E, T, S> Controller<E, T, S>
where
    E: ExecutionEngine,
    T: StateTransition,
    S: Storage,
{
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        chain_config: Arc<ChainConfig>,
        store_config: StoreConfig,
        config: ControllerConfig,
        anchor: BlockWithRoot,
        anchor_state: Arc<BeaconState>,
        execution_engine: E,
        state_transition: T,
        storage: S,
        metrics: Option<Arc<Metrics>>,
        api_tx: UnboundedSender<ApiMessage>,
    ) -> Result<Self> {
        let anchor_root = anchor.root;
        let anchor_block = anchor.block.clone();
        let store = Store::new(chain_config, store_config, anchor, anchor_state)?;

        storage.put(anchor_root, anchor_block)?;

        for kind in CheckpointKind::iter() {
            storage.persist_checkpoint(kind, store.checkpoints().get(kind)?)?;
        }

        info!(
            "fork choice initialized from anchor (block_root: {anchor_root:?}, slot: {})",
            store.slot(),
        );

        Ok(Self {
            config,
            store_snapshot: ArcSwap::from_pointee(store),
            writer: AsyncMutex::new(()),
            halted: AtomicBool::new(false),
            last_pipeline_states: Mutex::new(vec![PipelineState::Idle]),
            execution_engine,
            state_transition,
            storage,
            metrics,
            api_tx,
        })
    }

    /// Runs `block` through the block processing pipeline.
    ///
    /// Blocks are processed one at a time. The block is only visible to queries once it has been
    /// committed. If the returned future is dropped before completion, the block has no effect.
    pub async fn process_block(&self, block: BlockWithRoot) -> Result<StoreChanges> {
        let _writer = self.writer.lock().await;

        self.ensure_running()?;

        let timer = self
            .metrics
            .as_ref()
            .map(|metrics| metrics.fork_choice_block_processing_times.start_timer());

        let snapshot = self.store_snapshot.load_full();
        let mut pipeline = Pipeline::new(block.root);

        let result = match BlockProcessor::new(
            &self.config,
            &self.state_transition,
            self.engine_notifier(),
        )
        .process(&snapshot, block.clone(), &mut pipeline)
        .await
        {
            Ok(processed) => self.commit_block(&snapshot, &block, processed, &mut pipeline),
            Err(error) => Err(error),
        };

        match &result {
            Ok(_) => prometheus_metrics::stop_and_record(timer),
            Err(error) => {
                prometheus_metrics::stop_and_discard(timer);
                pipeline.fail();
                self.handle_rejected_block(&snapshot, &block, error);
            }
        }

        *self.last_pipeline_states.lock() = pipeline.into_states();

        result
    }

    /// [`on_tick`](https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#on_tick)
    /// for the start of `slot`.
    pub async fn on_slot(&self, slot: Slot) -> Result<StoreChanges> {
        self.mutate(|store| match store.apply_tick(slot)? {
            Some(changes) => Ok(changes),
            None => store.head_root().map(StoreChanges::unchanged),
        })
        .await
    }

    pub async fn on_attestation(&self, attestation: &IndexedAttestation) -> Result<StoreChanges> {
        self.mutate(|store| store.apply_attestation(attestation))
            .await
    }

    pub async fn on_attester_slashing(
        &self,
        attester_slashing: &AttesterSlashing,
    ) -> Result<StoreChanges> {
        self.mutate(|store| store.apply_attester_slashing(attester_slashing))
            .await
    }

    /// Applies a payload status received from the execution engine outside of block processing,
    /// e.g. a later `VALID` for a block imported optimistically.
    pub async fn on_payload_status(
        &self,
        block_root: H256,
        payload_status: PayloadStatusV1,
    ) -> Result<StoreChanges> {
        let (status, latest_valid_hash) = match EngineVerdict::from(payload_status) {
            EngineVerdict::Valid => (PayloadStatus::Valid, None),
            EngineVerdict::Optimistic => (PayloadStatus::Optimistic, None),
            EngineVerdict::Invalid {
                latest_valid_hash,
                validation_error,
            } => {
                warn!(
                    "execution engine reported payload as invalid \
                     (block_root: {block_root:?}, latest_valid_hash: {latest_valid_hash:?}, \
                     validation_error: {validation_error:?})",
                );

                if let Some(metrics) = self.metrics.as_ref() {
                    metrics.fork_choice_invalid_payloads_count.inc();
                }

                (PayloadStatus::Invalid, latest_valid_hash)
            }
        };

        self.mutate(|store| store.apply_payload_status(block_root, status, latest_valid_hash))
            .await
    }

    /// Moves checkpoints to the given values even if that means moving them backwards.
    pub async fn reset_checkpoints(
        &self,
        justified: Checkpoint,
        best_justified: Checkpoint,
        finalized: Checkpoint,
        reason: &str,
    ) -> Result<StoreChanges> {
        self.mutate(|store| store.reset_checkpoints(justified, best_justified, finalized, reason))
            .await
    }

    /// Asks the execution engine to start building a payload on top of the current head.
    pub async fn prepare_payload(&self, payload_attributes: PayloadAttributesV1) -> Result<PayloadId> {
        let snapshot = self.store_snapshot.load_full();
        let head_root = snapshot.head_root()?;

        let Some((_, fork_choice_state)) = block_processor::fork_choice_state(&snapshot)? else {
            bail!(Error::HeadWithoutPayload {
                block_root: head_root,
            });
        };

        let ForkChoiceUpdatedResponse {
            payload_status,
            payload_id,
        } = match self
            .engine_notifier()
            .forkchoice_updated(fork_choice_state, Some(payload_attributes))
            .await?
        {
            EngineReply::Response(response) => response,
            EngineReply::Unreachable(error) => bail!(EngineError::Unavailable {
                attempts: self.config.engine_max_attempts,
                last_error: Box::new(error),
            }),
        };

        let status = payload_status.status;

        if let EngineVerdict::Invalid {
            latest_valid_hash,
            validation_error,
        } = EngineVerdict::from(payload_status)
        {
            bail!(Error::InvalidPayload {
                block_root: head_root,
                execution_block_hash: fork_choice_state.head_block_hash,
                latest_valid_hash,
                validation_error,
            });
        }

        payload_id.ok_or_else(|| {
            Error::PayloadNotBuilding {
                head_block_hash: fork_choice_state.head_block_hash,
                status,
            }
            .into()
        })
    }

    pub async fn get_payload(&self, payload_id: PayloadId) -> Result<ExecutionPayloadV1> {
        self.engine_notifier().get_payload(payload_id).await
    }

    async fn mutate(
        &self,
        mutation: impl FnOnce(&mut Store) -> Result<StoreChanges> + Send,
    ) -> Result<StoreChanges> {
        let _writer = self.writer.lock().await;

        self.ensure_running()?;

        let snapshot = self.store_snapshot.load_full();
        let mut store = snapshot.as_ref().clone();

        let changes = mutation(&mut store).inspect_err(|error| self.halt_if_inconsistent(error))?;

        self.commit(&snapshot, store, &changes)?;

        if changes.is_head_changed() {
            self.update_execution_head().await;
        }

        Ok(changes)
    }

    fn commit_block(
        &self,
        snapshot: &Store,
        block: &BlockWithRoot,
        processed: ProcessedBlock,
        pipeline: &mut Pipeline,
    ) -> Result<StoreChanges> {
        let ProcessedBlock {
            store,
            changes,
            payload_status,
        } = processed;

        self.storage.put(block.root, block.block.clone())?;

        pipeline.advance(PipelineState::Committed)?;

        self.commit(snapshot, store, &changes)?;

        info!(
            "block imported (block_root: {:?}, slot: {}, payload_status: {payload_status:?})",
            block.root, block.block.slot,
        );

        if payload_status.is_optimistic() {
            warn!(
                "block imported optimistically (block_root: {:?}, block_hash: {:?})",
                block.root, block.block.body.execution_payload.block_hash,
            );

            if let Some(metrics) = self.metrics.as_ref() {
                metrics.fork_choice_optimistic_imports_count.inc();
            }
        }

        Ok(changes)
    }

    // Persists changed checkpoints and publishes `store`.
    fn commit(&self, snapshot: &Store, store: Store, changes: &StoreChanges) -> Result<()> {
        for (kind, checkpoint) in store.checkpoints().changed_since(snapshot.checkpoints()) {
            self.storage.persist_checkpoint(kind, checkpoint)?;
        }

        let store = Arc::new(store);

        // `ArcSwap::rcu` is not necessary here because `Controller.writer` is held.
        self.store_snapshot.store(store.clone());

        self.notify_about_changes(snapshot, &store, changes);

        Ok(())
    }

    fn notify_about_changes(&self, old_store: &Store, new_store: &Store, changes: &StoreChanges) {
        if changes.is_head_changed() {
            match new_store.head() {
                Ok(head) => {
                    info!(
                        "new head (block_root: {:?}, slot: {})",
                        head.block_root,
                        head.slot(),
                    );

                    if let Some(metrics) = self.metrics.as_ref() {
                        metrics.set_head_slot(head.slot());
                    }

                    match HeadEvent::new(new_store, head) {
                        Ok(event) => ApiMessage::Head(event).send(&self.api_tx),
                        Err(error) => warn!("{error:#}"),
                    }
                }
                Err(error) => warn!("{error:#}"),
            }
        }

        if changes.reorganized {
            info!(
                "chain reorganized (old head: {:?}, new head: {:?})",
                changes.old_head, changes.new_head,
            );

            if let Some(metrics) = self.metrics.as_ref() {
                metrics.register_reorg();
            }

            match ChainReorgEvent::new(old_store, new_store) {
                Ok(event) => ApiMessage::ChainReorg(event).send(&self.api_tx),
                Err(error) => warn!("{error:#}"),
            }
        }

        if changes.justified_checkpoint_updated {
            if let Ok(justified_checkpoint) = new_store.justified_checkpoint() {
                info!("new justified checkpoint: {justified_checkpoint:?}");

                if let Some(metrics) = self.metrics.as_ref() {
                    metrics.set_justified_epoch(justified_checkpoint.epoch);
                }
            }
        }

        if changes.finalized_checkpoint_updated {
            match FinalizedCheckpointEvent::new(new_store) {
                Ok(event) => {
                    info!(
                        "new finalized checkpoint (epoch: {}, root: {:?}, pruned blocks: {})",
                        event.epoch,
                        event.block,
                        changes.pruned_roots.len(),
                    );

                    if let Some(metrics) = self.metrics.as_ref() {
                        metrics.set_finalized_epoch(event.epoch);
                    }

                    ApiMessage::FinalizedCheckpoint(event).send(&self.api_tx);
                }
                Err(error) => warn!("{error:#}"),
            }
        }
    }

    fn handle_rejected_block(&self, snapshot: &Store, block: &BlockWithRoot, error: &anyhow::Error) {
        warn!(
            "block rejected (block_root: {:?}, slot: {}): {error:#}",
            block.root, block.block.slot,
        );

        if let Some(metrics) = self.metrics.as_ref() {
            metrics.fork_choice_rejected_blocks_count.inc();
        }

        self.halt_if_inconsistent(error);

        if let Some(Error::InvalidPayload {
            block_root,
            latest_valid_hash,
            ..
        }) = error.downcast_ref::<Error>()
        {
            if let Some(metrics) = self.metrics.as_ref() {
                metrics.fork_choice_invalid_payloads_count.inc();
            }

            if let Err(error) =
                self.exclude_invalid_payload(snapshot, block, *block_root, *latest_valid_hash)
            {
                self.halt_if_inconsistent(&error);
                warn!("failed to exclude invalid payload of {block_root:?}: {error:#}");
            }
        }
    }

    // The invalid block is either the one being processed or the head it would have led to.
    // The former is not in the store yet and can only be remembered as rejected.
    fn exclude_invalid_payload(
        &self,
        snapshot: &Store,
        block: &BlockWithRoot,
        invalid_root: H256,
        latest_valid_hash: Option<ExecutionBlockHash>,
    ) -> Result<()> {
        let mut store = snapshot.clone();

        let changes = if store.contains_block(invalid_root) {
            store.apply_payload_status(invalid_root, PayloadStatus::Invalid, latest_valid_hash)?
        } else {
            store.reject_block(invalid_root);

            let parent_root = block.block.parent_root;

            let latest_valid_hash_among_ancestors = latest_valid_hash.filter(|latest_valid_hash| {
                store
                    .block_tree()
                    .ancestors(parent_root)
                    .is_ok_and(|mut ancestors| {
                        ancestors.any(|node| node.execution_block_hash() == *latest_valid_hash)
                    })
            });

            match latest_valid_hash_among_ancestors {
                Some(latest_valid_hash) => store.apply_payload_status(
                    parent_root,
                    PayloadStatus::Invalid,
                    Some(latest_valid_hash),
                )?,
                None => StoreChanges::unchanged(store.head_root()?),
            }
        };

        self.commit(snapshot, store, &changes)
    }

    async fn update_execution_head(&self) {
        if let Err(error) = self.try_update_execution_head().await {
            self.halt_if_inconsistent(&error);
            warn!("failed to notify execution engine about new head: {error:#}");
        }
    }

    async fn try_update_execution_head(&self) -> Result<()> {
        let snapshot = self.store_snapshot.load_full();

        let Some((head_root, fork_choice_state)) = block_processor::fork_choice_state(&snapshot)?
        else {
            return Ok(());
        };

        let EngineReply::Response(response) = self
            .engine_notifier()
            .forkchoice_updated(fork_choice_state, None)
            .await?
        else {
            return Ok(());
        };

        let (status, latest_valid_hash) = match EngineVerdict::from(response.payload_status) {
            EngineVerdict::Valid => (PayloadStatus::Valid, None),
            EngineVerdict::Optimistic => return Ok(()),
            EngineVerdict::Invalid {
                latest_valid_hash, ..
            } => (PayloadStatus::Invalid, latest_valid_hash),
        };

        let mut store = snapshot.as_ref().clone();
        let changes = store.apply_payload_status(head_root, status, latest_valid_hash)?;

        self.commit(&snapshot, store, &changes)
    }

    fn engine_notifier(&self) -> EngineNotifier<'_, E> {
        EngineNotifier::new(&self.config, &self.execution_engine, self.metrics.as_ref())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.halted.load(Ordering::Acquire) {
            bail!(Error::MutatorHalted);
        }

        Ok(())
    }

    fn halt_if_inconsistent(&self, error: &anyhow::Error) {
        let Some(store_error) = error.downcast_ref::<StoreError>() else {
            return;
        };

        if store_error.is_internal_consistency() {
            error!("halting fork choice due to internal consistency error: {error:#}");
            self.halted.store(true, Ordering::Release);
        }
    }
}
