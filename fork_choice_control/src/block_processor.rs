use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use execution_engine::{ExecutionEngine, ForkChoiceStateV1};
use fork_choice_store::{Store, StoreChanges};
use log::{debug, warn};
use types::{
    bellatrix::beacon_state::BeaconState,
    nonstandard::{BlockWithRoot, PayloadStatus},
    phase0::primitives::H256,
};

use crate::{
    controller_config::ControllerConfig,
    engine_notifier::{EngineNotifier, EngineReply, EngineVerdict},
    error::Error,
    pipeline::{Pipeline, PipelineState},
    state_transition::StateTransition,
};

/// A block that made it through [`PipelineState::EngineNotify`] along with the store it was
/// applied to. Nothing has been published yet.
pub struct ProcessedBlock {
    pub store: Store,
    pub changes: StoreChanges,
    pub payload_status: PayloadStatus,
}

pub struct BlockProcessor<'controller, E, T> {
    config: &'controller ControllerConfig,
    state_transition: &'controller T,
    engine_notifier: EngineNotifier<'controller, E>,
}

impl<'controller, E: ExecutionEngine, T: StateTransition> BlockProcessor<'controller, E, T> {
    pub const fn new(
        config: &'controller ControllerConfig,
        state_transition: &'controller T,
        engine_notifier: EngineNotifier<'controller, E>,
    ) -> Self {
        Self {
            config,
            state_transition,
            engine_notifier,
        }
    }

    /// Runs the stages before [`PipelineState::Committed`].
    ///
    /// `snapshot` is never modified. All changes are made to a clone of it and returned in
    /// [`ProcessedBlock`], so dropping the returned future at any point leaves no trace.
    pub async fn process(
        &self,
        snapshot: &Store,
        block: BlockWithRoot,
        pipeline: &mut Pipeline,
    ) -> Result<ProcessedBlock> {
        let block_root = block.root;

        pipeline.advance(PipelineState::Validating)?;

        let pre_state = snapshot.validate_block(&block)?;
        let post_state = self.run_state_transition(pre_state, &block).await?;

        pipeline.advance(PipelineState::ForkChoiceUpdate)?;

        let execution_payload = block.block.body.execution_payload.clone();
        let mut store = snapshot.clone();
        let changes = store.apply_block(block, post_state, PayloadStatus::Optimistic)?;

        pipeline.advance(PipelineState::EngineNotify)?;

        let execution_block_hash = execution_payload.block_hash;

        // Blocks from before the Merge have no payload to verify.
        let verdict = if execution_block_hash.is_zero() {
            EngineVerdict::Valid
        } else {
            self.engine_notifier
                .new_payload(block_root, execution_payload.into())
                .await?
        };

        let payload_status = match verdict {
            EngineVerdict::Valid => {
                store.apply_payload_status(block_root, PayloadStatus::Valid, None)?;
                PayloadStatus::Valid
            }
            EngineVerdict::Optimistic => PayloadStatus::Optimistic,
            EngineVerdict::Invalid {
                latest_valid_hash,
                validation_error,
            } => bail!(Error::InvalidPayload {
                block_root,
                execution_block_hash,
                latest_valid_hash,
                validation_error,
            }),
        };

        if changes.is_head_changed() {
            self.notify_forkchoice_updated(&mut store).await?;
        }

        Ok(ProcessedBlock {
            store,
            changes,
            payload_status,
        })
    }

    async fn run_state_transition(
        &self,
        pre_state: Arc<BeaconState>,
        block: &BlockWithRoot,
    ) -> Result<Arc<BeaconState>> {
        let block_root = block.root;
        let timeout = self.config.state_transition_timeout;

        tokio::time::timeout(
            timeout,
            self.state_transition.apply(pre_state, block.block.clone()),
        )
        .await
        .map_err(|_| Error::StateTransitionTimedOut {
            block_root,
            timeout,
        })?
        .context(Error::StateTransitionFailed { block_root })
    }

    async fn notify_forkchoice_updated(&self, store: &mut Store) -> Result<()> {
        let Some((head_root, fork_choice_state)) = fork_choice_state(store)? else {
            return Ok(());
        };

        let response = match self
            .engine_notifier
            .forkchoice_updated(fork_choice_state, None)
            .await?
        {
            EngineReply::Response(response) => response,
            EngineReply::Unreachable(error) => {
                warn!(
                    "execution engine unreachable; head {head_root:?} remains optimistic: {error}",
                );

                return Ok(());
            }
        };

        match EngineVerdict::from(response.payload_status) {
            EngineVerdict::Valid => {
                store.apply_payload_status(head_root, PayloadStatus::Valid, None)?;
            }
            EngineVerdict::Optimistic => {
                debug!("execution engine is syncing (head: {head_root:?})");
            }
            EngineVerdict::Invalid {
                latest_valid_hash,
                validation_error,
            } => bail!(Error::InvalidPayload {
                block_root: head_root,
                execution_block_hash: fork_choice_state.head_block_hash,
                latest_valid_hash,
                validation_error,
            }),
        }

        Ok(())
    }
}

/// [`ForkChoiceStateV1`] for the head of `store` along with the head block root.
///
/// Returns [`None`] if the head block has no execution payload.
pub fn fork_choice_state(store: &Store) -> Result<Option<(H256, ForkChoiceStateV1)>> {
    let head = store.head()?;
    let head_block_hash = head.execution_block_hash();

    if head_block_hash.is_zero() {
        return Ok(None);
    }

    let fork_choice_state = ForkChoiceStateV1 {
        head_block_hash,
        safe_block_hash: store.safe_execution_payload_hash()?,
        finalized_block_hash: store.finalized_execution_payload_hash()?,
    };

    Ok(Some((head.block_root, fork_choice_state)))
}
