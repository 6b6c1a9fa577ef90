use core::time::Duration;
use std::{collections::HashMap, sync::Arc};

use anyhow::{bail, Result};
use async_trait::async_trait;
use execution_engine::MockExecutionEngine;
use fork_choice_store::{StoreChanges, StoreConfig};
use futures::channel::mpsc::UnboundedReceiver;
use parking_lot::Mutex;
use prometheus_metrics::Metrics;
use types::{
    bellatrix::{
        beacon_state::BeaconState,
        containers::{BeaconBlock, BeaconBlockBody, ExecutionPayload},
    },
    config::Config,
    nonstandard::BlockWithRoot,
    phase0::{
        containers::Checkpoint,
        primitives::{Epoch, Gwei, Slot, H256},
    },
};

use crate::{
    controller::Controller, controller_config::ControllerConfig, messages::ApiMessage,
    state_transition::StateTransition, storage::InMemoryStorage,
};

pub const GENESIS: H256 = H256::repeat_byte(0xaa);

const BALANCES: [Gwei; 4] = [10, 20, 30, 40];

pub type TestController =
    Controller<Arc<MockExecutionEngine>, Arc<TestStateTransition>, Arc<InMemoryStorage>>;

#[must_use]
pub fn root(byte: u8) -> H256 {
    H256::repeat_byte(byte)
}

#[must_use]
pub const fn checkpoint(epoch: Epoch, root: H256) -> Checkpoint {
    Checkpoint { epoch, root }
}

/// Test blocks are identified by `byte`. The block root, state root and execution block hash of
/// a block are all `H256::repeat_byte(byte)`.
#[must_use]
pub fn block(byte: u8, parent_root: H256, slot: Slot) -> BlockWithRoot {
    let block = BeaconBlock {
        slot,
        parent_root,
        state_root: root(byte),
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

#[derive(Clone, Copy)]
enum Outcome {
    Checkpoints {
        justified: Checkpoint,
        finalized: Checkpoint,
    },
    Reject,
    Hang,
}

/// Copies checkpoints and balances from the pre-state unless told otherwise.
/// Blocks are looked up by their state root.
#[derive(Default)]
pub struct TestStateTransition {
    outcomes: Mutex<HashMap<H256, Outcome>>,
}

impl TestStateTransition {
    pub fn set_checkpoints(&self, byte: u8, justified: Checkpoint, finalized: Checkpoint) {
        self.outcomes.lock().insert(
            root(byte),
            Outcome::Checkpoints {
                justified,
                finalized,
            },
        );
    }

    pub fn reject(&self, byte: u8) {
        self.outcomes.lock().insert(root(byte), Outcome::Reject);
    }

    pub fn hang(&self, byte: u8) {
        self.outcomes.lock().insert(root(byte), Outcome::Hang);
    }
}

#[async_trait]
impl StateTransition for TestStateTransition {
    async fn apply(
        &self,
        pre_state: Arc<BeaconState>,
        block: Arc<BeaconBlock>,
    ) -> Result<Arc<BeaconState>> {
        let outcome = self.outcomes.lock().get(&block.state_root).copied();

        let (current_justified_checkpoint, finalized_checkpoint) = match outcome {
            Some(Outcome::Checkpoints {
                justified,
                finalized,
            }) => (justified, finalized),
            Some(Outcome::Reject) => bail!("invalid block signature"),
            Some(Outcome::Hang) => core::future::pending().await,
            None => (
                pre_state.current_justified_checkpoint,
                pre_state.finalized_checkpoint,
            ),
        };

        Ok(Arc::new(BeaconState {
            slot: block.slot,
            latest_block_root: block.state_root,
            latest_execution_payload_block_hash: block.body.execution_payload.block_hash,
            current_justified_checkpoint,
            finalized_checkpoint,
            balances: pre_state.balances.clone(),
        }))
    }
}

pub struct Context {
    controller: TestController,
    execution_engine: Arc<MockExecutionEngine>,
    state_transition: Arc<TestStateTransition>,
    storage: Arc<InMemoryStorage>,
    metrics: Arc<Metrics>,
    api_rx: UnboundedReceiver<ApiMessage>,
}

impl Context {
    pub fn new() -> Result<Self> {
        Self::with_config(ControllerConfig {
            state_transition_timeout: Duration::from_millis(100),
            engine_request_timeout: Duration::from_millis(20),
            engine_max_attempts: 3,
            engine_initial_backoff: Duration::from_millis(1),
            engine_max_backoff: Duration::from_millis(4),
        })
    }

    pub fn with_config(config: ControllerConfig) -> Result<Self> {
        let genesis_block = Arc::new(BeaconBlock {
            body: BeaconBlockBody {
                execution_payload: ExecutionPayload {
                    block_hash: GENESIS,
                    ..ExecutionPayload::default()
                },
                ..BeaconBlockBody::default()
            },
            ..BeaconBlock::default()
        });

        let genesis_state = Arc::new(BeaconState {
            latest_block_root: GENESIS,
            latest_execution_payload_block_hash: GENESIS,
            current_justified_checkpoint: checkpoint(0, GENESIS),
            finalized_checkpoint: checkpoint(0, GENESIS),
            balances: BALANCES.into(),
            ..BeaconState::default()
        });

        let execution_engine = Arc::new(MockExecutionEngine::default());
        let state_transition = Arc::new(TestStateTransition::default());
        let storage = Arc::new(InMemoryStorage::default());
        let metrics = Arc::new(Metrics::new()?);
        let (api_tx, api_rx) = futures::channel::mpsc::unbounded();

        let controller = Controller::new(
            Arc::new(Config::minimal()),
            StoreConfig::default(),
            config,
            BlockWithRoot::new(genesis_block, GENESIS),
            genesis_state,
            Arc::clone(&execution_engine),
            Arc::clone(&state_transition),
            Arc::clone(&storage),
            Some(Arc::clone(&metrics)),
            api_tx,
        )?;

        Ok(Self {
            controller,
            execution_engine,
            state_transition,
            storage,
            metrics,
            api_rx,
        })
    }

    #[must_use]
    pub const fn controller(&self) -> &TestController {
        &self.controller
    }

    #[must_use]
    pub fn execution_engine(&self) -> &MockExecutionEngine {
        &self.execution_engine
    }

    #[must_use]
    pub fn state_transition(&self) -> &TestStateTransition {
        &self.state_transition
    }

    #[must_use]
    pub fn storage(&self) -> &InMemoryStorage {
        &self.storage
    }

    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub async fn on_slot(&self, slot: Slot) -> Result<StoreChanges> {
        self.controller.on_slot(slot).await
    }

    pub async fn process(&self, byte: u8, parent_root: H256, slot: Slot) -> Result<StoreChanges> {
        self.controller
            .process_block(block(byte, parent_root, slot))
            .await
    }

    pub fn next_api_message(&mut self) -> Option<ApiMessage> {
        self.api_rx.try_recv().ok()
    }

    pub fn drain_api_messages(&mut self) -> Vec<ApiMessage> {
        core::iter::from_fn(|| self.next_api_message()).collect()
    }
}
