use anyhow::{ensure, Result};
use log::debug;
use serde::Serialize;
use strum::{AsRefStr, Display};
use types::phase0::primitives::H256;

/// Stages a block goes through in [`Controller::process_block`].
///
/// ```text
/// Idle ─► Validating ─► ForkChoiceUpdate ─► EngineNotify ─► Committed
///             │                │                  │
///             └────────────────┴──────────────────┴───────► Error
/// ```
///
/// [`Controller::process_block`]: crate::Controller::process_block
#[derive(Clone, Copy, PartialEq, Eq, Debug, AsRefStr, Display, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Validating,
    ForkChoiceUpdate,
    EngineNotify,
    Committed,
    Error,
}

impl PipelineState {
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Validating)
                | (Self::Validating, Self::ForkChoiceUpdate)
                | (Self::ForkChoiceUpdate, Self::EngineNotify)
                | (Self::EngineNotify, Self::Committed)
                | (
                    Self::Idle | Self::Validating | Self::ForkChoiceUpdate | Self::EngineNotify,
                    Self::Error,
                ),
        )
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Error)
    }
}

/// States visited by a single block, starting with [`PipelineState::Idle`].
#[derive(Clone, Debug)]
pub struct Pipeline {
    block_root: H256,
    states: Vec<PipelineState>,
}

impl Pipeline {
    #[must_use]
    pub fn new(block_root: H256) -> Self {
        Self {
            block_root,
            states: vec![PipelineState::Idle],
        }
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.states
            .last()
            .copied()
            .unwrap_or(PipelineState::Idle)
    }

    #[must_use]
    pub fn states(&self) -> &[PipelineState] {
        &self.states
    }

    pub fn advance(&mut self, next: PipelineState) -> Result<()> {
        let current = self.state();

        ensure!(
            current.can_transition_to(next),
            "block pipeline cannot move from {current} to {next} (block_root: {:?})",
            self.block_root,
        );

        debug!(
            "block pipeline moved from {current} to {next} (block_root: {:?})",
            self.block_root,
        );

        self.states.push(next);

        Ok(())
    }

    pub(crate) fn fail(&mut self) {
        if !self.state().is_terminal() {
            self.states.push(PipelineState::Error);
        }
    }

    #[must_use]
    pub fn into_states(self) -> Vec<PipelineState> {
        self.states
    }
}
