use anyhow::{ensure, Result};
use log::warn;
use strum::IntoEnumIterator as _;
use types::{nonstandard::CheckpointKind, phase0::containers::Checkpoint};

use crate::error::Error;

/// The justified, best justified and finalized checkpoints.
///
/// A default value has all slots unset. That state is only reachable by constructing it
/// directly. [`Store`](crate::Store) always initializes the slots from its anchor.
///
/// Update methods take a [`Checkpoint`] rather than an [`Option`], so a slot cannot be unset once
/// filled. Monotonicity is the caller's responsibility, with
/// [`CheckpointStore::reset_for_reorg`] as the only sanctioned way to move backwards.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct CheckpointStore {
    justified: Option<Checkpoint>,
    best_justified: Option<Checkpoint>,
    finalized: Option<Checkpoint>,
}

impl CheckpointStore {
    #[must_use]
    pub const fn new(anchor: Checkpoint) -> Self {
        Self {
            justified: Some(anchor),
            best_justified: Some(anchor),
            finalized: Some(anchor),
        }
    }

    pub fn justified(&self) -> Result<Checkpoint> {
        self.justified
            .ok_or_else(|| Error::NilJustifiedCheckpoint.into())
    }

    pub fn best_justified(&self) -> Result<Checkpoint> {
        self.best_justified
            .ok_or_else(|| Error::NilBestJustifiedCheckpoint.into())
    }

    pub fn finalized(&self) -> Result<Checkpoint> {
        self.finalized
            .ok_or_else(|| Error::NilFinalizedCheckpoint.into())
    }

    pub fn get(&self, kind: CheckpointKind) -> Result<Checkpoint> {
        match kind {
            CheckpointKind::Justified => self.justified(),
            CheckpointKind::BestJustified => self.best_justified(),
            CheckpointKind::Finalized => self.finalized(),
        }
    }

    pub fn update_justified(&mut self, checkpoint: Checkpoint) {
        self.justified = Some(checkpoint);
    }

    pub fn update_best_justified(&mut self, checkpoint: Checkpoint) {
        self.best_justified = Some(checkpoint);
    }

    pub fn update_finalized(&mut self, checkpoint: Checkpoint) {
        self.finalized = Some(checkpoint);
    }

    pub fn update(&mut self, kind: CheckpointKind, checkpoint: Checkpoint) {
        match kind {
            CheckpointKind::Justified => self.update_justified(checkpoint),
            CheckpointKind::BestJustified => self.update_best_justified(checkpoint),
            CheckpointKind::Finalized => self.update_finalized(checkpoint),
        }
    }

    /// Slots whose values differ from those in `old`, along with their new values.
    pub fn changed_since(&self, old: &Self) -> Vec<(CheckpointKind, Checkpoint)> {
        CheckpointKind::iter()
            .filter_map(|kind| {
                let new = self.get(kind).ok()?;
                (old.get(kind).ok() != Some(new)).then_some((kind, new))
            })
            .collect()
    }

    /// Replaces all three slots, allowing any of them to move backwards.
    ///
    /// The replacement must still satisfy `finalized <= justified <= best_justified` by epoch.
    pub fn reset_for_reorg(
        &mut self,
        justified: Checkpoint,
        best_justified: Checkpoint,
        finalized: Checkpoint,
        reason: &str,
    ) -> Result<()> {
        ensure!(
            finalized.epoch <= justified.epoch && justified.epoch <= best_justified.epoch,
            Error::CheckpointsOutOfOrder {
                justified,
                best_justified,
                finalized,
            },
        );

        warn!(
            "resetting checkpoints due to chain reorganization ({reason}) \
             (old justified: {:?}, old best justified: {:?}, old finalized: {:?}, \
             new justified: {justified:?}, new best justified: {best_justified:?}, \
             new finalized: {finalized:?})",
            self.justified, self.best_justified, self.finalized,
        );

        *self = Self {
            justified: Some(justified),
            best_justified: Some(best_justified),
            finalized: Some(finalized),
        };

        Ok(())
    }
}
