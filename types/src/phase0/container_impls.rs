use std::collections::BTreeSet;

use crate::phase0::{
    containers::{AttestationData, AttesterSlashing},
    primitives::ValidatorIndex,
};

impl AttestationData {
    /// [`is_slashable_attestation_data`](https://github.com/ethereum/consensus-specs/blob/v1.4.0/specs/phase0/beacon-chain.md#is_slashable_attestation_data)
    #[must_use]
    pub fn is_slashable_with(&self, other: &Self) -> bool {
        let double_vote = self != other && self.target.epoch == other.target.epoch;

        let surround_vote =
            self.source.epoch < other.source.epoch && other.target.epoch < self.target.epoch;

        double_vote || surround_vote
    }
}

impl AttesterSlashing {
    /// Indices of validators that signed both conflicting attestations.
    ///
    /// Returns nothing if the attestations do not conflict.
    #[must_use]
    pub fn slashable_indices(&self) -> Vec<ValidatorIndex> {
        let Self {
            attestation_1,
            attestation_2,
        } = self;

        if !attestation_1.data.is_slashable_with(&attestation_2.data) {
            return vec![];
        }

        let indices_1 = attestation_1
            .attesting_indices
            .iter()
            .copied()
            .collect::<BTreeSet<_>>();

        attestation_2
            .attesting_indices
            .iter()
            .copied()
            .filter(|index| indices_1.contains(index))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
