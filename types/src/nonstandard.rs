use std::sync::Arc;

use derive_more::Constructor;
use serde::Serialize;
use strum::{AsRefStr, Display, EnumIter};

use crate::{bellatrix::containers::BeaconBlock, phase0::primitives::H256};

/// Execution payload status of a block as tracked by fork choice.
///
/// Unlike the statuses returned by the execution engine, this has no notion of `SYNCING` or
/// `ACCEPTED`. Blocks in either state are imported optimistically.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadStatus {
    Valid,
    Invalid,
    Optimistic,
}

impl PayloadStatus {
    #[must_use]
    pub const fn is_valid(self) -> bool {
        matches!(self, Self::Valid)
    }

    #[must_use]
    pub const fn is_invalid(self) -> bool {
        matches!(self, Self::Invalid)
    }

    #[must_use]
    pub const fn is_optimistic(self) -> bool {
        matches!(self, Self::Optimistic)
    }
}

/// Names the three checkpoint slots kept by fork choice.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, AsRefStr, Display, EnumIter, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CheckpointKind {
    Justified,
    BestJustified,
    Finalized,
}

/// A block along with its root.
///
/// Roots are computed by the SSZ layer that decodes blocks from the network.
#[derive(Clone, PartialEq, Eq, Debug, Constructor)]
pub struct BlockWithRoot {
    pub block: Arc<BeaconBlock>,
    pub root: H256,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_kinds_are_named_in_snake_case() {
        assert_eq!(CheckpointKind::BestJustified.as_ref(), "best_justified");
        assert_eq!(CheckpointKind::Finalized.to_string(), "finalized");
    }
}
