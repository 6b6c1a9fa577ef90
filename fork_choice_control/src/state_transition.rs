use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use types::bellatrix::{beacon_state::BeaconState, containers::BeaconBlock};

/// The state transition function. Verifies signatures and every other validity condition.
///
/// Implementations may take a long time. Callers bound them with a timeout.
#[async_trait]
pub trait StateTransition: Send + Sync {
    /// Returns the post-state or an error if `block` is not valid on top of `pre_state`.
    async fn apply(
        &self,
        pre_state: Arc<BeaconState>,
        block: Arc<BeaconBlock>,
    ) -> Result<Arc<BeaconState>>;
}

#[async_trait]
impl<T: StateTransition> StateTransition for Arc<T> {
    async fn apply(
        &self,
        pre_state: Arc<BeaconState>,
        block: Arc<BeaconBlock>,
    ) -> Result<Arc<BeaconState>> {
        self.as_ref().apply(pre_state, block).await
    }
}
