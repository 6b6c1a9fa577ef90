use core::num::NonZeroU64;
use std::borrow::Cow;

use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};

use crate::phase0::primitives::{Epoch, Slot};

/// Chain constants used by fork choice.
///
/// Field names match the keys in [configurations in `consensus-specs`] so that existing
/// configuration files can be deserialized directly. Unrelated keys are ignored.
///
/// [configurations in `consensus-specs`]: https://github.com/ethereum/consensus-specs/tree/v1.4.0/configs
#[expect(
    clippy::unsafe_derive_deserialize,
    reason = "A false positive triggered by `nonzero!`. \
              `Config` has no invariants. It is intended to be deserialized from user input."
)]
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Config {
    pub config_name: Cow<'static, str>,
    #[serde(with = "serde_utils::string_or_native")]
    pub slots_per_epoch: NonZeroU64,
    #[serde(with = "serde_utils::string_or_native")]
    pub safe_slots_to_update_justified: u64,
}

impl Default for Config {
    fn default() -> Self {
        // Use `default` as the default `config_name` and override it in `Config::mainnet`.
        // This way custom network data will be kept separate from mainnet data if a user
        // forgets to specify a custom `CONFIG_NAME`.
        Self {
            config_name: Cow::Borrowed("default"),
            ..Self::mainnet()
        }
    }
}

impl Config {
    #[must_use]
    pub fn mainnet() -> Self {
        Self {
            config_name: Cow::Borrowed("mainnet"),
            slots_per_epoch: nonzero!(32_u64),
            safe_slots_to_update_justified: 8,
        }
    }

    #[must_use]
    pub fn minimal() -> Self {
        Self {
            config_name: Cow::Borrowed("minimal"),
            slots_per_epoch: nonzero!(8_u64),
            safe_slots_to_update_justified: 2,
        }
    }

    /// [`compute_epoch_at_slot`](https://github.com/ethereum/consensus-specs/blob/v1.4.0/specs/phase0/beacon-chain.md#compute_epoch_at_slot)
    #[must_use]
    pub const fn epoch_at_slot(&self, slot: Slot) -> Epoch {
        slot / self.slots_per_epoch.get()
    }

    /// [`compute_start_slot_at_epoch`](https://github.com/ethereum/consensus-specs/blob/v1.4.0/specs/phase0/beacon-chain.md#compute_start_slot_at_epoch)
    #[must_use]
    pub const fn start_slot_at_epoch(&self, epoch: Epoch) -> Slot {
        epoch.saturating_mul(self.slots_per_epoch.get())
    }

    /// [`compute_slots_since_epoch_start`](https://github.com/ethereum/consensus-specs/blob/v1.4.0/specs/phase0/fork-choice.md#compute_slots_since_epoch_start)
    #[must_use]
    pub const fn slots_since_epoch_start(&self, slot: Slot) -> u64 {
        slot % self.slots_per_epoch.get()
    }

    #[must_use]
    pub const fn is_epoch_start(&self, slot: Slot) -> bool {
        self.slots_since_epoch_start(slot) == 0
    }
}
