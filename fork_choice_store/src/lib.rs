//! Implementation of [Beacon Chain Fork Choice].
//!
//! Unfinalized blocks are kept in a [`BlockTree`], an arena of nodes topologically ordered by
//! insertion. Each node caches its subtree weight and best descendant, so finding the head only
//! requires following pointers from the justified block. This is inspired by [`proto_array`].
//!
//! Mutations are split in two. Methods named `validate_*` check whether an object can be applied
//! without changing anything. Methods named `apply_*` change the [`Store`] and report what
//! happened to the head and checkpoints in [`StoreChanges`].
//!
//! Everything in [`Store`] is stored in persistent data structures from [`im`] or behind [`Arc`].
//! Callers are expected to clone the [`Store`], apply changes to the clone and publish it only if
//! every step succeeds.
//!
//! [Beacon Chain Fork Choice]: https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md
//! [`proto_array`]:            https://github.com/sigp/lighthouse/tree/v4.0.1/consensus/proto_array
//! [`Arc`]:                    std::sync::Arc

pub use crate::{
    block_tree::{BlockTree, Node},
    checkpoints::CheckpointStore,
    error::Error,
    misc::{ChainLink, LatestMessage, Score, StoreChanges},
    store::Store,
    store_config::StoreConfig,
};

mod block_tree;
mod checkpoints;
mod error;
mod misc;
mod store;
mod store_config;
