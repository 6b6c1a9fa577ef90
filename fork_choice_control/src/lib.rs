//! Block processing around the fork choice store.
//!
//! This crate handles the following concerns:
//! - Running blocks through the [pipeline](`PipelineState`) one at a time.
//! - Publishing consistent [`Store`] snapshots to concurrent readers.
//! - Talking to the execution engine with timeouts, retries and optimistic fallback.
//! - [Persistence](`Storage`) of imported blocks and changed checkpoints.
//! - Notifying other components of the application about changes to the fork choice store.
//! - Testing.
//!
//! [`Store`]: fork_choice_store::Store

pub use crate::{
    controller::Controller,
    controller_config::ControllerConfig,
    engine_notifier::EngineVerdict,
    error::Error,
    messages::{ApiMessage, ChainReorgEvent, FinalizedCheckpointEvent, HeadEvent},
    pipeline::{Pipeline, PipelineState},
    state_transition::StateTransition,
    storage::{InMemoryStorage, Storage},
};

mod block_processor;
mod controller;
mod controller_config;
mod engine_notifier;
mod error;
mod messages;
mod pipeline;
mod queries;
mod state_transition;
mod storage;

#[cfg(test)]
mod helpers;
