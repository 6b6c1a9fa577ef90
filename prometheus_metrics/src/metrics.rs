use anyhow::Result;
use prometheus::{histogram_opts, Histogram, HistogramVec, IntCounter, IntGauge, Registry};
use types::phase0::primitives::{Epoch, Slot};

#[derive(Debug)]
pub struct Metrics {
    // Fork choice
    pub fork_choice_block_processing_times: Histogram,
    pub fork_choice_rejected_blocks_count: IntCounter,
    pub fork_choice_invalid_payloads_count: IntCounter,
    pub fork_choice_optimistic_imports_count: IntCounter,
    beacon_head_slot: IntGauge,
    beacon_current_justified_epoch: IntGauge,
    beacon_finalized_epoch: IntGauge,
    beacon_reorgs_total: IntCounter,

    // Engine API
    pub engine_api_request_times: HistogramVec,
    pub engine_api_errors_count: IntCounter,
    pub engine_api_retries_count: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        Ok(Self {
            // Fork choice
            fork_choice_block_processing_times: Histogram::with_opts(histogram_opts!(
                "FORK_CHOICE_BLOCK_PROCESSING_TIMES",
                "Times to run a block through the processing pipeline",
            ))?,

            fork_choice_rejected_blocks_count: IntCounter::new(
                "FORK_CHOICE_REJECTED_BLOCKS_COUNT",
                "Number of blocks rejected before reaching the execution engine",
            )?,

            fork_choice_invalid_payloads_count: IntCounter::new(
                "FORK_CHOICE_INVALID_PAYLOADS_COUNT",
                "Number of blocks whose payloads the execution engine reported as invalid",
            )?,

            fork_choice_optimistic_imports_count: IntCounter::new(
                "FORK_CHOICE_OPTIMISTIC_IMPORTS_COUNT",
                "Number of blocks imported before their payloads were validated",
            )?,

            beacon_head_slot: IntGauge::new("beacon_head_slot", "Head slot")?,

            beacon_current_justified_epoch: IntGauge::new(
                "beacon_current_justified_epoch",
                "Justified epoch at head",
            )?,

            beacon_finalized_epoch: IntGauge::new(
                "beacon_finalized_epoch",
                "Finalized epoch at head",
            )?,

            beacon_reorgs_total: IntCounter::new(
                "beacon_reorgs_total",
                "Total number of chain reorganizations",
            )?,

            // Engine API
            engine_api_request_times: HistogramVec::new(
                histogram_opts!("ENGINE_API_REQUEST_TIMES", "Times for Engine API calls"),
                &["method"],
            )?,

            engine_api_errors_count: IntCounter::new(
                "ENGINE_API_ERRORS_COUNT",
                "Number of failed Engine API calls",
            )?,

            engine_api_retries_count: IntCounter::new(
                "ENGINE_API_RETRIES_COUNT",
                "Number of repeated Engine API calls",
            )?,
        })
    }

    pub fn register_with_default_metrics(&self) -> Result<()> {
        self.register(prometheus::default_registry())
    }

    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.fork_choice_block_processing_times.clone()))?;
        registry.register(Box::new(self.fork_choice_rejected_blocks_count.clone()))?;
        registry.register(Box::new(self.fork_choice_invalid_payloads_count.clone()))?;
        registry.register(Box::new(self.fork_choice_optimistic_imports_count.clone()))?;
        registry.register(Box::new(self.beacon_head_slot.clone()))?;
        registry.register(Box::new(self.beacon_current_justified_epoch.clone()))?;
        registry.register(Box::new(self.beacon_finalized_epoch.clone()))?;
        registry.register(Box::new(self.beacon_reorgs_total.clone()))?;
        registry.register(Box::new(self.engine_api_request_times.clone()))?;
        registry.register(Box::new(self.engine_api_errors_count.clone()))?;
        registry.register(Box::new(self.engine_api_retries_count.clone()))?;

        Ok(())
    }

    pub fn set_head_slot(&self, slot: Slot) {
        self.beacon_head_slot.set(saturating_i64(slot));
    }

    pub fn set_justified_epoch(&self, epoch: Epoch) {
        self.beacon_current_justified_epoch.set(saturating_i64(epoch));
    }

    pub fn set_finalized_epoch(&self, epoch: Epoch) {
        self.beacon_finalized_epoch.set(saturating_i64(epoch));
    }

    pub fn register_reorg(&self) {
        self.beacon_reorgs_total.inc();
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
