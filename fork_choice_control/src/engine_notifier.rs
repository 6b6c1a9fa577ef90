use core::future::Future;
use std::sync::Arc;

use anyhow::{bail, Result};
use execution_engine::{
    EngineError, ExecutionEngine, ExecutionPayloadV1, ForkChoiceStateV1,
    ForkChoiceUpdatedResponse, PayloadAttributesV1, PayloadId, PayloadStatusV1,
};
use log::{debug, warn};
use prometheus_metrics::Metrics;
use types::phase0::primitives::{ExecutionBlockHash, H256};

use crate::controller_config::ControllerConfig;

/// How fork choice treats a payload after an exchange with the execution engine.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum EngineVerdict {
    Valid,
    /// `SYNCING`, `ACCEPTED` or no usable response after all attempts.
    Optimistic,
    Invalid {
        latest_valid_hash: Option<ExecutionBlockHash>,
        validation_error: Option<String>,
    },
}

impl From<PayloadStatusV1> for EngineVerdict {
    fn from(payload_status: PayloadStatusV1) -> Self {
        let PayloadStatusV1 {
            status,
            latest_valid_hash,
            validation_error,
        } = payload_status;

        if status.is_valid() {
            Self::Valid
        } else if status.is_invalid() {
            Self::Invalid {
                latest_valid_hash,
                validation_error,
            }
        } else {
            Self::Optimistic
        }
    }
}

/// Outcome of a possibly retried exchange.
pub enum EngineReply<T> {
    Response(T),
    /// Every attempt failed with a transient error. The last one is kept for logging.
    Unreachable(EngineError),
}

/// Sends requests to the execution engine with a timeout on each attempt and exponential backoff
/// between attempts.
///
/// Transient failures that persist through all attempts are reported as
/// [`EngineReply::Unreachable`] so that callers can fall back to optimistic import.
/// Other engine failures that persist are reported as [`EngineError::Unavailable`].
pub struct EngineNotifier<'engine, E> {
    config: &'engine ControllerConfig,
    execution_engine: &'engine E,
    metrics: Option<&'engine Arc<Metrics>>,
}

impl<'engine, E: ExecutionEngine> EngineNotifier<'engine, E> {
    pub const fn new(
        config: &'engine ControllerConfig,
        execution_engine: &'engine E,
        metrics: Option<&'engine Arc<Metrics>>,
    ) -> Self {
        Self {
            config,
            execution_engine,
            metrics,
        }
    }

    pub async fn new_payload(
        &self,
        beacon_block_root: H256,
        payload: ExecutionPayloadV1,
    ) -> Result<EngineVerdict> {
        let reply = self
            .call("engine_newPayloadV1", || {
                self.execution_engine
                    .notify_new_payload(beacon_block_root, payload.clone())
            })
            .await?;

        Ok(match reply {
            EngineReply::Response(payload_status) => payload_status.into(),
            EngineReply::Unreachable(error) => {
                warn!(
                    "execution engine unreachable; treating payload as optimistic \
                     (beacon_block_root: {beacon_block_root:?}, block_hash: {:?}): {error}",
                    payload.block_hash,
                );

                EngineVerdict::Optimistic
            }
        })
    }

    pub async fn forkchoice_updated(
        &self,
        fork_choice_state: ForkChoiceStateV1,
        payload_attributes: Option<PayloadAttributesV1>,
    ) -> Result<EngineReply<ForkChoiceUpdatedResponse>> {
        self.call("engine_forkchoiceUpdatedV1", || {
            self.execution_engine
                .notify_forkchoice_updated(fork_choice_state, payload_attributes)
        })
        .await
    }

    pub async fn get_payload(&self, payload_id: PayloadId) -> Result<ExecutionPayloadV1> {
        match self
            .call("engine_getPayloadV1", || {
                self.execution_engine.get_payload(payload_id)
            })
            .await?
        {
            EngineReply::Response(payload) => Ok(payload),
            EngineReply::Unreachable(error) => bail!(EngineError::Unavailable {
                attempts: self.config.engine_max_attempts,
                last_error: Box::new(error),
            }),
        }
    }

    async fn call<T, F, R>(&self, method: &'static str, mut request: R) -> Result<EngineReply<T>>
    where
        F: Future<Output = Result<T>>,
        R: FnMut() -> F,
    {
        let max_attempts = self.config.engine_max_attempts.max(1);
        let timeout = self.config.engine_request_timeout;
        let mut attempt = 1;

        loop {
            let error = match tokio::time::timeout(timeout, request()).await {
                Ok(Ok(response)) => return Ok(EngineReply::Response(response)),
                Ok(Err(error)) => error.downcast::<EngineError>()?,
                Err(_) => EngineError::Timeout { method, timeout },
            };

            if attempt >= max_attempts {
                if error.is_transient() {
                    return Ok(EngineReply::Unreachable(error));
                }

                bail!(EngineError::Unavailable {
                    attempts: attempt,
                    last_error: Box::new(error),
                });
            }

            let backoff = self.config.backoff(attempt);

            debug!(
                "retrying {method} in {backoff:?} \
                 (attempt {attempt} of {max_attempts} failed: {error})",
            );

            if let Some(metrics) = self.metrics {
                metrics.engine_api_retries_count.inc();
            }

            tokio::time::sleep(backoff).await;

            attempt += 1;
        }
    }
}
