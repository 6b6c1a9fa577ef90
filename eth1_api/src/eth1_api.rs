use core::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use execution_engine::{
    EngineError, EngineMessage as _, ExecutionEngine, ExecutionPayloadV1, ForkChoiceStateV1,
    ForkChoiceUpdatedResponse, PayloadAttributesV1, PayloadId, PayloadStatusV1,
};
use log::{debug, warn};
use prometheus_metrics::Metrics;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use types::phase0::primitives::H256;

use crate::auth::{Auth, AuthOptions};

const ENGINE_EXCHANGE_CAPABILITIES_TIMEOUT: Duration = Duration::from_secs(1);
const ENGINE_FORKCHOICE_UPDATED_TIMEOUT: Duration = Duration::from_secs(8);
const ENGINE_GET_PAYLOAD_TIMEOUT: Duration = Duration::from_secs(1);
const ENGINE_NEW_PAYLOAD_TIMEOUT: Duration = Duration::from_secs(8);

const SUPPORTED_METHODS: &[&str] = &[
    "engine_exchangeCapabilities",
    "engine_forkchoiceUpdatedV1",
    "engine_getPayloadV1",
    "engine_newPayloadV1",
];

/// Per-method request timeouts.
///
/// The defaults are the ones recommended in the [Engine API specification].
///
/// [Engine API specification]: https://github.com/ethereum/execution-apis/blob/b7c5d3420e00648f456744d121ffbd929862924d/src/engine/paris.md
#[derive(Clone, Copy, Debug)]
pub struct EngineTimeouts {
    pub exchange_capabilities: Duration,
    pub forkchoice_updated: Duration,
    pub get_payload: Duration,
    pub new_payload: Duration,
}

impl Default for EngineTimeouts {
    fn default() -> Self {
        Self {
            exchange_capabilities: ENGINE_EXCHANGE_CAPABILITIES_TIMEOUT,
            forkchoice_updated: ENGINE_FORKCHOICE_UPDATED_TIMEOUT,
            get_payload: ENGINE_GET_PAYLOAD_TIMEOUT,
            new_payload: ENGINE_NEW_PAYLOAD_TIMEOUT,
        }
    }
}

#[derive(Debug)]
pub struct Eth1ApiConfig {
    pub url: Url,
    pub auth_options: AuthOptions,
    pub timeouts: EngineTimeouts,
}

/// JSON-RPC client for the Engine API of a single execution client.
pub struct Eth1Api {
    client: Client,
    url: Url,
    auth: Arc<Auth>,
    timeouts: EngineTimeouts,
    metrics: Option<Arc<Metrics>>,
    next_request_id: AtomicU64,
}

#[derive(Serialize)]
struct JsonRpcRequest<'params> {
    jsonrpc: &'static str,
    method: &'static str,
    params: &'params [Value],
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

impl Eth1Api {
    #[must_use]
    pub const fn new(
        client: Client,
        url: Url,
        auth: Arc<Auth>,
        timeouts: EngineTimeouts,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            client,
            url,
            auth,
            timeouts,
            metrics,
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(
        client: Client,
        config: Eth1ApiConfig,
        metrics: Option<Arc<Metrics>>,
    ) -> Result<Self> {
        let Eth1ApiConfig {
            url,
            auth_options,
            timeouts,
        } = config;

        let auth = Auth::new(auth_options)?;

        Ok(Self::new(client, url, Arc::new(auth), timeouts, metrics))
    }

    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    async fn execute(
        &self,
        method: &'static str,
        params: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let timer = self.metrics.as_ref().map(|metrics| {
            prometheus_metrics::start_timer_vec(&metrics.engine_api_request_times, method)
        });

        let result = self.request(method, &params, timeout).await;

        match &result {
            Ok(_) => prometheus_metrics::stop_and_record(timer.flatten()),
            Err(error) => {
                prometheus_metrics::stop_and_discard(timer.flatten());

                if let Some(metrics) = self.metrics.as_ref() {
                    metrics.engine_api_errors_count.inc();
                }

                warn!("Engine API endpoint {} failed to execute {method}: {error}", self.url);
            }
        }

        result
    }

    async fn request(
        &self,
        method: &'static str,
        params: &[Value],
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);

        debug!("sending Engine API request (method: {method}, id: {id})");

        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id,
        };

        let mut request = self
            .client
            .post(self.url.clone())
            .json(&body)
            .timeout(timeout);

        if let Some(headers) = self.auth.headers()? {
            request = request.headers(headers);
        }

        let response = request
            .send()
            .await
            .map_err(|error| transport_error(method, timeout, &error))?;

        let status = response.status();

        let bytes = response
            .bytes()
            .await
            .map_err(|error| transport_error(method, timeout, &error))?;

        let parsed = serde_json::from_slice::<JsonRpcResponse>(&bytes);

        if let Ok(JsonRpcResponse {
            error: Some(JsonRpcError { code, message }),
            ..
        }) = parsed
        {
            return Err(EngineError::Rpc {
                method,
                code,
                message,
            }
            .into());
        }

        if !status.is_success() {
            return Err(EngineError::Connection {
                reason: format!("{method} failed with HTTP status {status}"),
            }
            .into());
        }

        let JsonRpcResponse { result, .. } = parsed.map_err(|error| EngineError::SchemaViolation {
            message: "JSON-RPC response",
            reason: error.to_string(),
        })?;

        result.ok_or_else(|| {
            EngineError::SchemaViolation {
                message: "JSON-RPC response",
                reason: "response contains neither result nor error".to_owned(),
            }
            .into()
        })
    }
}

#[async_trait]
impl ExecutionEngine for Eth1Api {
    const IS_NULL: bool = false;

    async fn exchange_capabilities(&self) -> Result<Vec<String>> {
        let params = vec![serde_json::to_value(SUPPORTED_METHODS)?];

        let result = self
            .execute(
                "engine_exchangeCapabilities",
                params,
                self.timeouts.exchange_capabilities,
            )
            .await?;

        serde_json::from_value(result).map_err(|error| {
            EngineError::SchemaViolation {
                message: "engine_exchangeCapabilities response",
                reason: error.to_string(),
            }
            .into()
        })
    }

    async fn notify_new_payload(
        &self,
        beacon_block_root: H256,
        payload: ExecutionPayloadV1,
    ) -> Result<PayloadStatusV1> {
        debug!(
            "notifying execution engine of new payload \
             (beacon_block_root: {beacon_block_root:?}, block_hash: {:?})",
            payload.block_hash,
        );

        let params = vec![payload.to_json()?];

        let result = self
            .execute("engine_newPayloadV1", params, self.timeouts.new_payload)
            .await?;

        PayloadStatusV1::from_json(result)
    }

    async fn notify_forkchoice_updated(
        &self,
        fork_choice_state: ForkChoiceStateV1,
        payload_attributes: Option<PayloadAttributesV1>,
    ) -> Result<ForkChoiceUpdatedResponse> {
        let payload_attributes = match payload_attributes {
            Some(attributes) => attributes.to_json()?,
            None => Value::Null,
        };

        let params = vec![fork_choice_state.to_json()?, payload_attributes];

        let result = self
            .execute(
                "engine_forkchoiceUpdatedV1",
                params,
                self.timeouts.forkchoice_updated,
            )
            .await?;

        ForkChoiceUpdatedResponse::from_json(result)
    }

    async fn get_payload(&self, payload_id: PayloadId) -> Result<ExecutionPayloadV1> {
        let params = vec![serde_json::to_value(payload_id)?];

        let result = self
            .execute("engine_getPayloadV1", params, self.timeouts.get_payload)
            .await?;

        ExecutionPayloadV1::from_json(result)
    }
}

fn transport_error(method: &'static str, timeout: Duration, error: &reqwest::Error) -> EngineError {
    if error.is_timeout() {
        EngineError::Timeout { method, timeout }
    } else {
        EngineError::Connection {
            reason: format!("{method} failed: {error}"),
        }
    }
}
