use core::time::Duration;

use thiserror::Error;

use crate::types::PayloadId;

/// [`Unknown payload`](https://github.com/ethereum/execution-apis/blob/b7c5d3420e00648f456744d121ffbd929862924d/src/engine/common.md#errors)
const UNKNOWN_PAYLOAD_CODE: i64 = -38_001;

/// Failures of a single exchange with the execution engine.
///
/// A response reporting an invalid payload is not an error. It is returned as a
/// [`PayloadStatusV1`](crate::PayloadStatusV1).
#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum EngineError {
    #[error("{message} does not conform to the Engine API schema: {reason}")]
    SchemaViolation {
        message: &'static str,
        reason: String,
    },
    #[error("execution engine did not respond to {method} within {timeout:?}")]
    Timeout {
        method: &'static str,
        timeout: Duration,
    },
    #[error("failed to reach execution engine: {reason}")]
    Connection { reason: String },
    #[error("execution engine responded to {method} with error {code}: {message}")]
    Rpc {
        method: &'static str,
        code: i64,
        message: String,
    },
    #[error("execution engine unavailable after {attempts} attempts: {last_error}")]
    Unavailable {
        attempts: u32,
        last_error: Box<Self>,
    },
}

impl EngineError {
    /// Whether the exchange may succeed if repeated without changes.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Connection { .. })
    }

    #[must_use]
    pub fn unknown_payload(payload_id: PayloadId) -> Self {
        Self::Rpc {
            method: "engine_getPayloadV1",
            code: UNKNOWN_PAYLOAD_CODE,
            message: format!("unknown payload {payload_id}"),
        }
    }

    #[must_use]
    pub const fn is_schema_violation(&self) -> bool {
        matches!(self, Self::SchemaViolation { .. })
    }
}
