pub use crate::{
    codec::EngineMessage,
    error::EngineError,
    execution_engine::{
        ExecutionEngine, MockExecutionEngine, MockRequest, MockResponse, NullExecutionEngine,
    },
    types::{
        ExecutionPayloadV1, ForkChoiceStateV1, ForkChoiceUpdatedResponse, PayloadAttributesV1,
        PayloadId, PayloadStatusV1, PayloadValidationStatus,
    },
};

mod codec;
mod error;
mod execution_engine;
mod types;
