//! `grpc.testing.TestService` served in-process.

use std::time::Duration;

use asynccall::{LoopbackTransport, Metadata, ServerCall, Status};

use crate::messages::{
    Empty, Payload, SimpleRequest, SimpleResponse, StreamingInputCallRequest,
    StreamingInputCallResponse, StreamingOutputCallRequest, StreamingOutputCallResponse,
};

pub const UNARY_CALL: &str = "/grpc.testing.TestService/UnaryCall";
pub const EMPTY_CALL: &str = "/grpc.testing.TestService/EmptyCall";
pub const STREAMING_OUTPUT_CALL: &str = "/grpc.testing.TestService/StreamingOutputCall";
pub const STREAMING_INPUT_CALL: &str = "/grpc.testing.TestService/StreamingInputCall";
pub const FULL_DUPLEX_CALL: &str = "/grpc.testing.TestService/FullDuplexCall";
pub const UNIMPLEMENTED_CALL: &str = "/grpc.testing.TestService/UnimplementedCall";

/// Request metadata echoed back as initial metadata.
pub const ECHO_INITIAL_KEY: &str = "x-grpc-test-echo-initial";
/// Request metadata echoed back as trailing metadata.
pub const ECHO_TRAILING_KEY: &str = "x-grpc-test-echo-trailing";

pub fn transport() -> LoopbackTransport {
    LoopbackTransport::new()
        .route(UNARY_CALL, unary_call)
        .route(EMPTY_CALL, empty_call)
        .route(STREAMING_OUTPUT_CALL, streaming_output_call)
        .route(STREAMING_INPUT_CALL, streaming_input_call)
        .route(FULL_DUPLEX_CALL, full_duplex_call)
}

async fn unary_call(mut call: ServerCall) -> Result<Metadata, Status> {
    let request: SimpleRequest = call.recv().await?.unwrap_or_default();
    echo_initial(&mut call)?;
    call.send(&SimpleResponse {
        payload: Some(Payload::zeros(request.response_size)),
    })
    .await?;
    echo_trailing(&call)
}

async fn empty_call(mut call: ServerCall) -> Result<Metadata, Status> {
    let _request: Empty = call.recv().await?.unwrap_or_default();
    call.send(&Empty {}).await?;
    Ok(Metadata::new())
}

async fn streaming_output_call(mut call: ServerCall) -> Result<Metadata, Status> {
    let request: StreamingOutputCallRequest = call.recv().await?.unwrap_or_default();
    echo_initial(&mut call)?;
    respond(&mut call, &request).await?;
    echo_trailing(&call)
}

async fn streaming_input_call(mut call: ServerCall) -> Result<Metadata, Status> {
    let mut aggregated_payload_size = 0usize;
    while let Some(request) = call.recv::<StreamingInputCallRequest>().await? {
        aggregated_payload_size += request.payload.map_or(0, |payload| payload.body.len());
    }
    let aggregated_payload_size = i32::try_from(aggregated_payload_size)
        .map_err(|_| Status::internal("aggregated payload too large"))?;
    call.send(&StreamingInputCallResponse {
        aggregated_payload_size,
    })
    .await?;
    Ok(Metadata::new())
}

async fn full_duplex_call(mut call: ServerCall) -> Result<Metadata, Status> {
    echo_initial(&mut call)?;
    while let Some(request) = call.recv::<StreamingOutputCallRequest>().await? {
        respond(&mut call, &request).await?;
    }
    echo_trailing(&call)
}

async fn respond(
    call: &mut ServerCall,
    request: &StreamingOutputCallRequest,
) -> Result<(), Status> {
    for parameters in &request.response_parameters {
        if parameters.interval_us > 0 {
            let interval = u64::try_from(parameters.interval_us).unwrap_or(0);
            tokio::time::sleep(Duration::from_micros(interval)).await;
        }
        call.send(&StreamingOutputCallResponse {
            payload: Some(Payload::zeros(parameters.size)),
        })
        .await?;
    }
    Ok(())
}

fn echo_initial(call: &mut ServerCall) -> Result<(), Status> {
    let mut metadata = Metadata::new();
    if let Some(value) = call.metadata().get(ECHO_INITIAL_KEY) {
        metadata
            .insert(ECHO_INITIAL_KEY, value)
            .map_err(|e| Status::internal(e.to_string()))?;
    }
    call.send_initial_metadata(metadata);
    Ok(())
}

fn echo_trailing(call: &ServerCall) -> Result<Metadata, Status> {
    let mut metadata = Metadata::new();
    if let Some(value) = call.metadata().get(ECHO_TRAILING_KEY) {
        metadata
            .insert(ECHO_TRAILING_KEY, value)
            .map_err(|e| Status::internal(e.to_string()))?;
    }
    Ok(metadata)
}
