//! Stream-unary scenarios.

use std::time::Duration;

use anyhow::ensure;
use asynccall::{Code, StreamUnaryCall};

use crate::cases::{CaseResult, Fixture, NUM_STREAM_RESPONSES, REQUEST_PAYLOAD_SIZE, expect_err};
use crate::messages::{Payload, StreamingInputCallRequest, StreamingInputCallResponse};
use crate::service::STREAMING_INPUT_CALL;

type InputCall = StreamUnaryCall<StreamingInputCallRequest, StreamingInputCallResponse>;

pub async fn run(fixture: &Fixture) -> Vec<CaseResult> {
    vec![
        CaseResult::new("cancel after writes", cancel(fixture).await),
        CaseResult::new("early cancel", early_cancel(fixture).await),
        CaseResult::new("write after done_writing", write_after_done_writing(fixture).await),
        CaseResult::new("requests from a stream", request_stream(fixture).await),
        CaseResult::new("panic in request stream", request_stream_panics(fixture).await),
    ]
}

fn request() -> StreamingInputCallRequest {
    StreamingInputCallRequest {
        payload: Some(Payload::zeros(REQUEST_PAYLOAD_SIZE)),
    }
}

fn start(fixture: &Fixture) -> InputCall {
    fixture.channel.stream_unary(STREAMING_INPUT_CALL)
}

async fn cancel(fixture: &Fixture) -> anyhow::Result<()> {
    let call = start(fixture);
    for _ in 0..NUM_STREAM_RESPONSES {
        call.write(&request()).await?;
    }

    ensure!(!call.done(), "call finished before half-close");
    ensure!(call.cancel(), "cancel should succeed");
    ensure!(!call.cancel(), "second cancel should be rejected");
    ensure!(call.cancelled(), "call should report cancelled");

    let err = expect_err(call.response().await)?;
    ensure!(err.is_cancelled(), "expected a cancellation, got {err}");
    ensure!(call.code().await == Code::Cancelled, "code is {:?}", call.code().await);
    Ok(())
}

async fn early_cancel(fixture: &Fixture) -> anyhow::Result<()> {
    let call = start(fixture);
    ensure!(call.cancel(), "early cancel should succeed");

    let err = expect_err(call.write(&request()).await)?;
    ensure!(err.is_invalid_state(), "write after cancel failed with {err}");
    call.done_writing().await?;

    let err = expect_err(call.response().await)?;
    ensure!(err.is_cancelled(), "expected a cancellation, got {err}");
    Ok(())
}

async fn write_after_done_writing(fixture: &Fixture) -> anyhow::Result<()> {
    let call = start(fixture);
    for _ in 0..NUM_STREAM_RESPONSES {
        call.write(&request()).await?;
    }
    call.done_writing().await?;

    let err = expect_err(call.write(&request()).await)?;
    ensure!(err.is_invalid_state(), "write after done_writing failed with {err}");

    let response = call.response().await?;
    let expected = NUM_STREAM_RESPONSES as i32 * REQUEST_PAYLOAD_SIZE;
    ensure!(
        response.aggregated_payload_size == expected,
        "aggregated {} bytes, expected {expected}",
        response.aggregated_payload_size
    );
    ensure!(call.code().await == Code::Ok, "code is {:?}", call.code().await);
    Ok(())
}

async fn request_stream(fixture: &Fixture) -> anyhow::Result<()> {
    let requests = async_stream::stream! {
        for _ in 0..NUM_STREAM_RESPONSES {
            tokio::time::sleep(Duration::from_millis(1)).await;
            yield request();
        }
    };
    let call: InputCall = fixture
        .channel
        .stream_unary_from(STREAMING_INPUT_CALL, requests);

    let err = expect_err(call.write(&request()).await)?;
    ensure!(err.is_invalid_state(), "manual write failed with {err}");

    let response = call.response().await?;
    let expected = NUM_STREAM_RESPONSES as i32 * REQUEST_PAYLOAD_SIZE;
    ensure!(
        response.aggregated_payload_size == expected,
        "aggregated {} bytes, expected {expected}",
        response.aggregated_payload_size
    );
    Ok(())
}

async fn request_stream_panics(fixture: &Fixture) -> anyhow::Result<()> {
    let requests = async_stream::stream! {
        yield request();
        panic!("request generation failed");
    };
    let call: InputCall = fixture
        .channel
        .stream_unary_from(STREAMING_INPUT_CALL, requests);

    let err = expect_err(call.response().await)?;
    ensure!(err.code() == Code::Unknown, "code is {:?}", err.code());
    ensure!(
        err.details().starts_with("Exception iterating requests!"),
        "details are {:?}",
        err.details()
    );
    ensure!(!call.cancelled(), "a failed request stream is not a cancellation");
    Ok(())
}
