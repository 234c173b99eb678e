//! Unary-stream scenarios.

use std::time::Duration;

use anyhow::{bail, ensure};
use asynccall::{
    AuthContext, CallOptions, Code, FnCredentials, Metadata, Status, UnaryStreamCall,
};
use futures::StreamExt;

use crate::cases::{
    CANCELLED_DETAILS, CaseResult, Fixture, NUM_STREAM_RESPONSES, RESPONSE_INTERVAL_US,
    RESPONSE_PAYLOAD_SIZE, expect_err,
};
use crate::messages::{StreamingOutputCallRequest, StreamingOutputCallResponse, body_len};
use crate::service::{ECHO_INITIAL_KEY, STREAMING_OUTPUT_CALL};

pub async fn run(fixture: &Fixture) -> Vec<CaseResult> {
    vec![
        CaseResult::new("cancel mid-stream", cancel(fixture).await),
        CaseResult::new("multiple cancels", multiple_cancel(fixture).await),
        CaseResult::new("early cancel", early_cancel(fixture).await),
        CaseResult::new("late cancel", late_cancel(fixture).await),
        CaseResult::new("too many reads", too_many_reads(fixture).await),
        CaseResult::new("messages stream", messages_stream(fixture).await),
        CaseResult::new("cancel in task using read", cancel_in_task_read(fixture).await),
        CaseResult::new(
            "cancel in task using messages",
            cancel_in_task_messages(fixture).await,
        ),
        CaseResult::new("call credentials", call_credentials(fixture).await),
    ]
}

fn start(fixture: &Fixture, interval_us: i32) -> UnaryStreamCall<StreamingOutputCallResponse> {
    let request = StreamingOutputCallRequest::responses(
        NUM_STREAM_RESPONSES,
        RESPONSE_PAYLOAD_SIZE,
        interval_us,
    );
    fixture
        .channel
        .unary_stream::<_, StreamingOutputCallResponse>(STREAMING_OUTPUT_CALL, &request)
}

fn check_payload(response: &StreamingOutputCallResponse) -> anyhow::Result<()> {
    let len = body_len(&response.payload);
    ensure!(
        len == RESPONSE_PAYLOAD_SIZE as usize,
        "unexpected payload size {len}"
    );
    Ok(())
}

async fn read_one(call: &UnaryStreamCall<StreamingOutputCallResponse>) -> anyhow::Result<()> {
    match call.read().await? {
        Some(response) => check_payload(&response),
        None => bail!("stream ended early"),
    }
}

async fn cancel(fixture: &Fixture) -> anyhow::Result<()> {
    let call = start(fixture, RESPONSE_INTERVAL_US);
    read_one(&call).await?;

    ensure!(call.cancel(), "cancel mid-stream should succeed");
    ensure!(call.cancelled(), "call should report cancelled");
    ensure!(!call.cancel(), "second cancel should be rejected");

    let err = expect_err(call.read().await)?;
    ensure!(err.is_cancelled(), "expected a cancellation, got {err}");
    ensure!(call.code().await == Code::Cancelled, "code is {:?}", call.code().await);
    ensure!(call.details().await == CANCELLED_DETAILS, "details are {:?}", call.details().await);
    Ok(())
}

async fn multiple_cancel(fixture: &Fixture) -> anyhow::Result<()> {
    let call = start(fixture, RESPONSE_INTERVAL_US);
    read_one(&call).await?;

    let other = call.clone();
    ensure!(call.cancel(), "first cancel should succeed");
    ensure!(!other.cancel(), "cancel through a clone should be rejected");
    ensure!(!call.cancel(), "repeated cancel should be rejected");

    let first = expect_err(call.read().await)?;
    let second = expect_err(other.read().await)?;
    ensure!(first.same_instance(&second), "reads returned different errors");
    Ok(())
}

async fn early_cancel(fixture: &Fixture) -> anyhow::Result<()> {
    let call = start(fixture, RESPONSE_INTERVAL_US);
    ensure!(call.cancel(), "early cancel should succeed");
    ensure!(call.cancelled(), "call should report cancelled");

    let err = expect_err(call.read().await)?;
    ensure!(err.is_cancelled(), "expected a cancellation, got {err}");
    ensure!(call.code().await == Code::Cancelled, "code is {:?}", call.code().await);
    Ok(())
}

async fn late_cancel(fixture: &Fixture) -> anyhow::Result<()> {
    let call = start(fixture, 0);
    for _ in 0..NUM_STREAM_RESPONSES {
        read_one(&call).await?;
    }

    // The status may or may not have arrived yet.
    call.cancel();
    let code = call.code().await;
    ensure!(
        matches!(code, Code::Ok | Code::Cancelled),
        "late cancel ended with {code:?}"
    );
    Ok(())
}

async fn too_many_reads(fixture: &Fixture) -> anyhow::Result<()> {
    let call = start(fixture, 0);
    for _ in 0..NUM_STREAM_RESPONSES {
        read_one(&call).await?;
    }

    ensure!(call.read().await?.is_none(), "expected end of stream");
    ensure!(call.read().await?.is_none(), "end of stream should repeat");
    ensure!(call.code().await == Code::Ok, "code is {:?}", call.code().await);
    Ok(())
}

async fn messages_stream(fixture: &Fixture) -> anyhow::Result<()> {
    let call = start(fixture, 0);
    let mut messages = call.messages();
    let mut count = 0;
    while let Some(response) = messages.next().await {
        check_payload(&response?)?;
        count += 1;
    }
    ensure!(count == NUM_STREAM_RESPONSES, "received {count} messages");
    ensure!(call.code().await == Code::Ok, "code is {:?}", call.code().await);
    ensure!(!call.cancelled(), "finished stream should not cancel");
    Ok(())
}

async fn cancel_in_task_read(fixture: &Fixture) -> anyhow::Result<()> {
    let call = start(fixture, RESPONSE_INTERVAL_US);
    let reader = call.clone();
    let task = tokio::spawn(async move {
        while let Some(response) = reader.read().await? {
            check_payload(&response)?;
        }
        anyhow::Ok(())
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    task.abort();
    match task.await {
        Err(e) if e.is_cancelled() => {}
        other => bail!("task was not cancelled: {other:?}"),
    }
    ensure!(call.code().await == Code::Cancelled, "code is {:?}", call.code().await);
    Ok(())
}

async fn cancel_in_task_messages(fixture: &Fixture) -> anyhow::Result<()> {
    let call = start(fixture, RESPONSE_INTERVAL_US);
    let mut messages = call.messages();
    let task = tokio::spawn(async move {
        while let Some(response) = messages.next().await {
            check_payload(&response?)?;
        }
        anyhow::Ok(())
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    task.abort();
    match task.await {
        Err(e) if e.is_cancelled() => {}
        other => bail!("task was not cancelled: {other:?}"),
    }
    ensure!(call.code().await == Code::Cancelled, "code is {:?}", call.code().await);
    Ok(())
}

async fn call_credentials(fixture: &Fixture) -> anyhow::Result<()> {
    let credentials = FnCredentials::new(|ctx: &AuthContext<'_>| {
        let mut metadata = Metadata::new();
        metadata
            .insert(ECHO_INITIAL_KEY, ctx.method)
            .map_err(|e| Status::unauthenticated(e.to_string()))?;
        Ok(metadata)
    });
    let request = StreamingOutputCallRequest::responses(1, RESPONSE_PAYLOAD_SIZE, 0);
    let call = fixture
        .channel
        .unary_stream_with_options::<_, StreamingOutputCallResponse>(
            STREAMING_OUTPUT_CALL,
            &request,
            CallOptions::new().credentials(credentials),
        );

    let initial = call.initial_metadata().await;
    ensure!(
        initial.get(ECHO_INITIAL_KEY) == Some(STREAMING_OUTPUT_CALL),
        "credentials metadata not delivered: {initial:?}"
    );
    read_one(&call).await?;
    ensure!(call.read().await?.is_none(), "expected end of stream");
    ensure!(call.code().await == Code::Ok, "code is {:?}", call.code().await);
    Ok(())
}
