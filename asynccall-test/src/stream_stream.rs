//! Stream-stream scenarios.

use std::time::Duration;

use anyhow::{bail, ensure};
use asynccall::{Code, StreamStreamCall};
use futures::StreamExt;

use crate::cases::{
    CANCELLED_DETAILS, CaseResult, Fixture, NUM_STREAM_RESPONSES, RESPONSE_INTERVAL_US,
    RESPONSE_PAYLOAD_SIZE, expect_err,
};
use crate::messages::{StreamingOutputCallRequest, StreamingOutputCallResponse, body_len};
use crate::service::FULL_DUPLEX_CALL;

type DuplexCall = StreamStreamCall<StreamingOutputCallRequest, StreamingOutputCallResponse>;

pub async fn run(fixture: &Fixture) -> Vec<CaseResult> {
    vec![
        CaseResult::new("cancel", cancel(fixture).await),
        CaseResult::new("cancel with pending read", cancel_with_pending_read(fixture).await),
        CaseResult::new("cancel unblocks reader and writer", cancel_unblocks_tasks(fixture).await),
        CaseResult::new("early cancel", early_cancel(fixture).await),
        CaseResult::new("cancel after done_writing", cancel_after_done_writing(fixture).await),
        CaseResult::new("late cancel", late_cancel(fixture).await),
        CaseResult::new("requests from a stream", request_stream(fixture).await),
        CaseResult::new("too many reads", too_many_reads(fixture).await),
        CaseResult::new(
            "read and write after done_writing",
            read_write_after_done_writing(fixture).await,
        ),
        CaseResult::new("panic in request stream", request_stream_panics(fixture).await),
    ]
}

fn one_response() -> StreamingOutputCallRequest {
    StreamingOutputCallRequest::responses(1, RESPONSE_PAYLOAD_SIZE, 0)
}

fn start(fixture: &Fixture) -> DuplexCall {
    fixture.channel.stream_stream(FULL_DUPLEX_CALL)
}

async fn read_one(call: &DuplexCall) -> anyhow::Result<()> {
    match call.read().await? {
        Some(response) => {
            let len = body_len(&response.payload);
            ensure!(
                len == RESPONSE_PAYLOAD_SIZE as usize,
                "unexpected payload size {len}"
            );
            Ok(())
        }
        None => bail!("stream ended early"),
    }
}

async fn cancel(fixture: &Fixture) -> anyhow::Result<()> {
    let call = start(fixture);
    for _ in 0..NUM_STREAM_RESPONSES {
        call.write(&one_response()).await?;
        read_one(&call).await?;
    }

    ensure!(call.cancel(), "cancel should succeed");
    ensure!(call.cancelled(), "call should report cancelled");
    ensure!(call.code().await == Code::Cancelled, "code is {:?}", call.code().await);
    ensure!(call.details().await == CANCELLED_DETAILS, "details are {:?}", call.details().await);
    Ok(())
}

async fn cancel_with_pending_read(fixture: &Fixture) -> anyhow::Result<()> {
    let call = start(fixture);
    call.write(&StreamingOutputCallRequest::responses(
        1,
        RESPONSE_PAYLOAD_SIZE,
        RESPONSE_INTERVAL_US,
    ))
    .await?;

    ensure!(call.cancel(), "cancel should succeed");
    let err = expect_err(call.read().await)?;
    ensure!(err.is_cancelled(), "expected a cancellation, got {err}");
    ensure!(call.code().await == Code::Cancelled, "code is {:?}", call.code().await);
    Ok(())
}

async fn cancel_unblocks_tasks(fixture: &Fixture) -> anyhow::Result<()> {
    let call = start(fixture);

    // The peer answers each request only after a delay, so the reader waits.
    let reader = {
        let call = call.clone();
        tokio::spawn(async move {
            loop {
                if call.read().await?.is_none() {
                    return anyhow::Ok(());
                }
            }
        })
    };
    let writer = {
        let call = call.clone();
        tokio::spawn(async move {
            let request = StreamingOutputCallRequest::responses(
                1,
                RESPONSE_PAYLOAD_SIZE,
                RESPONSE_INTERVAL_US,
            );
            loop {
                if let Err(err) = call.write(&request).await {
                    return err;
                }
            }
        })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    ensure!(call.cancel(), "cancel should succeed");

    let (read, written) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(reader, writer)
    })
    .await?;
    ensure!(read?.is_err(), "reader should fail after cancel");
    let written = written?;
    ensure!(
        written.is_cancelled() || written.is_invalid_state(),
        "writer failed with {written}"
    );
    ensure!(call.code().await == Code::Cancelled, "code is {:?}", call.code().await);
    Ok(())
}

async fn early_cancel(fixture: &Fixture) -> anyhow::Result<()> {
    let call = start(fixture);
    ensure!(call.cancel(), "early cancel should succeed");

    let err = expect_err(call.write(&one_response()).await)?;
    ensure!(err.is_invalid_state(), "write after cancel failed with {err}");
    let err = expect_err(call.read().await)?;
    ensure!(err.is_cancelled(), "expected a cancellation, got {err}");
    ensure!(call.code().await == Code::Cancelled, "code is {:?}", call.code().await);
    Ok(())
}

async fn cancel_after_done_writing(fixture: &Fixture) -> anyhow::Result<()> {
    let call = start(fixture);
    call.write(&StreamingOutputCallRequest::responses(
        1,
        RESPONSE_PAYLOAD_SIZE,
        RESPONSE_INTERVAL_US,
    ))
    .await?;
    call.done_writing().await?;

    ensure!(call.cancel(), "cancel after done_writing should succeed");
    ensure!(call.code().await == Code::Cancelled, "code is {:?}", call.code().await);
    Ok(())
}

async fn late_cancel(fixture: &Fixture) -> anyhow::Result<()> {
    let call = start(fixture);
    call.write(&one_response()).await?;
    read_one(&call).await?;
    call.done_writing().await?;
    ensure!(call.read().await?.is_none(), "expected end of stream");

    ensure!(call.code().await == Code::Ok, "code is {:?}", call.code().await);
    ensure!(!call.cancel(), "cancel after completion should be rejected");
    ensure!(call.code().await == Code::Ok, "late cancel changed the status");
    Ok(())
}

async fn request_stream(fixture: &Fixture) -> anyhow::Result<()> {
    let requests = tokio_stream::iter(vec![one_response(), one_response()]);
    let call: DuplexCall = fixture.channel.stream_stream_from(FULL_DUPLEX_CALL, requests);

    let mut messages = call.messages();
    let mut count = 0;
    while let Some(response) = messages.next().await {
        let response = response?;
        ensure!(
            body_len(&response.payload) == RESPONSE_PAYLOAD_SIZE as usize,
            "unexpected payload size"
        );
        count += 1;
    }
    ensure!(count == 2, "received {count} messages");
    ensure!(call.code().await == Code::Ok, "code is {:?}", call.code().await);
    Ok(())
}

async fn too_many_reads(fixture: &Fixture) -> anyhow::Result<()> {
    let requests = tokio_stream::iter(vec![one_response(); NUM_STREAM_RESPONSES]);
    let call: DuplexCall = fixture.channel.stream_stream_from(FULL_DUPLEX_CALL, requests);

    for _ in 0..NUM_STREAM_RESPONSES {
        read_one(&call).await?;
    }
    ensure!(call.read().await?.is_none(), "expected end of stream");
    ensure!(call.read().await?.is_none(), "end of stream should repeat");
    ensure!(call.code().await == Code::Ok, "code is {:?}", call.code().await);
    Ok(())
}

async fn read_write_after_done_writing(fixture: &Fixture) -> anyhow::Result<()> {
    let call = start(fixture);
    call.write(&one_response()).await?;
    call.write(&one_response()).await?;
    call.done_writing().await?;

    let err = expect_err(call.write(&one_response()).await)?;
    ensure!(err.is_invalid_state(), "write after done_writing failed with {err}");

    read_one(&call).await?;
    read_one(&call).await?;
    ensure!(call.read().await?.is_none(), "expected end of stream");
    ensure!(call.code().await == Code::Ok, "code is {:?}", call.code().await);
    Ok(())
}

async fn request_stream_panics(fixture: &Fixture) -> anyhow::Result<()> {
    let requests = async_stream::stream! {
        yield one_response();
        tokio::time::sleep(Duration::from_millis(10)).await;
        panic!("request generation failed");
    };
    let call: DuplexCall = fixture.channel.stream_stream_from(FULL_DUPLEX_CALL, requests);

    // Responses delivered before the failure are still readable.
    read_one(&call).await?;
    let err = expect_err(call.read().await)?;
    ensure!(err.code() == Code::Unknown, "code is {:?}", err.code());
    ensure!(!err.is_cancelled(), "a failed request stream is not a cancellation");
    Ok(())
}
