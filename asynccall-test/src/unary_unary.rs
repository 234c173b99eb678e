//! Unary-unary scenarios.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, ensure};
use asynccall::{CallOptions, CallState, Code};

use crate::cases::{
    CANCELLED_DETAILS, CaseResult, Fixture, RESPONSE_PAYLOAD_SIZE, SHORT_TIMEOUT, expect_err,
};
use crate::messages::{Empty, SimpleRequest, SimpleResponse, body_len};
use crate::service::{
    ECHO_INITIAL_KEY, ECHO_TRAILING_KEY, EMPTY_CALL, UNARY_CALL, UNIMPLEMENTED_CALL,
};

pub async fn run(fixture: &Fixture) -> Vec<CaseResult> {
    vec![
        CaseResult::new("call ok", call_ok(fixture).await),
        CaseResult::new("await call directly", await_call(fixture).await),
        CaseResult::new("deadline exceeded", call_rpc_error(fixture).await),
        CaseResult::new("unimplemented method", unimplemented(fixture).await),
        CaseResult::new("metadata echoed", metadata_echoed(fixture).await),
        CaseResult::new("cancel", cancel(fixture).await),
        CaseResult::new("cancel in task", cancel_in_task(fixture).await),
    ]
}

async fn call_ok(fixture: &Fixture) -> anyhow::Result<()> {
    let request = SimpleRequest {
        response_size: RESPONSE_PAYLOAD_SIZE,
        payload: None,
    };
    let call = fixture
        .channel
        .unary_unary::<SimpleRequest, SimpleResponse>(UNARY_CALL, &request);

    let response = call.response().await?;
    ensure!(
        body_len(&response.payload) == RESPONSE_PAYLOAD_SIZE as usize,
        "unexpected payload size {}",
        body_len(&response.payload)
    );
    ensure!(call.done(), "call should be done");
    ensure!(call.state() == CallState::Completed, "state is {:?}", call.state());
    ensure!(call.code().await == Code::Ok, "code is {:?}", call.code().await);
    ensure!(call.details().await.is_empty(), "details should be empty");

    let again = call.response().await?;
    ensure!(Arc::ptr_eq(&response, &again), "re-await returned a different response");
    ensure!(!call.cancel(), "cancel after completion should be rejected");
    ensure!(!call.cancelled(), "completed call reports cancelled");
    Ok(())
}

async fn await_call(fixture: &Fixture) -> anyhow::Result<()> {
    let response = fixture
        .channel
        .unary_unary::<Empty, Empty>(EMPTY_CALL, &Empty {})
        .await?;
    ensure!(*response == Empty {}, "unexpected response");
    Ok(())
}

async fn call_rpc_error(fixture: &Fixture) -> anyhow::Result<()> {
    let call = fixture
        .unreachable
        .unary_unary_with_options::<SimpleRequest, SimpleResponse>(
            UNARY_CALL,
            &SimpleRequest::default(),
            CallOptions::new().timeout(SHORT_TIMEOUT),
        );

    let err = expect_err(call.response().await)?;
    ensure!(err.code() == Code::DeadlineExceeded, "code is {:?}", err.code());
    ensure!(err.details() == "Deadline Exceeded", "details are {:?}", err.details());

    let again = expect_err(call.response().await)?;
    ensure!(err.same_instance(&again), "re-await returned a different error");
    ensure!(call.code().await == Code::DeadlineExceeded, "code is {:?}", call.code().await);
    ensure!(!call.cancelled(), "deadline is not a cancellation");
    Ok(())
}

async fn unimplemented(fixture: &Fixture) -> anyhow::Result<()> {
    let call = fixture
        .channel
        .unary_unary::<Empty, Empty>(UNIMPLEMENTED_CALL, &Empty {});
    let err = expect_err(call.response().await)?;
    ensure!(err.code() == Code::Unimplemented, "code is {:?}", err.code());
    Ok(())
}

async fn metadata_echoed(fixture: &Fixture) -> anyhow::Result<()> {
    let options = CallOptions::new()
        .metadata(ECHO_INITIAL_KEY, "initial")
        .metadata(ECHO_TRAILING_KEY, "trailing");
    let call = fixture
        .channel
        .unary_unary_with_options::<SimpleRequest, SimpleResponse>(
            UNARY_CALL,
            &SimpleRequest::default(),
            options,
        );

    let initial = call.initial_metadata().await;
    ensure!(
        initial.get(ECHO_INITIAL_KEY) == Some("initial"),
        "initial metadata not echoed: {initial:?}"
    );
    call.response().await?;
    let trailing = call.trailing_metadata().await;
    ensure!(
        trailing.get(ECHO_TRAILING_KEY) == Some("trailing"),
        "trailing metadata not echoed: {trailing:?}"
    );
    Ok(())
}

async fn cancel(fixture: &Fixture) -> anyhow::Result<()> {
    let call = fixture
        .unreachable
        .unary_unary::<SimpleRequest, SimpleResponse>(UNARY_CALL, &SimpleRequest::default());

    ensure!(!call.done(), "call finished before cancel");
    ensure!(call.cancel(), "first cancel should succeed");
    ensure!(!call.cancel(), "second cancel should be rejected");
    ensure!(call.cancelled(), "call should report cancelled");
    ensure!(call.done(), "cancelled call should be done");

    let err = expect_err(call.response().await)?;
    ensure!(err.is_cancelled(), "expected a cancellation, got {err}");
    ensure!(call.code().await == Code::Cancelled, "code is {:?}", call.code().await);
    ensure!(call.details().await == CANCELLED_DETAILS, "details are {:?}", call.details().await);
    Ok(())
}

async fn cancel_in_task(fixture: &Fixture) -> anyhow::Result<()> {
    let call = fixture
        .unreachable
        .unary_unary::<SimpleRequest, SimpleResponse>(UNARY_CALL, &SimpleRequest::default());

    let pending = call.clone();
    let task = tokio::spawn(async move { pending.response().await.map(|_| ()) });
    tokio::time::sleep(Duration::from_millis(10)).await;
    ensure!(!call.done(), "call finished while the task was waiting");

    task.abort();
    match task.await {
        Err(e) if e.is_cancelled() => {}
        other => bail!("task was not cancelled: {other:?}"),
    }

    ensure!(call.cancelled(), "dropping the pending response should cancel the call");
    ensure!(call.code().await == Code::Cancelled, "code is {:?}", call.code().await);
    Ok(())
}
