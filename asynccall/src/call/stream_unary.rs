use std::future::IntoFuture;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use futures::future::BoxFuture;
use prost::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::Call;
use crate::error::CallError;

/// A call with a stream of requests and one response.
///
/// Requests are either written with [`write`](Self::write) and closed with
/// [`done_writing`](Self::done_writing), or, for calls created with
/// `Channel::stream_unary_from`, drained from a request stream by the
/// channel.
///
/// # Example
///
/// ```ignore
/// let call = channel.stream_unary::<StreamingInputCallRequest, StreamingInputCallResponse>(
///     "/grpc.testing.TestService/StreamingInputCall",
/// );
/// for request in requests {
///     call.write(&request).await?;
/// }
/// call.done_writing().await?;
/// let response = call.await?;
/// ```
pub struct StreamUnaryCall<Req, Res> {
    call: Call<Res>,
    _request: PhantomData<fn(Req)>,
}

impl<Req, Res> StreamUnaryCall<Req, Res> {
    pub(crate) fn new(call: Call<Res>) -> Self {
        Self {
            call,
            _request: PhantomData,
        }
    }

    /// Half-close the request stream.
    ///
    /// Idempotent, and a no-op once the call has terminated. Fails with
    /// `InvalidState` if requests are supplied by a request stream.
    pub async fn done_writing(&self) -> Result<(), CallError> {
        self.call.finish_writing()
    }

    /// Wait for the response.
    ///
    /// Dropping the returned future before it completes cancels the call.
    pub async fn response(&self) -> Result<Arc<Res>, CallError> {
        self.call.unary_response().await
    }
}

impl<Req, Res> StreamUnaryCall<Req, Res>
where
    Req: Message + Serialize,
{
    /// Send one request, waiting while the outbound queue is full.
    ///
    /// Fails with `InvalidState` after [`done_writing`](Self::done_writing) or
    /// once the call has terminated, without sending anything. A write that
    /// is waiting for queue space when the call terminates fails with the
    /// call's terminal error. Dropping a pending write cancels the call.
    pub async fn write(&self, request: &Req) -> Result<(), CallError> {
        self.call.write_message(request).await
    }
}

impl<Req, Res> Deref for StreamUnaryCall<Req, Res> {
    type Target = Call<Res>;

    fn deref(&self) -> &Call<Res> {
        &self.call
    }
}

impl<Req, Res> Clone for StreamUnaryCall<Req, Res> {
    fn clone(&self) -> Self {
        Self::new(self.call.clone())
    }
}

impl<Req, Res> std::fmt::Debug for StreamUnaryCall<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StreamUnaryCall").field(&self.call).finish()
    }
}

impl<Req, Res> IntoFuture for StreamUnaryCall<Req, Res>
where
    Req: 'static,
    Res: Message + DeserializeOwned + Default + Send + Sync + 'static,
{
    type Output = Result<Arc<Res>, CallError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.response().await })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use asynccall_core::{Code, Status};
    use futures::stream;

    use crate::call::{CallState, REQUESTS_FROM_STREAM};
    use crate::metadata::Metadata;
    use crate::outbound::{WRITE_AFTER_DONE_WRITING, WRITE_AFTER_TERMINATION};
    use crate::testing::{Echo, ScriptedTransport, channel};

    const METHOD: &str = "/test.Echo/ClientStream";

    #[tokio::test]
    async fn test_write_then_response() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.stream_unary::<Echo, Echo>(METHOD);

        for i in 0..3 {
            call.write(&Echo::new(format!("q{i}"))).await.unwrap();
        }
        call.done_writing().await.unwrap();
        call.done_writing().await.unwrap();

        let invocation = transport.invocation(0);
        let received = invocation.all_requests::<Echo>().await;
        assert_eq!(received.len(), 3);
        assert_eq!(received[2], Echo::new("q2"));

        invocation.send(&Echo::new("3 requests")).await;
        invocation.handle.deliver_status(Status::ok(), Metadata::new());

        assert_eq!(*call.response().await.unwrap(), Echo::new("3 requests"));
        assert_eq!(call.code().await, Code::Ok);
    }

    #[tokio::test]
    async fn test_write_after_done_writing_fails() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.stream_unary::<Echo, Echo>(METHOD);

        call.write(&Echo::new("q")).await.unwrap();
        call.done_writing().await.unwrap();

        let err = call.write(&Echo::new("late")).await.unwrap_err();
        assert!(err.is_invalid_state());
        assert_eq!(err.details(), WRITE_AFTER_DONE_WRITING);

        let invocation = transport.invocation(0);
        assert_eq!(invocation.all_requests::<Echo>().await.len(), 1);
        assert!(!call.done());
    }

    #[tokio::test]
    async fn test_cancel_after_writes() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.stream_unary::<Echo, Echo>(METHOD);

        for _ in 0..3 {
            call.write(&Echo::new("q")).await.unwrap();
        }
        assert!(!call.done());
        assert!(!call.cancelled());
        assert!(call.cancel());
        assert!(call.cancelled());

        call.done_writing().await.unwrap();

        let err = call.response().await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(transport.cancel_requests(), 1);
    }

    #[tokio::test]
    async fn test_early_cancel_rejects_write() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.stream_unary::<Echo, Echo>(METHOD);

        assert!(call.cancel());
        assert_eq!(call.state(), CallState::Cancelled);

        let err = call.write(&Echo::new("q")).await.unwrap_err();
        assert!(err.is_invalid_state());

        // No-op
        call.done_writing().await.unwrap();

        assert!(call.response().await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_write_after_remote_failure_is_invalid_state() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.stream_unary::<Echo, Echo>(METHOD);

        let invocation = transport.invocation(0);
        invocation
            .handle
            .deliver_status(Status::unavailable("gone"), Metadata::new());

        let err = call.write(&Echo::new("q")).await.unwrap_err();
        assert!(err.is_invalid_state());
        assert_eq!(err.details(), WRITE_AFTER_TERMINATION);

        assert_eq!(call.response().await.unwrap_err().code(), Code::Unavailable);
        assert!(invocation.all_requests::<Echo>().await.is_empty());
    }

    #[tokio::test]
    async fn test_write_after_done_writing_and_failure_is_invalid_state() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.stream_unary::<Echo, Echo>(METHOD);

        call.write(&Echo::new("q")).await.unwrap();
        call.done_writing().await.unwrap();

        let invocation = transport.invocation(0);
        invocation
            .handle
            .deliver_status(Status::unavailable("gone"), Metadata::new());

        let err = call.write(&Echo::new("late")).await.unwrap_err();
        assert!(err.is_invalid_state());

        assert_eq!(call.response().await.unwrap_err().code(), Code::Unavailable);
        assert_eq!(invocation.all_requests::<Echo>().await.len(), 1);
    }

    #[tokio::test]
    async fn test_request_stream_is_drained() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let requests = stream::iter((0..4).map(|i| Echo::new(format!("q{i}"))));
        let call = channel.stream_unary_from::<_, Echo, Echo>(METHOD, requests);

        let invocation = transport.invocation(0);
        let received = invocation.all_requests::<Echo>().await;
        assert_eq!(received.len(), 4);

        invocation.send(&Echo::new("done")).await;
        invocation.handle.deliver_status(Status::ok(), Metadata::new());
        assert_eq!(*call.await.unwrap(), Echo::new("done"));
    }

    #[tokio::test]
    async fn test_request_stream_rejects_manual_writes() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call =
            channel.stream_unary_from::<_, Echo, Echo>(METHOD, stream::pending::<Echo>());

        let err = call.write(&Echo::new("q")).await.unwrap_err();
        assert_eq!(err.details(), REQUESTS_FROM_STREAM);
        assert!(call.done_writing().await.unwrap_err().is_invalid_state());
        assert!(call.cancel());
    }

    #[tokio::test]
    async fn test_request_stream_receives_cancellation() {
        struct DropFlag(Arc<AtomicBool>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(dropped.clone());
        let requests = async_stream::stream! {
            let _flag = flag;
            loop {
                yield Echo::new("q");
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        };

        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.stream_unary_from::<_, Echo, Echo>(METHOD, requests);

        let invocation = transport.invocation(0);
        assert!(invocation.request::<Echo>().await.is_some());

        assert!(call.cancel());
        assert!(call.response().await.unwrap_err().is_cancelled());

        invocation.handle.terminated().await;
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !dropped.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("request stream was not dropped");
    }

    #[tokio::test]
    async fn test_panicking_request_stream_is_unknown() {
        let requests = async_stream::stream! {
            yield Echo::new("q");
            panic!("request generator failed");
        };

        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.stream_unary_from::<_, Echo, Echo>(METHOD, requests);

        let err = call.response().await.unwrap_err();
        assert_eq!(err.code(), Code::Unknown);
        assert!(!err.is_cancelled());
        assert_eq!(transport.cancel_requests(), 1);
    }
}
