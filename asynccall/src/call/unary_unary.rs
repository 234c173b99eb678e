use std::future::IntoFuture;
use std::ops::Deref;
use std::sync::Arc;

use futures::future::BoxFuture;
use prost::Message;
use serde::de::DeserializeOwned;

use super::Call;
use crate::error::CallError;

/// A call with one request and one response.
///
/// Await the facade itself, or call [`response`](Self::response) any number
/// of times; every observation returns the same response (or the same error).
///
/// # Example
///
/// ```ignore
/// let call = channel.unary_unary::<SimpleRequest, SimpleResponse>(
///     "/grpc.testing.TestService/UnaryCall",
///     &request,
/// );
/// let response = call.response().await?;
/// assert_eq!(call.code().await, Code::Ok);
/// ```
pub struct UnaryUnaryCall<Res> {
    call: Call<Res>,
}

impl<Res> UnaryUnaryCall<Res> {
    pub(crate) fn new(call: Call<Res>) -> Self {
        Self { call }
    }

    /// Wait for the response.
    ///
    /// Dropping the returned future before it completes cancels the call.
    pub async fn response(&self) -> Result<Arc<Res>, CallError> {
        self.call.unary_response().await
    }
}

impl<Res> Deref for UnaryUnaryCall<Res> {
    type Target = Call<Res>;

    fn deref(&self) -> &Call<Res> {
        &self.call
    }
}

impl<Res> Clone for UnaryUnaryCall<Res> {
    fn clone(&self) -> Self {
        Self {
            call: self.call.clone(),
        }
    }
}

impl<Res> std::fmt::Debug for UnaryUnaryCall<Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("UnaryUnaryCall").field(&self.call).finish()
    }
}

impl<Res> IntoFuture for UnaryUnaryCall<Res>
where
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
    use std::time::Duration;

    use asynccall_core::{Code, Status};
    use bytes::Bytes;
    use futures::FutureExt;

    use crate::call::CallState;
    use crate::metadata::Metadata;
    use crate::testing::{Echo, ScriptedTransport, channel};

    const METHOD: &str = "/test.Echo/Unary";

    #[tokio::test]
    async fn test_unary_ok_response_is_cached() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);

        let call = channel.unary_unary::<Echo, Echo>(METHOD, &Echo::new("ping"));
        assert_eq!(call.state(), CallState::Active);
        assert!(!call.done());

        let invocation = transport.invocation(0);
        assert_eq!(invocation.method, METHOD);
        assert_eq!(invocation.request::<Echo>().await, Some(Echo::new("ping")));

        invocation.handle.deliver_initial_metadata(Metadata::new());
        assert!(invocation.send(&Echo::new("pong")).await);
        invocation.handle.deliver_status(Status::ok(), Metadata::new());

        let first = call.response().await.unwrap();
        let second = call.response().await.unwrap();
        assert_eq!(*first, Echo::new("pong"));
        assert!(std::sync::Arc::ptr_eq(&first, &second));

        assert!(call.done());
        assert_eq!(call.state(), CallState::Completed);
        assert_eq!(call.code().await, Code::Ok);
        assert_eq!(call.details().await, "");
        assert!(!call.cancel());
        assert!(!call.cancelled());
        assert_eq!(transport.cancel_requests(), 0);
    }

    #[tokio::test]
    async fn test_unary_awaits_facade() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);

        let call = channel.unary_unary::<Echo, Echo>(METHOD, &Echo::new("ping"));
        let invocation = transport.invocation(0);
        invocation.send(&Echo::new("pong")).await;
        invocation.handle.deliver_status(Status::ok(), Metadata::new());

        assert_eq!(*call.await.unwrap(), Echo::new("pong"));
    }

    #[tokio::test]
    async fn test_unary_failure_is_cached() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.unary_unary::<Echo, Echo>(METHOD, &Echo::new("ping"));

        let mut trailers = Metadata::new();
        trailers.insert("x-trailer", "t").unwrap();
        transport
            .invocation(0)
            .handle
            .deliver_status(Status::unavailable("down"), trailers);

        let first = call.response().await.unwrap_err();
        let second = call.response().await.unwrap_err();
        assert!(first.same_instance(&second));
        assert_eq!(first.code(), Code::Unavailable);
        assert_eq!(first.details(), "down");
        assert_eq!(
            first.rpc_error().unwrap().trailing_metadata().get("x-trailer"),
            Some("t")
        );
        assert_eq!(call.trailing_metadata().await.get("x-trailer"), Some("t"));
    }

    #[tokio::test]
    async fn test_unary_cancel_before_status() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.unary_unary::<Echo, Echo>(METHOD, &Echo::new("ping"));

        assert!(call.cancel());
        assert!(!call.cancel());
        assert!(call.cancelled());
        assert_eq!(call.state(), CallState::Cancelled);
        assert_eq!(transport.cancel_requests(), 1);

        let err = call.response().await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(call.code().await, Code::Cancelled);
        assert_eq!(call.details().await, "Locally cancelled by application!");

        // A status arriving after the cancellation is ignored.
        transport
            .invocation(0)
            .handle
            .deliver_status(Status::ok(), Metadata::new());
        assert_eq!(call.code().await, Code::Cancelled);
    }

    #[tokio::test]
    async fn test_unary_cancel_after_status_is_rejected() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.unary_unary::<Echo, Echo>(METHOD, &Echo::new("ping"));

        let invocation = transport.invocation(0);
        invocation.send(&Echo::new("pong")).await;
        invocation.handle.deliver_status(Status::ok(), Metadata::new());

        assert!(!call.cancel());
        assert!(!call.cancelled());
        assert_eq!(*call.response().await.unwrap(), Echo::new("pong"));
        assert_eq!(transport.cancel_requests(), 0);
    }

    #[tokio::test]
    async fn test_unary_ok_without_response_is_internal() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.unary_unary::<Echo, Echo>(METHOD, &Echo::new("ping"));

        transport
            .invocation(0)
            .handle
            .deliver_status(Status::ok(), Metadata::new());

        let err = call.response().await.unwrap_err();
        assert_eq!(err.code(), Code::Internal);
        assert_eq!(err.details(), crate::call::MISSING_RESPONSE);
    }

    #[tokio::test]
    async fn test_unary_second_response_aborts() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.unary_unary::<Echo, Echo>(METHOD, &Echo::new("ping"));

        let invocation = transport.invocation(0);
        assert!(invocation.send(&Echo::new("one")).await);
        assert!(!invocation.send(&Echo::new("two")).await);

        let err = call.response().await.unwrap_err();
        assert_eq!(err.code(), Code::Internal);
        assert!(!err.is_cancelled());
        assert_eq!(transport.cancel_requests(), 1);
    }

    #[tokio::test]
    async fn test_unary_malformed_response_aborts() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.unary_unary::<Echo, Echo>(METHOD, &Echo::new("ping"));

        let invocation = transport.invocation(0);
        assert!(!invocation.handle.deliver_message(Bytes::from_static(b"{")).await);

        let err = call.response().await.unwrap_err();
        assert_eq!(err.code(), Code::Internal);
        assert_eq!(transport.cancel_requests(), 1);
        assert!(invocation.handle.is_terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unary_deadline_exceeded() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.unary_unary_with_options::<Echo, Echo>(
            METHOD,
            &Echo::new("ping"),
            crate::CallOptions::new().timeout(Duration::from_millis(100)),
        );
        assert!(transport.invocation(0).deadline.is_some());

        let first = call.response().await.unwrap_err();
        let second = call.response().await.unwrap_err();
        assert_eq!(first.code(), Code::DeadlineExceeded);
        assert_eq!(first.details(), "Deadline Exceeded");
        assert!(first.same_instance(&second));
        assert!(!call.cancelled());
        assert_eq!(call.state(), CallState::Completed);
        assert_eq!(transport.cancel_requests(), 1);
    }

    #[tokio::test]
    async fn test_dropping_pending_response_cancels() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.unary_unary::<Echo, Echo>(METHOD, &Echo::new("ping"));

        assert!(call.response().now_or_never().is_none());

        assert!(call.done());
        assert!(call.cancelled());
        assert_eq!(call.code().await, Code::Cancelled);
        assert_eq!(transport.cancel_requests(), 1);
    }

    #[tokio::test]
    async fn test_dropping_last_handle_cancels() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.unary_unary::<Echo, Echo>(METHOD, &Echo::new("ping"));
        let clone = call.clone();

        drop(call);
        assert_eq!(transport.cancel_requests(), 0);
        assert!(!clone.done());

        drop(clone);
        assert_eq!(transport.cancel_requests(), 1);
        assert!(transport.invocation(0).handle.is_terminated());
    }

    #[tokio::test]
    async fn test_initial_metadata_resolves_before_status() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.unary_unary::<Echo, Echo>(METHOD, &Echo::new("ping"));

        let mut headers = Metadata::new();
        headers.insert("x-initial", "yes").unwrap();
        transport.invocation(0).handle.deliver_initial_metadata(headers);

        assert_eq!(call.initial_metadata().await.get("x-initial"), Some("yes"));
        assert!(!call.done());
    }
}
