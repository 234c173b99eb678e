use std::ops::Deref;

use super::{Call, Messages};
use crate::error::CallError;

/// A call with one request and a stream of responses.
///
/// # Example
///
/// ```ignore
/// let call = channel.unary_stream::<StreamingOutputCallRequest, StreamingOutputCallResponse>(
///     "/grpc.testing.TestService/StreamingOutputCall",
///     &request,
/// );
/// while let Some(response) = call.read().await? {
///     println!("{} bytes", response.payload.map_or(0, |p| p.body.len()));
/// }
/// assert_eq!(call.code().await, Code::Ok);
/// ```
pub struct UnaryStreamCall<Res> {
    call: Call<Res>,
}

impl<Res> UnaryStreamCall<Res> {
    pub(crate) fn new(call: Call<Res>) -> Self {
        Self { call }
    }

    /// Read the next response.
    ///
    /// Returns `Ok(None)` once the stream has ended and the call completed
    /// with OK; every later read returns `Ok(None)` again. If the call failed,
    /// the failure is returned once the delivered messages are drained, and
    /// on every later read. Dropping a pending read cancels the call.
    pub async fn read(&self) -> Result<Option<Res>, CallError> {
        self.call.read_message().await
    }

    /// A [`Stream`](futures::Stream) over the remaining responses.
    ///
    /// Dropping the stream while it waits for the next message cancels the
    /// call; dropping it between messages does not.
    pub fn messages(&self) -> Messages<Res> {
        self.call.message_stream()
    }
}

impl<Res> Deref for UnaryStreamCall<Res> {
    type Target = Call<Res>;

    fn deref(&self) -> &Call<Res> {
        &self.call
    }
}

impl<Res> Clone for UnaryStreamCall<Res> {
    fn clone(&self) -> Self {
        Self {
            call: self.call.clone(),
        }
    }
}

impl<Res> std::fmt::Debug for UnaryStreamCall<Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("UnaryStreamCall").field(&self.call).finish()
    }
}

#[cfg(test)]
mod tests {
    use asynccall_core::{Code, Status};
    use futures::{FutureExt, StreamExt};

    use crate::call::CallState;
    use crate::metadata::Metadata;
    use crate::testing::{Echo, ScriptedTransport, channel};

    const METHOD: &str = "/test.Echo/ServerStream";

    #[tokio::test]
    async fn test_reads_then_end_of_stream() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.unary_stream::<Echo, Echo>(METHOD, &Echo::new("go"));

        let invocation = transport.invocation(0);
        for i in 0..3 {
            assert!(invocation.send(&Echo::new(format!("r{i}"))).await);
        }
        invocation.handle.deliver_half_close();
        invocation.handle.deliver_status(Status::ok(), Metadata::new());

        for i in 0..3 {
            assert_eq!(call.read().await.unwrap(), Some(Echo::new(format!("r{i}"))));
        }
        for _ in 0..3 {
            let read = call.read().now_or_never().expect("end of stream must not suspend");
            assert_eq!(read.unwrap(), None);
        }
        assert_eq!(call.code().await, Code::Ok);
    }

    #[tokio::test]
    async fn test_drained_stream_waits_for_status() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.unary_stream::<Echo, Echo>(METHOD, &Echo::new("go"));

        let invocation = transport.invocation(0);
        invocation.handle.deliver_half_close();

        let reader = {
            let call = call.clone();
            tokio::spawn(async move { call.read().await })
        };
        tokio::task::yield_now().await;
        assert!(!reader.is_finished());

        invocation
            .handle
            .deliver_status(Status::new(Code::Aborted, "aborted"), Metadata::new());
        let err = reader.await.unwrap().unwrap_err();
        assert_eq!(err.code(), Code::Aborted);
        assert!(!call.cancelled());
    }

    #[tokio::test]
    async fn test_cancel_mid_stream() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.unary_stream::<Echo, Echo>(METHOD, &Echo::new("go"));

        let invocation = transport.invocation(0);
        for i in 0..5 {
            assert!(invocation.send(&Echo::new(format!("r{i}"))).await);
        }

        assert_eq!(call.read().await.unwrap(), Some(Echo::new("r0")));

        assert!(!call.cancelled());
        assert!(call.cancel());
        assert!(!call.cancel());
        assert!(call.cancelled());
        assert_eq!(call.state(), CallState::Cancelled);

        let err = call.read().await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(err.same_instance(&call.read().await.unwrap_err()));
        assert_eq!(call.code().await, Code::Cancelled);
        assert_eq!(call.details().await, "Locally cancelled by application!");

        assert!(!invocation.send(&Echo::new("late")).await);
        assert_eq!(transport.cancel_requests(), 1);
    }

    #[tokio::test]
    async fn test_failure_after_messages() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.unary_stream::<Echo, Echo>(METHOD, &Echo::new("go"));

        let invocation = transport.invocation(0);
        invocation.send(&Echo::new("r0")).await;
        invocation
            .handle
            .deliver_status(Status::internal("server broke"), Metadata::new());

        assert_eq!(call.read().await.unwrap(), Some(Echo::new("r0")));
        let first = call.read().await.unwrap_err();
        let second = call.read().await.unwrap_err();
        assert_eq!(first.code(), Code::Internal);
        assert!(first.same_instance(&second));
    }

    #[tokio::test]
    async fn test_messages_stream() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.unary_stream::<Echo, Echo>(METHOD, &Echo::new("go"));

        let invocation = transport.invocation(0);
        invocation.send(&Echo::new("a")).await;
        invocation.send(&Echo::new("b")).await;
        invocation.handle.deliver_status(Status::ok(), Metadata::new());

        let received: Vec<_> = call
            .messages()
            .map(|message| message.unwrap().message)
            .collect()
            .await;
        assert_eq!(received, vec!["a", "b"]);
        assert!(!call.cancelled());
    }

    #[tokio::test]
    async fn test_dropping_waiting_messages_cancels() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.unary_stream::<Echo, Echo>(METHOD, &Echo::new("go"));

        let invocation = transport.invocation(0);
        invocation.send(&Echo::new("a")).await;

        let mut messages = call.messages();
        assert_eq!(messages.next().await.unwrap().unwrap(), Echo::new("a"));
        assert!(messages.next().now_or_never().is_none());
        drop(messages);

        assert!(call.cancelled());
        assert_eq!(call.code().await, Code::Cancelled);
        assert_eq!(transport.cancel_requests(), 1);
    }

    #[tokio::test]
    async fn test_taking_every_message_does_not_cancel() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.unary_stream::<Echo, Echo>(METHOD, &Echo::new("go"));

        let invocation = transport.invocation(0);
        for i in 0..5 {
            assert!(invocation.send(&Echo::new(format!("r{i}"))).await);
        }

        let received: Vec<_> = call.messages().take(5).collect().await;
        assert_eq!(received.len(), 5);
        assert!(!call.cancelled());

        invocation.handle.deliver_half_close();
        invocation.handle.deliver_status(Status::ok(), Metadata::new());

        assert_eq!(call.code().await, Code::Ok);
        assert!(!call.cancelled());
        assert_eq!(transport.cancel_requests(), 0);
    }

    #[tokio::test]
    async fn test_messages_end_quietly_after_cancel() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.unary_stream::<Echo, Echo>(METHOD, &Echo::new("go"));

        let invocation = transport.invocation(0);
        invocation.send(&Echo::new("a")).await;
        assert!(call.cancel());

        let received: Vec<_> = call.messages().collect().await;
        assert!(received.is_empty());
        assert_eq!(call.code().await, Code::Cancelled);

        // Direct reads still report the cancellation.
        assert!(call.read().await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_messages_yield_remote_failure() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.unary_stream::<Echo, Echo>(METHOD, &Echo::new("go"));

        transport
            .invocation(0)
            .handle
            .deliver_status(Status::internal("server broke"), Metadata::new());

        let received: Vec<_> = call.messages().collect().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].as_ref().unwrap_err().code(), Code::Internal);
    }

    #[tokio::test]
    async fn test_message_after_half_close_is_dropped() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.unary_stream::<Echo, Echo>(METHOD, &Echo::new("go"));

        let invocation = transport.invocation(0);
        invocation.handle.deliver_half_close();
        assert!(!invocation.send(&Echo::new("late")).await);
        invocation.handle.deliver_status(Status::ok(), Metadata::new());

        assert_eq!(call.read().await.unwrap(), None);
    }
}
