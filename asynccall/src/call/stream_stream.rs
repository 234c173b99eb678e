use std::marker::PhantomData;
use std::ops::Deref;

use prost::Message;
use serde::Serialize;

use super::{Call, Messages};
use crate::error::CallError;

/// A call with a stream of requests and a stream of responses.
///
/// The facade is cheap to clone, so a reader task and a writer task can drive
/// the same call concurrently. Concurrent writes from several tasks are not
/// supported and may interleave.
///
/// # Example
///
/// ```ignore
/// let call = channel.stream_stream::<StreamingOutputCallRequest, StreamingOutputCallResponse>(
///     "/grpc.testing.TestService/FullDuplexCall",
/// );
/// for request in requests {
///     call.write(&request).await?;
///     let response = call.read().await?;
/// }
/// call.done_writing().await?;
/// assert_eq!(call.read().await?, None);
/// ```
pub struct StreamStreamCall<Req, Res> {
    call: Call<Res>,
    _request: PhantomData<fn(Req)>,
}

impl<Req, Res> StreamStreamCall<Req, Res> {
    pub(crate) fn new(call: Call<Res>) -> Self {
        Self {
            call,
            _request: PhantomData,
        }
    }

    /// Read the next response. See [`UnaryStreamCall::read`].
    ///
    /// [`UnaryStreamCall::read`]: crate::UnaryStreamCall::read
    pub async fn read(&self) -> Result<Option<Res>, CallError> {
        self.call.read_message().await
    }

    /// A [`Stream`](futures::Stream) over the remaining responses.
    ///
    /// See [`UnaryStreamCall::messages`].
    ///
    /// [`UnaryStreamCall::messages`]: crate::UnaryStreamCall::messages
    pub fn messages(&self) -> Messages<Res> {
        self.call.message_stream()
    }

    /// Half-close the request stream. See [`StreamUnaryCall::done_writing`].
    ///
    /// [`StreamUnaryCall::done_writing`]: crate::StreamUnaryCall::done_writing
    pub async fn done_writing(&self) -> Result<(), CallError> {
        self.call.finish_writing()
    }
}

impl<Req, Res> StreamStreamCall<Req, Res>
where
    Req: Message + Serialize,
{
    /// Send one request. See [`StreamUnaryCall::write`].
    ///
    /// [`StreamUnaryCall::write`]: crate::StreamUnaryCall::write
    pub async fn write(&self, request: &Req) -> Result<(), CallError> {
        self.call.write_message(request).await
    }
}

impl<Req, Res> Deref for StreamStreamCall<Req, Res> {
    type Target = Call<Res>;

    fn deref(&self) -> &Call<Res> {
        &self.call
    }
}

impl<Req, Res> Clone for StreamStreamCall<Req, Res> {
    fn clone(&self) -> Self {
        Self::new(self.call.clone())
    }
}

impl<Req, Res> std::fmt::Debug for StreamStreamCall<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StreamStreamCall").field(&self.call).finish()
    }
}

#[cfg(test)]
mod tests {
    use asynccall_core::{Code, Status};
    use futures::{StreamExt, stream};

    use crate::metadata::Metadata;
    use crate::testing::{Echo, ScriptedTransport, channel, channel_with};

    const METHOD: &str = "/test.Echo/Bidi";

    #[tokio::test]
    async fn test_ping_pong() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.stream_stream::<Echo, Echo>(METHOD);
        let invocation = transport.invocation(0);

        for i in 0..3 {
            call.write(&Echo::new(format!("ping {i}"))).await.unwrap();
            let request: Echo = invocation.request().await.unwrap();
            invocation.send(&Echo::new(request.message.replace("ping", "pong"))).await;
            assert_eq!(call.read().await.unwrap(), Some(Echo::new(format!("pong {i}"))));
        }
        call.done_writing().await.unwrap();
        assert_eq!(invocation.request::<Echo>().await, None);

        invocation.handle.deliver_half_close();
        invocation.handle.deliver_status(Status::ok(), Metadata::new());
        assert_eq!(call.read().await.unwrap(), None);
        assert_eq!(call.code().await, Code::Ok);
    }

    #[tokio::test]
    async fn test_reads_continue_after_done_writing() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.stream_stream::<Echo, Echo>(METHOD);
        let invocation = transport.invocation(0);

        call.write(&Echo::new("a")).await.unwrap();
        call.write(&Echo::new("b")).await.unwrap();
        call.done_writing().await.unwrap();
        assert!(call.write(&Echo::new("c")).await.unwrap_err().is_invalid_state());

        for request in invocation.all_requests::<Echo>().await {
            invocation.send(&request).await;
        }
        invocation.handle.deliver_status(Status::ok(), Metadata::new());

        assert_eq!(call.read().await.unwrap(), Some(Echo::new("a")));
        assert_eq!(call.read().await.unwrap(), Some(Echo::new("b")));
        assert_eq!(call.read().await.unwrap(), None);
        assert_eq!(call.code().await, Code::Ok);
    }

    #[tokio::test]
    async fn test_cancel_unblocks_reader_and_writer() {
        let transport = ScriptedTransport::new();
        let channel = channel_with(&transport, |builder| builder.outbound_capacity(1));
        let call = channel.stream_stream::<Echo, Echo>(METHOD);

        // Fill the outbound queue so the next write suspends.
        call.write(&Echo::new("queued")).await.unwrap();

        let reader = {
            let call = call.clone();
            tokio::spawn(async move { call.read().await })
        };
        let writer = {
            let call = call.clone();
            tokio::spawn(async move { call.write(&Echo::new("blocked")).await })
        };
        tokio::task::yield_now().await;
        assert!(!reader.is_finished());
        assert!(!writer.is_finished());

        assert!(call.cancel());

        let read_err = reader.await.unwrap().unwrap_err();
        let write_err = writer.await.unwrap().unwrap_err();
        assert!(read_err.is_cancelled());
        assert!(read_err.same_instance(&write_err));
        assert_eq!(call.code().await, Code::Cancelled);
        assert_eq!(transport.cancel_requests(), 1);
    }

    #[tokio::test]
    async fn test_late_cancel_after_all_messages() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let call = channel.stream_stream::<Echo, Echo>(METHOD);
        let invocation = transport.invocation(0);

        call.write(&Echo::new("only")).await.unwrap();
        call.done_writing().await.unwrap();
        invocation.send(&Echo::new("only")).await;
        invocation.handle.deliver_half_close();

        assert_eq!(call.read().await.unwrap(), Some(Echo::new("only")));

        // The status has not arrived yet, so the cancellation wins.
        assert!(call.cancel());
        invocation.handle.deliver_status(Status::ok(), Metadata::new());
        assert_eq!(call.code().await, Code::Cancelled);
    }

    #[tokio::test]
    async fn test_request_stream_with_response_stream() {
        let transport = ScriptedTransport::new();
        let channel = channel(&transport);
        let requests = stream::iter(vec![Echo::new("x"), Echo::new("y")]);
        let call = channel.stream_stream_from::<_, Echo, Echo>(METHOD, requests);
        let invocation = transport.invocation(0);

        for request in invocation.all_requests::<Echo>().await {
            invocation.send(&request).await;
        }
        invocation.handle.deliver_status(Status::ok(), Metadata::new());

        let received: Vec<Echo> = call.messages().map(Result::unwrap).collect().await;
        assert_eq!(received, vec![Echo::new("x"), Echo::new("y")]);
    }
}
