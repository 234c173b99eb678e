//! Channel: the entry point for starting calls.
//!
//! This module provides [`Channel`], which encodes requests, applies call
//! credentials, opens the call on the transport and returns the call facade
//! for the requested shape.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use asynccall_core::Status;
use futures::{FutureExt, Stream};
use prost::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
#[cfg(feature = "tracing")]
use tracing::info_span;

use crate::builder::ChannelBuilder;
use crate::call::{
    Call, CallCore, CallShape, Requests, StreamStreamCall, StreamUnaryCall, UnaryStreamCall,
    UnaryUnaryCall,
};
use crate::codec::Encoding;
use crate::credentials::{SharedCredentials, collect_metadata};
use crate::options::CallOptions;
use crate::outbound::{Outbound, RequestStream, drain_requests};
use crate::transport::{CallHandle, CallSink, Invocation, Transport};

const REQUEST_STREAM_PANICKED: &str = "Exception iterating requests!";

pub(crate) struct ChannelConfig {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) encoding: Encoding,
    pub(crate) default_timeout: Option<Duration>,
    pub(crate) credentials: Vec<SharedCredentials>,
    pub(crate) inbound_capacity: usize,
    pub(crate) outbound_capacity: usize,
}

/// Starts calls over a [`Transport`].
///
/// Cheap to clone. Call-starting methods are not `async`: they return the
/// call facade immediately and must be called from within a Tokio runtime.
///
/// # Example
///
/// ```ignore
/// use asynccall::{Channel, LoopbackTransport};
///
/// let channel = Channel::builder(LoopbackTransport::new()).build()?;
/// let call = channel.unary_unary::<SimpleRequest, SimpleResponse>(
///     "/grpc.testing.TestService/UnaryCall",
///     &request,
/// );
/// let response = call.await?;
/// ```
#[derive(Clone)]
pub struct Channel {
    config: Arc<ChannelConfig>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("encoding", &self.config.encoding)
            .field("default_timeout", &self.config.default_timeout)
            .field("credentials_count", &self.config.credentials.len())
            .finish_non_exhaustive()
    }
}

impl Channel {
    pub(crate) fn new(config: ChannelConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Create a builder carrying calls over `transport`.
    pub fn builder<T: Transport>(transport: T) -> ChannelBuilder {
        ChannelBuilder::new(transport)
    }

    pub fn encoding(&self) -> Encoding {
        self.config.encoding
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.config.default_timeout
    }

    // ========================================================================
    // Unary request
    // ========================================================================

    /// Start a call with one request and one response.
    pub fn unary_unary<Req, Res>(&self, method: &str, request: &Req) -> UnaryUnaryCall<Res>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default + Send + Sync + 'static,
    {
        self.unary_unary_with_options(method, request, CallOptions::default())
    }

    /// Start a call with one request and one response, with per-call options.
    pub fn unary_unary_with_options<Req, Res>(
        &self,
        method: &str,
        request: &Req,
        options: CallOptions,
    ) -> UnaryUnaryCall<Res>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default + Send + Sync + 'static,
    {
        let requests = self.config.encoding.encode(request).map(RequestStream::single);
        let (call, _) =
            self.start(method, CallShape::UnaryUnary, options, Requests::Unary, requests);
        UnaryUnaryCall::new(call)
    }

    /// Start a call with one request and a stream of responses.
    pub fn unary_stream<Req, Res>(&self, method: &str, request: &Req) -> UnaryStreamCall<Res>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default + Send + Sync + 'static,
    {
        self.unary_stream_with_options(method, request, CallOptions::default())
    }

    /// Start a call with one request and a stream of responses, with per-call
    /// options.
    pub fn unary_stream_with_options<Req, Res>(
        &self,
        method: &str,
        request: &Req,
        options: CallOptions,
    ) -> UnaryStreamCall<Res>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default + Send + Sync + 'static,
    {
        let requests = self.config.encoding.encode(request).map(RequestStream::single);
        let (call, _) =
            self.start(method, CallShape::UnaryStream, options, Requests::Unary, requests);
        UnaryStreamCall::new(call)
    }

    // ========================================================================
    // Written requests
    // ========================================================================

    /// Start a call whose requests are written with `write()`, with one
    /// response.
    pub fn stream_unary<Req, Res>(&self, method: &str) -> StreamUnaryCall<Req, Res>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default + Send + Sync + 'static,
    {
        self.stream_unary_with_options(method, CallOptions::default())
    }

    pub fn stream_unary_with_options<Req, Res>(
        &self,
        method: &str,
        options: CallOptions,
    ) -> StreamUnaryCall<Req, Res>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default + Send + Sync + 'static,
    {
        let (outbound, requests) = Outbound::channel(self.config.outbound_capacity);
        let (call, _) = self.start(
            method,
            CallShape::StreamUnary,
            options,
            Requests::Writer(outbound),
            Ok(requests),
        );
        StreamUnaryCall::new(call)
    }

    /// Start a call whose requests are written with `write()`, with a stream
    /// of responses.
    pub fn stream_stream<Req, Res>(&self, method: &str) -> StreamStreamCall<Req, Res>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default + Send + Sync + 'static,
    {
        self.stream_stream_with_options(method, CallOptions::default())
    }

    pub fn stream_stream_with_options<Req, Res>(
        &self,
        method: &str,
        options: CallOptions,
    ) -> StreamStreamCall<Req, Res>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default + Send + Sync + 'static,
    {
        let (outbound, requests) = Outbound::channel(self.config.outbound_capacity);
        let (call, _) = self.start(
            method,
            CallShape::StreamStream,
            options,
            Requests::Writer(outbound),
            Ok(requests),
        );
        StreamStreamCall::new(call)
    }

    // ========================================================================
    // Request streams
    // ========================================================================

    /// Start a call whose requests are drained from `requests`, with one
    /// response.
    ///
    /// The stream is driven on a spawned task and dropped as soon as the call
    /// terminates. A panic inside the stream fails the call with `UNKNOWN`.
    pub fn stream_unary_from<S, Req, Res>(
        &self,
        method: &str,
        requests: S,
    ) -> StreamUnaryCall<Req, Res>
    where
        S: Stream<Item = Req> + Send + 'static,
        Req: Message + Serialize + Send + 'static,
        Res: Message + DeserializeOwned + Default + Send + Sync + 'static,
    {
        self.stream_unary_from_with_options(method, requests, CallOptions::default())
    }

    pub fn stream_unary_from_with_options<S, Req, Res>(
        &self,
        method: &str,
        requests: S,
        options: CallOptions,
    ) -> StreamUnaryCall<Req, Res>
    where
        S: Stream<Item = Req> + Send + 'static,
        Req: Message + Serialize + Send + 'static,
        Res: Message + DeserializeOwned + Default + Send + Sync + 'static,
    {
        let call = self.start_from(method, CallShape::StreamUnary, options, requests);
        StreamUnaryCall::new(call)
    }

    /// Start a call whose requests are drained from `requests`, with a stream
    /// of responses. See [`stream_unary_from`](Self::stream_unary_from).
    pub fn stream_stream_from<S, Req, Res>(
        &self,
        method: &str,
        requests: S,
    ) -> StreamStreamCall<Req, Res>
    where
        S: Stream<Item = Req> + Send + 'static,
        Req: Message + Serialize + Send + 'static,
        Res: Message + DeserializeOwned + Default + Send + Sync + 'static,
    {
        self.stream_stream_from_with_options(method, requests, CallOptions::default())
    }

    pub fn stream_stream_from_with_options<S, Req, Res>(
        &self,
        method: &str,
        requests: S,
        options: CallOptions,
    ) -> StreamStreamCall<Req, Res>
    where
        S: Stream<Item = Req> + Send + 'static,
        Req: Message + Serialize + Send + 'static,
        Res: Message + DeserializeOwned + Default + Send + Sync + 'static,
    {
        let call = self.start_from(method, CallShape::StreamStream, options, requests);
        StreamStreamCall::new(call)
    }

    fn start_from<S, Req, Res>(
        &self,
        method: &str,
        shape: CallShape,
        options: CallOptions,
        requests: S,
    ) -> Call<Res>
    where
        S: Stream<Item = Req> + Send + 'static,
        Req: Message + Serialize + Send + 'static,
        Res: Message + DeserializeOwned + Default + Send + Sync + 'static,
    {
        let (outbound, request_stream) = Outbound::channel(self.config.outbound_capacity);
        let (call, core) = self.start(
            method,
            shape,
            options,
            Requests::Stream(outbound.clone()),
            Ok(request_stream),
        );
        if !core.is_terminated() {
            spawn_drain(&core, outbound, requests, self.config.encoding);
        }
        call
    }

    // ========================================================================
    // Invocation
    // ========================================================================

    /// Create the call, apply credentials and open it on the transport.
    ///
    /// `requests` is the encoded request stream handed to the transport, or
    /// the status that ends the call before the transport is opened.
    fn start<Res>(
        &self,
        method: &str,
        shape: CallShape,
        options: CallOptions,
        requests: Requests,
        request_stream: Result<RequestStream, Status>,
    ) -> (Call<Res>, Arc<CallCore<Res>>)
    where
        Res: Message + DeserializeOwned + Default + Send + Sync + 'static,
    {
        #[cfg(feature = "tracing")]
        let _span = info_span!(
            "rpc.call",
            rpc.method = %method,
            rpc.type = shape.as_str(),
            rpc.encoding = %self.config.encoding.name(),
            otel.kind = "client",
        )
        .entered();

        let core = Arc::new(CallCore::new(
            method.to_owned(),
            shape,
            self.config.encoding,
            self.config.inbound_capacity,
            requests,
        ));
        let call = Call::new(Arc::clone(&core));

        let request_stream = match request_stream {
            Ok(stream) => stream,
            Err(status) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %status, "failed to encode request");
                core.fail(status);
                return (call, core);
            }
        };

        // Channel credentials first, then the per-call provider.
        let providers = self
            .config
            .credentials
            .iter()
            .chain(options.credentials.as_ref());
        let mut metadata = options.metadata;
        match collect_metadata(providers, method) {
            Ok(extra) => metadata.merge(extra),
            Err(status) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %status, "call credentials failed");
                core.fail(status);
                return (call, core);
            }
        }

        let deadline = options
            .timeout
            .or(self.config.default_timeout)
            .and_then(|timeout| Instant::now().checked_add(timeout));

        let sink: Weak<CallCore<Res>> = Arc::downgrade(&core);
        let sink: Weak<dyn CallSink> = sink;
        let stream = self.config.transport.open(Invocation {
            method: method.to_owned(),
            shape,
            encoding: self.config.encoding,
            metadata,
            deadline,
            requests: request_stream,
            handle: CallHandle::new(sink),
        });
        core.attach_transport(stream);

        #[cfg(feature = "tracing")]
        tracing::debug!("call started");

        if let Some(deadline) = deadline {
            spawn_deadline(&core, deadline);
        }
        (call, core)
    }
}

/// Expire the call at `deadline` unless it terminates first.
fn spawn_deadline<Res>(core: &Arc<CallCore<Res>>, deadline: Instant)
where
    Res: Send + Sync + 'static,
{
    let outcome = core.outcome_cell();
    let core = Arc::downgrade(core);
    tokio::spawn(async move {
        tokio::select! {
            _ = outcome.wait() => {}
            _ = tokio::time::sleep_until(deadline) => {
                if let Some(core) = core.upgrade() {
                    core.expire();
                }
            }
        }
    });
}

/// Drive a request stream into the call's outbound channel.
fn spawn_drain<S, Req, Res>(
    core: &Arc<CallCore<Res>>,
    outbound: Outbound,
    requests: S,
    encoding: Encoding,
) where
    S: Stream<Item = Req> + Send + 'static,
    Req: Message + Serialize + Send + 'static,
    Res: Send + Sync + 'static,
{
    let core = Arc::downgrade(core);
    tokio::spawn(async move {
        let drained = AssertUnwindSafe(drain_requests(outbound, requests, encoding))
            .catch_unwind()
            .await;
        let status = match drained {
            Ok(Ok(())) => return,
            Ok(Err(status)) => status,
            Err(panic) => {
                let message = panic_message(&*panic);
                #[cfg(feature = "tracing")]
                tracing::error!(panic = message, "request stream panicked");
                Status::unknown(format!("{REQUEST_STREAM_PANICKED} {message}"))
            }
        };
        if let Some(core) = core.upgrade() {
            core.abort(status);
        }
    });
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
