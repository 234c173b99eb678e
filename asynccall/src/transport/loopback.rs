//! In-process transport.
//!
//! [`LoopbackTransport`] routes each call to an async handler running on the
//! same runtime. It carries encoded messages through the same queues a
//! network transport would, which makes it the reference transport for
//! tests and examples.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use asynccall_core::Status;
use futures::future::BoxFuture;
use prost::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use super::{CallHandle, Invocation, Transport, TransportStream};
use crate::codec::Encoding;
use crate::metadata::Metadata;
use crate::outbound::RequestStream;

type HandlerFuture = BoxFuture<'static, Result<Metadata, Status>>;
type Handler = Arc<dyn Fn(ServerCall) -> HandlerFuture + Send + Sync>;

/// Transport that serves calls with in-process handlers.
///
/// A handler receives the call as a [`ServerCall`] and returns the trailing
/// metadata of a successful call, or the status that fails it. Calls to a
/// method without a handler complete with `UNIMPLEMENTED`. Cancelling a call
/// aborts its handler task.
///
/// # Example
///
/// ```ignore
/// use asynccall::{LoopbackTransport, Metadata};
///
/// let transport = LoopbackTransport::new().route(
///     "/grpc.testing.TestService/EmptyCall",
///     |mut call| async move {
///         let _request: Empty = call.recv().await?.unwrap_or_default();
///         call.send(&Empty {}).await?;
///         Ok(Metadata::new())
///     },
/// );
/// ```
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    routes: HashMap<String, Handler>,
    unreachable: bool,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose peer never answers.
    ///
    /// Calls stay active until their deadline expires or they are cancelled.
    /// Requests are accepted until the outbound queue is full.
    pub fn unreachable() -> Self {
        Self {
            routes: HashMap::new(),
            unreachable: true,
        }
    }

    /// Serve `method` with `handler`.
    pub fn route<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ServerCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Metadata, Status>> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |call: ServerCall| -> HandlerFuture { Box::pin(handler(call)) });
        self.routes.insert(method.into(), handler);
        self
    }
}

impl fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<_> = self.routes.keys().collect();
        methods.sort();
        f.debug_struct("LoopbackTransport")
            .field("methods", &methods)
            .field("unreachable", &self.unreachable)
            .finish()
    }
}

impl Transport for LoopbackTransport {
    fn open(&self, invocation: Invocation) -> Box<dyn TransportStream> {
        if self.unreachable {
            return Box::new(Parked {
                invocation: Mutex::new(Some(invocation)),
            });
        }

        let Some(handler) = self.routes.get(&invocation.method).cloned() else {
            #[cfg(feature = "tracing")]
            tracing::debug!(rpc.method = %invocation.method, "no handler for method");
            invocation.handle.deliver_status(
                Status::unimplemented(format!("Method not found: {}", invocation.method)),
                Metadata::new(),
            );
            return Box::new(Finished);
        };

        let handle = invocation.handle.clone();
        let call = ServerCall::new(invocation);
        let task = tokio::spawn(async move {
            let (status, trailing_metadata) = match handler(call).await {
                Ok(trailing_metadata) => (Status::ok(), trailing_metadata),
                Err(status) => (status, Metadata::new()),
            };
            handle.deliver_half_close();
            handle.deliver_status(status, trailing_metadata);
        });
        Box::new(Serving {
            task: task.abort_handle(),
        })
    }
}

/// A call whose handler task is running.
struct Serving {
    task: AbortHandle,
}

impl TransportStream for Serving {
    fn accept_cancel_request(&self) {
        self.task.abort();
    }
}

/// A call that completed inside `open`.
struct Finished;

impl TransportStream for Finished {
    fn accept_cancel_request(&self) {}
}

/// A call nobody answers; holds the invocation until cancelled.
struct Parked {
    invocation: Mutex<Option<Invocation>>,
}

impl TransportStream for Parked {
    fn accept_cancel_request(&self) {
        self.invocation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// The server's side of a loopback call.
pub struct ServerCall {
    method: String,
    metadata: Metadata,
    deadline: Option<Instant>,
    encoding: Encoding,
    requests: RequestStream,
    handle: CallHandle,
    headers_sent: bool,
}

impl ServerCall {
    fn new(invocation: Invocation) -> Self {
        Self {
            method: invocation.method,
            metadata: invocation.metadata,
            deadline: invocation.deadline,
            encoding: invocation.encoding,
            requests: invocation.requests,
            handle: invocation.handle,
            headers_sent: false,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request metadata sent by the client.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Receive the next request, `None` once the client half-closed.
    pub async fn recv<T>(&mut self) -> Result<Option<T>, Status>
    where
        T: Message + DeserializeOwned + Default,
    {
        let Some(bytes) = self.requests.recv().await else {
            return Ok(None);
        };
        self.encoding
            .decode(&bytes)
            .map(Some)
            .map_err(|status| Status::internal(format!("invalid request: {}", status.details())))
    }

    /// Send initial metadata. Only the first call has an effect.
    pub fn send_initial_metadata(&mut self, metadata: Metadata) {
        if !self.headers_sent {
            self.headers_sent = true;
            self.handle.deliver_initial_metadata(metadata);
        }
    }

    /// Send one response, sending empty initial metadata first if none was
    /// sent.
    ///
    /// Fails with `CANCELLED` once the client no longer accepts messages.
    pub async fn send<T>(&mut self, message: &T) -> Result<(), Status>
    where
        T: Message + Serialize,
    {
        self.send_initial_metadata(Metadata::new());
        let bytes = self.encoding.encode(message)?;
        if self.handle.deliver_message(bytes).await {
            Ok(())
        } else {
            Err(Status::cancelled("client stopped receiving"))
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.handle.is_terminated()
    }
}

impl fmt::Debug for ServerCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerCall")
            .field("method", &self.method)
            .field("metadata", &self.metadata)
            .field("deadline", &self.deadline)
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}
