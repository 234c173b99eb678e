//! Transport seam.
//!
//! A [`Transport`] carries calls to a peer. The channel hands it one
//! [`Invocation`] per call; the transport reads the encoded requests from
//! [`Invocation::requests`] and reports everything it receives through the
//! [`CallHandle`]:
//!
//! ```text
//! Channel ──open(Invocation)──▶ Transport
//!    ▲                             │
//!    └──── CallHandle::deliver_* ──┘
//! ```
//!
//! The handle does not keep the call alive. Once the application has dropped
//! every handle to the call, deliveries become no-ops.

mod loopback;

pub use loopback::{LoopbackTransport, ServerCall};

use std::fmt;
use std::sync::{Arc, Weak};

use asynccall_core::Status;
use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::call::CallShape;
use crate::codec::Encoding;
use crate::metadata::Metadata;
use crate::outbound::RequestStream;

/// Opens calls on some underlying connection.
pub trait Transport: Send + Sync + 'static {
    /// Start a call. Must not block; any I/O happens on spawned tasks.
    fn open(&self, invocation: Invocation) -> Box<dyn TransportStream>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn open(&self, invocation: Invocation) -> Box<dyn TransportStream> {
        (**self).open(invocation)
    }
}

/// The transport's side of one open call.
pub trait TransportStream: Send + Sync + 'static {
    /// Ask the transport to abort the call. Must not block.
    ///
    /// Called at most once, after the call has already terminated locally
    /// (cancellation, deadline, or a malformed response).
    fn accept_cancel_request(&self);
}

/// Everything a transport needs to start a call.
pub struct Invocation {
    /// Full method path (e.g., "/grpc.testing.TestService/UnaryCall").
    pub method: String,
    pub shape: CallShape,
    /// Encoding of request and response messages.
    pub encoding: Encoding,
    /// Request metadata, including credentials metadata.
    pub metadata: Metadata,
    /// Absolute deadline, if the call has a timeout.
    pub deadline: Option<Instant>,
    /// Encoded request messages, ending at half-close.
    pub requests: RequestStream,
    /// Where to deliver what the peer sends back.
    pub handle: CallHandle,
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("method", &self.method)
            .field("shape", &self.shape)
            .field("encoding", &self.encoding)
            .field("metadata", &self.metadata)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// Receiver of transport events for one call.
pub(crate) trait CallSink: Send + Sync {
    fn on_initial_metadata(&self, metadata: Metadata);
    fn on_message(&self, message: Bytes) -> BoxFuture<'_, bool>;
    fn on_half_close(&self);
    fn on_status(&self, status: Status, trailing_metadata: Metadata);
    fn is_terminated(&self) -> bool;
    fn terminated(&self) -> BoxFuture<'_, ()>;
}

/// The transport's non-owning handle to a call.
#[derive(Clone)]
pub struct CallHandle {
    sink: Weak<dyn CallSink>,
}

impl CallHandle {
    pub(crate) fn new(sink: Weak<dyn CallSink>) -> Self {
        Self { sink }
    }

    /// Report the initial metadata (headers). Only the first report counts.
    pub fn deliver_initial_metadata(&self, metadata: Metadata) {
        if let Some(sink) = self.sink.upgrade() {
            sink.on_initial_metadata(metadata);
        }
    }

    /// Deliver one encoded response message.
    ///
    /// Waits while the call's inbound queue is full. Returns `false` when the
    /// call no longer accepts messages; the transport should stop reading.
    pub async fn deliver_message(&self, message: Bytes) -> bool {
        match self.sink.upgrade() {
            Some(sink) => sink.on_message(message).await,
            None => false,
        }
    }

    /// Report that the peer finished sending messages.
    pub fn deliver_half_close(&self) {
        if let Some(sink) = self.sink.upgrade() {
            sink.on_half_close();
        }
    }

    /// Report the terminal status. Ignored if the call already terminated.
    pub fn deliver_status(&self, status: Status, trailing_metadata: Metadata) {
        if let Some(sink) = self.sink.upgrade() {
            sink.on_status(status, trailing_metadata);
        }
    }

    /// Returns `true` once the call has terminated or been dropped.
    pub fn is_terminated(&self) -> bool {
        self.sink.upgrade().is_none_or(|sink| sink.is_terminated())
    }

    /// Wait until the call terminates or is dropped.
    pub async fn terminated(&self) {
        if let Some(sink) = self.sink.upgrade() {
            sink.terminated().await;
        }
    }
}

impl fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHandle")
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
