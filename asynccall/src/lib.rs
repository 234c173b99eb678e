//! Client-side call objects for asynchronous RPC.
//!
//! A [`Channel`] starts calls; each call is returned immediately as a handle
//! that can be observed, awaited, written to and cancelled from any task.
//! Every observation of a terminated call returns the same cached result.
//!
//! ## Features
//!
//! - Unary calls ([`UnaryUnaryCall`])
//! - Server streaming calls ([`UnaryStreamCall`])
//! - Client streaming calls ([`StreamUnaryCall`])
//! - Bidirectional streaming calls ([`StreamStreamCall`])
//! - Requests written one by one, or drained from a `Stream`
//! - Idempotent cancellation, deadlines, per-call credentials
//! - Both protobuf and JSON encoding support
//!
//! ## Example
//!
//! ```ignore
//! use asynccall::{Channel, Code, LoopbackTransport};
//!
//! let channel = Channel::builder(transport).use_proto().build()?;
//!
//! let call = channel.unary_unary::<SimpleRequest, SimpleResponse>(
//!     "/grpc.testing.TestService/UnaryCall",
//!     &request,
//! );
//!
//! let response = call.response().await?;
//! assert_eq!(call.code().await, Code::Ok);
//! ```
//!
//! ## Server Streaming Example
//!
//! ```ignore
//! use futures::StreamExt;
//!
//! let call = channel.unary_stream::<StreamingOutputCallRequest, StreamingOutputCallResponse>(
//!     "/grpc.testing.TestService/StreamingOutputCall",
//!     &request,
//! );
//!
//! // Either read one message at a time...
//! while let Some(response) = call.read().await? {
//!     println!("Got: {:?}", response.payload);
//! }
//!
//! // ...or consume the call as a stream.
//! let mut messages = call.messages();
//! while let Some(result) = messages.next().await {
//!     let response = result?;
//! }
//! ```
//!
//! The two modes are interchangeable; they read from the same queue.
//!
//! ## Bidirectional Streaming Example
//!
//! ```ignore
//! let call = channel.stream_stream::<StreamingOutputCallRequest, StreamingOutputCallResponse>(
//!     "/grpc.testing.TestService/FullDuplexCall",
//! );
//!
//! for request in requests {
//!     call.write(&request).await?;
//!     let response = call.read().await?;
//! }
//! call.done_writing().await?;
//! assert_eq!(call.read().await?, None);
//! ```
//!
//! Calls created with [`Channel::stream_stream_from`] or
//! [`Channel::stream_unary_from`] take their requests from a `Stream`
//! instead; manual writes on them fail with an invalid-state error.
//!
//! ## Cancellation
//!
//! A call ends in exactly one of three ways: the peer delivers a status, the
//! deadline expires, or the call is cancelled. The first to happen wins and
//! the others are ignored.
//!
//! - [`Call::cancel`] cancels explicitly and returns `true` only if it took
//!   effect.
//! - Dropping a pending `response()` or `read()` future cancels the call.
//! - Dropping a [`Messages`] stream while it waits for a message cancels the
//!   call.
//! - Dropping the last handle of an unfinished call cancels it.
//!
//! A cancelled call reports [`Code::Cancelled`]. Operations waiting on it
//! fail with [`CallError::Cancelled`], while a [`Messages`] stream simply
//! ends.
//!
//! ### Timeouts
//!
//! Set timeouts using [`ChannelBuilder::timeout`] or [`CallOptions::timeout`].
//! An expired deadline completes the call with [`Code::DeadlineExceeded`];
//! that is a completion, not a cancellation.
//!
//! ```ignore
//! use std::time::Duration;
//!
//! let options = CallOptions::new().timeout(Duration::from_secs(5));
//! let call = channel.unary_unary_with_options::<Req, Res>(
//!     "/svc/Method",
//!     &request,
//!     options,
//! );
//! ```
//!
//! ## Feature Flags
//!
//! ### Observability
//!
//! | Feature | Description | Dependencies |
//! |---------|-------------|--------------|
//! | `tracing` | Tracing spans for RPC calls | `tracing` |
//!
//! When enabled, each call creates a span with:
//! - `rpc.method`: Full method name (e.g., "/grpc.testing.TestService/UnaryCall")
//! - `rpc.type`: Call type ("unary", "server_stream", "client_stream", "bidi_stream")
//! - `rpc.encoding`: Message encoding ("json" or "proto")
//! - `otel.kind`: "client"
//!
//! ## Transports
//!
//! The call objects talk to the network through the [`Transport`] trait. A
//! transport receives an [`Invocation`] holding the encoded requests and a
//! [`CallHandle`] it uses to deliver metadata, messages and the final status.
//! [`LoopbackTransport`] serves calls with in-process handlers.

mod builder;
mod call;
mod channel;
mod codec;
mod credentials;
mod error;
mod inbound;
mod metadata;
mod options;
mod outbound;
mod outcome;
mod signal;
pub mod transport;

#[cfg(test)]
mod testing;

pub use builder::{
    ChannelBuildError, ChannelBuilder, DEFAULT_INBOUND_CAPACITY, DEFAULT_OUTBOUND_CAPACITY,
};
pub use call::{
    Call, CallShape, CallState, Messages, StreamStreamCall, StreamUnaryCall, UnaryStreamCall,
    UnaryUnaryCall,
};
pub use channel::Channel;
pub use codec::Encoding;
pub use credentials::{AuthContext, CallCredentials, Chain, FnCredentials, MetadataCredentials};
pub use error::{CallError, RpcError};
pub use metadata::{Metadata, MetadataError};
pub use options::CallOptions;
pub use outbound::RequestStream;
pub use transport::{
    CallHandle, Invocation, LoopbackTransport, ServerCall, Transport, TransportStream,
};

// Re-export the status vocabulary
pub use asynccall_core::{Code, ParseCodeError, Status};

pub use bytes::Bytes;
