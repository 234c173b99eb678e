//! The call object shared by every call shape.
//!
//! [`Call`] owns one RPC invocation: its terminal outcome, its inbound and
//! outbound message channels, and its cancellation gate. The shape facades in
//! this module ([`UnaryUnaryCall`], [`UnaryStreamCall`], [`StreamUnaryCall`],
//! [`StreamStreamCall`]) dereference to [`Call`] and add the operations their
//! shape supports.
//!
//! # Cancellation
//!
//! A call is cancelled by [`Call::cancel`], by dropping a pending
//! `response()`, `read()` or `write()` future, by dropping a [`Messages`]
//! stream while it waits for a message, or by dropping the last handle to an
//! unfinished call.
//! Cancellation wakes every suspended operation on the call and asks the
//! transport to abort.

mod stream_stream;
mod stream_unary;
mod unary_stream;
mod unary_unary;

pub use stream_stream::StreamStreamCall;
pub use stream_unary::StreamUnaryCall;
pub use unary_stream::UnaryStreamCall;
pub use unary_unary::UnaryUnaryCall;

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::task::{Context, Poll};

use asynccall_core::{Code, Status};
use bytes::Bytes;
use futures::Stream;
use futures::future::BoxFuture;
use futures::stream::FusedStream;
use prost::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codec::Encoding;
use crate::error::CallError;
use crate::inbound::Inbound;
use crate::metadata::Metadata;
use crate::outbound::{Outbound, WRITE_AFTER_TERMINATION};
use crate::outcome::{
    DEADLINE_EXCEEDED_DETAILS, GC_CANCELLATION_DETAILS, LOCAL_CANCELLATION_DETAILS, Outcome,
    OutcomeCell,
};
use crate::signal::Resolvable;
use crate::transport::{CallSink, TransportStream};

pub(crate) const MISSING_RESPONSE: &str = "server closed the call without a response";
pub(crate) const TOO_MANY_RESPONSES: &str = "server sent more than one response message";
pub(crate) const REQUESTS_FROM_STREAM: &str =
    "requests are supplied by a stream; write() and done_writing() are not available";
const NO_UNARY_RESPONSE: &str = "call has no unary response";

/// The four call shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallShape {
    /// One request, one response.
    UnaryUnary,
    /// One request, a stream of responses.
    UnaryStream,
    /// A stream of requests, one response.
    StreamUnary,
    /// A stream of requests, a stream of responses.
    StreamStream,
}

impl CallShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallShape::UnaryUnary => "unary",
            CallShape::UnaryStream => "server_stream",
            CallShape::StreamUnary => "client_stream",
            CallShape::StreamStream => "bidi_stream",
        }
    }

    /// Whether the application sends a stream of requests.
    pub fn is_client_streaming(&self) -> bool {
        matches!(self, CallShape::StreamUnary | CallShape::StreamStream)
    }

    /// Whether the peer sends a stream of responses.
    pub fn is_server_streaming(&self) -> bool {
        matches!(self, CallShape::UnaryStream | CallShape::StreamStream)
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a call.
///
/// ```text
/// Created ──▶ Active ──┬──▶ Completed
///                      └──▶ Cancelled
/// ```
///
/// Once `Completed` or `Cancelled`, the state never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Credentials are being applied and the transport has not been opened.
    Created,
    /// The transport has the call and no terminal status has arrived.
    Active,
    /// A terminal status was delivered or produced locally (deadline, codec
    /// failure, credentials failure).
    Completed,
    /// The call was cancelled locally before any status arrived.
    Cancelled,
}

/// Where responses go.
enum Responses<Res> {
    Unary(Mutex<Option<Res>>),
    Streaming(Inbound<Res>),
}

/// Where requests come from.
pub(crate) enum Requests {
    /// A single request, handed to the transport at invocation.
    Unary,
    /// Requests written by the application.
    Writer(Outbound),
    /// Requests drained from an application-supplied stream.
    Stream(Outbound),
}

/// Shared state of one call.
///
/// The application owns it through [`Call`]; the transport, the deadline
/// timer and the request drain only hold weak references.
pub(crate) struct CallCore<Res> {
    method: String,
    shape: CallShape,
    encoding: Encoding,
    outcome: Arc<OutcomeCell<Res>>,
    initial_metadata: Resolvable<Metadata>,
    /// Cancellation gate.
    cancelled: AtomicBool,
    responses: Responses<Res>,
    requests: Requests,
    transport: OnceLock<Box<dyn TransportStream>>,
    abort_requested: AtomicBool,
    abort_sent: AtomicBool,
}

impl<Res> CallCore<Res> {
    pub(crate) fn new(
        method: String,
        shape: CallShape,
        encoding: Encoding,
        inbound_capacity: usize,
        requests: Requests,
    ) -> Self {
        let responses = if shape.is_server_streaming() {
            Responses::Streaming(Inbound::new(inbound_capacity))
        } else {
            Responses::Unary(Mutex::new(None))
        };
        Self {
            method,
            shape,
            encoding,
            outcome: Arc::new(OutcomeCell::new()),
            initial_metadata: Resolvable::new(),
            cancelled: AtomicBool::new(false),
            responses,
            requests,
            transport: OnceLock::new(),
            abort_requested: AtomicBool::new(false),
            abort_sent: AtomicBool::new(false),
        }
    }

    pub(crate) fn method(&self) -> &str {
        &self.method
    }

    pub(crate) fn outcome_cell(&self) -> Arc<OutcomeCell<Res>> {
        Arc::clone(&self.outcome)
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.outcome.is_resolved()
    }

    pub(crate) fn state(&self) -> CallState {
        match self.outcome.get() {
            Some(outcome) if outcome.is_local_cancellation() => CallState::Cancelled,
            Some(_) => CallState::Completed,
            None if self.transport.get().is_some() => CallState::Active,
            None => CallState::Created,
        }
    }

    fn inbound(&self) -> Option<&Inbound<Res>> {
        match &self.responses {
            Responses::Streaming(inbound) => Some(inbound),
            Responses::Unary(_) => None,
        }
    }

    fn outbound(&self) -> Option<&Outbound> {
        match &self.requests {
            Requests::Writer(outbound) | Requests::Stream(outbound) => Some(outbound),
            Requests::Unary => None,
        }
    }

    /// The outbound channel, if the application may write to it.
    fn writer(&self) -> Result<&Outbound, CallError> {
        match &self.requests {
            Requests::Writer(outbound) => Ok(outbound),
            Requests::Stream(_) => Err(CallError::InvalidState(REQUESTS_FROM_STREAM)),
            Requests::Unary => Err(CallError::InvalidState(WRITE_AFTER_TERMINATION)),
        }
    }

    fn unary_slot(&self) -> Option<MutexGuard<'_, Option<Res>>> {
        match &self.responses {
            Responses::Unary(slot) => Some(slot.lock().unwrap_or_else(PoisonError::into_inner)),
            Responses::Streaming(_) => None,
        }
    }

    /// Store `outcome` if the call is unresolved and release everything
    /// waiting on the call. Returns `true` if this outcome won.
    fn settle(&self, outcome: Outcome<Res>) -> bool {
        if !self.outcome.resolve(outcome) {
            return false;
        }
        let Some(outcome) = self.outcome.get() else {
            return true;
        };

        let error = outcome.error().cloned();
        if let Some(inbound) = self.inbound() {
            inbound.close(error.clone().map_or(Ok(()), Err));
        }
        if let Some(outbound) = self.outbound() {
            outbound.close(error);
        }
        self.initial_metadata.resolve(Metadata::new());

        #[cfg(feature = "tracing")]
        tracing::debug!(
            rpc.method = %self.method,
            rpc.code = %outcome.status.code(),
            rpc.details = outcome.status.details(),
            "call terminated"
        );
        true
    }

    /// Flip the cancellation gate and cancel the call with `details`.
    ///
    /// Returns `true` if the gate was flipped by this call while the call was
    /// unresolved. The transport is asked to abort only if the cancellation
    /// also won the outcome.
    pub(crate) fn cancel(&self, details: &'static str) -> bool {
        if self.outcome.is_resolved() || self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        if self.settle(Outcome::cancelled(details)) {
            #[cfg(feature = "tracing")]
            tracing::debug!(rpc.method = %self.method, details, "call cancelled");
            self.request_transport_abort();
        }
        true
    }

    /// Terminate the call with a locally produced status and abort the
    /// transport.
    pub(crate) fn abort(&self, status: Status) {
        if self.settle(Outcome::completed(status, Metadata::new(), None)) {
            self.request_transport_abort();
        }
    }

    /// Terminate the call with a status that never reached a transport.
    pub(crate) fn fail(&self, status: Status) {
        self.settle(Outcome::completed(status, Metadata::new(), None));
    }

    /// End the call because its deadline elapsed.
    pub(crate) fn expire(&self) {
        #[cfg(feature = "tracing")]
        if !self.is_terminated() {
            tracing::debug!(rpc.method = %self.method, "deadline exceeded");
        }
        self.abort(Status::deadline_exceeded(DEADLINE_EXCEEDED_DETAILS));
    }

    /// Apply the status delivered by the transport.
    fn finish(&self, status: Status, trailing_metadata: Metadata) -> bool {
        let response = self.unary_slot().and_then(|mut slot| slot.take());
        let outcome = match &self.responses {
            Responses::Unary(_) if status.is_ok() && response.is_none() => Outcome::completed(
                Status::internal(MISSING_RESPONSE),
                trailing_metadata,
                None,
            ),
            _ => Outcome::completed(status, trailing_metadata, response),
        };
        self.settle(outcome)
    }

    /// Hand the call to its transport stream.
    pub(crate) fn attach_transport(&self, stream: Box<dyn TransportStream>) {
        if self.transport.set(stream).is_ok() {
            self.send_abort_if_requested();
        }
    }

    fn request_transport_abort(&self) {
        self.abort_requested.store(true, Ordering::SeqCst);
        self.send_abort_if_requested();
    }

    fn send_abort_if_requested(&self) {
        if !self.abort_requested.load(Ordering::SeqCst) {
            return;
        }
        let Some(stream) = self.transport.get() else {
            return;
        };
        if !self.abort_sent.swap(true, Ordering::SeqCst) {
            stream.accept_cancel_request();
        }
    }
}

impl<Res> CallCore<Res>
where
    Res: Message + DeserializeOwned + Default + Send + Sync + 'static,
{
    async fn deliver(&self, message: Bytes) -> bool {
        if self.is_terminated() {
            return false;
        }
        let message: Res = match self.encoding.decode(&message) {
            Ok(message) => message,
            Err(status) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    rpc.method = %self.method,
                    error = %status,
                    "failed to decode response"
                );
                self.abort(status);
                return false;
            }
        };

        match &self.responses {
            Responses::Unary(slot) => {
                let duplicate = {
                    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                    if slot.is_some() {
                        true
                    } else {
                        *slot = Some(message);
                        false
                    }
                };
                if duplicate {
                    self.abort(Status::internal(TOO_MANY_RESPONSES));
                    return false;
                }
                true
            }
            Responses::Streaming(inbound) => {
                let accepted = inbound.push(message).await;
                #[cfg(feature = "tracing")]
                if !accepted && !self.is_terminated() {
                    tracing::warn!(
                        rpc.method = %self.method,
                        "dropping message after end of stream"
                    );
                }
                accepted
            }
        }
    }
}

impl<Res> CallSink for CallCore<Res>
where
    Res: Message + DeserializeOwned + Default + Send + Sync + 'static,
{
    fn on_initial_metadata(&self, metadata: Metadata) {
        self.initial_metadata.resolve(metadata);
    }

    fn on_message(&self, message: Bytes) -> BoxFuture<'_, bool> {
        Box::pin(self.deliver(message))
    }

    fn on_half_close(&self) {
        if let Some(inbound) = self.inbound() {
            inbound.push_end();
        }
    }

    fn on_status(&self, status: Status, trailing_metadata: Metadata) {
        self.finish(status, trailing_metadata);
    }

    fn is_terminated(&self) -> bool {
        CallCore::is_terminated(self)
    }

    fn terminated(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.outcome.wait().await;
        })
    }
}

/// Cancels the call when dropped while armed.
///
/// Held across the suspension point of `response()`, `read()` and `write()`
/// so that dropping the pending future cancels the call.
struct CancelOnDrop<'a, Res> {
    core: &'a CallCore<Res>,
    armed: bool,
}

impl<'a, Res> CancelOnDrop<'a, Res> {
    fn arm(core: &'a CallCore<Res>) -> Self {
        Self { core, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<Res> Drop for CancelOnDrop<'_, Res> {
    fn drop(&mut self) {
        if self.armed && self.core.cancel(LOCAL_CANCELLATION_DETAILS) {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                rpc.method = %self.core.method,
                "pending operation dropped; call cancelled"
            );
        }
    }
}

/// Owner of the call; cancels it when the last facade clone goes away.
struct CallOwner<Res> {
    core: Arc<CallCore<Res>>,
}

impl<Res> Drop for CallOwner<Res> {
    fn drop(&mut self) {
        self.core.cancel(GC_CANCELLATION_DETAILS);
    }
}

/// An RPC invocation, common to every call shape.
///
/// Cloning yields another handle to the same call. The call is cancelled when
/// the last handle is dropped before it terminates.
pub struct Call<Res> {
    owner: Arc<CallOwner<Res>>,
}

impl<Res> Clone for Call<Res> {
    fn clone(&self) -> Self {
        Self {
            owner: Arc::clone(&self.owner),
        }
    }
}

impl<Res> fmt::Debug for Call<Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("method", &self.method())
            .field("shape", &self.shape())
            .field("state", &self.state())
            .field("cancelled", &self.cancelled())
            .finish()
    }
}

impl<Res> Call<Res> {
    pub(crate) fn new(core: Arc<CallCore<Res>>) -> Self {
        Self {
            owner: Arc::new(CallOwner { core }),
        }
    }

    fn core(&self) -> &CallCore<Res> {
        &self.owner.core
    }

    /// Cancel the call.
    ///
    /// Returns `true` the first time it is called on an unfinished call, and
    /// `false` afterwards or once the call has finished. On success the call
    /// ends with `CANCELLED` and "Locally cancelled by application!".
    pub fn cancel(&self) -> bool {
        self.core().cancel(LOCAL_CANCELLATION_DETAILS)
    }

    /// Whether [`cancel`](Self::cancel) (or a propagated cancellation) took
    /// effect.
    pub fn cancelled(&self) -> bool {
        self.core().cancelled.load(Ordering::SeqCst)
    }

    /// Whether the call has terminated.
    pub fn done(&self) -> bool {
        self.core().is_terminated()
    }

    pub fn state(&self) -> CallState {
        self.core().state()
    }

    /// The full method path.
    pub fn method(&self) -> &str {
        self.core().method()
    }

    pub fn shape(&self) -> CallShape {
        self.core().shape
    }

    /// The terminal status. Waits for the call to terminate.
    pub async fn status(&self) -> Status {
        self.core().outcome.wait().await.status.clone()
    }

    /// The terminal status code. Waits for the call to terminate.
    pub async fn code(&self) -> Code {
        self.core().outcome.wait().await.status.code()
    }

    /// The terminal details string. Waits for the call to terminate.
    pub async fn details(&self) -> String {
        self.core().outcome.wait().await.status.details().to_owned()
    }

    /// The initial metadata sent by the peer.
    ///
    /// Resolves when the transport reports it, or with empty metadata when the
    /// call terminates first.
    pub async fn initial_metadata(&self) -> Metadata {
        self.core().initial_metadata.wait().await.clone()
    }

    /// The trailing metadata delivered with the terminal status. Waits for
    /// the call to terminate.
    pub async fn trailing_metadata(&self) -> Metadata {
        self.core().outcome.wait().await.trailing_metadata.clone()
    }

    pub(crate) async fn unary_response(&self) -> Result<Arc<Res>, CallError> {
        let core = self.core();
        let guard = CancelOnDrop::arm(core);
        let outcome = core.outcome.wait().await;
        guard.disarm();
        match &outcome.result {
            Ok(Some(response)) => Ok(Arc::clone(response)),
            Ok(None) => Err(CallError::InvalidState(NO_UNARY_RESPONSE)),
            Err(err) => Err(err.clone()),
        }
    }

    pub(crate) async fn read_message(&self) -> Result<Option<Res>, CallError> {
        let core = self.core();
        let Some(inbound) = core.inbound() else {
            return Ok(None);
        };
        let guard = CancelOnDrop::arm(core);
        let message = inbound.read().await;
        guard.disarm();
        message
    }

    pub(crate) fn message_stream(&self) -> Messages<Res> {
        Messages {
            call: self.clone(),
            waiting: false,
            finished: false,
        }
    }

    pub(crate) async fn write_message<Req>(&self, message: &Req) -> Result<(), CallError>
    where
        Req: Message + Serialize,
    {
        let core = self.core();
        let outbound = core.writer()?;
        outbound.ensure_writable()?;

        let bytes = match core.encoding.encode(message) {
            Ok(bytes) => bytes,
            Err(status) => {
                core.abort(status);
                return Err(core
                    .outcome
                    .get()
                    .and_then(|outcome| outcome.error().cloned())
                    .unwrap_or(CallError::InvalidState(WRITE_AFTER_TERMINATION)));
            }
        };

        let guard = CancelOnDrop::arm(core);
        let written = outbound.write(bytes).await;
        guard.disarm();
        written
    }

    pub(crate) fn finish_writing(&self) -> Result<(), CallError> {
        self.core().writer()?.done_writing();
        Ok(())
    }
}

/// Stream of response messages of a response-streaming call.
///
/// Yields messages in delivery order and ends after the last one if the call
/// completed with OK. A call failed by the peer or by its deadline yields its
/// error once, then ends. A locally cancelled call just ends; its status is
/// available from [`Call::code`].
///
/// Dropping the stream while a poll returned `Pending` cancels the call.
/// Dropping it between messages, or after taking only some of them, does not.
#[must_use = "streams do nothing unless polled"]
pub struct Messages<Res> {
    call: Call<Res>,
    waiting: bool,
    finished: bool,
}

impl<Res> Stream for Messages<Res> {
    type Item = Result<Res, CallError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        let polled = match this.call.core().inbound() {
            Some(inbound) => inbound.poll_read(cx),
            None => Poll::Ready(Ok(None)),
        };
        this.waiting = polled.is_pending();
        match polled {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Some(message))) => Poll::Ready(Some(Ok(message))),
            Poll::Ready(Ok(None)) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Ready(Err(err)) if err.is_cancelled() => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Ready(Err(err)) => {
                this.finished = true;
                Poll::Ready(Some(Err(err)))
            }
        }
    }
}

impl<Res> FusedStream for Messages<Res> {
    fn is_terminated(&self) -> bool {
        self.finished
    }
}

impl<Res> Drop for Messages<Res> {
    fn drop(&mut self) {
        if self.waiting && !self.finished {
            self.call.core().cancel(LOCAL_CANCELLATION_DETAILS);
        }
    }
}

impl<Res> fmt::Debug for Messages<Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Messages")
            .field("method", &self.call.method())
            .field("waiting", &self.waiting)
            .field("finished", &self.finished)
            .finish()
    }
}
