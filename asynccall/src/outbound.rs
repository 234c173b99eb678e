//! Outbound message channel.
//!
//! This module provides the request side of a call:
//! - [`Outbound`]: ordered, bounded queue of encoded requests fed by `write`
//! - [`RequestStream`]: the transport's end of that queue
//! - [`drain_requests`]: drives an application-supplied request stream into
//!   the queue

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use asynccall_core::Status;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use prost::Message;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::codec::Encoding;
use crate::error::CallError;
use crate::signal::Resolvable;

pub(crate) const WRITE_AFTER_DONE_WRITING: &str = "write() after done_writing()";
pub(crate) const WRITE_AFTER_TERMINATION: &str = "write() on a terminated call";
const TRANSPORT_STOPPED_READING: &str = "the transport is no longer accepting requests";

/// Lifecycle of the request side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutboundState {
    /// Writes accepted.
    Open,
    /// No more writes; the transport sees the end of the request stream.
    HalfClosed,
    /// The call terminated.
    Closed,
}

/// Writer end of the request queue. Cheap to clone.
#[derive(Clone)]
pub(crate) struct Outbound {
    shared: Arc<OutboundShared>,
}

struct OutboundShared {
    inner: Mutex<OutboundInner>,
    /// Resolved on termination with the terminal failure, if any.
    closed: Resolvable<Option<CallError>>,
}

struct OutboundInner {
    state: OutboundState,
    /// Dropped on half-close so the transport observes the end of the stream.
    sender: Option<mpsc::Sender<Bytes>>,
}

impl Outbound {
    /// Create a request queue holding at most `capacity` unsent messages.
    pub(crate) fn channel(capacity: usize) -> (Outbound, RequestStream) {
        let (sender, receiver) = mpsc::channel(capacity);
        let outbound = Outbound {
            shared: Arc::new(OutboundShared {
                inner: Mutex::new(OutboundInner {
                    state: OutboundState::Open,
                    sender: Some(sender),
                }),
                closed: Resolvable::new(),
            }),
        };
        (outbound, RequestStream { receiver })
    }

    fn lock(&self) -> MutexGuard<'_, OutboundInner> {
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> OutboundState {
        self.lock().state
    }

    /// Fail with `InvalidState` unless writes are accepted.
    pub(crate) fn ensure_writable(&self) -> Result<(), CallError> {
        match self.state() {
            OutboundState::Open => Ok(()),
            OutboundState::HalfClosed => Err(CallError::InvalidState(WRITE_AFTER_DONE_WRITING)),
            OutboundState::Closed => Err(CallError::InvalidState(WRITE_AFTER_TERMINATION)),
        }
    }

    /// Enqueue an encoded message, waiting while the queue is full.
    ///
    /// A write that is suspended when the call terminates resumes with the
    /// terminal failure.
    pub(crate) async fn write(&self, message: Bytes) -> Result<(), CallError> {
        let sender = {
            let inner = self.lock();
            match (inner.state, &inner.sender) {
                (OutboundState::Open, Some(sender)) => sender.clone(),
                (OutboundState::Closed, _) => {
                    return Err(CallError::InvalidState(WRITE_AFTER_TERMINATION));
                }
                _ => return Err(CallError::InvalidState(WRITE_AFTER_DONE_WRITING)),
            }
        };

        tokio::select! {
            biased;

            terminal = self.shared.closed.wait() => Err(terminal
                .clone()
                .unwrap_or(CallError::InvalidState(WRITE_AFTER_TERMINATION))),

            sent = sender.send(message) => {
                sent.map_err(|_| CallError::InvalidState(TRANSPORT_STOPPED_READING))
            }
        }
    }

    /// Half-close the request side. A no-op unless open.
    pub(crate) fn done_writing(&self) {
        let mut inner = self.lock();
        if inner.state == OutboundState::Open {
            inner.state = OutboundState::HalfClosed;
            inner.sender = None;
        }
    }

    /// Close the request side for good when the call terminates.
    pub(crate) fn close(&self, terminal: Option<CallError>) {
        {
            let mut inner = self.lock();
            inner.state = OutboundState::Closed;
            inner.sender = None;
        }
        self.shared.closed.resolve(terminal);
    }

    /// Wait until the call terminates.
    pub(crate) async fn closed(&self) {
        self.shared.closed.wait().await;
    }
}

/// The transport's end of a call's request queue.
///
/// Yields encoded request messages in write order and ends when the
/// application half-closes or the call terminates.
#[derive(Debug)]
pub struct RequestStream {
    receiver: mpsc::Receiver<Bytes>,
}

impl RequestStream {
    /// A stream carrying exactly one message, already half-closed.
    pub(crate) fn single(message: Bytes) -> Self {
        let (sender, receiver) = mpsc::channel(1);
        // A fresh channel with capacity 1 always has room for the first message.
        let _ = sender.try_send(message);
        Self { receiver }
    }

    /// A stream that has already ended.
    #[cfg(test)]
    pub(crate) fn empty() -> Self {
        let (_, receiver) = mpsc::channel(1);
        Self { receiver }
    }

    /// Receive the next request message, `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }
}

impl Stream for RequestStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Drive an application-supplied request stream into the outbound queue,
/// then half-close.
///
/// When the call terminates first, the request stream is dropped at its
/// current suspension point, which is how the cancellation reaches it. An
/// encoding failure is returned as the status that should end the call.
pub(crate) async fn drain_requests<S, Req>(
    outbound: Outbound,
    requests: S,
    encoding: Encoding,
) -> Result<(), Status>
where
    S: Stream<Item = Req>,
    Req: Message + Serialize,
{
    let mut requests = Box::pin(requests);
    loop {
        let next = tokio::select! {
            biased;

            _ = outbound.closed() => return Ok(()),
            next = requests.next() => next,
        };

        let Some(request) = next else {
            outbound.done_writing();
            return Ok(());
        };

        let message = encoding.encode(&request)?;
        if outbound.write(message).await.is_err() {
            return Ok(());
        }
    }
}
