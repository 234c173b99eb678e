//! Inbound message channel.
//!
//! An ordered, bounded queue of decoded response messages fed by the
//! transport and drained by the application.
//!
//! # End of stream
//!
//! The queue ends when the call terminates. Once the queue is drained, every
//! read returns `Ok(None)` if the call completed with OK, or the cached
//! terminal failure otherwise, without suspending. A local cancellation
//! discards undelivered messages so it is visible to the very next read.
//!
//! At most one task is expected to read at a time; only the most recent
//! reader's waker is kept.

use std::collections::VecDeque;
use std::future::poll_fn;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use tokio::sync::Notify;

use crate::error::CallError;

pub(crate) struct Inbound<T> {
    state: Mutex<InboundState<T>>,
    capacity: usize,
    /// Woken when the reader frees a slot or the channel ends.
    space: Notify,
}

struct InboundState<T> {
    queue: VecDeque<T>,
    /// The transport signalled the end of the response stream.
    half_closed: bool,
    /// Terminal result, set once when the call terminates.
    end: Option<Result<(), CallError>>,
    reader: Option<Waker>,
}

impl<T> Inbound<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(InboundState {
                queue: VecDeque::with_capacity(capacity),
                half_closed: false,
                end: None,
                reader: None,
            }),
            capacity,
            space: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InboundState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a message, waiting for room while the queue is full.
    ///
    /// Returns `false` without enqueueing once the stream has ended or the call
    /// has terminated.
    pub(crate) async fn push(&self, message: T) -> bool {
        loop {
            let space = self.space.notified();
            {
                let mut state = self.lock();
                if state.half_closed || state.end.is_some() {
                    return false;
                }
                if state.queue.len() < self.capacity {
                    state.queue.push_back(message);
                    if let Some(reader) = state.reader.take() {
                        reader.wake();
                    }
                    return true;
                }
            }
            space.await;
        }
    }

    /// Mark the response stream as ended by the transport.
    pub(crate) fn push_end(&self) {
        self.lock().half_closed = true;
        self.space.notify_waiters();
    }

    /// Terminate the channel. Only the first call has an effect.
    pub(crate) fn close(&self, end: Result<(), CallError>) {
        {
            let mut state = self.lock();
            if state.end.is_some() {
                return;
            }
            if end.as_ref().is_err_and(CallError::is_cancelled) {
                state.queue.clear();
            }
            state.end = Some(end);
            if let Some(reader) = state.reader.take() {
                reader.wake();
            }
        }
        self.space.notify_waiters();
    }

    /// Poll for the next message. `Ok(None)` is the end-of-stream marker.
    pub(crate) fn poll_read(&self, cx: &mut Context<'_>) -> Poll<Result<Option<T>, CallError>> {
        let mut state = self.lock();
        if let Some(message) = state.queue.pop_front() {
            drop(state);
            self.space.notify_waiters();
            return Poll::Ready(Ok(Some(message)));
        }
        match &state.end {
            Some(Ok(())) => Poll::Ready(Ok(None)),
            Some(Err(err)) => Poll::Ready(Err(err.clone())),
            None => {
                state.reader = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }

    pub(crate) async fn read(&self) -> Result<Option<T>, CallError> {
        poll_fn(|cx| self.poll_read(cx)).await
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().queue.len()
    }
}
