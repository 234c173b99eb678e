//! Call error types.
//!
//! This module provides [`CallError`], the error returned by every call
//! operation, and [`RpcError`], the terminal failure it shares between
//! observers.

use std::sync::Arc;

use asynccall_core::{Code, Status};

use crate::metadata::Metadata;

/// A terminal, non-OK outcome of a call.
///
/// Created once when the call terminates and shared by reference with every
/// observer, so repeated observations see the same instance.
#[derive(Debug, thiserror::Error)]
#[error("{status}")]
pub struct RpcError {
    status: Status,
    trailing_metadata: Metadata,
}

impl RpcError {
    pub(crate) fn new(status: Status, trailing_metadata: Metadata) -> Self {
        Self {
            status,
            trailing_metadata,
        }
    }

    pub fn code(&self) -> Code {
        self.status.code()
    }

    pub fn details(&self) -> &str {
        self.status.details()
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Trailing metadata delivered with the status (empty for local failures).
    pub fn trailing_metadata(&self) -> &Metadata {
        &self.trailing_metadata
    }
}

/// Errors returned by call operations.
///
/// `Rpc` and `Cancelled` are terminal outcomes: they are cached by the call and
/// every later observation returns a clone pointing at the same [`RpcError`]
/// (see [`CallError::same_instance`]). `InvalidState` is raised at the call site
/// and never affects the call's outcome.
#[derive(Clone, Debug, thiserror::Error)]
pub enum CallError {
    /// The call terminated with a non-OK status delivered by the transport, or
    /// produced locally by a deadline, a codec failure, or a credentials
    /// provider.
    #[error("rpc failed with {0}")]
    Rpc(Arc<RpcError>),

    /// The call was cancelled locally, either directly with `cancel()` or by
    /// dropping a task that was awaiting it.
    #[error("rpc cancelled: {0}")]
    Cancelled(Arc<RpcError>),

    /// The operation is not allowed in the call's current state (e.g. a write
    /// after `done_writing()` or after cancellation).
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

impl CallError {
    pub(crate) fn rpc(status: Status, trailing_metadata: Metadata) -> Self {
        CallError::Rpc(Arc::new(RpcError::new(status, trailing_metadata)))
    }

    pub(crate) fn cancelled(status: Status) -> Self {
        CallError::Cancelled(Arc::new(RpcError::new(status, Metadata::new())))
    }

    /// Get the status code.
    ///
    /// `InvalidState` maps to [`Code::FailedPrecondition`].
    pub fn code(&self) -> Code {
        match self {
            CallError::Rpc(err) | CallError::Cancelled(err) => err.code(),
            CallError::InvalidState(_) => Code::FailedPrecondition,
        }
    }

    /// Get the details string.
    pub fn details(&self) -> &str {
        match self {
            CallError::Rpc(err) | CallError::Cancelled(err) => err.details(),
            CallError::InvalidState(msg) => msg,
        }
    }

    /// The terminal failure, if this error is one.
    pub fn rpc_error(&self) -> Option<&RpcError> {
        match self {
            CallError::Rpc(err) | CallError::Cancelled(err) => Some(err),
            CallError::InvalidState(_) => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CallError::Cancelled(_))
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, CallError::InvalidState(_))
    }

    /// Returns `true` if both errors are observations of the same cached
    /// terminal failure.
    pub fn same_instance(&self, other: &CallError) -> bool {
        match (self, other) {
            (CallError::Rpc(a), CallError::Rpc(b))
            | (CallError::Cancelled(a), CallError::Cancelled(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
