//! Terminal outcome of a call.

use std::sync::Arc;

use asynccall_core::Status;

use crate::error::CallError;
use crate::metadata::Metadata;
use crate::signal::Resolvable;

/// Details string used for application-initiated cancellation.
pub(crate) const LOCAL_CANCELLATION_DETAILS: &str = "Locally cancelled by application!";

/// Details string used when the last handle to an unfinished call is dropped.
pub(crate) const GC_CANCELLATION_DETAILS: &str = "Cancelled upon garbage collection!";

/// Details string used when a local deadline expires.
pub(crate) const DEADLINE_EXCEEDED_DETAILS: &str = "Deadline Exceeded";

/// The single terminal result of a call.
///
/// `result` holds the unary response for unary-response shapes (`Ok(Some)`),
/// `Ok(None)` for response-streaming shapes, or the cached failure.
#[derive(Debug)]
pub(crate) struct Outcome<Res> {
    pub(crate) status: Status,
    pub(crate) trailing_metadata: Metadata,
    pub(crate) result: Result<Option<Arc<Res>>, CallError>,
}

impl<Res> Outcome<Res> {
    /// Outcome for a status reported by the transport or produced by a local
    /// abort.
    pub(crate) fn completed(
        status: Status,
        trailing_metadata: Metadata,
        response: Option<Res>,
    ) -> Self {
        let result = if status.is_ok() {
            Ok(response.map(Arc::new))
        } else {
            Err(CallError::rpc(status.clone(), trailing_metadata.clone()))
        };
        Self {
            status,
            trailing_metadata,
            result,
        }
    }

    /// Outcome for a local cancellation.
    pub(crate) fn cancelled(details: &str) -> Self {
        let status = Status::cancelled(details);
        Self {
            result: Err(CallError::cancelled(status.clone())),
            status,
            trailing_metadata: Metadata::new(),
        }
    }

    pub(crate) fn error(&self) -> Option<&CallError> {
        self.result.as_ref().err()
    }

    pub(crate) fn is_local_cancellation(&self) -> bool {
        self.error().is_some_and(CallError::is_cancelled)
    }
}

/// Write-once cell holding a call's [`Outcome`].
pub(crate) type OutcomeCell<Res> = Resolvable<Outcome<Res>>;

#[cfg(test)]
mod tests {
    use asynccall_core::Code;

    use super::*;

    #[test]
    fn test_ok_outcome_keeps_response() {
        let outcome = Outcome::completed(Status::ok(), Metadata::new(), Some(7u32));
        assert_eq!(outcome.result.as_ref().unwrap().as_deref(), Some(&7));
        assert!(outcome.error().is_none());
    }

    #[test]
    fn test_failed_outcome_drops_response() {
        let outcome =
            Outcome::completed(Status::internal("boom"), Metadata::new(), Some(7u32));
        let err = outcome.error().unwrap();
        assert_eq!(err.code(), Code::Internal);
        assert!(!outcome.is_local_cancellation());
    }

    #[test]
    fn test_cancelled_outcome() {
        let outcome: Outcome<()> = Outcome::cancelled(LOCAL_CANCELLATION_DETAILS);
        assert_eq!(outcome.status.code(), Code::Cancelled);
        assert_eq!(outcome.status.details(), LOCAL_CANCELLATION_DETAILS);
        assert!(outcome.is_local_cancellation());
    }

    #[test]
    fn test_cell_keeps_first_outcome() {
        let cell: OutcomeCell<u32> = OutcomeCell::new();
        assert!(cell.resolve(Outcome::cancelled(LOCAL_CANCELLATION_DETAILS)));
        assert!(!cell.resolve(Outcome::completed(Status::ok(), Metadata::new(), Some(1))));
        assert!(cell.get().unwrap().is_local_cancellation());
    }
}
