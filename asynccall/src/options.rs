//! Call options for per-call configuration.
//!
//! This module provides [`CallOptions`] for configuring individual calls
//! with timeouts, extra metadata, and call credentials.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::credentials::{CallCredentials, SharedCredentials};
use crate::metadata::{Metadata, MetadataError};

/// Options for configuring an individual call.
///
/// Use this to set a per-call deadline, request metadata, or credentials
/// that differ from the channel defaults.
///
/// # Example
///
/// ```ignore
/// use asynccall::CallOptions;
/// use std::time::Duration;
///
/// let options = CallOptions::new()
///     .timeout(Duration::from_secs(5))
///     .metadata("x-request-id", "abc-123");
///
/// let call = channel.unary_unary_with_options::<Req, Res>(
///     "/my.Service/Method",
///     &request,
///     options,
/// );
/// ```
#[derive(Clone, Default)]
pub struct CallOptions {
    /// Overrides the channel's default timeout.
    pub(crate) timeout: Option<Duration>,
    pub(crate) metadata: Metadata,
    /// Applied after the channel-level credentials.
    pub(crate) credentials: Option<SharedCredentials>,
}

impl CallOptions {
    /// Create new default call options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timeout for this call.
    ///
    /// The deadline is forwarded to the transport and also enforced locally:
    /// once it elapses the call ends with `DEADLINE_EXCEEDED`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Get the configured timeout, if any.
    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Append a metadata entry for this call.
    ///
    /// # Panics
    ///
    /// Panics if the key or value is invalid.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use asynccall::CallOptions;
    ///
    /// let options = CallOptions::new()
    ///     .metadata("authorization", "Bearer token123")
    ///     .metadata("x-request-id", "abc-123");
    /// ```
    pub fn metadata(self, key: &str, value: &str) -> Self {
        match self.try_metadata(key, value) {
            Ok(options) => options,
            Err(err) => panic!("{err}"),
        }
    }

    /// Try to append a metadata entry for this call.
    pub fn try_metadata(mut self, key: &str, value: &str) -> Result<Self, MetadataError> {
        self.metadata.append(key, value)?;
        Ok(self)
    }

    /// Get the metadata set so far.
    pub fn get_metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Set call credentials for this call.
    pub fn credentials<C: CallCredentials>(mut self, credentials: C) -> Self {
        self.credentials = Some(Arc::new(credentials));
        self
    }
}

impl fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("timeout", &self.timeout)
            .field("metadata", &self.metadata)
            .field("credentials", &self.credentials.is_some())
            .finish()
    }
}
