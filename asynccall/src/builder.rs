//! Channel builder.
//!
//! Provides a fluent API for configuring and building a [`Channel`].

use std::sync::Arc;
use std::time::Duration;

use crate::channel::{Channel, ChannelConfig};
use crate::codec::Encoding;
use crate::credentials::{CallCredentials, SharedCredentials};
use crate::transport::Transport;

/// Default number of undelivered response messages buffered per call.
pub const DEFAULT_INBOUND_CAPACITY: usize = 32;

/// Default number of unsent request messages buffered per call.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 32;

/// Builder for creating a [`Channel`].
///
/// # Example
///
/// ```ignore
/// use asynccall::{Channel, LoopbackTransport, MetadataCredentials};
/// use std::time::Duration;
///
/// let channel = Channel::builder(LoopbackTransport::new())
///     .use_proto() // Use protobuf encoding (default is JSON)
///     .timeout(Duration::from_secs(10))
///     .credentials(MetadataCredentials::new("authorization", "Bearer token"))
///     .build()?;
/// ```
pub struct ChannelBuilder {
    transport: Arc<dyn Transport>,
    encoding: Encoding,
    /// Default timeout for calls without a per-call timeout.
    default_timeout: Option<Duration>,
    /// Applied in the order they were added.
    credentials: Vec<SharedCredentials>,
    inbound_capacity: usize,
    outbound_capacity: usize,
}

impl std::fmt::Debug for ChannelBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelBuilder")
            .field("encoding", &self.encoding)
            .field("default_timeout", &self.default_timeout)
            .field("credentials_count", &self.credentials.len())
            .field("inbound_capacity", &self.inbound_capacity)
            .field("outbound_capacity", &self.outbound_capacity)
            .finish_non_exhaustive()
    }
}

impl ChannelBuilder {
    /// Create a new builder carrying calls over `transport`.
    pub fn new<T: Transport>(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            encoding: Encoding::default(),
            default_timeout: None,
            credentials: Vec::new(),
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }

    /// Use protobuf binary encoding.
    pub fn use_proto(mut self) -> Self {
        self.encoding = Encoding::Proto;
        self
    }

    /// Use JSON encoding (the default).
    pub fn use_json(mut self) -> Self {
        self.encoding = Encoding::Json;
        self
    }

    /// Set the default timeout for calls.
    ///
    /// Individual calls can override this with [`CallOptions::timeout`].
    ///
    /// [`CallOptions::timeout`]: crate::CallOptions::timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Add call credentials applied to every call.
    ///
    /// Providers run in the order they are added, before any per-call
    /// credentials.
    pub fn credentials<C: CallCredentials>(mut self, credentials: C) -> Self {
        self.credentials.push(Arc::new(credentials));
        self
    }

    /// Set how many received messages a call buffers before the transport
    /// is made to wait.
    pub fn inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity;
        self
    }

    /// Set how many written messages a call buffers before `write()` waits.
    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    /// Build the channel.
    pub fn build(self) -> Result<Channel, ChannelBuildError> {
        if self.inbound_capacity == 0 {
            return Err(ChannelBuildError::ZeroCapacity("inbound"));
        }
        if self.outbound_capacity == 0 {
            return Err(ChannelBuildError::ZeroCapacity("outbound"));
        }

        Ok(Channel::new(ChannelConfig {
            transport: self.transport,
            encoding: self.encoding,
            default_timeout: self.default_timeout,
            credentials: self.credentials,
            inbound_capacity: self.inbound_capacity,
            outbound_capacity: self.outbound_capacity,
        }))
    }
}

/// Error type for channel building failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelBuildError {
    /// A message buffer was configured with no room.
    #[error("{0} capacity must be at least 1")]
    ZeroCapacity(&'static str),
}
