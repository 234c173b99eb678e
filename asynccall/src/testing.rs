//! Test support: a small message type and a transport driven by the test.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use prost::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;

use crate::builder::ChannelBuilder;
use crate::call::CallShape;
use crate::channel::Channel;
use crate::codec::Encoding;
use crate::metadata::Metadata;
use crate::outbound::RequestStream;
use crate::transport::{CallHandle, Invocation, Transport, TransportStream};

#[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
pub(crate) struct Echo {
    #[prost(string, tag = "1")]
    #[serde(default)]
    pub message: String,
}

impl Echo {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Transport that records every invocation and lets the test play the peer.
#[derive(Clone, Default)]
pub(crate) struct ScriptedTransport {
    invocations: Arc<Mutex<Vec<Arc<Recorded>>>>,
    cancel_requests: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The `index`-th invocation. Panics if it was never opened.
    pub(crate) fn invocation(&self, index: usize) -> Arc<Recorded> {
        let invocations = self.invocations.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&invocations[index])
    }

    pub(crate) fn invocation_count(&self) -> usize {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of abort requests received across all calls.
    pub(crate) fn cancel_requests(&self) -> usize {
        self.cancel_requests.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    fn open(&self, invocation: Invocation) -> Box<dyn TransportStream> {
        let recorded = Recorded {
            method: invocation.method,
            shape: invocation.shape,
            encoding: invocation.encoding,
            metadata: invocation.metadata,
            deadline: invocation.deadline,
            handle: invocation.handle,
            requests: tokio::sync::Mutex::new(invocation.requests),
        };
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(recorded));
        Box::new(CountingStream {
            cancel_requests: Arc::clone(&self.cancel_requests),
        })
    }
}

struct CountingStream {
    cancel_requests: Arc<AtomicUsize>,
}

impl TransportStream for CountingStream {
    fn accept_cancel_request(&self) {
        self.cancel_requests.fetch_add(1, Ordering::SeqCst);
    }
}

/// One call as seen by the scripted peer.
pub(crate) struct Recorded {
    pub method: String,
    pub shape: CallShape,
    pub encoding: Encoding,
    pub metadata: Metadata,
    pub deadline: Option<Instant>,
    pub handle: CallHandle,
    requests: tokio::sync::Mutex<RequestStream>,
}

impl Recorded {
    /// Next request sent by the call, `None` after half-close.
    pub(crate) async fn request<T>(&self) -> Option<T>
    where
        T: Message + DeserializeOwned + Default,
    {
        let bytes = self.requests.lock().await.recv().await?;
        Some(self.encoding.decode(&bytes).expect("request should decode"))
    }

    /// Every remaining request, up to half-close.
    pub(crate) async fn all_requests<T>(&self) -> Vec<T>
    where
        T: Message + DeserializeOwned + Default,
    {
        let mut requests = Vec::new();
        while let Some(request) = self.request().await {
            requests.push(request);
        }
        requests
    }

    /// Deliver one response to the call.
    pub(crate) async fn send<T>(&self, message: &T) -> bool
    where
        T: Message + Serialize,
    {
        let bytes = self.encoding.encode(message).expect("response should encode");
        self.handle.deliver_message(bytes).await
    }
}

pub(crate) fn channel(transport: &ScriptedTransport) -> Channel {
    channel_with(transport, |builder| builder)
}

pub(crate) fn channel_with(
    transport: &ScriptedTransport,
    configure: impl FnOnce(ChannelBuilder) -> ChannelBuilder,
) -> Channel {
    configure(Channel::builder(transport.clone()))
        .build()
        .expect("channel should build")
}
