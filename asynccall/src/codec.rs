//! Message encoding.

use asynccall_core::Status;
use bytes::Bytes;
use prost::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub(crate) const REQUEST_SERIALIZATION_FAILED: &str = "Exception serializing request!";
pub(crate) const RESPONSE_DESERIALIZATION_FAILED: &str = "Exception deserializing response!";

/// Wire encoding of request and response messages.
///
/// Messages are generated with both `prost::Message` and serde derives, so
/// either encoding can be selected per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    /// Protobuf binary encoding.
    Proto,
    /// JSON encoding.
    #[default]
    Json,
}

impl Encoding {
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Proto => "proto",
            Encoding::Json => "json",
        }
    }

    /// Encode a message for sending.
    ///
    /// Failures map to an `INTERNAL` status.
    pub fn encode<T>(&self, msg: &T) -> Result<Bytes, Status>
    where
        T: Message + Serialize,
    {
        match self {
            Encoding::Proto => Ok(Bytes::from(msg.encode_to_vec())),
            Encoding::Json => serde_json::to_vec(msg).map(Bytes::from).map_err(|e| {
                Status::internal(format!(
                    "{REQUEST_SERIALIZATION_FAILED} JSON encoding failed: {e}"
                ))
            }),
        }
    }

    /// Decode a message from received bytes.
    ///
    /// Failures map to an `INTERNAL` status.
    pub fn decode<T>(&self, bytes: &[u8]) -> Result<T, Status>
    where
        T: Message + DeserializeOwned + Default,
    {
        match self {
            Encoding::Proto => T::decode(bytes).map_err(|e| {
                Status::internal(format!(
                    "{RESPONSE_DESERIALIZATION_FAILED} protobuf decoding failed: {e}"
                ))
            }),
            Encoding::Json => serde_json::from_slice(bytes).map_err(|e| {
                Status::internal(format!(
                    "{RESPONSE_DESERIALIZATION_FAILED} JSON decoding failed: {e}"
                ))
            }),
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
