//! Metadata codecs.
//!
//! The metadata section of a frame is serialized via the codec named in the
//! header. The enum keeps the dispatch closed over the wire contract: an
//! unknown serialization type fails lookup instead of silently falling back.

use crate::protocol::error::{ProtocolError, Result};
use crate::protocol::header::{SERIALIZATION_JSON, SERIALIZATION_PROTOBUF};
use crate::protocol::message::Metadata;
use prost::Message as _;

/// Codec for the metadata section of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataCodec {
    Json,
    Protobuf,
}

impl MetadataCodec {
    /// Looks up the codec for a wire serialization type.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnsupportedSerializer`] for types outside
    /// the wire contract.
    pub fn for_type(serialization_type: u8) -> Result<Self> {
        match serialization_type {
            SERIALIZATION_JSON => Ok(MetadataCodec::Json),
            SERIALIZATION_PROTOBUF => Ok(MetadataCodec::Protobuf),
            other => Err(ProtocolError::UnsupportedSerializer(other)),
        }
    }

    /// The wire serialization type this codec encodes as.
    pub fn serialization_type(&self) -> u8 {
        match self {
            MetadataCodec::Json => SERIALIZATION_JSON,
            MetadataCodec::Protobuf => SERIALIZATION_PROTOBUF,
        }
    }

    /// Serializes metadata to bytes.
    pub fn encode(&self, metadata: &Metadata) -> Result<Vec<u8>> {
        match self {
            MetadataCodec::Json => Ok(serde_json::to_vec(metadata)?),
            MetadataCodec::Protobuf => {
                let mut buf = Vec::with_capacity(metadata.encoded_len());
                metadata.encode(&mut buf)?;
                Ok(buf)
            }
        }
    }

    /// Deserializes metadata from bytes.
    pub fn decode(&self, data: &[u8]) -> Result<Metadata> {
        match self {
            MetadataCodec::Json => Ok(serde_json::from_slice(data)?),
            MetadataCodec::Protobuf => Ok(Metadata::decode(data)?),
        }
    }
}
