//! Message and metadata records.

use crate::protocol::header::{Header, TYPE_REQUEST, TYPE_RESPONSE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A complete wire message: header, optional metadata, opaque payload.
///
/// The payload is carried as raw bytes; its interpretation (request
/// arguments, response body) is up to the caller and the serialization type
/// declared in the header.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub header: Header,
    pub metadata: Option<Metadata>,
    pub payload: Vec<u8>,
}

impl Message {
    /// Creates a request message with empty metadata and payload.
    pub fn request(message_id: u64, serialization_type: u8) -> Self {
        Self {
            header: Header::new(TYPE_REQUEST, serialization_type, message_id),
            metadata: None,
            payload: Vec::new(),
        }
    }

    /// Creates a response message with empty metadata and payload.
    pub fn response(message_id: u64, serialization_type: u8) -> Self {
        Self {
            header: Header::new(TYPE_RESPONSE, serialization_type, message_id),
            metadata: None,
            payload: Vec::new(),
        }
    }

    /// Attaches metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Attaches a payload.
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// The error carried in the metadata, if any. Only meaningful for
    /// response messages.
    pub fn error(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .map(|m| m.error.as_str())
            .filter(|e| !e.is_empty())
    }
}

/// Call metadata carried between the header and the payload.
///
/// Serialized via the codec named by the header's serialization type. The
/// `extra` map carries cross-cutting values such as trace ids.
#[derive(Clone, PartialEq, Serialize, Deserialize, prost::Message)]
pub struct Metadata {
    /// Target service name.
    #[prost(string, tag = "1")]
    #[serde(default)]
    pub service_name: String,
    /// Target method name.
    #[prost(string, tag = "2")]
    #[serde(default)]
    pub method_name: String,
    /// Error message; empty on success, set only in responses.
    #[prost(string, tag = "3")]
    #[serde(default)]
    pub error: String,
    /// Additional string-keyed metadata.
    #[prost(map = "string, string", tag = "4")]
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl Metadata {
    /// Creates call metadata for a request.
    pub fn call(service_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            method_name: method_name.into(),
            error: String::new(),
            extra: HashMap::new(),
        }
    }

    /// Attaches an extra entry.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Sets the error message carried back in a response.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::header::SERIALIZATION_JSON;

    #[test]
    fn test_request_builder() {
        let message = Message::request(7, SERIALIZATION_JSON)
            .with_metadata(Metadata::call("Echo", "Say").with_extra("trace_id", "abc"))
            .with_payload(vec![1, 2, 3]);

        assert_eq!(message.header.message_type, TYPE_REQUEST);
        assert_eq!(message.header.message_id, 7);
        assert_eq!(message.payload, vec![1, 2, 3]);
        let metadata = message.metadata.unwrap();
        assert_eq!(metadata.service_name, "Echo");
        assert_eq!(metadata.method_name, "Say");
        assert_eq!(metadata.extra["trace_id"], "abc");
    }

    #[test]
    fn test_response_error_accessor() {
        let ok = Message::response(1, SERIALIZATION_JSON).with_metadata(Metadata::call("Echo", "Say"));
        assert!(ok.error().is_none());

        let failed = Message::response(2, SERIALIZATION_JSON)
            .with_metadata(Metadata::call("Echo", "Say").with_error("boom"));
        assert_eq!(failed.error(), Some("boom"));

        let bare = Message::response(3, SERIALIZATION_JSON);
        assert!(bare.error().is_none());
    }
}
