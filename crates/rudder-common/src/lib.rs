//! Rudder Common Types and Wire Protocol
//!
//! This crate provides the shared building blocks of the Rudder RPC framework:
//!
//! - **Naming**: the [`naming::Instance`] record describing one addressable
//!   backend of a `(service, version)` pair, plus the registry key scheme.
//! - **Protocol Layer**: the fixed binary framing used on the wire (22-byte
//!   big-endian header, metadata, payload) together with the pluggable
//!   metadata codecs (JSON and Protobuf).
//!
//! # Wire Format
//!
//! ```text
//! +------------------+
//! |     Header       |  fixed 22 bytes, big-endian
//! +------------------+
//! |     Metadata     |  variable, serialized via the declared codec
//! +------------------+
//! |     Payload      |  variable, opaque bytes
//! +------------------+
//! ```
//!
//! # Example
//!
//! ```
//! use rudder_common::protocol::{framing, Message, Metadata, SERIALIZATION_JSON};
//!
//! let message = Message::request(1, SERIALIZATION_JSON)
//!     .with_metadata(Metadata::call("Greeter", "SayHello"))
//!     .with_payload(b"{\"name\":\"world\"}".to_vec());
//!
//! let bytes = framing::encode_to_vec(&message).unwrap();
//! let decoded = framing::decode_from(&mut bytes.as_slice()).unwrap();
//! assert_eq!(decoded.payload, message.payload);
//! ```

pub mod naming;
pub mod protocol;

pub use naming::Instance;
pub use protocol::error::{ProtocolError, Result};
