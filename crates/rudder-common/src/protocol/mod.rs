//! Wire protocol definitions.
//!
//! Messages travel as a fixed 22-byte big-endian [`Header`], a variable
//! metadata section serialized via the codec named in the header, and an
//! opaque payload. The layout is a fixed external contract: offsets,
//! endianness and the magic number must match other implementations bit for
//! bit.
//!
//! - [`header`] - header layout and field constants
//! - [`message`] - [`Message`] and [`Metadata`] records
//! - [`codec`] - metadata serialization (JSON, Protobuf)
//! - [`framing`] - sync and async encode/decode
//! - [`error`] - [`ProtocolError`] and the crate `Result` alias

pub mod codec;
pub mod error;
pub mod framing;
pub mod header;
pub mod message;

pub use codec::MetadataCodec;
pub use error::{ProtocolError, Result};
pub use header::{
    Header, COMPRESS_GZIP, COMPRESS_NONE, HEADER_SIZE, MAGIC_NUMBER, SERIALIZATION_JSON,
    SERIALIZATION_PROTOBUF, TYPE_REQUEST, TYPE_RESPONSE,
};
pub use message::{Message, Metadata};
