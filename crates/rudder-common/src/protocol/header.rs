//! Fixed-size message header.

use crate::protocol::error::{ProtocolError, Result};

/// Magic number opening every frame, used to reject foreign traffic early.
pub const MAGIC_NUMBER: u16 = 0x3f3f;

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Request message.
pub const TYPE_REQUEST: u8 = 0x01;
/// Response message.
pub const TYPE_RESPONSE: u8 = 0x02;

/// Payload is not compressed.
pub const COMPRESS_NONE: u8 = 0x00;
/// Payload is gzip-compressed.
pub const COMPRESS_GZIP: u8 = 0x01;

/// Metadata is JSON-encoded.
pub const SERIALIZATION_JSON: u8 = 0x01;
/// Metadata is Protobuf-encoded.
pub const SERIALIZATION_PROTOBUF: u8 = 0x02;

/// Header length in bytes.
pub const HEADER_SIZE: usize = 22;

/// Fixed 22-byte message header.
///
/// Layout (big-endian):
///
/// ```text
///  offset  size  field
///  0       2     magic number (0x3f3f)
///  2       1     version
///  3       1     message type (1=request, 2=response)
///  4       1     compress type (0=none, 1=gzip)
///  5       1     serialization type (1=json, 2=protobuf)
///  6       8     message id
/// 14       4     metadata size
/// 18       4     payload size
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub magic: u16,
    pub version: u8,
    pub message_type: u8,
    pub compress_type: u8,
    pub serialization_type: u8,
    pub message_id: u64,
    pub metadata_size: u32,
    pub payload_size: u32,
}

impl Header {
    /// Creates a header for a new message with zeroed body sizes. The sizes
    /// are filled in by the encoder once the metadata has been serialized.
    pub fn new(message_type: u8, serialization_type: u8, message_id: u64) -> Self {
        Self {
            magic: MAGIC_NUMBER,
            version: PROTOCOL_VERSION,
            message_type,
            compress_type: COMPRESS_NONE,
            serialization_type,
            message_id,
            metadata_size: 0,
            payload_size: 0,
        }
    }

    /// Serializes the header into its fixed wire representation.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.magic.to_be_bytes());
        buf[2] = self.version;
        buf[3] = self.message_type;
        buf[4] = self.compress_type;
        buf[5] = self.serialization_type;
        buf[6..14].copy_from_slice(&self.message_id.to_be_bytes());
        buf[14..18].copy_from_slice(&self.metadata_size.to_be_bytes());
        buf[18..22].copy_from_slice(&self.payload_size.to_be_bytes());
        buf
    }

    /// Parses a header from its fixed wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidMagic`] when the frame does not open
    /// with [`MAGIC_NUMBER`].
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        let magic = u16::from_be_bytes([buf[0], buf[1]]);
        if magic != MAGIC_NUMBER {
            return Err(ProtocolError::InvalidMagic(magic));
        }

        Ok(Self {
            magic,
            version: buf[2],
            message_type: buf[3],
            compress_type: buf[4],
            serialization_type: buf[5],
            message_id: u64::from_be_bytes(buf[6..14].try_into().expect("8-byte slice")),
            metadata_size: u32::from_be_bytes(buf[14..18].try_into().expect("4-byte slice")),
            payload_size: u32::from_be_bytes(buf[18..22].try_into().expect("4-byte slice")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size_is_fixed() {
        let header = Header::new(TYPE_REQUEST, SERIALIZATION_JSON, 42);
        assert_eq!(header.encode().len(), HEADER_SIZE);
    }

    #[test]
    fn test_header_round_trip() {
        let mut header = Header::new(TYPE_RESPONSE, SERIALIZATION_PROTOBUF, u64::MAX);
        header.metadata_size = 128;
        header.payload_size = 4096;

        let decoded = Header::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_header_layout_offsets() {
        let mut header = Header::new(TYPE_REQUEST, SERIALIZATION_JSON, 0x0102030405060708);
        header.metadata_size = 0x0a0b0c0d;
        header.payload_size = 0x0e0f1011;

        let buf = header.encode();
        assert_eq!(&buf[0..2], &[0x3f, 0x3f]);
        assert_eq!(buf[2], PROTOCOL_VERSION);
        assert_eq!(buf[3], TYPE_REQUEST);
        assert_eq!(buf[4], COMPRESS_NONE);
        assert_eq!(buf[5], SERIALIZATION_JSON);
        assert_eq!(&buf[6..14], &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(&buf[14..18], &[0x0a, 0x0b, 0x0c, 0x0d]);
        assert_eq!(&buf[18..22], &[0x0e, 0x0f, 0x10, 0x11]);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut buf = Header::new(TYPE_REQUEST, SERIALIZATION_JSON, 1).encode();
        buf[0] = 0xde;
        buf[1] = 0xad;

        match Header::decode(&buf) {
            Err(ProtocolError::InvalidMagic(magic)) => assert_eq!(magic, 0xdead),
            other => panic!("expected InvalidMagic, got {other:?}"),
        }
    }
}
