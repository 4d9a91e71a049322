use thiserror::Error;

/// Errors raised by the wire protocol layer.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid magic number: {0:#06x}")]
    InvalidMagic(u16),

    #[error("unsupported serialization type: {0}")]
    UnsupportedSerializer(u8),

    #[error("frame section too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge { size: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protobuf encode error: {0}")]
    ProtobufEncode(#[from] prost::EncodeError),

    #[error("protobuf decode error: {0}")]
    ProtobufDecode(#[from] prost::DecodeError),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
