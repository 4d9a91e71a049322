//! Frame encoding and decoding.
//!
//! Both a synchronous (`std::io`) and an asynchronous (`tokio::io`) path are
//! provided; blocking callers and the async transports share the same header
//! and codec logic. Section sizes are read before their bodies and checked
//! against [`MAX_SECTION_SIZE`] so a corrupt length prefix cannot drive an
//! unbounded allocation.

use crate::protocol::codec::MetadataCodec;
use crate::protocol::error::{ProtocolError, Result};
use crate::protocol::header::{Header, HEADER_SIZE};
use crate::protocol::message::Message;
use std::io::{Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound for the metadata and payload sections (100 MB each).
pub const MAX_SECTION_SIZE: usize = 100 * 1024 * 1024;

fn check_section(size: usize) -> Result<()> {
    if size > MAX_SECTION_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size,
            max: MAX_SECTION_SIZE,
        });
    }
    Ok(())
}

/// Serializes the metadata section and returns the finalized header bytes
/// plus the metadata bytes. Shared between the sync and async encoders.
fn prepare(message: &Message) -> Result<([u8; HEADER_SIZE], Vec<u8>)> {
    let metadata_bytes = match &message.metadata {
        Some(metadata) => {
            let codec = MetadataCodec::for_type(message.header.serialization_type)?;
            codec.encode(metadata)?
        }
        None => Vec::new(),
    };
    check_section(metadata_bytes.len())?;
    check_section(message.payload.len())?;

    let mut header = message.header;
    header.metadata_size = metadata_bytes.len() as u32;
    header.payload_size = message.payload.len() as u32;

    Ok((header.encode(), metadata_bytes))
}

/// Parses the body sections once the header has been read. Shared between
/// the sync and async decoders.
fn assemble(header: Header, metadata_bytes: Vec<u8>, payload: Vec<u8>) -> Result<Message> {
    let metadata = if metadata_bytes.is_empty() {
        None
    } else {
        let codec = MetadataCodec::for_type(header.serialization_type)?;
        Some(codec.decode(&metadata_bytes)?)
    };

    Ok(Message {
        header,
        metadata,
        payload,
    })
}

/// Encodes a message to a writer.
///
/// The metadata and payload sizes written on the wire are computed from the
/// actual section contents; the sizes carried in `message.header` are
/// ignored.
pub fn encode_to<W: Write>(message: &Message, writer: &mut W) -> Result<()> {
    let (header, metadata_bytes) = prepare(message)?;
    writer.write_all(&header)?;
    if !metadata_bytes.is_empty() {
        writer.write_all(&metadata_bytes)?;
    }
    if !message.payload.is_empty() {
        writer.write_all(&message.payload)?;
    }
    Ok(())
}

/// Encodes a message to an owned buffer.
pub fn encode_to_vec(message: &Message) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + message.payload.len());
    encode_to(message, &mut buf)?;
    Ok(buf)
}

/// Decodes one message from a reader.
pub fn decode_from<R: Read>(reader: &mut R) -> Result<Message> {
    let mut header_buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_buf)?;
    let header = Header::decode(&header_buf)?;

    check_section(header.metadata_size as usize)?;
    check_section(header.payload_size as usize)?;

    let mut metadata_bytes = vec![0u8; header.metadata_size as usize];
    reader.read_exact(&mut metadata_bytes)?;

    let mut payload = vec![0u8; header.payload_size as usize];
    reader.read_exact(&mut payload)?;

    assemble(header, metadata_bytes, payload)
}

/// Encodes a message to an async writer and flushes it.
pub async fn encode_to_async<W: AsyncWrite + Unpin>(message: &Message, writer: &mut W) -> Result<()> {
    let (header, metadata_bytes) = prepare(message)?;
    writer.write_all(&header).await?;
    if !metadata_bytes.is_empty() {
        writer.write_all(&metadata_bytes).await?;
    }
    if !message.payload.is_empty() {
        writer.write_all(&message.payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Decodes one message from an async reader.
pub async fn decode_from_async<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    let mut header_buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_buf).await?;
    let header = Header::decode(&header_buf)?;

    check_section(header.metadata_size as usize)?;
    check_section(header.payload_size as usize)?;

    let mut metadata_bytes = vec![0u8; header.metadata_size as usize];
    reader.read_exact(&mut metadata_bytes).await?;

    let mut payload = vec![0u8; header.payload_size as usize];
    reader.read_exact(&mut payload).await?;

    assemble(header, metadata_bytes, payload)
}
