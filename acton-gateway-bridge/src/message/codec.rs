/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Frame codec for the gateway transport.
//!
//! Every message crosses the transport as one length-prefixed frame.
//!
//! # Wire Format
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ Body Length (4 bytes, big-endian u32, excludes header)        │
//! ├───────────────────────────────────────────────────────────────┤
//! │ Format (1 byte)                                               │
//! │   0x01 = Binary (see the envelope body layout)                │
//! │   0x02 = JSON                                                 │
//! ├───────────────────────────────────────────────────────────────┤
//! │ Body (encoding depends on format)                             │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! A frame that cannot be understood is still consumed in full, so the
//! reader stays aligned on the next frame.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::ProxyMessage;
use crate::common::BridgeError;

/// Bytes in a frame header.
pub const HEADER_SIZE: usize = 5;

/// Maximum frame body size (64 MiB hard limit).
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Body encoding of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// The compact big-endian envelope layout.
    #[default]
    Binary,
    /// JSON, for debugging and tooling.
    Json,
}

impl Format {
    /// Format byte for the binary layout.
    pub const BINARY_BYTE: u8 = 0x01;
    /// Format byte for JSON.
    pub const JSON_BYTE: u8 = 0x02;

    /// Convert format to wire byte.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Binary => Self::BINARY_BYTE,
            Self::Json => Self::JSON_BYTE,
        }
    }

    /// Parse format from wire byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            Self::BINARY_BYTE => Some(Self::Binary),
            Self::JSON_BYTE => Some(Self::Json),
            _ => None,
        }
    }

    /// Encode an envelope body in this format.
    ///
    /// # Errors
    ///
    /// Returns an error if a length does not fit the wire format or JSON
    /// serialization fails.
    pub fn encode(self, message: &ProxyMessage) -> Result<Vec<u8>, BridgeError> {
        match self {
            Self::Binary => message.encode(),
            Self::Json => Ok(serde_json::to_vec(message)?),
        }
    }

    /// Decode an envelope body in this format.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Decode`] for a malformed body.
    pub fn decode(self, bytes: &[u8]) -> Result<ProxyMessage, BridgeError> {
        match self {
            Self::Binary => ProxyMessage::decode(bytes),
            Self::Json => {
                let message: ProxyMessage = serde_json::from_slice(bytes)?;
                message.validate()?;
                Ok(message)
            }
        }
    }
}

/// Encode a complete frame, header included.
///
/// # Errors
///
/// Returns an error if the body cannot be encoded or exceeds [`MAX_FRAME_SIZE`].
pub fn encode_frame(message: &ProxyMessage, format: Format) -> Result<Vec<u8>, BridgeError> {
    let body = format.encode(message)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(BridgeError::FrameTooLarge {
            size: body.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    let length = u32::try_from(body.len()).map_err(|_| BridgeError::FrameTooLarge {
        size: body.len(),
        max: MAX_FRAME_SIZE,
    })?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.push(format.to_byte());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Read a complete frame from the stream.
///
/// Returns the format and the raw body.
///
/// # Errors
///
/// - [`BridgeError::ConnectionClosed`] when the stream ends, even mid-frame.
/// - [`BridgeError::FrameTooLarge`] when the body exceeds `max_size`; the body
///   is discarded first.
/// - [`BridgeError::Decode`] for an unknown format byte; the body is consumed.
pub async fn read_frame<R>(
    reader: &mut R,
    max_size: usize,
) -> Result<(Format, Vec<u8>), BridgeError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await?;

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let format_byte = header[4];

    let limit = max_size.min(MAX_FRAME_SIZE);
    if length > limit {
        let mut excess = (&mut *reader).take(length as u64);
        let skipped = tokio::io::copy(&mut excess, &mut tokio::io::sink()).await?;
        if skipped < length as u64 {
            return Err(BridgeError::ConnectionClosed);
        }
        return Err(BridgeError::FrameTooLarge {
            size: length,
            max: limit,
        });
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;

    let format = Format::from_byte(format_byte).ok_or_else(|| {
        BridgeError::Decode(format!("Unknown frame format: {format_byte:#04x}"))
    })?;

    Ok((format, body))
}

/// Write a pre-encoded frame and flush.
///
/// # Errors
///
/// Returns an I/O error if the write fails.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), BridgeError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read and decode one envelope.
///
/// # Errors
///
/// See [`read_frame`] and [`Format::decode`].
pub async fn read_message<R>(
    reader: &mut R,
    max_size: usize,
) -> Result<(ProxyMessage, Format), BridgeError>
where
    R: AsyncRead + Unpin,
{
    let (format, body) = read_frame(reader, max_size).await?;
    Ok((format.decode(&body)?, format))
}

/// Encode and write one envelope.
///
/// # Errors
///
/// See [`encode_frame`] and [`write_frame`].
pub async fn write_message<W>(
    writer: &mut W,
    message: &ProxyMessage,
    format: Format,
) -> Result<(), BridgeError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message, format)?;
    write_frame(writer, &frame).await
}
