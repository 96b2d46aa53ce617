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

//! The message envelope: a type tag, a property bag, and an optional payload.
//!
//! # Body Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Type Tag (i32, big-endian)                                   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Property Count (i32)                                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Properties, in insertion order:                              │
//! │   Key (i32 length + UTF-8)                                   │
//! │   Value Kind (1 byte, see PropertyKind)                      │
//! │   Value:                                                     │
//! │     string/bytes → i32 length + data                         │
//! │     int          → i64                                       │
//! │     bool         → 1 byte (0x00 / 0x01)                      │
//! │     message      → i32 length + nested body                  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Payload Length (i32, -1 when absent)                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Payload                                                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{MessageType, PropertyBag, PropertyKind, PropertyValue};
use crate::common::BridgeError;

/// Maximum depth of nested message values accepted by the decoder.
pub const MAX_NESTING_DEPTH: usize = 16;

/// A wire message: type tag, ordered properties, optional raw payload.
///
/// The tag is kept raw so a frame with an unknown tag still decodes into an
/// envelope; rejecting it is the type registry's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyMessage {
    #[serde(rename = "type")]
    tag: i32,
    #[serde(default)]
    properties: PropertyBag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Vec<u8>>,
}

impl ProxyMessage {
    /// Tag used for nested sub-structures that are not standalone messages.
    pub const STRUCTURE_TAG: i32 = 0;

    /// Creates an empty envelope of the given type.
    #[must_use]
    pub const fn new(kind: MessageType) -> Self {
        Self::with_tag(kind.tag())
    }

    /// Creates an empty envelope with a raw tag.
    #[must_use]
    pub const fn with_tag(tag: i32) -> Self {
        Self {
            tag,
            properties: PropertyBag::new(),
            payload: None,
        }
    }

    /// Creates an empty nested sub-structure.
    #[must_use]
    pub const fn structure() -> Self {
        Self::with_tag(Self::STRUCTURE_TAG)
    }

    /// The raw type tag.
    #[must_use]
    pub const fn tag(&self) -> i32 {
        self.tag
    }

    /// The message type, failing for tags outside the catalogue.
    pub fn message_type(&self) -> Result<MessageType, BridgeError> {
        MessageType::try_from(self.tag)
    }

    /// Read access to the properties.
    #[must_use]
    pub const fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    /// Write access to the properties.
    pub fn properties_mut(&mut self) -> &mut PropertyBag {
        &mut self.properties
    }

    /// The raw payload, if any.
    #[must_use]
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Replaces the payload.
    pub fn set_payload(&mut self, payload: Option<Vec<u8>>) {
        self.payload = payload;
    }

    /// Takes the payload out of the envelope.
    pub fn take_payload(&mut self) -> Option<Vec<u8>> {
        self.payload.take()
    }

    /// Encodes the envelope body.
    ///
    /// # Errors
    ///
    /// [`BridgeError::FrameTooLarge`] if any length does not fit in an `i32`.
    pub fn encode(&self) -> Result<Vec<u8>, BridgeError> {
        let mut buf = Vec::with_capacity(64);
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Appends the encoded body to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), BridgeError> {
        buf.extend_from_slice(&self.tag.to_be_bytes());
        put_len(buf, self.properties.len())?;
        for (key, value) in self.properties.iter() {
            put_bytes(buf, key.as_bytes())?;
            buf.push(value.kind().to_byte());
            match value {
                PropertyValue::String(s) => put_bytes(buf, s.as_bytes())?,
                PropertyValue::Bytes(b) => put_bytes(buf, b)?,
                PropertyValue::Int(i) => buf.extend_from_slice(&i.to_be_bytes()),
                PropertyValue::Bool(b) => buf.push(u8::from(*b)),
                PropertyValue::Message(m) => put_bytes(buf, &m.encode()?)?,
            }
        }
        match &self.payload {
            None => buf.extend_from_slice(&(-1_i32).to_be_bytes()),
            Some(payload) => put_bytes(buf, payload)?,
        }
        Ok(())
    }

    /// Decodes an envelope body produced by [`ProxyMessage::encode`].
    ///
    /// # Errors
    ///
    /// [`BridgeError::Decode`] for truncated input, invalid UTF-8, unknown value
    /// kinds, duplicate keys, excessive nesting, or trailing bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, BridgeError> {
        Self::decode_nested(bytes, 0)
    }

    /// Checks an envelope built by another decoder, such as the JSON format,
    /// against the rules [`ProxyMessage::decode`] enforces: unique keys at
    /// every level and at most [`MAX_NESTING_DEPTH`] nested messages.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Decode`] naming the first violation.
    pub fn validate(&self) -> Result<(), BridgeError> {
        self.validate_nested(0)
    }

    fn validate_nested(&self, depth: usize) -> Result<(), BridgeError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(BridgeError::Decode(format!(
                "Nested messages exceed depth {MAX_NESTING_DEPTH}"
            )));
        }
        if let Some(key) = self.properties.duplicate_key() {
            return Err(BridgeError::Decode(format!("Duplicate property '{key}'")));
        }
        for (_, value) in self.properties.iter() {
            if let PropertyValue::Message(nested) = value {
                nested.validate_nested(depth + 1)?;
            }
        }
        Ok(())
    }

    fn decode_nested(bytes: &[u8], depth: usize) -> Result<Self, BridgeError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(BridgeError::Decode(format!(
                "Nested messages exceed depth {MAX_NESTING_DEPTH}"
            )));
        }

        let mut cursor = Cursor::new(bytes);
        let tag = cursor.read_i32()?;
        let count = cursor.read_len()?;

        let mut properties = PropertyBag::new();
        let mut seen = HashSet::new();
        for _ in 0..count {
            let key = cursor.read_string()?;
            if !seen.insert(key.clone()) {
                return Err(BridgeError::Decode(format!("Duplicate property '{key}'")));
            }
            let kind_byte = cursor.read_u8()?;
            let kind = PropertyKind::from_byte(kind_byte).ok_or_else(|| {
                BridgeError::Decode(format!("Unknown value kind {kind_byte:#04x} for '{key}'"))
            })?;
            let value = match kind {
                PropertyKind::String => PropertyValue::String(cursor.read_string()?),
                PropertyKind::Bytes => PropertyValue::Bytes(cursor.read_vec()?),
                PropertyKind::Int => PropertyValue::Int(cursor.read_i64()?),
                PropertyKind::Bool => PropertyValue::Bool(cursor.read_u8()? != 0),
                PropertyKind::Message => {
                    let nested = cursor.read_slice()?;
                    PropertyValue::Message(Box::new(Self::decode_nested(nested, depth + 1)?))
                }
            };
            properties.push(key, value);
        }

        let payload_len = cursor.read_i32()?;
        let payload = match payload_len {
            -1 => None,
            len if len < 0 => {
                return Err(BridgeError::Decode(format!("Invalid payload length {len}")));
            }
            len => Some(cursor.take(len as usize)?.to_vec()),
        };

        if !cursor.is_empty() {
            return Err(BridgeError::Decode(format!(
                "{} trailing bytes after message body",
                cursor.remaining()
            )));
        }

        Ok(Self {
            tag,
            properties,
            payload,
        })
    }
}

fn put_len(buf: &mut Vec<u8>, len: usize) -> Result<(), BridgeError> {
    let len = i32::try_from(len).map_err(|_| BridgeError::FrameTooLarge {
        size: len,
        max: i32::MAX as usize,
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

fn put_bytes(buf: &mut Vec<u8>, data: &[u8]) -> Result<(), BridgeError> {
    put_len(buf, data.len())?;
    buf.extend_from_slice(data);
    Ok(())
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    const fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    const fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], BridgeError> {
        if self.remaining() < n {
            return Err(BridgeError::Decode(format!(
                "Truncated message: needed {n} bytes at offset {}, {} left",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, BridgeError> {
        Ok(self.take(1)?[0])
    }

    fn read_i32(&mut self) -> Result<i32, BridgeError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i64(&mut self) -> Result<i64, BridgeError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(i64::from_be_bytes(raw))
    }

    fn read_len(&mut self) -> Result<usize, BridgeError> {
        let len = self.read_i32()?;
        usize::try_from(len).map_err(|_| BridgeError::Decode(format!("Negative length {len}")))
    }

    fn read_slice(&mut self) -> Result<&'a [u8], BridgeError> {
        let len = self.read_len()?;
        self.take(len)
    }

    fn read_vec(&mut self) -> Result<Vec<u8>, BridgeError> {
        Ok(self.read_slice()?.to_vec())
    }

    fn read_string(&mut self) -> Result<String, BridgeError> {
        let bytes = self.read_slice()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| BridgeError::Decode(format!("Invalid UTF-8 string: {e}")))
    }
}
