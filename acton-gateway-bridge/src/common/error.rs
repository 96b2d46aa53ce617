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

//! Error type shared by every bridge component.

use std::fmt;
use std::time::Duration;

use crate::message::{MessageType, PropertyKind};

/// Errors produced while encoding, decoding, correlating, or looking up
/// bridge state.
///
/// Only [`BridgeError::DuplicateRequestId`] is fatal to a connection; every
/// other variant is scoped to a single frame, pending operation, or lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// A frame carried a type tag with no registered constructor.
    UnknownMessageType(i32),

    /// A property was read as one kind but stored as another.
    TypeMismatch {
        /// The property key.
        key: String,
        /// The kind the caller asked for.
        expected: PropertyKind,
        /// The kind actually stored.
        actual: PropertyKind,
    },

    /// A reply arrived for a request id that expected a different reply type.
    ProtocolMismatch {
        /// Request id the reply was addressed to.
        request_id: i64,
        /// Reply type declared by the request.
        expected: MessageType,
        /// Reply type that actually arrived.
        actual: MessageType,
    },

    /// A request id was registered twice. Indicates a corrupted id counter.
    DuplicateRequestId(i64),

    /// No live entry exists for the id in the named registry.
    NotFound {
        /// Registry name (`"activities"`, `"workflows"`, `"workers"`, `"clients"`).
        registry: &'static str,
        /// The id that was looked up.
        id: i64,
    },

    /// No reply arrived before the operation's deadline.
    Timeout {
        /// Request id of the expired operation.
        request_id: i64,
        /// The timeout the operation was registered with.
        timeout: Duration,
    },

    /// The operation was cancelled locally; carries the reason
    /// (`"disconnect"`, `"terminate"`, ...).
    Cancelled(String),

    /// A frame or envelope could not be decoded.
    Decode(String),

    /// A frame header announced a body larger than the permitted maximum.
    FrameTooLarge {
        /// Announced body size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The transport was closed.
    ConnectionClosed,

    /// Socket or other I/O failure.
    Io(String),
}

impl BridgeError {
    /// Returns `true` when the error means the correlation invariant itself is
    /// broken and the connection must be aborted.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::DuplicateRequestId(_))
    }

    /// Machine-readable code used as the `kind` of a reported reply error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnknownMessageType(_) => "UNKNOWN_MESSAGE_TYPE",
            Self::TypeMismatch { .. } => "TYPE_MISMATCH",
            Self::ProtocolMismatch { .. } => "PROTOCOL_MISMATCH",
            Self::DuplicateRequestId(_) => "DUPLICATE_REQUEST_ID",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Cancelled(_) => "CANCELLED",
            Self::Decode(_) => "DECODE_ERROR",
            Self::FrameTooLarge { .. } => "FRAME_TOO_LARGE",
            Self::ConnectionClosed => "CONNECTION_CLOSED",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownMessageType(tag) => write!(f, "Unknown message type: {tag}"),
            Self::TypeMismatch {
                key,
                expected,
                actual,
            } => write!(
                f,
                "Property '{key}' has kind {actual}, expected {expected}"
            ),
            Self::ProtocolMismatch {
                request_id,
                expected,
                actual,
            } => write!(
                f,
                "Request {request_id} expected reply {expected}, received {actual}"
            ),
            Self::DuplicateRequestId(id) => write!(f, "Request id {id} is already pending"),
            Self::NotFound { registry, id } => write!(f, "No entry {id} in {registry}"),
            Self::Timeout {
                request_id,
                timeout,
            } => write!(f, "Request {request_id} timed out after {timeout:?}"),
            Self::Cancelled(reason) => write!(f, "Operation cancelled: {reason}"),
            Self::Decode(e) => write!(f, "Decode error: {e}"),
            Self::FrameTooLarge { size, max } => {
                write!(f, "Frame size {size} exceeds maximum {max}")
            }
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::ConnectionClosed
        } else {
            Self::Io(err.to_string())
        }
    }
}
