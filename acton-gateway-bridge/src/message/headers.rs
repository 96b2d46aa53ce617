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

//! Field sets shared by whole families of messages.
//!
//! Message kinds embed one of these headers instead of inheriting from a base
//! message. Each header writes its own keys and delegates to the header it
//! embeds first, so a context-addressed reply carries every base reply field.

use std::fmt;

use super::{PropertyBag, PropertyField, ProxyMessage};
use crate::common::BridgeError;

/// Property keys used by the headers.
pub mod keys {
    /// Correlation id of a request and its reply.
    pub const REQUEST_ID: &str = "RequestId";
    /// Logical client connection the message belongs to.
    pub const CLIENT_ID: &str = "ClientId";
    /// Execution addressed by a context-scoped message.
    pub const CONTEXT_ID: &str = "ContextId";
    /// Optional remote error sub-structure on replies.
    pub const ERROR: &str = "Error";
    /// Error kind inside the error sub-structure.
    pub const ERROR_KIND: &str = "Kind";
    /// Error message inside the error sub-structure.
    pub const ERROR_MESSAGE: &str = "Message";
    /// Remote stack trace inside the error sub-structure.
    pub const ERROR_REMOTE_STACK: &str = "RemoteStack";
}

/// An application or business error reported by the gateway in a reply.
///
/// Remote faults are surfaced to callers as part of the resolved reply, not
/// as a transport failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyError {
    /// Error kind, e.g. `"EntityNotExists"` or a [`BridgeError::code`].
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Stack captured by the remote side, when it sends one.
    pub remote_stack: Option<String>,
}

impl ReplyError {
    /// Creates an error with a kind and message.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            remote_stack: None,
        }
    }

    /// Attaches a remote stack.
    #[must_use]
    pub fn with_remote_stack(mut self, stack: impl Into<String>) -> Self {
        self.remote_stack = Some(stack.into());
        self
    }

    fn to_structure(&self) -> ProxyMessage {
        let mut structure = ProxyMessage::structure();
        let bag = structure.properties_mut();
        self.kind.write_field(bag, keys::ERROR_KIND);
        self.message.write_field(bag, keys::ERROR_MESSAGE);
        self.remote_stack.write_field(bag, keys::ERROR_REMOTE_STACK);
        structure
    }

    fn from_structure(structure: &ProxyMessage) -> Result<Self, BridgeError> {
        let bag = structure.properties();
        Ok(Self {
            kind: String::read_field(bag, keys::ERROR_KIND)?,
            message: String::read_field(bag, keys::ERROR_MESSAGE)?,
            remote_stack: Option::<String>::read_field(bag, keys::ERROR_REMOTE_STACK)?,
        })
    }
}

impl fmt::Display for ReplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<&BridgeError> for ReplyError {
    fn from(err: &BridgeError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

impl PropertyField for Option<ReplyError> {
    fn read_field(bag: &PropertyBag, key: &str) -> Result<Self, BridgeError> {
        bag.get_message(key)?
            .map(ReplyError::from_structure)
            .transpose()
    }

    fn write_field(&self, bag: &mut PropertyBag, key: &str) {
        if let Some(error) = self {
            bag.set(key, error.to_structure());
        }
    }
}

/// Whether the gateway is replaying a workflow's history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ReplayStatus {
    /// Not reported.
    #[default]
    Unspecified,
    /// Executing new history.
    NotReplaying,
    /// Replaying recorded history.
    Replaying,
}

impl ReplayStatus {
    /// Wire value.
    #[must_use]
    pub const fn to_int(self) -> i64 {
        match self {
            Self::Unspecified => 0,
            Self::NotReplaying => 1,
            Self::Replaying => 2,
        }
    }

    /// Parses the wire value; unknown values map to `Unspecified`.
    #[must_use]
    pub const fn from_int(value: i64) -> Self {
        match value {
            1 => Self::NotReplaying,
            2 => Self::Replaying,
            _ => Self::Unspecified,
        }
    }
}

impl PropertyField for ReplayStatus {
    fn read_field(bag: &PropertyBag, key: &str) -> Result<Self, BridgeError> {
        Ok(Self::from_int(bag.get_int(key)?))
    }

    fn write_field(&self, bag: &mut PropertyBag, key: &str) {
        bag.set(key, self.to_int());
    }
}

/// A reusable field set embedded in message kinds.
pub trait Header: Clone + Default + fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Reads the header's fields from a property bag.
    fn read_from(bag: &PropertyBag) -> Result<Self, BridgeError>;

    /// Writes the header's fields into a property bag.
    fn copy_fields_into(&self, bag: &mut PropertyBag);

    /// Correlation id.
    fn request_id(&self) -> i64;

    /// Sets the correlation id.
    fn set_request_id(&mut self, request_id: i64);

    /// Logical client connection id.
    fn client_id(&self) -> i64;

    /// Sets the client connection id.
    fn set_client_id(&mut self, client_id: i64);

    /// Context id for execution-scoped messages.
    fn context_id(&self) -> Option<i64> {
        None
    }

    /// Sets the context id. Headers without one ignore it.
    fn set_context_id(&mut self, _context_id: i64) {}

    /// Remote error carried by a reply.
    fn error(&self) -> Option<&ReplyError> {
        None
    }

    /// Sets the remote error. Ignored by request headers.
    fn set_error(&mut self, _error: Option<ReplyError>) {}
}

/// Fields every request carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeader {
    /// Assigned by the operation correlator before the request is sent.
    pub request_id: i64,
    /// Logical client connection.
    pub client_id: i64,
}

impl Header for RequestHeader {
    fn read_from(bag: &PropertyBag) -> Result<Self, BridgeError> {
        Ok(Self {
            request_id: i64::read_field(bag, keys::REQUEST_ID)?,
            client_id: i64::read_field(bag, keys::CLIENT_ID)?,
        })
    }

    fn copy_fields_into(&self, bag: &mut PropertyBag) {
        self.request_id.write_field(bag, keys::REQUEST_ID);
        self.client_id.write_field(bag, keys::CLIENT_ID);
    }

    fn request_id(&self) -> i64 {
        self.request_id
    }

    fn set_request_id(&mut self, request_id: i64) {
        self.request_id = request_id;
    }

    fn client_id(&self) -> i64 {
        self.client_id
    }

    fn set_client_id(&mut self, client_id: i64) {
        self.client_id = client_id;
    }
}

/// Fields every reply carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyHeader {
    /// The request id being answered.
    pub request_id: i64,
    /// Logical client connection.
    pub client_id: i64,
    /// Remote fault, if the gateway reported one.
    pub error: Option<ReplyError>,
}

impl Header for ReplyHeader {
    fn read_from(bag: &PropertyBag) -> Result<Self, BridgeError> {
        Ok(Self {
            request_id: i64::read_field(bag, keys::REQUEST_ID)?,
            client_id: i64::read_field(bag, keys::CLIENT_ID)?,
            error: Option::<ReplyError>::read_field(bag, keys::ERROR)?,
        })
    }

    fn copy_fields_into(&self, bag: &mut PropertyBag) {
        self.request_id.write_field(bag, keys::REQUEST_ID);
        self.client_id.write_field(bag, keys::CLIENT_ID);
        self.error.write_field(bag, keys::ERROR);
    }

    fn request_id(&self) -> i64 {
        self.request_id
    }

    fn set_request_id(&mut self, request_id: i64) {
        self.request_id = request_id;
    }

    fn client_id(&self) -> i64 {
        self.client_id
    }

    fn set_client_id(&mut self, client_id: i64) {
        self.client_id = client_id;
    }

    fn error(&self) -> Option<&ReplyError> {
        self.error.as_ref()
    }

    fn set_error(&mut self, error: Option<ReplyError>) {
        self.error = error;
    }
}

/// Request fields plus the context id of the addressed execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextRequestHeader {
    /// Base request fields.
    pub request: RequestHeader,
    /// Execution the request addresses.
    pub context_id: i64,
}

impl Header for ContextRequestHeader {
    fn read_from(bag: &PropertyBag) -> Result<Self, BridgeError> {
        Ok(Self {
            request: RequestHeader::read_from(bag)?,
            context_id: i64::read_field(bag, keys::CONTEXT_ID)?,
        })
    }

    fn copy_fields_into(&self, bag: &mut PropertyBag) {
        self.request.copy_fields_into(bag);
        self.context_id.write_field(bag, keys::CONTEXT_ID);
    }

    fn request_id(&self) -> i64 {
        self.request.request_id
    }

    fn set_request_id(&mut self, request_id: i64) {
        self.request.request_id = request_id;
    }

    fn client_id(&self) -> i64 {
        self.request.client_id
    }

    fn set_client_id(&mut self, client_id: i64) {
        self.request.client_id = client_id;
    }

    fn context_id(&self) -> Option<i64> {
        Some(self.context_id)
    }

    fn set_context_id(&mut self, context_id: i64) {
        self.context_id = context_id;
    }
}

/// Reply fields plus the context id of the execution that replied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextReplyHeader {
    /// Base reply fields.
    pub reply: ReplyHeader,
    /// Execution the reply belongs to.
    pub context_id: i64,
}

impl Header for ContextReplyHeader {
    fn read_from(bag: &PropertyBag) -> Result<Self, BridgeError> {
        Ok(Self {
            reply: ReplyHeader::read_from(bag)?,
            context_id: i64::read_field(bag, keys::CONTEXT_ID)?,
        })
    }

    fn copy_fields_into(&self, bag: &mut PropertyBag) {
        self.reply.copy_fields_into(bag);
        self.context_id.write_field(bag, keys::CONTEXT_ID);
    }

    fn request_id(&self) -> i64 {
        self.reply.request_id
    }

    fn set_request_id(&mut self, request_id: i64) {
        self.reply.request_id = request_id;
    }

    fn client_id(&self) -> i64 {
        self.reply.client_id
    }

    fn set_client_id(&mut self, client_id: i64) {
        self.reply.client_id = client_id;
    }

    fn context_id(&self) -> Option<i64> {
        Some(self.context_id)
    }

    fn set_context_id(&mut self, context_id: i64) {
        self.context_id = context_id;
    }

    fn error(&self) -> Option<&ReplyError> {
        self.reply.error.as_ref()
    }

    fn set_error(&mut self, error: Option<ReplyError>) {
        self.reply.error = error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_reply_header_carries_base_fields() {
        let header = ContextReplyHeader {
            reply: ReplyHeader {
                request_id: 9,
                client_id: 2,
                error: Some(ReplyError::new("Cancelled", "stopped").with_remote_stack("at x")),
            },
            context_id: 77,
        };

        let mut bag = PropertyBag::new();
        header.copy_fields_into(&mut bag);

        let keys: Vec<&str> = bag.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["RequestId", "ClientId", "Error", "ContextId"]);

        let base = ReplyHeader::read_from(&bag).unwrap();
        assert_eq!(base, header.reply);
        assert_eq!(ContextReplyHeader::read_from(&bag).unwrap(), header);
    }

    #[test]
    fn test_request_header_ignores_errors() {
        let mut header = RequestHeader::default();
        header.set_error(Some(ReplyError::new("x", "y")));
        assert!(header.error().is_none());
        assert!(header.context_id().is_none());
    }

    #[test]
    fn test_reply_error_from_bridge_error() {
        let err = BridgeError::NotFound {
            registry: "activities",
            id: 5,
        };
        let reply_error = ReplyError::from(&err);
        assert_eq!(reply_error.kind, "NOT_FOUND");
        assert_eq!(reply_error.message, "No entry 5 in activities");
        assert!(reply_error.remote_stack.is_none());
    }

    #[test]
    fn test_error_field_with_wrong_kind() {
        let mut bag = PropertyBag::new();
        bag.set(keys::ERROR, "flat string");
        assert!(matches!(
            ReplyHeader::read_from(&bag),
            Err(BridgeError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_replay_status_wire_values() {
        assert_eq!(ReplayStatus::from_int(2), ReplayStatus::Replaying);
        assert_eq!(ReplayStatus::from_int(42), ReplayStatus::Unspecified);
        assert_eq!(ReplayStatus::NotReplaying.to_int(), 1);
    }
}
