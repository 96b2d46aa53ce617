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

use std::any::Any;
use std::fmt::Debug;

use dyn_clone::DynClone;

use crate::common::BridgeError;
use crate::message::{Header, MessageType, PropertyBag, ProxyMessage, ReplyError};

/// A concrete, strongly typed message kind.
///
/// Every kind has a stable [`MessageType`] tag, embeds a [`Header`] field set,
/// and converts to and from the property-bag envelope. Kinds are normally
/// declared with the crate's `bridge_message!` macro rather than by hand.
pub trait MessageKind: Clone + Debug + Default + PartialEq + Send + Sync + 'static {
    /// The wire tag of this kind.
    const MESSAGE_TYPE: MessageType;

    /// The embedded field set.
    type Header: Header;

    /// The embedded header.
    fn header(&self) -> &Self::Header;

    /// Mutable access to the embedded header.
    fn header_mut(&mut self) -> &mut Self::Header;

    /// Raw payload carried beside the properties.
    fn payload(&self) -> Option<&[u8]>;

    /// Replaces the raw payload.
    fn set_payload(&mut self, payload: Option<Vec<u8>>);

    /// Writes this message's property values (header first) into `bag`.
    fn copy_fields_into(&self, bag: &mut PropertyBag);

    /// Reads a message of this kind from a property bag.
    fn read_fields(bag: &PropertyBag) -> Result<Self, BridgeError>;

    /// Builds a fresh envelope for sending.
    fn encode(&self) -> ProxyMessage {
        let mut message = ProxyMessage::new(Self::MESSAGE_TYPE);
        MessageKind::copy_fields_into(self, message.properties_mut());
        message.set_payload(self.payload().map(<[u8]>::to_vec));
        message
    }

    /// Reads a message of this kind from an envelope.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Decode`] if the envelope carries a different tag, or any
    /// property error raised while reading fields.
    fn decode(message: &ProxyMessage) -> Result<Self, BridgeError> {
        if message.tag() != Self::MESSAGE_TYPE.tag() {
            return Err(BridgeError::Decode(format!(
                "Cannot read tag {} as {}",
                message.tag(),
                Self::MESSAGE_TYPE
            )));
        }
        let mut decoded = Self::read_fields(message.properties())?;
        decoded.set_payload(message.payload().map(<[u8]>::to_vec));
        Ok(decoded)
    }
}

/// A request kind, tied to the reply kind the gateway answers it with.
pub trait ProxyRequest: MessageKind {
    /// The reply kind expected for this request.
    type Reply: MessageKind;
}

/// Object-safe capability set shared by every message kind.
///
/// This is what the type registry produces from raw frames and what the
/// correlator hands back to waiters. A blanket implementation covers every
/// [`MessageKind`]; use [`dyn_clone::clone_box`] or
/// [`BridgeMessage::clone_deep`] for an independent copy.
pub trait BridgeMessage: DynClone + Any + Send + Sync + Debug {
    /// The wire tag.
    fn message_type(&self) -> MessageType;

    /// Correlation id.
    fn request_id(&self) -> i64;

    /// Logical client connection id.
    fn client_id(&self) -> i64;

    /// Context id, for execution-scoped messages.
    fn context_id(&self) -> Option<i64>;

    /// Remote error carried by a reply.
    fn reply_error(&self) -> Option<&ReplyError>;

    /// Stamps the correlation and client ids of the request being answered.
    fn correlate_with(&mut self, request_id: i64, client_id: i64);

    /// Sets the remote error on a reply. Requests ignore it.
    fn set_reply_error(&mut self, error: Option<ReplyError>);

    /// Sets the context id on execution-scoped messages. Others ignore it.
    fn set_context_id(&mut self, context_id: i64);

    /// Writes the message's property values into `bag`.
    fn copy_fields_into(&self, bag: &mut PropertyBag);

    /// Builds a fresh envelope for sending.
    fn to_proxy(&self) -> ProxyMessage;

    /// A deep, independent copy.
    fn clone_deep(&self) -> Box<dyn BridgeMessage>;

    /// Returns the message as [`Any`] for downcasting by reference.
    fn as_any(&self) -> &dyn Any;

    /// Converts the boxed message into [`Any`] for downcasting by value.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

dyn_clone::clone_trait_object!(BridgeMessage);

impl<T> BridgeMessage for T
where
    T: MessageKind,
{
    fn message_type(&self) -> MessageType {
        T::MESSAGE_TYPE
    }

    fn request_id(&self) -> i64 {
        Header::request_id(self.header())
    }

    fn client_id(&self) -> i64 {
        Header::client_id(self.header())
    }

    fn context_id(&self) -> Option<i64> {
        Header::context_id(self.header())
    }

    fn reply_error(&self) -> Option<&ReplyError> {
        Header::error(self.header())
    }

    fn correlate_with(&mut self, request_id: i64, client_id: i64) {
        let header = self.header_mut();
        Header::set_request_id(header, request_id);
        Header::set_client_id(header, client_id);
    }

    fn set_reply_error(&mut self, error: Option<ReplyError>) {
        Header::set_error(self.header_mut(), error);
    }

    fn set_context_id(&mut self, context_id: i64) {
        Header::set_context_id(self.header_mut(), context_id);
    }

    fn copy_fields_into(&self, bag: &mut PropertyBag) {
        MessageKind::copy_fields_into(self, bag);
    }

    fn to_proxy(&self) -> ProxyMessage {
        self.encode()
    }

    fn clone_deep(&self) -> Box<dyn BridgeMessage> {
        Box::new(self.clone())
    }

    #[inline]
    fn as_any(&self) -> &dyn Any {
        self
    }

    #[inline]
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// Downcasts a boxed message to a concrete kind.
///
/// # Errors
///
/// [`BridgeError::Decode`] if the message is not an `M`.
pub fn downcast_message<M: MessageKind>(message: Box<dyn BridgeMessage>) -> Result<M, BridgeError> {
    let actual = message.message_type();
    message
        .into_any()
        .downcast::<M>()
        .map(|concrete| *concrete)
        .map_err(|_| {
            BridgeError::Decode(format!(
                "Expected {} but received {actual}",
                M::MESSAGE_TYPE
            ))
        })
}
