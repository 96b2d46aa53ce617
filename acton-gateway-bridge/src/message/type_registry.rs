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

//! Registry mapping wire tags to message constructors.

use std::sync::Arc;

use dashmap::DashMap;

use super::{MessageType, ProxyMessage};
use crate::common::BridgeError;
use crate::traits::{BridgeMessage, MessageKind};

/// Decodes an envelope into a typed message.
type DecoderFn =
    Arc<dyn Fn(&ProxyMessage) -> Result<Box<dyn BridgeMessage>, BridgeError> + Send + Sync>;

/// Builds a default instance of a message kind.
type ConstructorFn = Arc<dyn Fn() -> Box<dyn BridgeMessage> + Send + Sync>;

#[derive(Clone)]
struct Entry {
    decode: DecoderFn,
    construct: ConstructorFn,
}

/// Maps [`MessageType`] tags to the kinds that read them.
///
/// Every frame read off the transport goes through [`MessageTypeRegistry::decode`];
/// a tag with no registered kind is rejected rather than guessed at.
///
/// # Thread Safety
///
/// The registry uses [`DashMap`] internally and is safe to register into and
/// decode from concurrently.
#[derive(Default)]
pub struct MessageTypeRegistry {
    entries: DashMap<i32, Entry>,
}

impl std::fmt::Debug for MessageTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageTypeRegistry")
            .field("registered_types", &self.entries.len())
            .finish()
    }
}

impl MessageTypeRegistry {
    /// Creates a new, empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every built-in message kind.
    #[must_use]
    pub fn with_catalog() -> Self {
        let registry = Self::new();
        super::catalog::register_all(&registry);
        registry
    }

    /// Registers a message kind under its tag, replacing any earlier kind.
    pub fn register<M: MessageKind>(&self) {
        let decode: DecoderFn = Arc::new(|message: &ProxyMessage| {
            let decoded = M::decode(message)?;
            Ok(Box::new(decoded) as Box<dyn BridgeMessage>)
        });
        let construct: ConstructorFn =
            Arc::new(|| Box::new(M::default()) as Box<dyn BridgeMessage>);

        if self
            .entries
            .insert(M::MESSAGE_TYPE.tag(), Entry { decode, construct })
            .is_some()
        {
            tracing::debug!(message_type = %M::MESSAGE_TYPE, "Replaced registered message kind");
        }
    }

    /// Returns `true` if a kind is registered for the type.
    #[must_use]
    pub fn is_registered(&self, message_type: MessageType) -> bool {
        self.entries.contains_key(&message_type.tag())
    }

    /// Number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All registered types, in tag order.
    #[must_use]
    pub fn message_types(&self) -> Vec<MessageType> {
        let mut types: Vec<MessageType> = self
            .entries
            .iter()
            .filter_map(|entry| MessageType::from_tag(*entry.key()))
            .collect();
        types.sort_by_key(|message_type| message_type.tag());
        types
    }

    /// Decodes an envelope into the kind registered for its tag.
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnknownMessageType`] for an unregistered tag, or the
    /// kind's own decode error.
    pub fn decode(&self, message: &ProxyMessage) -> Result<Box<dyn BridgeMessage>, BridgeError> {
        let decode = self
            .entries
            .get(&message.tag())
            .map(|entry| Arc::clone(&entry.decode))
            .ok_or(BridgeError::UnknownMessageType(message.tag()))?;
        decode(message)
    }

    /// Builds an empty message of the given type.
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnknownMessageType`] if the type is not registered.
    pub fn construct(
        &self,
        message_type: MessageType,
    ) -> Result<Box<dyn BridgeMessage>, BridgeError> {
        let construct = self
            .entries
            .get(&message_type.tag())
            .map(|entry| Arc::clone(&entry.construct))
            .ok_or(BridgeError::UnknownMessageType(message_type.tag()))?;
        Ok(construct())
    }
}
