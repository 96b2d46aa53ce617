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

//! Ordered, typed key/value container carried by every message.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ProxyMessage;
use crate::common::BridgeError;

/// The declared kind of a property value. The byte form is written to the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    /// UTF-8 string.
    String,
    /// Raw byte sequence.
    Bytes,
    /// 64-bit signed integer.
    Int,
    /// Boolean.
    Bool,
    /// Nested message.
    Message,
}

impl PropertyKind {
    /// Wire byte for [`PropertyKind::String`].
    pub const STRING_BYTE: u8 = 0x01;
    /// Wire byte for [`PropertyKind::Bytes`].
    pub const BYTES_BYTE: u8 = 0x02;
    /// Wire byte for [`PropertyKind::Int`].
    pub const INT_BYTE: u8 = 0x03;
    /// Wire byte for [`PropertyKind::Bool`].
    pub const BOOL_BYTE: u8 = 0x04;
    /// Wire byte for [`PropertyKind::Message`].
    pub const MESSAGE_BYTE: u8 = 0x05;

    /// Convert kind to wire byte.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::String => Self::STRING_BYTE,
            Self::Bytes => Self::BYTES_BYTE,
            Self::Int => Self::INT_BYTE,
            Self::Bool => Self::BOOL_BYTE,
            Self::Message => Self::MESSAGE_BYTE,
        }
    }

    /// Parse kind from wire byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            Self::STRING_BYTE => Some(Self::String),
            Self::BYTES_BYTE => Some(Self::Bytes),
            Self::INT_BYTE => Some(Self::Int),
            Self::BOOL_BYTE => Some(Self::Bool),
            Self::MESSAGE_BYTE => Some(Self::Message),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Message => "message",
        };
        f.write_str(name)
    }
}

/// A single property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// 64-bit integer.
    Int(i64),
    /// Boolean.
    Bool(bool),
    /// Nested message (used for sub-structures such as reply errors).
    Message(Box<ProxyMessage>),
}

impl PropertyValue {
    /// The declared kind of this value.
    #[must_use]
    pub const fn kind(&self) -> PropertyKind {
        match self {
            Self::String(_) => PropertyKind::String,
            Self::Bytes(_) => PropertyKind::Bytes,
            Self::Int(_) => PropertyKind::Int,
            Self::Bool(_) => PropertyKind::Bool,
            Self::Message(_) => PropertyKind::Message,
        }
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<&[u8]> for PropertyValue {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<ProxyMessage> for PropertyValue {
    fn from(value: ProxyMessage) -> Self {
        Self::Message(Box::new(value))
    }
}

/// Ordered property container.
///
/// Iteration order is insertion order so encoded frames are byte-stable.
/// Setting an existing key replaces its value in place. Typed getters resolve
/// absent keys to a zero value (empty string/bytes, `0`, `false`) because
/// replies frequently omit fields; a key stored with a different kind is a
/// [`BridgeError::TypeMismatch`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyBag {
    entries: Vec<(String, PropertyValue)>,
}

impl PropertyBag {
    /// Creates an empty bag.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Sets `key` to `value`, keeping the original position if the key exists.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Appends `key` without looking for an existing entry.
    ///
    /// The caller guarantees `key` is not present yet.
    pub(crate) fn push(&mut self, key: String, value: PropertyValue) {
        self.entries.push((key, value));
    }

    /// Returns the first key that occurs more than once, if any.
    pub(crate) fn duplicate_key(&self) -> Option<&str> {
        let mut seen = HashSet::with_capacity(self.entries.len());
        self.entries
            .iter()
            .map(|(k, _)| k.as_str())
            .find(|k| !seen.insert(*k))
    }

    /// Returns the raw value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Removes and returns the value stored under `key`.
    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Returns `true` if `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the bag holds no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates properties in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn mismatch(key: &str, expected: PropertyKind, actual: &PropertyValue) -> BridgeError {
        BridgeError::TypeMismatch {
            key: key.to_string(),
            expected,
            actual: actual.kind(),
        }
    }

    /// Reads a string property, absent → `None`.
    pub fn get_optional_string(&self, key: &str) -> Result<Option<String>, BridgeError> {
        match self.get(key) {
            None => Ok(None),
            Some(PropertyValue::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(Self::mismatch(key, PropertyKind::String, other)),
        }
    }

    /// Reads a string property, absent → empty string.
    pub fn get_string(&self, key: &str) -> Result<String, BridgeError> {
        Ok(self.get_optional_string(key)?.unwrap_or_default())
    }

    /// Reads a bytes property, absent → `None`.
    pub fn get_optional_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, BridgeError> {
        match self.get(key) {
            None => Ok(None),
            Some(PropertyValue::Bytes(b)) => Ok(Some(b.clone())),
            Some(other) => Err(Self::mismatch(key, PropertyKind::Bytes, other)),
        }
    }

    /// Reads a bytes property, absent → empty.
    pub fn get_bytes(&self, key: &str) -> Result<Vec<u8>, BridgeError> {
        Ok(self.get_optional_bytes(key)?.unwrap_or_default())
    }

    /// Reads an integer property, absent → `0`.
    pub fn get_int(&self, key: &str) -> Result<i64, BridgeError> {
        match self.get(key) {
            None => Ok(0),
            Some(PropertyValue::Int(i)) => Ok(*i),
            Some(other) => Err(Self::mismatch(key, PropertyKind::Int, other)),
        }
    }

    /// Reads a boolean property, absent → `false`.
    pub fn get_bool(&self, key: &str) -> Result<bool, BridgeError> {
        match self.get(key) {
            None => Ok(false),
            Some(PropertyValue::Bool(b)) => Ok(*b),
            Some(other) => Err(Self::mismatch(key, PropertyKind::Bool, other)),
        }
    }

    /// Reads a nested message property, absent → `None`.
    pub fn get_message(&self, key: &str) -> Result<Option<&ProxyMessage>, BridgeError> {
        match self.get(key) {
            None => Ok(None),
            Some(PropertyValue::Message(m)) => Ok(Some(m)),
            Some(other) => Err(Self::mismatch(key, PropertyKind::Message, other)),
        }
    }
}

/// A Rust type that can be stored under a single property key.
///
/// Message kinds are built from fields implementing this trait, which keeps
/// the untyped bag out of application code.
pub trait PropertyField: Sized {
    /// Reads the field from `bag`, applying the zero-value rule for absent keys.
    fn read_field(bag: &PropertyBag, key: &str) -> Result<Self, BridgeError>;

    /// Writes the field into `bag`. Optional fields that are `None` write nothing.
    fn write_field(&self, bag: &mut PropertyBag, key: &str);
}

impl PropertyField for String {
    fn read_field(bag: &PropertyBag, key: &str) -> Result<Self, BridgeError> {
        bag.get_string(key)
    }

    fn write_field(&self, bag: &mut PropertyBag, key: &str) {
        bag.set(key, self.as_str());
    }
}

impl PropertyField for Vec<u8> {
    fn read_field(bag: &PropertyBag, key: &str) -> Result<Self, BridgeError> {
        bag.get_bytes(key)
    }

    fn write_field(&self, bag: &mut PropertyBag, key: &str) {
        bag.set(key, self.as_slice());
    }
}

impl PropertyField for i64 {
    fn read_field(bag: &PropertyBag, key: &str) -> Result<Self, BridgeError> {
        bag.get_int(key)
    }

    fn write_field(&self, bag: &mut PropertyBag, key: &str) {
        bag.set(key, *self);
    }
}

impl PropertyField for bool {
    fn read_field(bag: &PropertyBag, key: &str) -> Result<Self, BridgeError> {
        bag.get_bool(key)
    }

    fn write_field(&self, bag: &mut PropertyBag, key: &str) {
        bag.set(key, *self);
    }
}

impl PropertyField for Option<String> {
    fn read_field(bag: &PropertyBag, key: &str) -> Result<Self, BridgeError> {
        bag.get_optional_string(key)
    }

    fn write_field(&self, bag: &mut PropertyBag, key: &str) {
        if let Some(value) = self {
            bag.set(key, value.as_str());
        }
    }
}

impl PropertyField for Option<Vec<u8>> {
    fn read_field(bag: &PropertyBag, key: &str) -> Result<Self, BridgeError> {
        bag.get_optional_bytes(key)
    }

    fn write_field(&self, bag: &mut PropertyBag, key: &str) {
        if let Some(value) = self {
            bag.set(key, value.as_slice());
        }
    }
}
