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

//! Message envelope, property bag, wire codec, and the message catalogue.

pub mod catalog;
mod codec;
mod envelope;
mod headers;
mod message_type;
mod property_bag;
mod type_registry;

pub use codec::{
    encode_frame, read_frame, read_message, write_frame, write_message, Format, HEADER_SIZE,
    MAX_FRAME_SIZE,
};
pub use envelope::{ProxyMessage, MAX_NESTING_DEPTH};
pub use headers::{
    keys, ContextReplyHeader, ContextRequestHeader, Header, ReplayStatus, ReplyError,
    ReplyHeader, RequestHeader,
};
pub use message_type::{ExecutionKind, MessageType};
pub use property_bag::{PropertyBag, PropertyField, PropertyKind, PropertyValue};
pub use type_registry::MessageTypeRegistry;
