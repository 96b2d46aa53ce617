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

//! Message correlation and execution-context routing between an in-process
//! workflow runtime and an out-of-process workflow-engine gateway.
//!
//! Application calls become typed request messages, travel to the gateway as
//! length-prefixed frames, and are paired with their asynchronous replies by
//! request id. In the other direction, the gateway calls back into the process
//! by context id, and the bridge finds the live workflow or activity execution
//! the callback is meant for.
//!
//! # Key Components
//!
//! * [`Bridge`](common::Bridge): one explicitly constructed object holding the
//!   [`OperationCorrelator`](common::OperationCorrelator), the
//!   [`MessageTypeRegistry`](message::MessageTypeRegistry), and the identity
//!   registries for activity and workflow contexts, workers, and clients.
//! * [`Dispatcher`](common::Dispatcher): reads frames from the transport and
//!   routes them to the correlator, to live executions, or to a
//!   [`CallbackHandler`](traits::CallbackHandler).
//! * [`ProxyMessage`](message::ProxyMessage) and
//!   [`PropertyBag`](message::PropertyBag): the wire envelope.
//! * [`message::catalog`]: every concrete message kind.
//!
//! # Example
//!
//! ```rust,ignore
//! use acton_gateway_bridge::prelude::*;
//!
//! let handle = launch(BridgeConfig::load(), MyHandler).await?;
//! let bridge = handle.bridge();
//! let client_id = bridge.connect_client("orders");
//!
//! let reply = bridge
//!     .call(client_id, WorkflowGetResultRequest {
//!         workflow_id: "order-17".into(),
//!         ..Default::default()
//!     })
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Correlation, registries, the bridge object, and the dispatcher.
pub mod common;

/// Envelope, property bag, codec, and message catalogue.
pub mod message;

/// Capability traits for message kinds and callback handlers.
pub mod traits;

/// A prelude module for conveniently importing the most commonly used items.
pub mod prelude {
    pub use async_trait::async_trait;

    pub use crate::common::{
        spawn, Bridge, BridgeConfig, BridgeError, BridgeHandle, Callback, CallbackInbox,
        ClientConnection, Dispatcher, ExecutionContext, IdentityRegistry, OperationCorrelator,
        PendingOperation, Resolution, Teardown, WorkerHandle, WorkerStart,
    };
    #[cfg(unix)]
    pub use crate::common::{connect, launch};
    pub use crate::message::catalog::*;
    pub use crate::message::{
        ExecutionKind, Format, Header, MessageType, MessageTypeRegistry, PropertyBag,
        PropertyValue, ProxyMessage, ReplayStatus, ReplyError,
    };
    pub use crate::traits::{
        downcast_message, BridgeMessage, CallbackHandler, MessageKind, ProxyRequest,
    };
}
