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

//! Correlation, registries, the bridge object, and the transport dispatcher.

pub use bridge::{Bridge, OutboundFrame, Teardown, WorkerStart};
pub use config::BridgeConfig;
pub use context::{Callback, CallbackInbox, ClientConnection, ExecutionContext, WorkerHandle};
pub use correlator::{
    CorrelatorStats, OperationCorrelator, PendingOperation, ReplyResult, Resolution,
};
pub use dispatcher::{Dispatcher, DispatcherStats};
pub use error::BridgeError;
pub use registry::IdentityRegistry;
pub use transport::{spawn, BridgeHandle};
#[cfg(unix)]
pub use transport::{connect, launch};

/// The per-process bridge object.
mod bridge;
/// Configuration loading with XDG-compliant paths.
pub mod config;
/// Registry handles for executions, workers, and clients.
mod context;
/// Request/reply correlation.
mod correlator;
/// Frame routing.
mod dispatcher;
/// Crate error type.
mod error;
/// Generic id-keyed registries.
mod registry;
/// Socket connection and task wiring.
mod transport;
