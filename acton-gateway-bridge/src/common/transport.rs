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

//! Connecting a bridge to the gateway socket.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::info;

use crate::common::{Bridge, BridgeConfig, BridgeError, Dispatcher, DispatcherStats};
use crate::traits::CallbackHandler;

/// A running bridge and its dispatcher task.
#[derive(Debug)]
pub struct BridgeHandle {
    bridge: Arc<Bridge>,
    stats: Arc<DispatcherStats>,
    task: JoinHandle<Result<(), BridgeError>>,
}

impl BridgeHandle {
    /// The shared bridge, for issuing calls and managing executions.
    #[must_use]
    pub fn bridge(&self) -> Arc<Bridge> {
        Arc::clone(&self.bridge)
    }

    /// Dispatcher counters.
    #[must_use]
    pub fn stats(&self) -> Arc<DispatcherStats> {
        Arc::clone(&self.stats)
    }

    /// Request the dispatcher to stop.
    pub fn stop(&self) {
        self.bridge.shutdown();
    }

    /// Check if the dispatcher has been asked to stop.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.bridge.shutdown_token().is_cancelled()
    }

    /// Waits for the dispatcher to finish.
    ///
    /// # Errors
    ///
    /// The dispatcher's own error, or [`BridgeError::Io`] if its task panicked.
    pub async fn join(self) -> Result<(), BridgeError> {
        self.task
            .await
            .map_err(|e| BridgeError::Io(format!("Dispatcher task failed: {e}")))?
    }
}

/// Runs a bridge over an already-connected reader and writer.
pub fn spawn<R, W, H>(config: BridgeConfig, reader: R, writer: W, handler: H) -> BridgeHandle
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    H: CallbackHandler,
{
    let (bridge, outbound) = Bridge::channel(config);
    let dispatcher = Dispatcher::new(Arc::clone(&bridge), handler);
    let stats = dispatcher.stats();
    let task = tokio::spawn(dispatcher.run(reader, writer, outbound));
    BridgeHandle {
        bridge,
        stats,
        task,
    }
}

/// Opens the gateway's Unix socket at [`BridgeConfig::socket_path`].
///
/// # Errors
///
/// [`BridgeError::Io`] if the socket cannot be reached.
#[cfg(unix)]
pub async fn connect(config: &BridgeConfig) -> Result<tokio::net::UnixStream, BridgeError> {
    let socket_path = config.socket_path();
    let stream = tokio::net::UnixStream::connect(&socket_path)
        .await
        .map_err(|e| {
            BridgeError::Io(format!(
                "Failed to connect to gateway at {}: {}",
                socket_path.display(),
                e
            ))
        })?;
    info!("Connected to gateway at: {}", socket_path.display());
    Ok(stream)
}

/// Connects to the gateway and starts dispatching.
///
/// # Errors
///
/// See [`connect`].
#[cfg(unix)]
pub async fn launch<H: CallbackHandler>(
    config: BridgeConfig,
    handler: H,
) -> Result<BridgeHandle, BridgeError> {
    let stream = connect(&config).await?;
    let (reader, writer) = stream.into_split();
    Ok(spawn(config, reader, writer, handler))
}
