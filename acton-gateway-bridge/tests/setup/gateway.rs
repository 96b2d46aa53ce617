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
use std::time::Duration;

use acton_gateway_bridge::message::{read_message, write_message, MAX_FRAME_SIZE};
use acton_gateway_bridge::prelude::*;
use tokio::io::{AsyncWriteExt, DuplexStream};

/// How long a test waits for the bridge to send something.
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// The gateway's end of an in-memory transport.
pub struct FakeGateway {
    stream: DuplexStream,
    types: MessageTypeRegistry,
}

impl FakeGateway {
    /// Starts a bridge with default configuration over an in-memory duplex.
    pub fn start<H: CallbackHandler>(handler: H) -> (Self, BridgeHandle) {
        Self::start_with(BridgeConfig::default(), handler)
    }

    /// Starts a bridge with `config` over an in-memory duplex.
    pub fn start_with<H: CallbackHandler>(
        config: BridgeConfig,
        handler: H,
    ) -> (Self, BridgeHandle) {
        let (near, far) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(near);
        let handle = spawn(config, reader, writer, handler);
        let gateway = Self {
            stream: far,
            types: MessageTypeRegistry::with_catalog(),
        };
        (gateway, handle)
    }

    /// Sends a message to the bridge.
    pub async fn send(&mut self, message: &dyn BridgeMessage) -> anyhow::Result<()> {
        write_message(&mut self.stream, &message.to_proxy(), Format::Binary).await?;
        Ok(())
    }

    /// Writes raw bytes to the bridge.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receives the next message the bridge sent.
    pub async fn recv(&mut self) -> anyhow::Result<Box<dyn BridgeMessage>> {
        let read = read_message(&mut self.stream, MAX_FRAME_SIZE);
        let (envelope, _) = tokio::time::timeout(RECV_TIMEOUT, read).await??;
        Ok(self.types.decode(&envelope)?)
    }

    /// Receives the next message and downcasts it to `M`.
    pub async fn recv_as<M: MessageKind>(&mut self) -> anyhow::Result<M> {
        let message = self.recv().await?;
        Ok(downcast_message::<M>(message)?)
    }

    /// Whether the bridge has closed its side of the transport.
    pub async fn is_closed(&mut self) -> bool {
        matches!(
            tokio::time::timeout(
                RECV_TIMEOUT,
                read_message(&mut self.stream, MAX_FRAME_SIZE)
            )
            .await,
            Ok(Err(BridgeError::ConnectionClosed))
        )
    }
}
