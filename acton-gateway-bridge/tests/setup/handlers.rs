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
use std::sync::Arc;

use acton_gateway_bridge::prelude::*;

/// Answers every request with an empty, successful reply.
pub struct EmptyReplies;

#[async_trait]
impl CallbackHandler for EmptyReplies {
    async fn handle(
        &self,
        bridge: Arc<Bridge>,
        request: Box<dyn BridgeMessage>,
    ) -> anyhow::Result<Box<dyn BridgeMessage>> {
        Ok(bridge.reply_to(request.as_ref(), None)?)
    }
}

/// Fails every request.
pub struct Failing;

#[async_trait]
impl CallbackHandler for Failing {
    async fn handle(
        &self,
        _bridge: Arc<Bridge>,
        request: Box<dyn BridgeMessage>,
    ) -> anyhow::Result<Box<dyn BridgeMessage>> {
        anyhow::bail!("no handler for {}", request.message_type())
    }
}

/// Starts an activity per `ActivityInvokeRequest`.
///
/// Each activity leaves the activity registry on its first callback, then
/// answers it.
pub struct SingleCallbackActivities;

#[async_trait]
impl CallbackHandler for SingleCallbackActivities {
    async fn handle(
        &self,
        bridge: Arc<Bridge>,
        request: Box<dyn BridgeMessage>,
    ) -> anyhow::Result<Box<dyn BridgeMessage>> {
        let invoke = downcast_message::<ActivityInvokeRequest>(request)?;
        let (context_id, mut inbox) =
            bridge.start_activity(invoke.header.client_id, invoke.activity)?;

        let execution = Arc::clone(&bridge);
        tokio::spawn(async move {
            let callback = inbox.recv().await;
            // Leave the registry before answering so later callbacks miss.
            let _ = execution.finish_activity(context_id);
            if let Some(callback) = callback {
                let (callback_request, slot) = callback.into_parts();
                if let Ok(reply) = execution.reply_to(callback_request.as_ref(), None) {
                    let _ = slot.send(reply);
                }
            }
        });

        let mut reply = ActivityInvokeReply {
            pending: true,
            ..Default::default()
        };
        reply.header.context_id = context_id;
        Ok(Box::new(reply))
    }
}
