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

use async_trait::async_trait;

use crate::common::Bridge;
use crate::traits::BridgeMessage;

/// Answers gateway requests that are not routed to a live execution.
///
/// The dispatcher runs each call on its own task. The returned reply is
/// stamped with the request's correlation ids before it is sent; an `Err`
/// is reported to the gateway as a `HandlerError` reply.
///
/// Invoke requests (`WorkflowInvokeRequest`, `ActivityInvokeRequest`) arrive
/// here. A handler typically starts the execution with
/// [`Bridge::start_workflow`] or [`Bridge::start_activity`] and returns the
/// invoke reply carrying the new context id.
#[async_trait]
pub trait CallbackHandler: Send + Sync + 'static {
    /// Handles one request and produces its reply.
    async fn handle(
        &self,
        bridge: Arc<Bridge>,
        request: Box<dyn BridgeMessage>,
    ) -> anyhow::Result<Box<dyn BridgeMessage>>;
}
