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

//! Handles stored in the identity registries.

use derive_new::new;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::common::BridgeError;
use crate::message::{ExecutionKind, ReplayStatus};
use crate::traits::BridgeMessage;

/// A gateway callback delivered to a running execution.
///
/// The execution answers through [`Callback::reply`]; the dispatcher stamps the
/// correlation ids and sends the frame.
#[derive(Debug)]
pub struct Callback {
    message: Box<dyn BridgeMessage>,
    reply: oneshot::Sender<Box<dyn BridgeMessage>>,
}

impl Callback {
    /// The callback request.
    #[must_use]
    pub fn message(&self) -> &dyn BridgeMessage {
        self.message.as_ref()
    }

    /// Splits the callback into its request and the reply slot.
    #[must_use]
    pub fn into_parts(self) -> (Box<dyn BridgeMessage>, oneshot::Sender<Box<dyn BridgeMessage>>) {
        (self.message, self.reply)
    }

    /// Answers the callback. Returns `false` if nobody is waiting any more.
    pub fn reply(self, reply: Box<dyn BridgeMessage>) -> bool {
        self.reply.send(reply).is_ok()
    }
}

/// Receiving side of an execution's callback inbox.
pub type CallbackInbox = mpsc::Receiver<Callback>;

/// An in-flight workflow or activity execution.
///
/// Cloning yields another handle to the same execution.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    kind: ExecutionKind,
    client_id: i64,
    type_name: String,
    replay_status: ReplayStatus,
    cancel_token: CancellationToken,
    callbacks: mpsc::Sender<Callback>,
}

impl ExecutionContext {
    /// Creates a context and the inbox its execution reads callbacks from.
    #[must_use]
    pub fn new(
        kind: ExecutionKind,
        client_id: i64,
        type_name: impl Into<String>,
        replay_status: ReplayStatus,
        buffer: usize,
    ) -> (Self, CallbackInbox) {
        let (callbacks, inbox) = mpsc::channel(buffer.max(1));
        let context = Self {
            kind,
            client_id,
            type_name: type_name.into(),
            replay_status,
            cancel_token: CancellationToken::new(),
            callbacks,
        };
        (context, inbox)
    }

    /// Workflow or activity.
    #[must_use]
    pub const fn kind(&self) -> ExecutionKind {
        self.kind
    }

    /// Client connection the execution runs under.
    #[must_use]
    pub const fn client_id(&self) -> i64 {
        self.client_id
    }

    /// Registered workflow or activity type.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Replay status as last reported by the gateway.
    #[must_use]
    pub const fn replay_status(&self) -> ReplayStatus {
        self.replay_status
    }

    /// Records a new replay status.
    pub fn set_replay_status(&mut self, status: ReplayStatus) {
        self.replay_status = status;
    }

    /// Token cancelled when the execution is torn down.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Whether both handles refer to the same execution.
    #[must_use]
    pub fn same_execution(&self, other: &Self) -> bool {
        self.callbacks.same_channel(&other.callbacks)
    }

    /// Hands a callback to the execution and waits for its answer.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Cancelled`] if the execution stopped reading its inbox
    /// or dropped the callback unanswered.
    pub async fn deliver(
        &self,
        message: Box<dyn BridgeMessage>,
    ) -> Result<Box<dyn BridgeMessage>, BridgeError> {
        let (reply, answer) = oneshot::channel();
        self.callbacks
            .send(Callback { message, reply })
            .await
            .map_err(|_| BridgeError::Cancelled("execution finished".to_string()))?;
        answer
            .await
            .map_err(|_| BridgeError::Cancelled("callback dropped".to_string()))
    }
}

/// A polling worker started on the gateway.
#[derive(new, Debug, Clone)]
pub struct WorkerHandle {
    /// Client connection that started the worker.
    pub client_id: i64,
    /// Worker id assigned by the gateway.
    pub gateway_worker_id: i64,
    /// Engine domain.
    pub domain: String,
    /// Task list polled.
    pub task_list: String,
    #[new(default)]
    cancel_token: CancellationToken,
}

impl WorkerHandle {
    /// Token cancelled when the worker stops.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

/// A logical gateway session multiplexed over the transport.
#[derive(new, Debug, Clone)]
pub struct ClientConnection {
    /// Human-readable label for logs.
    pub label: String,
    #[new(default)]
    cancel_token: CancellationToken,
}

impl ClientConnection {
    /// Token cancelled when the client disconnects.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}
