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

//! The per-process bridge: correlator, type registry, and identity registries
//! behind one explicitly constructed object.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::common::{
    BridgeConfig, BridgeError, CallbackInbox, ClientConnection, ExecutionContext,
    IdentityRegistry, OperationCorrelator, WorkerHandle,
};
use crate::message::catalog::{CancelRequest, NewWorkerRequest, StopWorkerRequest};
use crate::message::{
    encode_frame, ExecutionKind, Format, MessageTypeRegistry, ReplayStatus, ReplyError,
};
use crate::traits::{downcast_message, BridgeMessage, MessageKind, ProxyRequest};

/// An encoded frame waiting for the writer task.
#[derive(Debug)]
pub struct OutboundFrame {
    pub(crate) bytes: Vec<u8>,
    pub(crate) flushed: Option<oneshot::Sender<()>>,
}

impl OutboundFrame {
    /// A frame nobody waits on.
    #[must_use]
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            flushed: None,
        }
    }

    /// A frame whose flush is acknowledged on the returned receiver.
    #[must_use]
    pub fn flushed(bytes: Vec<u8>) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                bytes,
                flushed: Some(tx),
            },
            rx,
        )
    }

    /// The encoded frame, header included.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// What [`Bridge::disconnect_client`] tore down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Teardown {
    /// Pending operations cancelled.
    pub operations: usize,
    /// Activity contexts removed.
    pub activities: usize,
    /// Workflow contexts removed.
    pub workflows: usize,
    /// Workers removed.
    pub workers: usize,
}

/// Outcome of [`Bridge::register_worker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStart {
    /// The gateway started the worker; the value is the local worker id.
    Started(i64),
    /// The gateway refused.
    Rejected(ReplyError),
}

/// Shared state of one gateway connection.
///
/// Construct one per process (or per transport) and share it as `Arc<Bridge>`.
/// Nothing here is global: dropping the bridge drops every registry with it.
pub struct Bridge {
    config: BridgeConfig,
    format: Format,
    correlator: OperationCorrelator,
    types: MessageTypeRegistry,
    activities: IdentityRegistry<ExecutionContext>,
    workflows: IdentityRegistry<ExecutionContext>,
    workers: IdentityRegistry<WorkerHandle>,
    clients: IdentityRegistry<ClientConnection>,
    outbound: mpsc::Sender<OutboundFrame>,
    terminating: AtomicBool,
    fatal: Mutex<Option<BridgeError>>,
    shutdown: CancellationToken,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("format", &self.format)
            .field("correlator", &self.correlator)
            .field("activities", &self.activities.len())
            .field("workflows", &self.workflows.len())
            .field("workers", &self.workers.len())
            .field("clients", &self.clients.len())
            .field("terminating", &self.is_terminating())
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Creates a bridge that queues frames on `outbound`.
    #[must_use]
    pub fn new(config: BridgeConfig, outbound: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            config,
            format: Format::Binary,
            correlator: OperationCorrelator::new(),
            types: MessageTypeRegistry::with_catalog(),
            activities: IdentityRegistry::new("activities"),
            workflows: IdentityRegistry::new("workflows"),
            workers: IdentityRegistry::new("workers"),
            clients: IdentityRegistry::new("clients"),
            outbound,
            terminating: AtomicBool::new(false),
            fatal: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Creates a bridge together with the receiving end of its outbound queue.
    #[must_use]
    pub fn channel(config: BridgeConfig) -> (Arc<Self>, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(config.limits.outbound_buffer.max(1));
        (Arc::new(Self::new(config, tx)), rx)
    }

    /// Encodes outbound frames in `format` instead of the binary layout.
    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Frame format used for outbound messages.
    #[must_use]
    pub const fn format(&self) -> Format {
        self.format
    }

    /// The pending-operation correlator.
    #[must_use]
    pub const fn correlator(&self) -> &OperationCorrelator {
        &self.correlator
    }

    /// The message type registry.
    #[must_use]
    pub const fn types(&self) -> &MessageTypeRegistry {
        &self.types
    }

    /// Live activity executions.
    #[must_use]
    pub const fn activities(&self) -> &IdentityRegistry<ExecutionContext> {
        &self.activities
    }

    /// Live workflow executions.
    #[must_use]
    pub const fn workflows(&self) -> &IdentityRegistry<ExecutionContext> {
        &self.workflows
    }

    /// Started workers.
    #[must_use]
    pub const fn workers(&self) -> &IdentityRegistry<WorkerHandle> {
        &self.workers
    }

    /// Logical client connections.
    #[must_use]
    pub const fn clients(&self) -> &IdentityRegistry<ClientConnection> {
        &self.clients
    }

    /// The registry addressed by callbacks for `kind`.
    #[must_use]
    pub const fn contexts(&self, kind: ExecutionKind) -> &IdentityRegistry<ExecutionContext> {
        match kind {
            ExecutionKind::Activity => &self.activities,
            ExecutionKind::Workflow => &self.workflows,
        }
    }

    /// Token cancelled once the bridge has shut down.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Whether a terminate has been processed.
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Clients
    // ------------------------------------------------------------------

    /// Registers a logical client connection and returns its id.
    pub fn connect_client(&self, label: impl Into<String>) -> i64 {
        let label = label.into();
        let client_id = self.clients.add(ClientConnection::new(label.clone()));
        info!(client_id, label = %label, "Client connected");
        client_id
    }

    /// Tears down one client: its pending operations, executions, and workers.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotFound`] if the client is not connected.
    pub fn disconnect_client(&self, client_id: i64, reason: &str) -> Result<Teardown, BridgeError> {
        let client = self.clients.remove(client_id)?;
        client.cancel_token().cancel();

        let operations = self.correlator.cancel_client(client_id, reason);
        let activities = self
            .activities
            .remove_where(|context| context.client_id() == client_id);
        let workflows = self
            .workflows
            .remove_where(|context| context.client_id() == client_id);
        let workers = self.workers.remove_where(|worker| worker.client_id == client_id);

        for (_, context) in activities.iter().chain(workflows.iter()) {
            context.cancel_token().cancel();
        }
        for (_, worker) in &workers {
            worker.cancel_token().cancel();
        }

        let teardown = Teardown {
            operations,
            activities: activities.len(),
            workflows: workflows.len(),
            workers: workers.len(),
        };
        info!(client_id, reason, ?teardown, "Client disconnected");
        Ok(teardown)
    }

    /// Cancels everything in flight and refuses further calls.
    ///
    /// The correlator is closed before this returns, so no operation can be
    /// registered afterwards. Returns the number of operations cancelled.
    pub fn terminate(&self) -> usize {
        self.terminating.store(true, Ordering::SeqCst);
        let cancelled = self.correlator.cancel_all("terminate");

        for (_, context) in self.activities.drain().into_iter().chain(self.workflows.drain()) {
            context.cancel_token().cancel();
        }
        for (_, worker) in self.workers.drain() {
            worker.cancel_token().cancel();
        }
        for (_, client) in self.clients.drain() {
            client.cancel_token().cancel();
        }

        info!(cancelled, "Bridge terminating");
        cancelled
    }

    /// Stops the dispatcher without a terminate exchange.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Aborts the connection after an error that breaks correlation.
    ///
    /// Every pending operation is cancelled with reason `"aborted"`, later
    /// calls are refused, and the dispatcher exits returning `error`.
    pub fn abort(&self, error: BridgeError) {
        error!(error = %error, "Aborting connection");
        self.fatal.lock().get_or_insert(error);
        self.correlator.cancel_all("aborted");
        self.shutdown();
    }

    /// The error the connection was aborted with, if any.
    #[must_use]
    pub fn fatal_error(&self) -> Option<BridgeError> {
        self.fatal.lock().clone()
    }

    /// Adds `handle` to `registry` unless the bridge is terminating.
    ///
    /// [`Bridge::terminate`] raises its flag before draining, so an entry
    /// added concurrently is either drained there or removed again here.
    fn admit<H>(&self, registry: &IdentityRegistry<H>, handle: H) -> Result<i64, BridgeError>
    where
        H: Clone + Send + Sync + 'static,
    {
        let refused = || BridgeError::Cancelled("terminate".to_string());
        if self.is_terminating() {
            return Err(refused());
        }
        let id = registry.add(handle);
        if self.is_terminating() {
            let _ = registry.remove(id);
            return Err(refused());
        }
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Outbound requests
    // ------------------------------------------------------------------

    /// Sends `request` for `client_id` and waits for its typed reply, using the
    /// configured request timeout.
    ///
    /// # Errors
    ///
    /// See [`Bridge::call_with_timeout`].
    pub async fn call<R: ProxyRequest>(
        &self,
        client_id: i64,
        request: R,
    ) -> Result<R::Reply, BridgeError> {
        self.call_with_timeout(client_id, request, self.config.request_timeout())
            .await
    }

    /// Sends `request` for `client_id` and waits up to `timeout` for its reply.
    ///
    /// A remote fault is not an error here: it arrives inside the reply's
    /// `Error` field.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Cancelled`] once the bridge has terminated, aborted, or
    ///   lost its transport.
    /// - [`BridgeError::NotFound`] if the client is not connected.
    /// - [`BridgeError::DuplicateRequestId`] if the id counter collided with a
    ///   pending operation; the connection is aborted.
    /// - [`BridgeError::ConnectionClosed`] if the frame could not be queued.
    /// - [`BridgeError::Timeout`], [`BridgeError::Cancelled`], or
    ///   [`BridgeError::ProtocolMismatch`] from the wait.
    pub async fn call_with_timeout<R: ProxyRequest>(
        &self,
        client_id: i64,
        mut request: R,
        timeout: Duration,
    ) -> Result<R::Reply, BridgeError> {
        if let Some(reason) = self.correlator.closed_reason() {
            return Err(BridgeError::Cancelled(reason));
        }

        let request_id = self.correlator.next_request_id();
        request.correlate_with(request_id, client_id);

        let operation = match self.correlator.register_for_client(
            request_id,
            client_id,
            <R::Reply as MessageKind>::MESSAGE_TYPE,
            timeout,
        ) {
            Ok(operation) => operation,
            Err(e) if e.is_fatal() => {
                self.abort(e.clone());
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        // Checked after registering: a disconnect that removes the client
        // later also cancels this operation.
        if !self.clients.contains(client_id) {
            drop(operation);
            return Err(BridgeError::NotFound {
                registry: self.clients.name(),
                id: client_id,
            });
        }

        let frame = encode_frame(&request.encode(), self.format)?;
        if self.outbound.send(OutboundFrame::new(frame)).await.is_err() {
            drop(operation);
            debug!(request_id, client_id, "Outbound queue closed");
            return Err(BridgeError::ConnectionClosed);
        }
        trace!(request_id, client_id, message_type = %R::MESSAGE_TYPE, "Sent request");

        let reply = operation.wait().await?;
        downcast_message::<R::Reply>(reply)
    }

    /// Cancels a request locally and asks the gateway to abandon it too.
    ///
    /// Returns whether the gateway still had the operation.
    ///
    /// # Errors
    ///
    /// Any error from [`Bridge::call`] for the cancel request itself.
    pub async fn cancel_request(
        &self,
        client_id: i64,
        target_request_id: i64,
    ) -> Result<bool, BridgeError> {
        self.correlator.cancel(target_request_id, "cancelled");
        let reply = self
            .call(
                client_id,
                CancelRequest {
                    target_request_id,
                    ..Default::default()
                },
            )
            .await?;
        Ok(reply.was_cancelled)
    }

    /// Queues a message without waiting for anything.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ConnectionClosed`] if the writer is gone, or an encoding error.
    pub async fn send(&self, message: &dyn BridgeMessage) -> Result<(), BridgeError> {
        let frame = encode_frame(&message.to_proxy(), self.format)?;
        self.outbound
            .send(OutboundFrame::new(frame))
            .await
            .map_err(|_| BridgeError::ConnectionClosed)
    }

    /// Queues a message and returns a receiver that fires once it is flushed.
    ///
    /// # Errors
    ///
    /// As for [`Bridge::send`].
    pub async fn send_flushed(
        &self,
        message: &dyn BridgeMessage,
    ) -> Result<oneshot::Receiver<()>, BridgeError> {
        let frame = encode_frame(&message.to_proxy(), self.format)?;
        let (frame, flushed) = OutboundFrame::flushed(frame);
        self.outbound
            .send(frame)
            .await
            .map_err(|_| BridgeError::ConnectionClosed)?;
        Ok(flushed)
    }

    /// Builds the reply kind for `request`, correlated with it.
    ///
    /// The reply echoes the request's context id, if any, and carries `error`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Decode`] if `request` is not a request kind, or
    /// [`BridgeError::UnknownMessageType`] if its reply kind is unregistered.
    pub fn reply_to(
        &self,
        request: &dyn BridgeMessage,
        error: Option<ReplyError>,
    ) -> Result<Box<dyn BridgeMessage>, BridgeError> {
        let request_type = request.message_type();
        let reply_type = request_type
            .reply_type()
            .ok_or_else(|| BridgeError::Decode(format!("{request_type} has no reply kind")))?;

        let mut reply = self.types.construct(reply_type)?;
        reply.correlate_with(request.request_id(), request.client_id());
        if let Some(context_id) = request.context_id() {
            reply.set_context_id(context_id);
        }
        reply.set_reply_error(error);
        Ok(reply)
    }

    // ------------------------------------------------------------------
    // Executions
    // ------------------------------------------------------------------

    /// Registers a running activity and returns its context id and callback inbox.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Cancelled`] once the bridge is terminating.
    pub fn start_activity(
        &self,
        client_id: i64,
        activity_type: impl Into<String>,
    ) -> Result<(i64, CallbackInbox), BridgeError> {
        let (context, inbox) = ExecutionContext::new(
            ExecutionKind::Activity,
            client_id,
            activity_type,
            ReplayStatus::Unspecified,
            self.config.limits.callback_buffer,
        );
        let context_id = self.admit(&self.activities, context)?;
        debug!(context_id, client_id, "Activity started");
        Ok((context_id, inbox))
    }

    /// Registers a running workflow and returns its context id and callback inbox.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Cancelled`] once the bridge is terminating.
    pub fn start_workflow(
        &self,
        client_id: i64,
        workflow_type: impl Into<String>,
        replay_status: ReplayStatus,
    ) -> Result<(i64, CallbackInbox), BridgeError> {
        let (context, inbox) = ExecutionContext::new(
            ExecutionKind::Workflow,
            client_id,
            workflow_type,
            replay_status,
            self.config.limits.callback_buffer,
        );
        let context_id = self.admit(&self.workflows, context)?;
        debug!(context_id, client_id, "Workflow started");
        Ok((context_id, inbox))
    }

    /// Removes an activity once its terminal reply has been sent.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotFound`] if the context is already gone.
    pub fn finish_activity(&self, context_id: i64) -> Result<ExecutionContext, BridgeError> {
        let context = self.activities.remove(context_id)?;
        debug!(context_id, "Activity finished");
        Ok(context)
    }

    /// Removes a workflow once its terminal reply has been sent.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotFound`] if the context is already gone.
    pub fn finish_workflow(&self, context_id: i64) -> Result<ExecutionContext, BridgeError> {
        let context = self.workflows.remove(context_id)?;
        debug!(context_id, "Workflow finished");
        Ok(context)
    }

    // ------------------------------------------------------------------
    // Workers
    // ------------------------------------------------------------------

    /// Asks the gateway to start a worker and records it when it does.
    ///
    /// # Errors
    ///
    /// Any transport or correlation error from [`Bridge::call`], or
    /// [`BridgeError::Cancelled`] if the bridge terminated meanwhile.
    pub async fn register_worker(
        &self,
        client_id: i64,
        domain: impl Into<String>,
        task_list: impl Into<String>,
    ) -> Result<WorkerStart, BridgeError> {
        let domain = domain.into();
        let task_list = task_list.into();
        let reply = self
            .call(
                client_id,
                NewWorkerRequest {
                    domain: domain.clone(),
                    task_list: task_list.clone(),
                    ..Default::default()
                },
            )
            .await?;

        if let Some(error) = reply.header.error {
            return Ok(WorkerStart::Rejected(error));
        }

        let worker = WorkerHandle::new(client_id, reply.worker_id, domain, task_list);
        let worker_id = self.admit(&self.workers, worker)?;
        info!(
            worker_id,
            client_id,
            gateway_worker_id = reply.worker_id,
            "Worker started"
        );
        Ok(WorkerStart::Started(worker_id))
    }

    /// Stops a worker on the gateway and forgets it locally.
    ///
    /// Returns the gateway's error, if it reported one.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotFound`] for an unknown worker, or any error from
    /// [`Bridge::call`].
    pub async fn stop_worker(
        &self,
        worker_id: i64,
    ) -> Result<Option<ReplyError>, BridgeError> {
        let worker = self.workers.get(worker_id)?;
        let reply = self
            .call(
                worker.client_id,
                StopWorkerRequest {
                    worker_id: worker.gateway_worker_id,
                    ..Default::default()
                },
            )
            .await;

        if let Ok(removed) = self.workers.remove(worker_id) {
            removed.cancel_token().cancel();
        }
        let reply = reply?;
        info!(worker_id, "Worker stopped");
        Ok(reply.header.error)
    }
}
