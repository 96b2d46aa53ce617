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

//! Transport dispatcher: reads gateway frames and routes them.
//!
//! Three tasks cooperate per connection. A reader task turns bytes into frames,
//! the dispatch loop decodes and routes them, and a writer task drains the
//! bridge's outbound queue. Frame reads never race the loop's other branches,
//! so a sweep tick cannot cut a frame in half.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::common::bridge::OutboundFrame;
use crate::common::{Bridge, BridgeError};
use crate::message::{read_frame, write_frame, ExecutionKind, Format, MessageType, ReplyError};
use crate::traits::{BridgeMessage, CallbackHandler};

type FrameResult = Result<(Format, Vec<u8>), BridgeError>;

/// Counters for one dispatcher.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    /// Frames read off the transport.
    pub frames_received: AtomicUsize,
    /// Frames dropped as undecodable or of unknown type.
    pub frames_dropped: AtomicUsize,
    /// Replies handed to the correlator.
    pub replies_routed: AtomicUsize,
    /// Callbacks delivered to live executions.
    pub callbacks_routed: AtomicUsize,
    /// Requests handed to the callback handler.
    pub requests_handled: AtomicUsize,
    /// Errors reported back to the gateway.
    pub errors: AtomicUsize,
}

impl DispatcherStats {
    /// Get the number of frames received.
    #[must_use]
    pub fn frames_received(&self) -> usize {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Get the number of frames dropped.
    #[must_use]
    pub fn frames_dropped(&self) -> usize {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    /// Get the number of replies routed to the correlator.
    #[must_use]
    pub fn replies_routed(&self) -> usize {
        self.replies_routed.load(Ordering::Relaxed)
    }

    /// Get the number of callbacks routed to executions.
    #[must_use]
    pub fn callbacks_routed(&self) -> usize {
        self.callbacks_routed.load(Ordering::Relaxed)
    }

    /// Get the number of requests handed to the handler.
    #[must_use]
    pub fn requests_handled(&self) -> usize {
        self.requests_handled.load(Ordering::Relaxed)
    }

    /// Get the number of errors reported to the gateway.
    #[must_use]
    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }
}

enum Flow {
    Continue,
    Stop,
}

/// Routes frames from the gateway to the correlator, to live executions, or
/// to a [`CallbackHandler`].
pub struct Dispatcher {
    bridge: Arc<Bridge>,
    handler: Arc<dyn CallbackHandler>,
    stats: Arc<DispatcherStats>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("bridge", &self.bridge)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher for `bridge`.
    pub fn new<H: CallbackHandler>(bridge: Arc<Bridge>, handler: H) -> Self {
        Self {
            bridge,
            handler: Arc::new(handler),
            stats: Arc::new(DispatcherStats::default()),
        }
    }

    /// Shared counters, readable while the dispatcher runs.
    #[must_use]
    pub fn stats(&self) -> Arc<DispatcherStats> {
        Arc::clone(&self.stats)
    }

    /// Runs until the gateway closes the connection, a terminate completes,
    /// the bridge is shut down, or the bridge is aborted by a fatal error.
    ///
    /// On exit every still-pending operation is cancelled.
    ///
    /// # Errors
    ///
    /// Returns the error passed to [`Bridge::abort`], or the transport failure
    /// that ended the loop.
    pub async fn run<R, W>(
        self,
        reader: R,
        writer: W,
        outbound: mpsc::Receiver<OutboundFrame>,
    ) -> Result<(), BridgeError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let shutdown = self.bridge.shutdown_token();
        let config = self.bridge.config().clone();

        let (frame_tx, mut frames) =
            mpsc::channel::<FrameResult>(config.limits.callback_buffer.max(1));
        let reader_task = tokio::spawn(read_loop(reader, config.max_frame_size(), frame_tx));
        let writer_task = tokio::spawn(write_loop(writer, outbound, shutdown.clone()));

        let mut sweep = tokio::time::interval(config.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Dispatcher started");

        let result = loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    if let Some(e) = self.bridge.fatal_error() {
                        error!(error = %e, "Dispatcher aborted");
                        break Err(e);
                    }
                    debug!("Dispatcher received shutdown signal");
                    break Ok(());
                }

                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        break Ok(());
                    };
                    match frame {
                        Ok((format, body)) => {
                            self.stats.frames_received.fetch_add(1, Ordering::Relaxed);
                            match self.dispatch(format, &body).await {
                                Ok(Flow::Continue) => {}
                                Ok(Flow::Stop) => {
                                    shutdown.cancel();
                                    break Ok(());
                                }
                                Err(BridgeError::ConnectionClosed) => {
                                    error!("Outbound queue closed; dispatcher stopping");
                                    break Err(BridgeError::ConnectionClosed);
                                }
                                Err(e) => {
                                    warn!(error = %e, "Failed to handle frame");
                                }
                            }
                        }
                        Err(BridgeError::ConnectionClosed) => {
                            debug!("Gateway closed the connection");
                            break Ok(());
                        }
                        Err(e @ (BridgeError::Decode(_) | BridgeError::FrameTooLarge { .. })) => {
                            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                            warn!(error = %e, "Dropping unreadable frame");
                        }
                        Err(e) => {
                            error!(error = %e, "Transport read failed");
                            break Err(e);
                        }
                    }
                }

                _ = sweep.tick() => {
                    let expired = self.bridge.correlator().sweep_expired();
                    if expired > 0 {
                        debug!(expired, "Swept expired pending operations");
                    }
                }
            }
        };

        let cancelled = self.bridge.correlator().cancel_all("connection closed");
        if cancelled > 0 {
            debug!(cancelled, "Cancelled pending operations on dispatcher exit");
        }

        shutdown.cancel();
        reader_task.abort();
        match tokio::time::timeout(config.drain_timeout(), writer_task).await {
            Ok(Ok(Err(e))) => warn!(error = %e, "Writer finished with error"),
            Ok(Err(e)) => warn!(error = %e, "Writer task failed"),
            Err(_) => warn!("Writer did not drain before the drain timeout"),
            Ok(Ok(Ok(()))) => {}
        }

        info!("Dispatcher stopped");
        result
    }

    async fn dispatch(&self, format: Format, body: &[u8]) -> Result<Flow, BridgeError> {
        let message = match format
            .decode(body)
            .and_then(|envelope| self.bridge.types().decode(&envelope))
        {
            Ok(message) => message,
            Err(e) => {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Dropping frame");
                return Ok(Flow::Continue);
            }
        };

        let message_type = message.message_type();
        trace!(
            request_id = message.request_id(),
            client_id = message.client_id(),
            %message_type,
            "Received message"
        );

        if message_type.is_reply() {
            self.stats.replies_routed.fetch_add(1, Ordering::Relaxed);
            self.bridge
                .correlator()
                .resolve(message.request_id(), message);
            return Ok(Flow::Continue);
        }

        match message_type {
            MessageType::HeartbeatRequest => {
                let reply = self.bridge.reply_to(message.as_ref(), None)?;
                self.bridge.send(reply.as_ref()).await?;
            }
            MessageType::DisconnectRequest => {
                let error = self
                    .bridge
                    .disconnect_client(message.client_id(), "disconnect")
                    .err()
                    .map(|e| ReplyError::from(&e));
                let reply = self.bridge.reply_to(message.as_ref(), error)?;
                self.bridge.send(reply.as_ref()).await?;
            }
            MessageType::TerminateRequest => {
                self.terminate(message.as_ref()).await?;
                return Ok(Flow::Stop);
            }
            _ => match message_type.callback_target() {
                Some(kind) => self.route_callback(kind, message).await?,
                None => self.spawn_handler(message),
            },
        }
        Ok(Flow::Continue)
    }

    /// Closes the correlator, then sends the terminate reply and waits for it
    /// to reach the transport.
    async fn terminate(&self, request: &dyn BridgeMessage) -> Result<(), BridgeError> {
        let cancelled = self.bridge.terminate();
        let reply = self.bridge.reply_to(request, None)?;
        let flushed = self.bridge.send_flushed(reply.as_ref()).await?;
        if tokio::time::timeout(self.bridge.config().drain_timeout(), flushed)
            .await
            .is_err()
        {
            warn!("Terminate reply was not flushed before the drain timeout");
        }
        info!(cancelled, "Terminate reply sent");
        Ok(())
    }

    async fn route_callback(
        &self,
        kind: ExecutionKind,
        message: Box<dyn BridgeMessage>,
    ) -> Result<(), BridgeError> {
        let context_id = message.context_id().unwrap_or_default();
        let context = match self.bridge.contexts(kind).get(context_id) {
            Ok(context) => context,
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                debug!(context_id, ?kind, "Callback for unknown context");
                let reply = self.bridge.reply_to(message.as_ref(), Some(ReplyError::from(&e)))?;
                return self.bridge.send(reply.as_ref()).await;
            }
        };

        self.stats.callbacks_routed.fetch_add(1, Ordering::Relaxed);
        let bridge = Arc::clone(&self.bridge);
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            let request = message.clone_deep();
            let reply = match context.deliver(message).await {
                Ok(reply) => Ok(reply),
                Err(e) => {
                    stats.errors.fetch_add(1, Ordering::Relaxed);
                    bridge.reply_to(request.as_ref(), Some(ReplyError::from(&e)))
                }
            };
            send_reply(&bridge, request.as_ref(), reply).await;
        });
        Ok(())
    }

    fn spawn_handler(&self, message: Box<dyn BridgeMessage>) {
        self.stats.requests_handled.fetch_add(1, Ordering::Relaxed);
        let bridge = Arc::clone(&self.bridge);
        let handler = Arc::clone(&self.handler);
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            let request = message.clone_deep();
            let reply = match handler.handle(Arc::clone(&bridge), message).await {
                Ok(reply) => Ok(reply),
                Err(e) => {
                    stats.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        request_id = request.request_id(),
                        message_type = %request.message_type(),
                        error = %e,
                        "Callback handler failed"
                    );
                    bridge.reply_to(
                        request.as_ref(),
                        Some(ReplyError::new("HandlerError", e.to_string())),
                    )
                }
            };
            send_reply(&bridge, request.as_ref(), reply).await;
        });
    }
}

/// Stamps `reply` with the request's correlation ids and queues it.
async fn send_reply(
    bridge: &Bridge,
    request: &dyn BridgeMessage,
    reply: Result<Box<dyn BridgeMessage>, BridgeError>,
) {
    let mut reply = match reply {
        Ok(reply) => reply,
        Err(e) => {
            warn!(request_id = request.request_id(), error = %e, "Could not build reply");
            return;
        }
    };
    reply.correlate_with(request.request_id(), request.client_id());
    if let Some(context_id) = request.context_id() {
        reply.set_context_id(context_id);
    }
    if let Err(e) = bridge.send(reply.as_ref()).await {
        debug!(request_id = request.request_id(), error = %e, "Reply not sent");
    }
}

async fn read_loop<R>(mut reader: R, max_frame_size: usize, frames: mpsc::Sender<FrameResult>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = read_frame(&mut reader, max_frame_size).await;
        let recoverable = matches!(
            frame,
            Ok(_) | Err(BridgeError::Decode(_) | BridgeError::FrameTooLarge { .. })
        );
        if frames.send(frame).await.is_err() || !recoverable {
            break;
        }
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    shutdown: CancellationToken,
) -> Result<(), BridgeError>
where
    W: AsyncWrite + Unpin,
{
    let result = async {
        loop {
            tokio::select! {
                biased;

                frame = outbound.recv() => match frame {
                    Some(frame) => write_one(&mut writer, frame).await?,
                    None => break,
                },

                () = shutdown.cancelled() => {
                    while let Ok(frame) = outbound.try_recv() {
                        write_one(&mut writer, frame).await?;
                    }
                    break;
                }
            }
        }
        Ok::<(), BridgeError>(())
    }
    .await;

    if let Err(e) = &result {
        error!(error = %e, "Transport write failed");
        shutdown.cancel();
    }
    let _ = writer.shutdown().await;
    result
}

async fn write_one<W>(writer: &mut W, frame: OutboundFrame) -> Result<(), BridgeError>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, &frame.bytes).await?;
    if let Some(flushed) = frame.flushed {
        let _ = flushed.send(());
    }
    Ok(())
}
