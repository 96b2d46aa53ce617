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

//! Request/reply correlation.
//!
//! Every outbound request is registered under its request id before it is
//! sent. The entry leaves the pending table exactly once: when its reply is
//! resolved, when its deadline passes, or when it is cancelled. Whoever removes
//! the entry under the table lock owns the transition; everyone else backs off.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::common::BridgeError;
use crate::message::MessageType;
use crate::traits::BridgeMessage;

/// What a waiter receives: the typed reply or the reason there is none.
pub type ReplyResult = Result<Box<dyn BridgeMessage>, BridgeError>;

type Completion = oneshot::Sender<ReplyResult>;

struct PendingEntry {
    client_id: i64,
    expected_reply: MessageType,
    deadline: Instant,
    timeout: Duration,
    completion: Completion,
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<i64, PendingEntry>,
    /// Set by [`OperationCorrelator::cancel_all`]; refuses new registrations.
    closed: Option<String>,
}

struct CorrelatorInner {
    next_request_id: AtomicI64,
    table: Mutex<PendingTable>,
    stats: CorrelatorStats,
}

impl CorrelatorInner {
    fn take(&self, request_id: i64) -> Option<PendingEntry> {
        self.table.lock().entries.remove(&request_id)
    }
}

/// Counters for the pending-operation table.
#[derive(Debug, Default)]
pub struct CorrelatorStats {
    /// Operations registered.
    pub registered: AtomicUsize,
    /// Operations resolved with their reply.
    pub resolved: AtomicUsize,
    /// Operations that hit their deadline.
    pub timed_out: AtomicUsize,
    /// Operations cancelled, individually, per client, in bulk, or abandoned.
    pub cancelled: AtomicUsize,
    /// Replies that found no pending operation.
    pub orphaned: AtomicUsize,
    /// Replies whose type did not match the request's expected reply.
    pub mismatched: AtomicUsize,
}

impl CorrelatorStats {
    /// Get the number of registered operations.
    #[must_use]
    pub fn registered(&self) -> usize {
        self.registered.load(Ordering::Relaxed)
    }

    /// Get the number of resolved operations.
    #[must_use]
    pub fn resolved(&self) -> usize {
        self.resolved.load(Ordering::Relaxed)
    }

    /// Get the number of timed-out operations.
    #[must_use]
    pub fn timed_out(&self) -> usize {
        self.timed_out.load(Ordering::Relaxed)
    }

    /// Get the number of cancelled operations.
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Get the number of orphaned replies.
    #[must_use]
    pub fn orphaned(&self) -> usize {
        self.orphaned.load(Ordering::Relaxed)
    }

    /// Get the number of mismatched replies.
    #[must_use]
    pub fn mismatched(&self) -> usize {
        self.mismatched.load(Ordering::Relaxed)
    }
}

/// How an inbound reply was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The waiter received the reply.
    Delivered,
    /// The waiter received a [`BridgeError::ProtocolMismatch`].
    Mismatched,
    /// No pending operation had this request id; the reply was discarded.
    Orphaned,
}

/// Pairs outbound requests with their replies.
///
/// Cloning is cheap; every clone shares the same pending table and id counter.
#[derive(Clone)]
pub struct OperationCorrelator {
    inner: Arc<CorrelatorInner>,
}

impl Default for OperationCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OperationCorrelator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.inner.table.lock();
        f.debug_struct("OperationCorrelator")
            .field("pending", &table.entries.len())
            .field("closed", &table.closed)
            .finish()
    }
}

impl OperationCorrelator {
    /// Creates an empty correlator whose first request id is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CorrelatorInner {
                next_request_id: AtomicI64::new(0),
                table: Mutex::new(PendingTable::default()),
                stats: CorrelatorStats::default(),
            }),
        }
    }

    /// Issues the next request id. Ids are never reused for the life of the correlator.
    #[must_use]
    pub fn next_request_id(&self) -> i64 {
        self.inner.next_request_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Registers a pending operation not tied to any client connection.
    ///
    /// # Errors
    ///
    /// See [`OperationCorrelator::register_for_client`].
    pub fn register(
        &self,
        request_id: i64,
        expected_reply: MessageType,
        timeout: Duration,
    ) -> Result<PendingOperation, BridgeError> {
        self.register_for_client(request_id, 0, expected_reply, timeout)
    }

    /// Registers a pending operation owned by `client_id`.
    ///
    /// The deadline is fixed here, at registration.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::DuplicateRequestId`] if the id is already pending.
    /// - [`BridgeError::Cancelled`] if the correlator has been closed by
    ///   [`OperationCorrelator::cancel_all`].
    pub fn register_for_client(
        &self,
        request_id: i64,
        client_id: i64,
        expected_reply: MessageType,
        timeout: Duration,
    ) -> Result<PendingOperation, BridgeError> {
        let (completion, receiver) = oneshot::channel();
        let created_at = Instant::now();
        let deadline = created_at + timeout;

        {
            let mut table = self.inner.table.lock();
            if let Some(reason) = &table.closed {
                return Err(BridgeError::Cancelled(reason.clone()));
            }
            match table.entries.entry(request_id) {
                Entry::Occupied(_) => {
                    error!(request_id, "Request id registered twice");
                    return Err(BridgeError::DuplicateRequestId(request_id));
                }
                Entry::Vacant(slot) => {
                    slot.insert(PendingEntry {
                        client_id,
                        expected_reply,
                        deadline,
                        timeout,
                        completion,
                    });
                }
            }
        }

        self.inner.stats.registered.fetch_add(1, Ordering::Relaxed);
        trace!(request_id, client_id, %expected_reply, ?timeout, "Registered pending operation");

        Ok(PendingOperation {
            request_id,
            expected_reply,
            created_at,
            deadline,
            timeout,
            cancel_token: CancellationToken::new(),
            receiver,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Waits for a pending operation. Same as [`PendingOperation::wait`].
    pub async fn wait(&self, operation: PendingOperation) -> ReplyResult {
        operation.wait().await
    }

    /// Delivers a reply to the operation waiting on `request_id`.
    ///
    /// A reply with no pending operation is logged and dropped. A reply of
    /// the wrong type resolves the operation with
    /// [`BridgeError::ProtocolMismatch`].
    pub fn resolve(&self, request_id: i64, reply: Box<dyn BridgeMessage>) -> Resolution {
        let actual = reply.message_type();
        let Some(entry) = self.inner.take(request_id) else {
            self.inner.stats.orphaned.fetch_add(1, Ordering::Relaxed);
            warn!(request_id, message_type = %actual, "Discarding reply with no pending operation");
            return Resolution::Orphaned;
        };

        if actual != entry.expected_reply {
            self.inner.stats.mismatched.fetch_add(1, Ordering::Relaxed);
            warn!(
                request_id,
                expected = %entry.expected_reply,
                %actual,
                "Reply type does not match request"
            );
            let _ = entry.completion.send(Err(BridgeError::ProtocolMismatch {
                request_id,
                expected: entry.expected_reply,
                actual,
            }));
            return Resolution::Mismatched;
        }

        self.inner.stats.resolved.fetch_add(1, Ordering::Relaxed);
        trace!(
            request_id,
            client_id = entry.client_id,
            message_type = %actual,
            "Resolved pending operation"
        );
        let _ = entry.completion.send(Ok(reply));
        Resolution::Delivered
    }

    /// Cancels one pending operation. Returns `false` if it was not pending.
    pub fn cancel(&self, request_id: i64, reason: &str) -> bool {
        let Some(entry) = self.inner.take(request_id) else {
            return false;
        };
        self.inner.stats.cancelled.fetch_add(1, Ordering::Relaxed);
        debug!(request_id, reason, "Cancelled pending operation");
        let _ = entry
            .completion
            .send(Err(BridgeError::Cancelled(reason.to_string())));
        true
    }

    /// Cancels every pending operation and refuses all later registrations.
    ///
    /// The table is closed and drained under one lock acquisition, so a
    /// concurrent registration either lands before the drain and is cancelled
    /// by it, or observes the closed table and fails. Returns the number of
    /// operations cancelled by this call.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let drained: Vec<(i64, PendingEntry)> = {
            let mut table = self.inner.table.lock();
            if table.closed.is_none() {
                table.closed = Some(reason.to_string());
            }
            table.entries.drain().collect()
        };

        let count = drained.len();
        for (request_id, entry) in drained {
            trace!(request_id, reason, "Cancelling pending operation");
            let _ = entry
                .completion
                .send(Err(BridgeError::Cancelled(reason.to_string())));
        }
        self.inner.stats.cancelled.fetch_add(count, Ordering::Relaxed);
        debug!(count, reason, "Cancelled all pending operations");
        count
    }

    /// Cancels the pending operations of one client connection.
    pub fn cancel_client(&self, client_id: i64, reason: &str) -> usize {
        let drained: Vec<PendingEntry> = {
            let mut table = self.inner.table.lock();
            let ids: Vec<i64> = table
                .entries
                .iter()
                .filter(|(_, entry)| entry.client_id == client_id)
                .map(|(id, _)| *id)
                .collect();
            ids.iter()
                .filter_map(|id| table.entries.remove(id))
                .collect()
        };

        let count = drained.len();
        for entry in drained {
            let _ = entry
                .completion
                .send(Err(BridgeError::Cancelled(reason.to_string())));
        }
        self.inner.stats.cancelled.fetch_add(count, Ordering::Relaxed);
        if count > 0 {
            debug!(client_id, count, reason, "Cancelled client operations");
        }
        count
    }

    /// Times out every operation whose deadline has passed.
    ///
    /// Covers operations nobody is awaiting. Returns the number expired.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(i64, PendingEntry)> = {
            let mut table = self.inner.table.lock();
            let ids: Vec<i64> = table
                .entries
                .iter()
                .filter(|(_, entry)| entry.deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| table.entries.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        let count = expired.len();
        for (request_id, entry) in expired {
            debug!(request_id, "Pending operation expired");
            let _ = entry.completion.send(Err(BridgeError::Timeout {
                request_id,
                timeout: entry.timeout,
            }));
        }
        self.inner.stats.timed_out.fetch_add(count, Ordering::Relaxed);
        count
    }

    /// Whether [`OperationCorrelator::cancel_all`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.table.lock().closed.is_some()
    }

    /// The reason the correlator was closed with, if it was.
    #[must_use]
    pub fn closed_reason(&self) -> Option<String> {
        self.inner.table.lock().closed.clone()
    }

    /// Number of operations still pending.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.table.lock().entries.len()
    }

    /// Whether `request_id` is still pending.
    #[must_use]
    pub fn contains(&self, request_id: i64) -> bool {
        self.inner.table.lock().entries.contains_key(&request_id)
    }

    /// Correlation counters.
    #[must_use]
    pub fn stats(&self) -> &CorrelatorStats {
        &self.inner.stats
    }
}

enum Expiry {
    Cancelled,
    TimedOut,
}

/// The caller's side of a registered request.
///
/// Dropping it without waiting cancels the operation.
pub struct PendingOperation {
    request_id: i64,
    expected_reply: MessageType,
    created_at: Instant,
    deadline: Instant,
    timeout: Duration,
    cancel_token: CancellationToken,
    receiver: oneshot::Receiver<ReplyResult>,
    inner: Arc<CorrelatorInner>,
}

impl fmt::Debug for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation")
            .field("request_id", &self.request_id)
            .field("expected_reply", &self.expected_reply)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl PendingOperation {
    /// The correlated request id.
    #[must_use]
    pub const fn request_id(&self) -> i64 {
        self.request_id
    }

    /// The reply type this operation accepts.
    #[must_use]
    pub const fn expected_reply(&self) -> MessageType {
        self.expected_reply
    }

    /// When the operation was registered.
    #[must_use]
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the operation times out.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// A token that cancels the local wait when triggered.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Waits until the operation is resolved, times out, or is cancelled.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Timeout`] when the deadline passes first.
    /// - [`BridgeError::Cancelled`] on cancellation, locally or through the correlator.
    /// - [`BridgeError::ProtocolMismatch`] when the reply had the wrong type.
    pub async fn wait(mut self) -> ReplyResult {
        let expiry = tokio::select! {
            biased;
            result = &mut self.receiver => return Self::settle(result),
            () = self.cancel_token.cancelled() => Expiry::Cancelled,
            () = tokio::time::sleep_until(self.deadline) => Expiry::TimedOut,
        };

        // A resolver may have taken the entry between the wake-up and here.
        let Some(entry) = self.inner.take(self.request_id) else {
            return Self::settle((&mut self.receiver).await);
        };
        drop(entry);

        match expiry {
            Expiry::Cancelled => {
                self.inner.stats.cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(request_id = self.request_id, "Pending operation cancelled by caller");
                Err(BridgeError::Cancelled("cancelled".to_string()))
            }
            Expiry::TimedOut => {
                self.inner.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                debug!(
                    request_id = self.request_id,
                    timeout = ?self.timeout,
                    "Pending operation timed out"
                );
                Err(BridgeError::Timeout {
                    request_id: self.request_id,
                    timeout: self.timeout,
                })
            }
        }
    }

    fn settle(result: Result<ReplyResult, oneshot::error::RecvError>) -> ReplyResult {
        result.unwrap_or_else(|_| Err(BridgeError::Cancelled("abandoned".to_string())))
    }
}

impl Drop for PendingOperation {
    fn drop(&mut self) {
        if self.inner.take(self.request_id).is_some() {
            self.inner.stats.cancelled.fetch_add(1, Ordering::Relaxed);
            trace!(request_id = self.request_id, "Pending operation abandoned");
        }
    }
}
