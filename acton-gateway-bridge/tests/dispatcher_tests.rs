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
#![allow(dead_code, unused_doc_comments)]

use std::sync::Arc;
use std::time::Duration;

use acton_gateway_bridge::message::encode_frame;
use acton_gateway_bridge::prelude::*;

use crate::setup::gateway::FakeGateway;
use crate::setup::handlers::{EmptyReplies, Failing, SingleCallbackActivities};
use crate::setup::initialize_tracing;

mod setup;

fn heartbeat(request_id: i64) -> HeartbeatRequest {
    let mut request = HeartbeatRequest::default();
    request.header.request_id = request_id;
    request
}

/// Tests that the bridge answers gateway heartbeats itself.
///
/// **Scenario:**
/// 1. The gateway sends `HeartbeatRequest` with request id 7.
///
/// **Verification:**
/// - A `HeartbeatReply` for request id 7 comes back without an error.
#[tokio::test]
async fn test_heartbeat_is_answered() -> anyhow::Result<()> {
    initialize_tracing();
    let (mut gateway, handle) = FakeGateway::start(EmptyReplies);

    gateway.send(&heartbeat(7)).await?;
    let reply = gateway.recv_as::<HeartbeatReply>().await?;
    assert_eq!(reply.header.request_id, 7);
    assert!(reply.header.error.is_none());
    assert_eq!(handle.stats().requests_handled(), 0);
    Ok(())
}

/// Tests a full call through the transport.
///
/// **Scenario:**
/// 1. A client calls `WorkflowExecuteRequest` with an encoded argument payload.
/// 2. The gateway answers with the ids the engine assigned.
///
/// **Verification:**
/// - The gateway sees the client id, a fresh request id, and the payload.
/// - The caller receives the typed reply.
#[tokio::test]
async fn test_call_round_trip() -> anyhow::Result<()> {
    initialize_tracing();
    let (mut gateway, handle) = FakeGateway::start(EmptyReplies);
    let bridge = handle.bridge();
    let client_id = bridge.connect_client("orders");

    let caller = Arc::clone(&bridge);
    let call = tokio::spawn(async move {
        caller
            .call(
                client_id,
                WorkflowExecuteRequest {
                    workflow: "OrderWorkflow".into(),
                    domain: Some("shop".into()),
                    payload: Some(b"{\"order\":17}".to_vec()),
                    ..Default::default()
                },
            )
            .await
    });

    let request = gateway.recv_as::<WorkflowExecuteRequest>().await?;
    assert_eq!(request.header.client_id, client_id);
    assert!(request.header.request_id > 0);
    assert_eq!(request.workflow, "OrderWorkflow");
    assert_eq!(request.payload.as_deref(), Some(&b"{\"order\":17}"[..]));

    let mut reply = WorkflowExecuteReply {
        workflow_id: "order-17".into(),
        run_id: "run-1".into(),
        ..Default::default()
    };
    reply.header.request_id = request.header.request_id;
    reply.header.client_id = client_id;
    gateway.send(&reply).await?;

    let reply = call.await??;
    assert_eq!(reply.workflow_id, "order-17");
    assert_eq!(reply.run_id, "run-1");
    assert_eq!(handle.stats().replies_routed(), 1);
    Ok(())
}

/// Tests that a remote fault reaches the caller as data.
///
/// **Scenario:**
/// 1. A client calls `WorkflowCancelRequest`.
/// 2. The gateway answers with an error in the reply header.
///
/// **Verification:**
/// - The call succeeds and the reply carries the gateway's error.
#[tokio::test]
async fn test_remote_fault_is_a_reply_value() -> anyhow::Result<()> {
    initialize_tracing();
    let (mut gateway, handle) = FakeGateway::start(EmptyReplies);
    let bridge = handle.bridge();
    let client_id = bridge.connect_client("orders");

    let caller = Arc::clone(&bridge);
    let call = tokio::spawn(async move {
        caller
            .call(
                client_id,
                WorkflowCancelRequest {
                    workflow_id: "order-17".into(),
                    ..Default::default()
                },
            )
            .await
    });

    let request = gateway.recv_as::<WorkflowCancelRequest>().await?;
    let mut reply = WorkflowCancelReply::default();
    reply.header.request_id = request.header.request_id;
    reply.header.error = Some(ReplyError::new(
        "EntityNotExistsError",
        "workflow order-17 not found",
    ));
    gateway.send(&reply).await?;

    let reply = call.await??;
    let error = reply.header.error.expect("remote error");
    assert_eq!(error.kind, "EntityNotExistsError");
    assert_eq!(error.message, "workflow order-17 not found");
    Ok(())
}

/// Tests that unreadable frames are dropped without ending the connection.
///
/// **Scenario:**
/// 1. The gateway sends a frame with an unregistered type tag.
/// 2. It sends a frame with an unknown format byte.
/// 3. It sends a heartbeat.
///
/// **Verification:**
/// - The heartbeat is answered.
/// - Both bad frames are counted as dropped.
#[tokio::test]
async fn test_bad_frames_are_dropped() -> anyhow::Result<()> {
    initialize_tracing();
    let (mut gateway, handle) = FakeGateway::start(EmptyReplies);

    let unknown = encode_frame(&ProxyMessage::with_tag(999), Format::Binary)?;
    gateway.send_raw(&unknown).await?;
    gateway.send_raw(&[0, 0, 0, 2, 0x7f, 1, 2]).await?;
    gateway.send(&heartbeat(3)).await?;

    let reply = gateway.recv_as::<HeartbeatReply>().await?;
    assert_eq!(reply.header.request_id, 3);
    assert_eq!(handle.stats().frames_dropped(), 2);
    assert!(!handle.is_stopped());
    Ok(())
}

/// Tests callback routing to a live activity and rejection once it is gone.
///
/// **Scenario:**
/// 1. The gateway invokes an activity; the handler starts it.
/// 2. The gateway sends `ActivityStoppingRequest` to its context id.
/// 3. The gateway sends the same callback again after the activity finished.
///
/// **Verification:**
/// - The invoke reply carries the new context id.
/// - The first callback is answered by the execution, echoing the context id.
/// - The second is answered with a `NOT_FOUND` error.
#[tokio::test]
async fn test_callback_routing_and_stale_context() -> anyhow::Result<()> {
    initialize_tracing();
    let (mut gateway, handle) = FakeGateway::start(SingleCallbackActivities);

    let mut invoke = ActivityInvokeRequest {
        activity: "charge-card".into(),
        task_token: vec![1, 2, 3],
        ..Default::default()
    };
    invoke.header.request_id = 11;
    gateway.send(&invoke).await?;

    let started = gateway.recv_as::<ActivityInvokeReply>().await?;
    assert_eq!(started.header.reply.request_id, 11);
    assert!(started.pending);
    let context_id = started.header.context_id;
    assert!(handle.bridge().activities().contains(context_id));

    let mut stopping = ActivityStoppingRequest {
        activity_id: "act-1".into(),
        ..Default::default()
    };
    stopping.header.request.request_id = 13;
    stopping.header.context_id = context_id;
    gateway.send(&stopping).await?;

    let answered = gateway.recv_as::<ActivityStoppingReply>().await?;
    assert_eq!(answered.header.reply.request_id, 13);
    assert_eq!(answered.header.context_id, context_id);
    assert!(answered.header.reply.error.is_none());

    stopping.header.request.request_id = 15;
    gateway.send(&stopping).await?;

    let rejected = gateway.recv_as::<ActivityStoppingReply>().await?;
    assert_eq!(rejected.header.reply.request_id, 15);
    assert_eq!(rejected.header.context_id, context_id);
    let error = rejected.header.reply.error.expect("not found error");
    assert_eq!(error.kind, "NOT_FOUND");

    let stats = handle.stats();
    assert_eq!(stats.callbacks_routed(), 1);
    assert_eq!(stats.requests_handled(), 1);
    Ok(())
}

/// Tests that a failing handler still produces a reply.
///
/// **Scenario:**
/// 1. The gateway invokes a workflow; the handler returns an error.
///
/// **Verification:**
/// - The gateway receives a `WorkflowInvokeReply` with a `HandlerError`.
#[tokio::test]
async fn test_handler_error_becomes_reply_error() -> anyhow::Result<()> {
    initialize_tracing();
    let (mut gateway, handle) = FakeGateway::start(Failing);

    let mut invoke = WorkflowInvokeRequest {
        workflow_type: "OrderWorkflow".into(),
        replay_status: ReplayStatus::NotReplaying,
        ..Default::default()
    };
    invoke.header.request_id = 21;
    gateway.send(&invoke).await?;

    let reply = gateway.recv_as::<WorkflowInvokeReply>().await?;
    assert_eq!(reply.header.reply.request_id, 21);
    let error = reply.header.reply.error.expect("handler error");
    assert_eq!(error.kind, "HandlerError");
    assert!(error.message.contains("WorkflowInvokeRequest"));
    assert_eq!(handle.stats().errors(), 1);
    Ok(())
}

/// Tests the terminate exchange.
///
/// **Scenario:**
/// 1. A client call is in flight.
/// 2. The gateway sends `TerminateRequest`.
///
/// **Verification:**
/// - The in-flight call fails with `Cancelled("terminate")`.
/// - The gateway receives the terminate reply before the transport closes.
/// - The dispatcher exits cleanly.
#[tokio::test]
async fn test_terminate_cancels_pending_and_replies() -> anyhow::Result<()> {
    initialize_tracing();
    let (mut gateway, handle) = FakeGateway::start(EmptyReplies);
    let bridge = handle.bridge();
    let client_id = bridge.connect_client("orders");

    let caller = Arc::clone(&bridge);
    let call = tokio::spawn(async move {
        caller
            .call(
                client_id,
                WorkflowGetResultRequest {
                    workflow_id: "order-17".into(),
                    ..Default::default()
                },
            )
            .await
    });
    gateway.recv_as::<WorkflowGetResultRequest>().await?;

    let mut terminate = TerminateRequest::default();
    terminate.header.request_id = 31;
    gateway.send(&terminate).await?;

    let reply = gateway.recv_as::<TerminateReply>().await?;
    assert_eq!(reply.header.request_id, 31);
    assert_eq!(
        call.await?.err(),
        Some(BridgeError::Cancelled("terminate".to_string()))
    );

    handle.join().await?;
    assert!(gateway.is_closed().await);
    assert!(bridge.is_terminating());
    assert!(bridge.clients().is_empty());
    Ok(())
}

/// Tests a disconnect initiated by the gateway.
///
/// **Scenario:**
/// 1. A client call is in flight.
/// 2. The gateway sends `DisconnectRequest` for that client, twice.
///
/// **Verification:**
/// - The first disconnect is answered cleanly and the call fails with
///   `Cancelled("disconnect")`.
/// - The second is answered with a `NOT_FOUND` error.
#[tokio::test]
async fn test_gateway_disconnect_cancels_client_calls() -> anyhow::Result<()> {
    initialize_tracing();
    let (mut gateway, handle) = FakeGateway::start(EmptyReplies);
    let bridge = handle.bridge();
    let client_id = bridge.connect_client("orders");

    let caller = Arc::clone(&bridge);
    let call =
        tokio::spawn(async move { caller.call(client_id, HeartbeatRequest::default()).await });
    gateway.recv_as::<HeartbeatRequest>().await?;

    let mut disconnect = DisconnectRequest::default();
    disconnect.header.request_id = 41;
    disconnect.header.client_id = client_id;
    gateway.send(&disconnect).await?;

    let reply = gateway.recv_as::<DisconnectReply>().await?;
    assert_eq!(reply.header.request_id, 41);
    assert!(reply.header.error.is_none());
    assert_eq!(
        call.await?.err(),
        Some(BridgeError::Cancelled("disconnect".to_string()))
    );

    disconnect.header.request_id = 43;
    gateway.send(&disconnect).await?;
    let reply = gateway.recv_as::<DisconnectReply>().await?;
    assert_eq!(reply.header.error.map(|e| e.kind), Some("NOT_FOUND".to_string()));
    Ok(())
}

/// Tests losing the transport with calls in flight.
///
/// **Scenario:**
/// 1. A client call is in flight.
/// 2. The gateway end of the transport is dropped.
///
/// **Verification:**
/// - The call fails with `Cancelled("connection closed")`.
/// - The dispatcher exits without error and later calls are refused.
#[tokio::test]
async fn test_connection_loss_cancels_pending() -> anyhow::Result<()> {
    initialize_tracing();
    let (mut gateway, handle) = FakeGateway::start(EmptyReplies);
    let bridge = handle.bridge();
    let client_id = bridge.connect_client("orders");

    let caller = Arc::clone(&bridge);
    let call =
        tokio::spawn(async move { caller.call(client_id, HeartbeatRequest::default()).await });
    gateway.recv_as::<HeartbeatRequest>().await?;
    drop(gateway);

    let closed = Some(BridgeError::Cancelled("connection closed".to_string()));
    assert_eq!(call.await?.err(), closed);
    handle.join().await?;

    assert_eq!(
        bridge.call(client_id, HeartbeatRequest::default()).await.err(),
        closed
    );
    Ok(())
}

/// Tests worker registration through the gateway.
///
/// **Scenario:**
/// 1. A client registers a worker; the gateway accepts with worker id 55.
/// 2. It registers another; the gateway refuses.
///
/// **Verification:**
/// - The first yields `Started` with a local id mapped to gateway id 55.
/// - The second yields `Rejected` with the gateway's error, and no worker is recorded.
#[tokio::test]
async fn test_register_worker() -> anyhow::Result<()> {
    initialize_tracing();
    let (mut gateway, handle) = FakeGateway::start(EmptyReplies);
    let bridge = handle.bridge();
    let client_id = bridge.connect_client("workers");

    let registering = Arc::clone(&bridge);
    let start = tokio::spawn(async move {
        registering.register_worker(client_id, "shop", "orders").await
    });
    let request = gateway.recv_as::<NewWorkerRequest>().await?;
    assert_eq!(request.domain, "shop");
    assert_eq!(request.task_list, "orders");
    let mut reply = NewWorkerReply {
        worker_id: 55,
        ..Default::default()
    };
    reply.header.request_id = request.header.request_id;
    gateway.send(&reply).await?;

    let WorkerStart::Started(worker_id) = start.await?? else {
        anyhow::bail!("worker was rejected");
    };
    let worker = bridge.workers().get(worker_id)?;
    assert_eq!(worker.gateway_worker_id, 55);
    assert_eq!(worker.client_id, client_id);

    let registering = Arc::clone(&bridge);
    let start = tokio::spawn(async move {
        registering.register_worker(client_id, "shop", "missing").await
    });
    let request = gateway.recv_as::<NewWorkerRequest>().await?;
    let mut reply = NewWorkerReply::default();
    reply.header.request_id = request.header.request_id;
    reply.header.error = Some(ReplyError::new("BadRequestError", "unknown task list"));
    gateway.send(&reply).await?;

    assert_eq!(
        start.await??,
        WorkerStart::Rejected(ReplyError::new("BadRequestError", "unknown task list"))
    );
    assert_eq!(bridge.workers().len(), 1);
    Ok(())
}

/// Tests cancelling an in-flight call locally and on the gateway.
///
/// **Scenario:**
/// 1. A client call is in flight.
/// 2. The client cancels it; the gateway confirms.
///
/// **Verification:**
/// - The original call fails with `Cancelled`.
/// - The gateway receives a `CancelRequest` naming the original request id.
/// - A late reply to the original request is orphaned.
#[tokio::test]
async fn test_cancel_request() -> anyhow::Result<()> {
    initialize_tracing();
    let (mut gateway, handle) = FakeGateway::start(EmptyReplies);
    let bridge = handle.bridge();
    let client_id = bridge.connect_client("orders");

    let caller = Arc::clone(&bridge);
    let call = tokio::spawn(async move {
        caller
            .call(
                client_id,
                WorkflowGetResultRequest {
                    workflow_id: "order-17".into(),
                    ..Default::default()
                },
            )
            .await
    });
    let original = gateway.recv_as::<WorkflowGetResultRequest>().await?;
    let target = original.header.request_id;

    let canceller = Arc::clone(&bridge);
    let cancel = tokio::spawn(async move { canceller.cancel_request(client_id, target).await });
    assert_eq!(
        call.await?.err(),
        Some(BridgeError::Cancelled("cancelled".to_string()))
    );

    let request = gateway.recv_as::<CancelRequest>().await?;
    assert_eq!(request.target_request_id, target);
    let mut reply = CancelReply {
        was_cancelled: true,
        ..Default::default()
    };
    reply.header.request_id = request.header.request_id;
    gateway.send(&reply).await?;
    assert!(cancel.await??);

    let mut late = WorkflowGetResultReply::default();
    late.header.request_id = target;
    gateway.send(&late).await?;
    gateway.send(&heartbeat(99)).await?;
    gateway.recv_as::<HeartbeatReply>().await?;
    assert_eq!(bridge.correlator().stats().orphaned(), 1);
    Ok(())
}

/// Tests that a colliding request id aborts the whole connection.
///
/// **Scenario:**
/// 1. Request id 1 is already pending when a client call draws id 1.
///
/// **Verification:**
/// - The call fails with `DuplicateRequestId(1)`.
/// - The operation that held the id is cancelled with reason `aborted`.
/// - Later calls are refused, the dispatcher exits with the same error, and
///   the transport is closed.
#[tokio::test]
async fn test_duplicate_request_id_aborts_connection() -> anyhow::Result<()> {
    initialize_tracing();
    let (mut gateway, handle) = FakeGateway::start(EmptyReplies);
    let bridge = handle.bridge();
    let client_id = bridge.connect_client("orders");
    let held = bridge
        .correlator()
        .register(1, MessageType::HeartbeatReply, Duration::from_secs(30))?;

    assert_eq!(
        bridge.call(client_id, HeartbeatRequest::default()).await.err(),
        Some(BridgeError::DuplicateRequestId(1))
    );
    assert!(handle.is_stopped());
    assert!(bridge.correlator().is_closed());
    assert_eq!(bridge.fatal_error(), Some(BridgeError::DuplicateRequestId(1)));
    assert_eq!(
        held.wait().await.err(),
        Some(BridgeError::Cancelled("aborted".to_string()))
    );
    assert_eq!(
        bridge.call(client_id, HeartbeatRequest::default()).await.err(),
        Some(BridgeError::Cancelled("aborted".to_string()))
    );

    assert_eq!(handle.join().await, Err(BridgeError::DuplicateRequestId(1)));
    assert!(gateway.is_closed().await);
    Ok(())
}

/// Tests stopping a started worker.
///
/// **Scenario:**
/// 1. A worker is started with gateway worker id 55.
/// 2. The client stops it; the gateway confirms.
/// 3. The client stops it again.
///
/// **Verification:**
/// - The gateway receives `StopWorkerRequest` naming worker 55.
/// - The worker is forgotten and its token is cancelled.
/// - The second stop fails with `NotFound` in the `workers` registry.
#[tokio::test]
async fn test_stop_worker() -> anyhow::Result<()> {
    initialize_tracing();
    let (mut gateway, handle) = FakeGateway::start(EmptyReplies);
    let bridge = handle.bridge();
    let client_id = bridge.connect_client("workers");

    let registering = Arc::clone(&bridge);
    let start = tokio::spawn(async move {
        registering.register_worker(client_id, "shop", "orders").await
    });
    let request = gateway.recv_as::<NewWorkerRequest>().await?;
    let mut reply = NewWorkerReply {
        worker_id: 55,
        ..Default::default()
    };
    reply.header.request_id = request.header.request_id;
    gateway.send(&reply).await?;
    let WorkerStart::Started(worker_id) = start.await?? else {
        anyhow::bail!("worker was rejected");
    };
    let token = bridge.workers().get(worker_id)?.cancel_token();

    let stopping = Arc::clone(&bridge);
    let stop = tokio::spawn(async move { stopping.stop_worker(worker_id).await });
    let request = gateway.recv_as::<StopWorkerRequest>().await?;
    assert_eq!(request.worker_id, 55);
    let mut reply = StopWorkerReply::default();
    reply.header.request_id = request.header.request_id;
    gateway.send(&reply).await?;

    assert_eq!(stop.await??, None);
    assert!(!bridge.workers().contains(worker_id));
    assert!(token.is_cancelled());
    assert_eq!(
        bridge.stop_worker(worker_id).await.err(),
        Some(BridgeError::NotFound {
            registry: "workers",
            id: worker_id,
        })
    );
    Ok(())
}
