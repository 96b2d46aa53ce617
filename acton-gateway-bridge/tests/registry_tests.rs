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

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use acton_gateway_bridge::prelude::*;

use crate::setup::{decode_outbound, initialize_tracing};

mod setup;

/// Tests the add/get/remove round trip of an identity registry.
///
/// **Scenario:**
/// 1. Add two handles.
/// 2. Look one up, remove it, and look it up again.
///
/// **Verification:**
/// - Ids start at 1 and increase.
/// - A removed id reports `NotFound` with the registry's name.
#[test]
fn test_identity_round_trip() -> anyhow::Result<()> {
    initialize_tracing();
    let registry: IdentityRegistry<String> = IdentityRegistry::new("workers");

    let first = registry.add("alpha".to_string());
    let second = registry.add("beta".to_string());
    assert_eq!((first, second), (1, 2));
    assert_eq!(registry.get(first)?, "alpha");

    assert_eq!(registry.remove(first)?, "alpha");
    assert_eq!(
        registry.get(first).err(),
        Some(BridgeError::NotFound {
            registry: "workers",
            id: first,
        })
    );
    assert_eq!(registry.ids(), vec![second]);

    // Ids are never reused.
    assert_eq!(registry.add("gamma".to_string()), 3);
    Ok(())
}

/// Tests that a callback id outliving its execution cannot reach anything.
///
/// **Scenario:**
/// 1. Start an activity and keep its context id.
/// 2. Finish the activity.
/// 3. Start another activity.
///
/// **Verification:**
/// - The stale id reports `NotFound` in the `activities` registry.
/// - The new activity gets a fresh id and does not share the old inbox.
#[tokio::test]
async fn test_stale_context_id_is_not_found() -> anyhow::Result<()> {
    initialize_tracing();
    let (bridge, _outbound) = Bridge::channel(BridgeConfig::default());
    let client_id = bridge.connect_client("worker");

    let (stale, mut stale_inbox) = bridge.start_activity(client_id, "charge-card")?;
    let finished = bridge.finish_activity(stale)?;
    assert_eq!(finished.type_name(), "charge-card");

    assert_eq!(
        bridge.contexts(ExecutionKind::Activity).get(stale).err(),
        Some(BridgeError::NotFound {
            registry: "activities",
            id: stale,
        })
    );
    assert_eq!(
        bridge.finish_activity(stale).err().map(|e| e.code()),
        Some("NOT_FOUND")
    );

    let (fresh, _fresh_inbox) = bridge.start_activity(client_id, "charge-card")?;
    assert_ne!(fresh, stale);
    let live = bridge.activities().get(fresh)?;
    assert!(!live.same_execution(&finished));

    // The finished execution's inbox closes once every sender is gone.
    drop(finished);
    assert!(stale_inbox.recv().await.is_none());
    Ok(())
}

/// Tests that activity and workflow ids live in separate registries.
///
/// **Scenario:**
/// 1. Start one activity and one workflow.
///
/// **Verification:**
/// - Each is reachable only through its own registry.
/// - The workflow keeps its replay status.
#[test]
fn test_executions_use_separate_registries() -> anyhow::Result<()> {
    initialize_tracing();
    let (bridge, _outbound) = Bridge::channel(BridgeConfig::default());
    let client_id = bridge.connect_client("mixed");

    let (activity, _activity_inbox) = bridge.start_activity(client_id, "send-email")?;
    let (workflow, _workflow_inbox) =
        bridge.start_workflow(client_id, "onboarding", ReplayStatus::Replaying)?;

    let activity_context = bridge.contexts(ExecutionKind::Activity).get(activity)?;
    assert_eq!(activity_context.kind(), ExecutionKind::Activity);
    let workflow_context = bridge.contexts(ExecutionKind::Workflow).get(workflow)?;
    assert_eq!(workflow_context.kind(), ExecutionKind::Workflow);
    assert_eq!(workflow_context.replay_status(), ReplayStatus::Replaying);

    assert_eq!(bridge.activities().len(), 1);
    assert_eq!(bridge.workflows().len(), 1);
    Ok(())
}

/// Tests concurrent adds and removes on one registry.
///
/// **Scenario:**
/// 1. Eight tasks each add 100 handles and remove every other one.
///
/// **Verification:**
/// - Every id is unique and exactly the unremoved ones remain.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_add_remove() -> anyhow::Result<()> {
    initialize_tracing();
    let registry: Arc<IdentityRegistry<usize>> = Arc::new(IdentityRegistry::new("activities"));

    let tasks = (0..8).map(|task| {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let mut kept = Vec::new();
            for n in 0..100 {
                let id = registry.add(task * 100 + n);
                if n % 2 == 0 {
                    registry.remove(id).expect("just added");
                } else {
                    kept.push(id);
                }
                tokio::task::yield_now().await;
            }
            kept
        })
    });

    let mut kept = HashSet::new();
    for ids in futures::future::join_all(tasks).await {
        for id in ids? {
            assert!(kept.insert(id), "id {id} handed out twice");
        }
    }

    assert_eq!(registry.len(), 400);
    assert_eq!(registry.ids().into_iter().collect::<HashSet<_>>(), kept);
    Ok(())
}

/// Tests that disconnecting one client tears down only what it owns.
///
/// **Scenario:**
/// 1. Two clients each own a pending call, an activity, a workflow, and a worker.
/// 2. The first client disconnects.
///
/// **Verification:**
/// - The teardown counts exactly the first client's state.
/// - The first client's call fails with `Cancelled("disconnect")` and its
///   executions' tokens are cancelled.
/// - The second client's state is untouched, and a second disconnect reports
///   `NotFound`.
#[tokio::test]
async fn test_disconnect_tears_down_client_scope() -> anyhow::Result<()> {
    initialize_tracing();
    let (bridge, mut outbound) = Bridge::channel(BridgeConfig::default());
    let leaving = bridge.connect_client("leaving");
    let staying = bridge.connect_client("staying");

    let mut calls = Vec::new();
    for client_id in [leaving, staying] {
        let caller = Arc::clone(&bridge);
        calls.push(tokio::spawn(async move {
            caller.call(client_id, HeartbeatRequest::default()).await
        }));
        let frame = outbound.recv().await.expect("request frame");
        assert_eq!(decode_outbound(&frame).await?.client_id(), client_id);
    }

    let (leaving_activity, _a) = bridge.start_activity(leaving, "charge")?;
    let (leaving_workflow, _w) =
        bridge.start_workflow(leaving, "order", ReplayStatus::NotReplaying)?;
    let leaving_token = bridge.activities().get(leaving_activity)?.cancel_token();
    let (staying_activity, _b) = bridge.start_activity(staying, "charge")?;
    let (staying_workflow, _x) =
        bridge.start_workflow(staying, "order", ReplayStatus::NotReplaying)?;
    bridge
        .workers()
        .add(WorkerHandle::new(leaving, 7, "default".into(), "orders".into()));
    let staying_worker = bridge
        .workers()
        .add(WorkerHandle::new(staying, 8, "default".into(), "orders".into()));

    let teardown = bridge.disconnect_client(leaving, "disconnect")?;
    assert_eq!(
        teardown,
        Teardown {
            operations: 1,
            activities: 1,
            workflows: 1,
            workers: 1,
        }
    );
    assert!(leaving_token.is_cancelled());
    assert!(!bridge.activities().contains(leaving_activity));
    assert!(!bridge.workflows().contains(leaving_workflow));

    let leaving_call = calls.remove(0);
    assert_eq!(
        leaving_call.await?.err(),
        Some(BridgeError::Cancelled("disconnect".to_string()))
    );

    assert!(bridge.activities().contains(staying_activity));
    assert!(bridge.workflows().contains(staying_workflow));
    assert!(bridge.workers().contains(staying_worker));
    assert_eq!(bridge.correlator().pending_count(), 1);
    assert!(bridge.clients().contains(staying));

    assert_eq!(
        bridge.disconnect_client(leaving, "disconnect").err(),
        Some(BridgeError::NotFound {
            registry: "clients",
            id: leaving,
        })
    );
    Ok(())
}

/// Tests that a call for a client that is not connected never reaches the wire.
///
/// **Scenario:**
/// 1. A client connects and disconnects.
/// 2. It calls; a call is also made for an id that was never issued.
///
/// **Verification:**
/// - Both calls fail with `NotFound` in the `clients` registry.
/// - No operation stays pending and no frame is queued.
#[tokio::test]
async fn test_call_for_disconnected_client_is_not_found() -> anyhow::Result<()> {
    initialize_tracing();
    let (bridge, mut outbound) = Bridge::channel(BridgeConfig::default());
    let client_id = bridge.connect_client("short-lived");
    bridge.disconnect_client(client_id, "disconnect")?;

    for id in [client_id, 99] {
        assert_eq!(
            bridge.call(id, HeartbeatRequest::default()).await.err(),
            Some(BridgeError::NotFound {
                registry: "clients",
                id,
            })
        );
    }
    assert_eq!(bridge.correlator().pending_count(), 0);
    assert!(outbound.try_recv().is_err());
    Ok(())
}

/// Tests calls racing the disconnect of their client.
///
/// **Scenario:**
/// 1. Two hundred times, a client connects, a call is started for it, and the
///    client is disconnected concurrently.
///
/// **Verification:**
/// - Every call ends as `NotFound` or `Cancelled("disconnect")`; none is left
///   waiting for its timeout.
/// - Nothing stays pending.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_call_racing_disconnect_never_waits_for_timeout() -> anyhow::Result<()> {
    initialize_tracing();
    let (bridge, mut outbound) = Bridge::channel(BridgeConfig::default());
    tokio::spawn(async move { while outbound.recv().await.is_some() {} });

    for _ in 0..200 {
        let client_id = bridge.connect_client("racer");
        let caller = Arc::clone(&bridge);
        let call = tokio::spawn(async move {
            caller
                .call_with_timeout(client_id, HeartbeatRequest::default(), Duration::from_secs(5))
                .await
        });
        let disconnector = Arc::clone(&bridge);
        let disconnect =
            tokio::spawn(async move { disconnector.disconnect_client(client_id, "disconnect") });

        disconnect.await??;
        let result = tokio::time::timeout(Duration::from_secs(2), call).await??;
        match result.err() {
            Some(BridgeError::NotFound { registry: "clients", id }) => assert_eq!(id, client_id),
            Some(BridgeError::Cancelled(reason)) => assert_eq!(reason, "disconnect"),
            other => anyhow::bail!("unexpected call outcome: {other:?}"),
        }
    }
    assert_eq!(bridge.correlator().pending_count(), 0);
    Ok(())
}

/// Tests that no execution can be registered once the bridge terminates.
///
/// **Scenario:**
/// 1. The bridge terminates.
/// 2. A handler still running tries to start an activity and a workflow.
///
/// **Verification:**
/// - Both fail with `Cancelled("terminate")` and the registries stay empty.
#[test]
fn test_no_executions_after_terminate() -> anyhow::Result<()> {
    initialize_tracing();
    let (bridge, _outbound) = Bridge::channel(BridgeConfig::default());
    let client_id = bridge.connect_client("late");
    bridge.terminate();

    let terminated = Some(BridgeError::Cancelled("terminate".to_string()));
    assert_eq!(bridge.start_activity(client_id, "charge").err(), terminated);
    assert_eq!(
        bridge
            .start_workflow(client_id, "order", ReplayStatus::NotReplaying)
            .err(),
        terminated
    );
    assert!(bridge.activities().is_empty());
    assert!(bridge.workflows().is_empty());
    Ok(())
}
