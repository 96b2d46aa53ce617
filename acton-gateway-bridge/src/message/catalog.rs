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

//! The concrete message kinds exchanged with the gateway.
//!
//! Each kind is a plain struct with typed fields, an embedded header, and a
//! raw payload slot. The payload carries encoded arguments, results, or
//! heartbeat details, whatever the kind documents.

use super::{
    ContextReplyHeader, ContextRequestHeader, Header, MessageType, MessageTypeRegistry,
    PropertyBag, PropertyField, ReplayStatus, ReplyError, ReplyHeader, RequestHeader,
};
use crate::common::BridgeError;
use crate::traits::{MessageKind, ProxyRequest};

/// Declares a message kind: the struct, its [`MessageKind`] impl, and for
/// requests the [`ProxyRequest`] link to the reply kind.
macro_rules! bridge_message {
    (
        $(#[$meta:meta])*
        $name:ident: $tag:ident, $header:ty $(, reply = $reply:ident)? {
            $( $(#[$fmeta:meta])* $field:ident: $fty:ty => $key:literal, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $name {
            /// Shared header fields.
            pub header: $header,
            $( $(#[$fmeta])* pub $field: $fty, )*
            /// Raw payload.
            pub payload: Option<Vec<u8>>,
        }

        impl MessageKind for $name {
            const MESSAGE_TYPE: MessageType = MessageType::$tag;
            type Header = $header;

            fn header(&self) -> &$header {
                &self.header
            }

            fn header_mut(&mut self) -> &mut $header {
                &mut self.header
            }

            fn payload(&self) -> Option<&[u8]> {
                self.payload.as_deref()
            }

            fn set_payload(&mut self, payload: Option<Vec<u8>>) {
                self.payload = payload;
            }

            fn copy_fields_into(&self, bag: &mut PropertyBag) {
                Header::copy_fields_into(&self.header, bag);
                $( PropertyField::write_field(&self.$field, bag, $key); )*
            }

            fn read_fields(bag: &PropertyBag) -> Result<Self, BridgeError> {
                Ok(Self {
                    header: <$header as Header>::read_from(bag)?,
                    $( $field: <$fty as PropertyField>::read_field(bag, $key)?, )*
                    payload: None,
                })
            }
        }

        $( impl ProxyRequest for $name {
            type Reply = $reply;
        } )?
    };
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

bridge_message! {
    /// Opens a gateway session for a logical client connection.
    ConnectRequest: ConnectRequest, RequestHeader, reply = ConnectReply {
        /// Comma-separated engine endpoints.
        endpoints: String => "Endpoints",
        /// Identity reported to the engine.
        identity: String => "Identity",
        /// Domain used when a request names none.
        default_domain: Option<String> => "DefaultDomain",
        /// Client-side timeout in milliseconds.
        client_timeout_ms: i64 => "ClientTimeout",
    }
}

bridge_message! {
    /// Answers [`ConnectRequest`].
    ConnectReply: ConnectReply, ReplyHeader {}
}

bridge_message! {
    /// Tears down one logical client connection.
    DisconnectRequest: DisconnectRequest, RequestHeader, reply = DisconnectReply {}
}

bridge_message! {
    /// Answers [`DisconnectRequest`].
    DisconnectReply: DisconnectReply, ReplyHeader {}
}

bridge_message! {
    /// Asks the process to cancel everything in flight and exit.
    TerminateRequest: TerminateRequest, RequestHeader, reply = TerminateReply {}
}

bridge_message! {
    /// Answers [`TerminateRequest`]; the last frame the process sends.
    TerminateReply: TerminateReply, ReplyHeader {}
}

bridge_message! {
    /// Liveness probe, sent by either side.
    HeartbeatRequest: HeartbeatRequest, RequestHeader, reply = HeartbeatReply {}
}

bridge_message! {
    /// Answers [`HeartbeatRequest`].
    HeartbeatReply: HeartbeatReply, ReplyHeader {}
}

bridge_message! {
    /// Asks the gateway to abandon an operation it is still working on.
    ///
    /// Cancelling locally only stops the local wait; this request is how a
    /// caller also asks the gateway side to stop.
    CancelRequest: CancelRequest, RequestHeader, reply = CancelReply {
        /// Request id of the operation to cancel.
        target_request_id: i64 => "TargetRequestId",
    }
}

bridge_message! {
    /// Answers [`CancelRequest`].
    CancelReply: CancelReply, ReplyHeader {
        /// Whether the gateway still had the operation.
        was_cancelled: bool => "WasCancelled",
    }
}

bridge_message! {
    /// Starts a polling worker on the gateway.
    NewWorkerRequest: NewWorkerRequest, RequestHeader, reply = NewWorkerReply {
        /// Engine domain.
        domain: String => "Domain",
        /// Task list the worker polls.
        task_list: String => "TaskList",
        /// Encoded worker options.
        options: Option<Vec<u8>> => "Options",
    }
}

bridge_message! {
    /// Answers [`NewWorkerRequest`].
    NewWorkerReply: NewWorkerReply, ReplyHeader {
        /// Gateway-side worker id.
        worker_id: i64 => "WorkerId",
    }
}

bridge_message! {
    /// Stops a polling worker.
    StopWorkerRequest: StopWorkerRequest, RequestHeader, reply = StopWorkerReply {
        /// Gateway-side worker id.
        worker_id: i64 => "WorkerId",
    }
}

bridge_message! {
    /// Answers [`StopWorkerRequest`].
    StopWorkerReply: StopWorkerReply, ReplyHeader {}
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

bridge_message! {
    /// Registers a workflow type with the gateway.
    WorkflowRegisterRequest: WorkflowRegisterRequest, RequestHeader, reply = WorkflowRegisterReply {
        /// Workflow type name.
        name: String => "Name",
        /// Engine domain.
        domain: Option<String> => "Domain",
    }
}

bridge_message! {
    /// Answers [`WorkflowRegisterRequest`].
    WorkflowRegisterReply: WorkflowRegisterReply, ReplyHeader {}
}

bridge_message! {
    /// Starts a workflow. The payload holds the encoded arguments.
    WorkflowExecuteRequest: WorkflowExecuteRequest, RequestHeader, reply = WorkflowExecuteReply {
        /// Workflow type name.
        workflow: String => "Workflow",
        /// Engine domain.
        domain: Option<String> => "Domain",
        /// Encoded start options.
        options: Option<Vec<u8>> => "Options",
    }
}

bridge_message! {
    /// Answers [`WorkflowExecuteRequest`].
    WorkflowExecuteReply: WorkflowExecuteReply, ReplyHeader {
        /// Workflow id assigned by the engine.
        workflow_id: String => "WorkflowId",
        /// Run id assigned by the engine.
        run_id: String => "RunId",
    }
}

bridge_message! {
    /// Gateway callback: run a workflow function in this process.
    /// The payload holds the encoded arguments.
    WorkflowInvokeRequest: WorkflowInvokeRequest, RequestHeader, reply = WorkflowInvokeReply {
        /// Registered workflow type.
        workflow_type: String => "WorkflowType",
        /// Workflow id.
        workflow_id: String => "WorkflowId",
        /// Run id.
        run_id: String => "RunId",
        /// Task list the decision came from.
        task_list: String => "TaskList",
        /// Whether the engine is replaying history.
        replay_status: ReplayStatus => "ReplayStatus",
    }
}

bridge_message! {
    /// Answers [`WorkflowInvokeRequest`] with the context id of the new
    /// execution. The payload holds the encoded result once it completes.
    WorkflowInvokeReply: WorkflowInvokeReply, ContextReplyHeader {
        /// Ask the engine to replay from the beginning.
        force_replay: bool => "ForceReplay",
        /// The workflow continued as new.
        continue_as_new: bool => "ContinueAsNew",
    }
}

bridge_message! {
    /// Sends a signal to a running workflow. The payload holds the signal arguments.
    WorkflowSignalRequest: WorkflowSignalRequest, RequestHeader, reply = WorkflowSignalReply {
        /// Target workflow id.
        workflow_id: String => "WorkflowId",
        /// Target run id; empty means the latest run.
        run_id: String => "RunId",
        /// Signal name.
        signal_name: String => "SignalName",
        /// Engine domain.
        domain: Option<String> => "Domain",
    }
}

bridge_message! {
    /// Answers [`WorkflowSignalRequest`].
    WorkflowSignalReply: WorkflowSignalReply, ReplyHeader {}
}

bridge_message! {
    /// Gateway callback: a running workflow received a signal.
    WorkflowSignalInvokeRequest: WorkflowSignalInvokeRequest, ContextRequestHeader,
        reply = WorkflowSignalInvokeReply {
        /// Signal name.
        signal_name: String => "SignalName",
        /// Whether the engine is replaying history.
        replay_status: ReplayStatus => "ReplayStatus",
    }
}

bridge_message! {
    /// Answers [`WorkflowSignalInvokeRequest`].
    WorkflowSignalInvokeReply: WorkflowSignalInvokeReply, ContextReplyHeader {}
}

bridge_message! {
    /// Queries a running workflow.
    WorkflowQueryRequest: WorkflowQueryRequest, RequestHeader, reply = WorkflowQueryReply {
        /// Target workflow id.
        workflow_id: String => "WorkflowId",
        /// Target run id.
        run_id: String => "RunId",
        /// Query name.
        query_name: String => "QueryName",
        /// Engine domain.
        domain: Option<String> => "Domain",
    }
}

bridge_message! {
    /// Answers [`WorkflowQueryRequest`]. The payload holds the query result.
    WorkflowQueryReply: WorkflowQueryReply, ReplyHeader {}
}

bridge_message! {
    /// Gateway callback: answer a query against a running workflow.
    WorkflowQueryInvokeRequest: WorkflowQueryInvokeRequest, ContextRequestHeader,
        reply = WorkflowQueryInvokeReply {
        /// Query name.
        query_name: String => "QueryName",
        /// Whether the engine is replaying history.
        replay_status: ReplayStatus => "ReplayStatus",
    }
}

bridge_message! {
    /// Answers [`WorkflowQueryInvokeRequest`]. The payload holds the query result.
    WorkflowQueryInvokeReply: WorkflowQueryInvokeReply, ContextReplyHeader {}
}

bridge_message! {
    /// Requests cancellation of a workflow.
    WorkflowCancelRequest: WorkflowCancelRequest, RequestHeader, reply = WorkflowCancelReply {
        /// Target workflow id.
        workflow_id: String => "WorkflowId",
        /// Target run id.
        run_id: String => "RunId",
        /// Engine domain.
        domain: Option<String> => "Domain",
    }
}

bridge_message! {
    /// Answers [`WorkflowCancelRequest`].
    WorkflowCancelReply: WorkflowCancelReply, ReplyHeader {}
}

bridge_message! {
    /// Terminates a workflow. The payload holds encoded details.
    WorkflowTerminateRequest: WorkflowTerminateRequest, RequestHeader,
        reply = WorkflowTerminateReply {
        /// Target workflow id.
        workflow_id: String => "WorkflowId",
        /// Target run id.
        run_id: String => "RunId",
        /// Engine domain.
        domain: Option<String> => "Domain",
        /// Reason recorded in history.
        reason: Option<String> => "Reason",
    }
}

bridge_message! {
    /// Answers [`WorkflowTerminateRequest`].
    WorkflowTerminateReply: WorkflowTerminateReply, ReplyHeader {}
}

bridge_message! {
    /// Waits for a workflow's result.
    WorkflowGetResultRequest: WorkflowGetResultRequest, RequestHeader,
        reply = WorkflowGetResultReply {
        /// Target workflow id.
        workflow_id: String => "WorkflowId",
        /// Target run id.
        run_id: String => "RunId",
        /// Engine domain.
        domain: Option<String> => "Domain",
    }
}

bridge_message! {
    /// Answers [`WorkflowGetResultRequest`]. The payload holds the result.
    WorkflowGetResultReply: WorkflowGetResultReply, ReplyHeader {}
}

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

bridge_message! {
    /// Registers an activity type with the gateway.
    ActivityRegisterRequest: ActivityRegisterRequest, RequestHeader, reply = ActivityRegisterReply {
        /// Activity type name.
        name: String => "Name",
        /// Engine domain.
        domain: Option<String> => "Domain",
    }
}

bridge_message! {
    /// Answers [`ActivityRegisterRequest`].
    ActivityRegisterReply: ActivityRegisterReply, ReplyHeader {}
}

bridge_message! {
    /// Schedules an activity from inside a workflow execution.
    /// The payload holds the encoded arguments.
    ActivityExecuteRequest: ActivityExecuteRequest, ContextRequestHeader,
        reply = ActivityExecuteReply {
        /// Activity type name.
        activity: String => "Activity",
        /// Encoded activity options.
        options: Option<Vec<u8>> => "Options",
        /// Engine domain.
        domain: Option<String> => "Domain",
    }
}

bridge_message! {
    /// Answers [`ActivityExecuteRequest`]. The payload holds the result.
    ActivityExecuteReply: ActivityExecuteReply, ContextReplyHeader {}
}

bridge_message! {
    /// Gateway callback: run an activity function in this process.
    /// The payload holds the encoded arguments.
    ActivityInvokeRequest: ActivityInvokeRequest, RequestHeader, reply = ActivityInvokeReply {
        /// Registered activity type.
        activity: String => "Activity",
        /// Opaque token identifying the task to the engine.
        task_token: Vec<u8> => "TaskToken",
        /// Encoded activity info.
        info: Option<Vec<u8>> => "Info",
    }
}

bridge_message! {
    /// Answers [`ActivityInvokeRequest`] with the context id of the new execution.
    ActivityInvokeReply: ActivityInvokeReply, ContextReplyHeader {
        /// The activity will complete externally.
        pending: bool => "Pending",
    }
}

bridge_message! {
    /// Records an activity heartbeat. The payload holds encoded details.
    ActivityRecordHeartbeatRequest: ActivityRecordHeartbeatRequest, ContextRequestHeader,
        reply = ActivityRecordHeartbeatReply {
        /// Task token, for heartbeats sent outside the activity's context.
        task_token: Option<Vec<u8>> => "TaskToken",
    }
}

bridge_message! {
    /// Answers [`ActivityRecordHeartbeatRequest`].
    ActivityRecordHeartbeatReply: ActivityRecordHeartbeatReply, ContextReplyHeader {}
}

bridge_message! {
    /// Fetches the details of the last recorded heartbeat.
    ActivityGetHeartbeatDetailsRequest: ActivityGetHeartbeatDetailsRequest, ContextRequestHeader,
        reply = ActivityGetHeartbeatDetailsReply {}
}

bridge_message! {
    /// Answers [`ActivityGetHeartbeatDetailsRequest`]. The payload holds the details.
    ActivityGetHeartbeatDetailsReply: ActivityGetHeartbeatDetailsReply, ContextReplyHeader {}
}

bridge_message! {
    /// Gateway callback: a running activity is being stopped.
    ActivityStoppingRequest: ActivityStoppingRequest, ContextRequestHeader,
        reply = ActivityStoppingReply {
        /// Activity id.
        activity_id: String => "ActivityId",
    }
}

bridge_message! {
    /// Answers [`ActivityStoppingRequest`].
    ActivityStoppingReply: ActivityStoppingReply, ContextReplyHeader {}
}

bridge_message! {
    /// Completes an externally completed activity. The payload holds the result.
    ActivityCompleteRequest: ActivityCompleteRequest, RequestHeader, reply = ActivityCompleteReply {
        /// Task token of the activity.
        task_token: Vec<u8> => "TaskToken",
        /// Engine domain.
        domain: Option<String> => "Domain",
        /// Failure to report instead of a result.
        failure: Option<ReplyError> => "Failure",
    }
}

bridge_message! {
    /// Answers [`ActivityCompleteRequest`].
    ActivityCompleteReply: ActivityCompleteReply, ReplyHeader {}
}

bridge_message! {
    /// Waits for the result of an activity scheduled by a workflow execution.
    ActivityGetResultRequest: ActivityGetResultRequest, ContextRequestHeader,
        reply = ActivityGetResultReply {}
}

bridge_message! {
    /// Answers [`ActivityGetResultRequest`]. The payload holds the result.
    ActivityGetResultReply: ActivityGetResultReply, ContextReplyHeader {}
}

/// Registers every kind in this module.
pub(crate) fn register_all(registry: &MessageTypeRegistry) {
    registry.register::<ConnectRequest>();
    registry.register::<ConnectReply>();
    registry.register::<DisconnectRequest>();
    registry.register::<DisconnectReply>();
    registry.register::<TerminateRequest>();
    registry.register::<TerminateReply>();
    registry.register::<HeartbeatRequest>();
    registry.register::<HeartbeatReply>();
    registry.register::<CancelRequest>();
    registry.register::<CancelReply>();
    registry.register::<NewWorkerRequest>();
    registry.register::<NewWorkerReply>();
    registry.register::<StopWorkerRequest>();
    registry.register::<StopWorkerReply>();

    registry.register::<WorkflowRegisterRequest>();
    registry.register::<WorkflowRegisterReply>();
    registry.register::<WorkflowExecuteRequest>();
    registry.register::<WorkflowExecuteReply>();
    registry.register::<WorkflowInvokeRequest>();
    registry.register::<WorkflowInvokeReply>();
    registry.register::<WorkflowSignalRequest>();
    registry.register::<WorkflowSignalReply>();
    registry.register::<WorkflowSignalInvokeRequest>();
    registry.register::<WorkflowSignalInvokeReply>();
    registry.register::<WorkflowQueryRequest>();
    registry.register::<WorkflowQueryReply>();
    registry.register::<WorkflowQueryInvokeRequest>();
    registry.register::<WorkflowQueryInvokeReply>();
    registry.register::<WorkflowCancelRequest>();
    registry.register::<WorkflowCancelReply>();
    registry.register::<WorkflowTerminateRequest>();
    registry.register::<WorkflowTerminateReply>();
    registry.register::<WorkflowGetResultRequest>();
    registry.register::<WorkflowGetResultReply>();

    registry.register::<ActivityRegisterRequest>();
    registry.register::<ActivityRegisterReply>();
    registry.register::<ActivityExecuteRequest>();
    registry.register::<ActivityExecuteReply>();
    registry.register::<ActivityInvokeRequest>();
    registry.register::<ActivityInvokeReply>();
    registry.register::<ActivityRecordHeartbeatRequest>();
    registry.register::<ActivityRecordHeartbeatReply>();
    registry.register::<ActivityGetHeartbeatDetailsRequest>();
    registry.register::<ActivityGetHeartbeatDetailsReply>();
    registry.register::<ActivityStoppingRequest>();
    registry.register::<ActivityStoppingReply>();
    registry.register::<ActivityCompleteRequest>();
    registry.register::<ActivityCompleteReply>();
    registry.register::<ActivityGetResultRequest>();
    registry.register::<ActivityGetResultReply>();
}
