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

//! Numeric message type tags.
//!
//! Tags are stable on the wire. Global session messages live in `1..100`,
//! workflow messages in `101..200` and activity messages in `201..300`. Every
//! request tag is odd and its reply is the next even tag.

use std::fmt;

use crate::common::BridgeError;

/// Stable, globally unique tag for every message kind exchanged with the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i32)]
#[allow(missing_docs)]
pub enum MessageType {
    ConnectRequest = 1,
    ConnectReply = 2,
    DisconnectRequest = 3,
    DisconnectReply = 4,
    TerminateRequest = 5,
    TerminateReply = 6,
    HeartbeatRequest = 7,
    HeartbeatReply = 8,
    CancelRequest = 9,
    CancelReply = 10,
    NewWorkerRequest = 11,
    NewWorkerReply = 12,
    StopWorkerRequest = 13,
    StopWorkerReply = 14,

    WorkflowRegisterRequest = 101,
    WorkflowRegisterReply = 102,
    WorkflowExecuteRequest = 103,
    WorkflowExecuteReply = 104,
    WorkflowInvokeRequest = 105,
    WorkflowInvokeReply = 106,
    WorkflowSignalRequest = 107,
    WorkflowSignalReply = 108,
    WorkflowSignalInvokeRequest = 109,
    WorkflowSignalInvokeReply = 110,
    WorkflowQueryRequest = 111,
    WorkflowQueryReply = 112,
    WorkflowQueryInvokeRequest = 113,
    WorkflowQueryInvokeReply = 114,
    WorkflowCancelRequest = 115,
    WorkflowCancelReply = 116,
    WorkflowTerminateRequest = 117,
    WorkflowTerminateReply = 118,
    WorkflowGetResultRequest = 119,
    WorkflowGetResultReply = 120,

    ActivityRegisterRequest = 201,
    ActivityRegisterReply = 202,
    ActivityExecuteRequest = 203,
    ActivityExecuteReply = 204,
    ActivityInvokeRequest = 205,
    ActivityInvokeReply = 206,
    ActivityRecordHeartbeatRequest = 207,
    ActivityRecordHeartbeatReply = 208,
    ActivityGetHeartbeatDetailsRequest = 209,
    ActivityGetHeartbeatDetailsReply = 210,
    ActivityStoppingRequest = 211,
    ActivityStoppingReply = 212,
    ActivityCompleteRequest = 213,
    ActivityCompleteReply = 214,
    ActivityGetResultRequest = 215,
    ActivityGetResultReply = 216,
}

/// Which execution registry a context-addressed message targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionKind {
    /// Activity executions.
    Activity,
    /// Workflow executions.
    Workflow,
}

impl MessageType {
    /// Every known message type, in tag order.
    pub const ALL: &'static [Self] = &[
        Self::ConnectRequest,
        Self::ConnectReply,
        Self::DisconnectRequest,
        Self::DisconnectReply,
        Self::TerminateRequest,
        Self::TerminateReply,
        Self::HeartbeatRequest,
        Self::HeartbeatReply,
        Self::CancelRequest,
        Self::CancelReply,
        Self::NewWorkerRequest,
        Self::NewWorkerReply,
        Self::StopWorkerRequest,
        Self::StopWorkerReply,
        Self::WorkflowRegisterRequest,
        Self::WorkflowRegisterReply,
        Self::WorkflowExecuteRequest,
        Self::WorkflowExecuteReply,
        Self::WorkflowInvokeRequest,
        Self::WorkflowInvokeReply,
        Self::WorkflowSignalRequest,
        Self::WorkflowSignalReply,
        Self::WorkflowSignalInvokeRequest,
        Self::WorkflowSignalInvokeReply,
        Self::WorkflowQueryRequest,
        Self::WorkflowQueryReply,
        Self::WorkflowQueryInvokeRequest,
        Self::WorkflowQueryInvokeReply,
        Self::WorkflowCancelRequest,
        Self::WorkflowCancelReply,
        Self::WorkflowTerminateRequest,
        Self::WorkflowTerminateReply,
        Self::WorkflowGetResultRequest,
        Self::WorkflowGetResultReply,
        Self::ActivityRegisterRequest,
        Self::ActivityRegisterReply,
        Self::ActivityExecuteRequest,
        Self::ActivityExecuteReply,
        Self::ActivityInvokeRequest,
        Self::ActivityInvokeReply,
        Self::ActivityRecordHeartbeatRequest,
        Self::ActivityRecordHeartbeatReply,
        Self::ActivityGetHeartbeatDetailsRequest,
        Self::ActivityGetHeartbeatDetailsReply,
        Self::ActivityStoppingRequest,
        Self::ActivityStoppingReply,
        Self::ActivityCompleteRequest,
        Self::ActivityCompleteReply,
        Self::ActivityGetResultRequest,
        Self::ActivityGetResultReply,
    ];

    /// The wire tag.
    #[must_use]
    pub const fn tag(self) -> i32 {
        self as i32
    }

    /// Looks up a message type by wire tag.
    #[must_use]
    pub fn from_tag(tag: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.tag() == tag)
    }

    /// Returns `true` for request kinds.
    #[must_use]
    pub const fn is_request(self) -> bool {
        self.tag() % 2 == 1
    }

    /// Returns `true` for reply kinds.
    #[must_use]
    pub const fn is_reply(self) -> bool {
        !self.is_request()
    }

    /// The reply type a request expects, or `None` for replies.
    #[must_use]
    pub fn reply_type(self) -> Option<Self> {
        if self.is_request() {
            Self::from_tag(self.tag() + 1)
        } else {
            None
        }
    }

    /// Returns `true` for gateway callbacks that start a new in-process execution.
    #[must_use]
    pub const fn starts_execution(self) -> bool {
        matches!(
            self,
            Self::WorkflowInvokeRequest | Self::ActivityInvokeRequest
        )
    }

    /// For gateway callbacks addressed to a live execution by context id,
    /// returns the registry the id belongs to.
    #[must_use]
    pub const fn callback_target(self) -> Option<ExecutionKind> {
        match self {
            Self::WorkflowSignalInvokeRequest | Self::WorkflowQueryInvokeRequest => {
                Some(ExecutionKind::Workflow)
            }
            Self::ActivityStoppingRequest => Some(ExecutionKind::Activity),
            _ => None,
        }
    }
}

impl TryFrom<i32> for MessageType {
    type Error = BridgeError;

    fn try_from(tag: i32) -> Result<Self, Self::Error> {
        Self::from_tag(tag).ok_or(BridgeError::UnknownMessageType(tag))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
