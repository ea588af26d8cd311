// Copyright 2025 The dcSCTP Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;
use thiserror::Error;

/// The phase of an association, named after the states of
/// <https://datatracker.ietf.org/doc/html/rfc9260#section-4>.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Closed,
    CookieWait,
    CookieEchoed,
    Established,
    ShutdownPending,
    ShutdownSent,
    ShutdownReceived,
    ShutdownAckSent,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Transition {
    Establish,
    RequestShutdown,
    SendShutdown,
    ReceiveShutdown,
    SendShutdownAck,
    Close,
    Abort,
}

#[derive(Debug, Error, PartialEq)]
#[error("Illegal transition {transition:?} in phase {from}")]
pub struct IllegalTransition {
    pub from: Phase,
    pub transition: Transition,
}

/// All legal transitions, except for `Abort` which is legal from every phase.
const TRANSITIONS: &[(Phase, Transition, Phase)] = &[
    (Phase::Closed, Transition::Establish, Phase::Established),
    (Phase::Established, Transition::RequestShutdown, Phase::ShutdownPending),
    (Phase::ShutdownPending, Transition::SendShutdown, Phase::ShutdownSent),
    (Phase::Established, Transition::ReceiveShutdown, Phase::ShutdownReceived),
    (Phase::ShutdownSent, Transition::SendShutdownAck, Phase::ShutdownAckSent),
    (Phase::ShutdownReceived, Transition::SendShutdownAck, Phase::ShutdownAckSent),
    (Phase::ShutdownSent, Transition::Close, Phase::Closed),
    (Phase::ShutdownAckSent, Transition::Close, Phase::Closed),
];

impl Phase {
    /// Returns the phase that `transition` leads to from this phase.
    pub fn next(self, transition: Transition) -> Result<Phase, IllegalTransition> {
        if transition == Transition::Abort {
            return Ok(Phase::Closed);
        }
        TRANSITIONS
            .iter()
            .find(|(from, t, _)| *from == self && *t == transition)
            .map(|(_, _, to)| *to)
            .ok_or(IllegalTransition { from: self, transition })
    }

    /// True in the phases where DATA may be both sent and received.
    pub fn can_send_and_receive(self) -> bool {
        matches!(
            self,
            Phase::Established
                | Phase::ShutdownPending
                | Phase::ShutdownSent
                | Phase::ShutdownReceived
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Closed => "CLOSED",
            Phase::CookieWait => "COOKIE_WAIT",
            Phase::CookieEchoed => "COOKIE_ECHOED",
            Phase::Established => "ESTABLISHED",
            Phase::ShutdownPending => "SHUTDOWN_PENDING",
            Phase::ShutdownSent => "SHUTDOWN_SENT",
            Phase::ShutdownReceived => "SHUTDOWN_RECEIVED",
            Phase::ShutdownAckSent => "SHUTDOWN_ACK_SENT",
        };
        f.write_str(name)
    }
}
