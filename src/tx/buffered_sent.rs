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

use crate::api::SocketTime;
use crate::packet::data::Data;
use crate::types::Tsn;
use std::time::Duration;

/// The number of times a DATA chunk must be reported missing before it's fast retransmitted, see
/// <https://datatracker.ietf.org/doc/html/rfc9260#section-7.2.4>.
pub(crate) const FAST_RETRANSMIT_THRESHOLD: u32 = 3;

/// How persistent the association is in getting a message across (RFC 3758).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Reliability {
    Reliable,

    /// The message may be retransmitted at most this many times. Zero means send once.
    MaxRetransmits(u16),

    /// The message is abandoned if not acknowledged this long after its first transmission.
    MaxLifetime(Duration),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SendState {
    /// Buffered, but never put on the wire.
    Pending,
    Sent,
    /// Covered by a gap ack block. Cumulatively acked chunks are removed from the buffer instead.
    Acked,
}

/// A chunk handed out by the send buffer, to be put on the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct SendData {
    pub tsn: Tsn,
    pub data: Data,
    pub reliability: Reliability,
}

/// One DATA chunk held by the send buffer until it's cumulatively acknowledged.
#[derive(Debug)]
pub struct BufferedSent {
    pub tsn: Tsn,
    pub data: Data,
    pub reliability: Reliability,
    pub state: SendState,
    pub first_sent_at: Option<SocketTime>,
    pub last_sent_at: Option<SocketTime>,
    pub transmit_count: u32,
    pub times_reported_missing: u32,
    pub fast_resent: bool,
    pub abandoned: bool,
}

impl BufferedSent {
    pub fn new(tsn: Tsn, data: Data, reliability: Reliability) -> Self {
        Self {
            tsn,
            data,
            reliability,
            state: SendState::Pending,
            first_sent_at: None,
            last_sent_at: None,
            transmit_count: 0,
            times_reported_missing: 0,
            fast_resent: false,
            abandoned: false,
        }
    }

    pub fn is_acked(&self) -> bool {
        self.state == SendState::Acked
    }

    /// Sent, and neither acked nor abandoned.
    pub fn is_outstanding(&self) -> bool {
        self.state == SendState::Sent && !self.abandoned
    }

    /// Records a transmission at `now`, and returns what to put on the wire.
    pub fn mark_sent(&mut self, now: SocketTime) -> SendData {
        self.first_sent_at.get_or_insert(now);
        self.last_sent_at = Some(now);
        self.transmit_count = self.transmit_count.saturating_add(1);
        self.state = SendState::Sent;
        SendData { tsn: self.tsn, data: self.data.clone(), reliability: self.reliability }
    }

    /// True if the reliability parameters forbid any further transmission.
    pub fn is_exhausted(&self, now: SocketTime) -> bool {
        match self.reliability {
            Reliability::Reliable => false,
            Reliability::MaxRetransmits(max) => self.transmit_count > u32::from(max),
            Reliability::MaxLifetime(lifetime) => {
                self.first_sent_at.is_some_and(|first| now - first > lifetime)
            }
        }
    }

    /// True if the retransmission timeout has elapsed since the last transmission and the chunk
    /// may still be resent.
    pub fn can_resend(&self, now: SocketTime, rto: Duration) -> bool {
        self.is_outstanding()
            && !self.is_exhausted(now)
            && self.last_sent_at.is_some_and(|last| now - last >= rto)
    }

    /// True if enough SACKs have reported this chunk missing, independently of any timeout. A
    /// chunk is only fast retransmitted once.
    pub fn can_fast_resend(&self, now: SocketTime) -> bool {
        self.is_outstanding()
            && !self.fast_resent
            && !self.is_exhausted(now)
            && self.times_reported_missing >= FAST_RETRANSMIT_THRESHOLD
    }

    /// True if the chunk is considered lost, and its reliability parameters don't allow resending
    /// it.
    pub fn should_abandon(&self, now: SocketTime) -> bool {
        if !self.is_outstanding() || !self.is_exhausted(now) {
            return false;
        }
        match self.reliability {
            Reliability::Reliable => false,
            Reliability::MaxRetransmits(_) => {
                self.times_reported_missing >= FAST_RETRANSMIT_THRESHOLD
            }
            Reliability::MaxLifetime(_) => true,
        }
    }
}
