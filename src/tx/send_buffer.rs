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
use crate::packet::forward_tsn_chunk::ForwardTsnChunk;
use crate::packet::forward_tsn_chunk::SkippedStream;
use crate::packet::sack_chunk::SackChunk;
use crate::tx::buffered_sent::BufferedSent;
use crate::tx::buffered_sent::Reliability;
use crate::tx::buffered_sent::SendData;
use crate::tx::buffered_sent::SendState;
use crate::types::Tsn;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SendBufferError {
    #[error("The peer's receiver window and initial TSN are not yet known")]
    NotInitialized,

    #[error("Out of send buffer space")]
    OutOfBufferSpace,
}

/// What processing a SACK resulted in.
#[derive(Debug, Default, PartialEq)]
pub struct SackOutcome {
    /// True if the SACK moved the cumulative TSN ack point forward.
    pub cumulative_advanced: bool,

    /// Chunks reported missing often enough to be resent right away.
    pub fast_retransmit: Vec<SendData>,

    /// Set when abandoned chunks let the peer move its cumulative TSN ack point.
    pub forward_tsn: Option<ForwardTsnChunk>,
}

struct Remote {
    rwnd: u32,
    next_tsn: Tsn,
    last_cumulative_tsn: Tsn,
}

/// Holds outgoing DATA chunks from the moment they are buffered until the peer has cumulatively
/// acknowledged them.
///
/// Chunks are kept in TSN order. Since TSNs are assigned consecutively and only removed from the
/// front, the chunks always form an unbroken TSN sequence starting right after the last cumulative
/// TSN ack.
pub struct SendBuffer {
    capacity: usize,
    max_burst: usize,
    remote: Option<Remote>,
    chunks: VecDeque<BufferedSent>,
    buffered_bytes: usize,
}

impl SendBuffer {
    pub fn new(capacity: usize, max_burst: usize) -> Self {
        Self { capacity, max_burst, remote: None, chunks: VecDeque::new(), buffered_bytes: 0 }
    }

    /// Sets the peer's receiver window and the TSN of the first chunk to send. Only the first call
    /// has any effect.
    pub fn initialize_remote(&mut self, a_rwnd: u32, initial_tsn: Tsn) {
        if self.remote.is_none() {
            self.remote = Some(Remote {
                rwnd: a_rwnd,
                next_tsn: initial_tsn,
                last_cumulative_tsn: initial_tsn - 1,
            });
        }
    }

    /// Buffers the fragments of one message, assigning them consecutive TSNs. Either all fragments
    /// are buffered or none of them.
    pub fn buffer(
        &mut self,
        fragments: Vec<Data>,
        reliability: Reliability,
    ) -> Result<(), SendBufferError> {
        let remote = self.remote.as_mut().ok_or(SendBufferError::NotInitialized)?;
        let size: usize = fragments.iter().map(|d| d.payload.len()).sum();
        if self.buffered_bytes + size > self.capacity {
            return Err(SendBufferError::OutOfBufferSpace);
        }

        for data in fragments {
            let tsn = remote.next_tsn;
            remote.next_tsn += 1;
            self.chunks.push_back(BufferedSent::new(tsn, data, reliability));
        }
        self.buffered_bytes += size;
        Ok(())
    }

    /// Returns the chunks that have never been sent and that fit in the peer's receiver window.
    /// When nothing is in flight, one chunk is always let through so that the peer gets a chance
    /// to announce that its window has reopened.
    pub fn get_data_to_send(&mut self, now: SocketTime) -> Vec<SendData> {
        let Some(remote) = self.remote.as_ref() else {
            return vec![];
        };
        let rwnd = remote.rwnd as usize;
        let mut inflight = self.inflight_size();
        let mut to_send = vec![];
        for chunk in self.chunks.iter_mut() {
            if chunk.state != SendState::Pending || chunk.abandoned {
                continue;
            }
            let size = chunk.data.payload.len();
            if inflight > 0 && inflight + size > rwnd {
                break;
            }
            inflight += size;
            to_send.push(chunk.mark_sent(now));
        }
        to_send
    }

    /// Applies a SACK received from the peer.
    pub fn receive_sack(&mut self, sack: &SackChunk, now: SocketTime) -> SackOutcome {
        let Some(remote) = self.remote.as_mut() else {
            return SackOutcome::default();
        };
        let cumulative_tsn = sack.cumulative_tsn_ack;
        if cumulative_tsn.is_below(remote.last_cumulative_tsn)
            || !cumulative_tsn.is_below(remote.next_tsn)
        {
            // Either older than what has been seen, or acking TSNs that were never assigned.
            return SackOutcome::default();
        }

        let cumulative_advanced = cumulative_tsn != remote.last_cumulative_tsn;
        remote.last_cumulative_tsn = cumulative_tsn;
        remote.rwnd = sack.a_rwnd;

        while self.chunks.front().is_some_and(|c| c.tsn.is_at_or_below(cumulative_tsn)) {
            if let Some(chunk) = self.chunks.pop_front() {
                self.buffered_bytes -= chunk.data.payload.len();
            }
        }

        let gaps: Vec<(Tsn, Tsn)> = sack.gap_ack_ranges().collect();
        let highest_acked =
            gaps.iter().fold(cumulative_tsn, |highest, &(_, end)| highest.latest(end));
        for chunk in self.chunks.iter_mut() {
            if gaps.iter().any(|&(start, end)| {
                start.is_at_or_below(chunk.tsn) && chunk.tsn.is_at_or_below(end)
            }) {
                if chunk.state == SendState::Sent {
                    chunk.state = SendState::Acked;
                }
            } else if chunk.is_outstanding() && chunk.tsn.is_below(highest_acked) {
                chunk.times_reported_missing += 1;
            }
        }

        let mut fast_retransmit = vec![];
        for index in 0..self.chunks.len() {
            let chunk = &mut self.chunks[index];
            if chunk.can_fast_resend(now) {
                chunk.fast_resent = true;
                fast_retransmit.push(chunk.mark_sent(now));
            } else if chunk.should_abandon(now) {
                self.abandon_message(index);
            }
        }

        SackOutcome { cumulative_advanced, fast_retransmit, forward_tsn: self.forward_tsn() }
    }

    /// Returns the chunks whose retransmission timeout has expired, at most `max_burst` of them.
    /// Chunks that may not be resent anymore are abandoned.
    pub fn get_data_to_retransmit(&mut self, now: SocketTime, rto: Duration) -> Vec<SendData> {
        let mut to_send = vec![];
        for index in 0..self.chunks.len() {
            let chunk = &mut self.chunks[index];
            if !chunk.is_outstanding() || chunk.last_sent_at.is_none_or(|last| now - last < rto) {
                continue;
            }
            if chunk.is_exhausted(now) {
                self.abandon_message(index);
            } else if to_send.len() < self.max_burst {
                to_send.push(chunk.mark_sent(now));
            }
        }
        to_send
    }

    /// The FORWARD-TSN to send if abandoned chunks follow right after the cumulative TSN ack.
    ///
    /// See <https://datatracker.ietf.org/doc/html/rfc3758#section-3.5>, rule C1.
    pub fn forward_tsn(&self) -> Option<ForwardTsnChunk> {
        let remote = self.remote.as_ref()?;
        let mut advanced_ack_point = remote.last_cumulative_tsn;
        let mut skipped_streams: Vec<SkippedStream> = vec![];
        for chunk in self.chunks.iter().take_while(|c| c.abandoned || c.is_acked()) {
            advanced_ack_point = chunk.tsn;
            if !chunk.abandoned || chunk.data.stream_key.is_unordered() {
                continue;
            }
            let stream_id = chunk.data.stream_key.id();
            match skipped_streams.iter_mut().find(|s| s.stream_id == stream_id) {
                Some(skipped) => skipped.ssn = chunk.data.ssn,
                None => skipped_streams.push(SkippedStream { stream_id, ssn: chunk.data.ssn }),
            }
        }

        let any_abandoned =
            self.chunks.iter().take_while(|c| c.abandoned || c.is_acked()).any(|c| c.abandoned);
        any_abandoned.then_some(ForwardTsnChunk {
            new_cumulative_tsn: advanced_ack_point,
            skipped_streams,
        })
    }

    /// Abandons all fragments of the message that the chunk at `index` belongs to, including those
    /// not sent yet (RFC 3758 section 3.5, rule A3).
    fn abandon_message(&mut self, index: usize) {
        let mut first = index;
        while first > 0 && !self.chunks[first].data.is_beginning {
            first -= 1;
        }
        let mut last = index;
        while last + 1 < self.chunks.len() && !self.chunks[last].data.is_end {
            last += 1;
        }
        for chunk in self.chunks.range_mut(first..=last) {
            chunk.abandoned = true;
        }
    }

    /// Payload bytes sent but neither acked nor abandoned.
    pub fn inflight_size(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_outstanding()).map(|c| c.data.payload.len()).sum()
    }

    /// True if anything still needs to be delivered to the peer.
    pub fn has_messages_buffered(&self) -> bool {
        self.chunks.iter().any(|c| !c.abandoned && !c.is_acked())
    }

    /// Number of chunks sent but not cumulatively acknowledged.
    pub fn unacked_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.state != SendState::Pending).count()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    pub fn peer_rwnd(&self) -> u32 {
        self.remote.as_ref().map_or(0, |r| r.rwnd)
    }

    pub fn last_cumulative_tsn(&self) -> Option<Tsn> {
        self.remote.as_ref().map(|r| r.last_cumulative_tsn)
    }
}
