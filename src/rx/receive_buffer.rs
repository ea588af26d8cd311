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

use crate::api::Deliverable;
use crate::api::StreamId;
use crate::packet::forward_tsn_chunk::SkippedStream;
use crate::packet::sack_chunk::GapAckBlock;
use crate::packet::sack_chunk::SackChunk;
use crate::rx::ReceivedUnit;
use crate::rx::fragment_reassembler::FragmentReassembler;
use crate::rx::gap_ack::build_gap_ack_ranges;
use crate::types::Ssn;
use crate::types::StreamKey;
use crate::types::Tsn;
use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use thiserror::Error;

/// The maximum number of duplicate TSNs that will be reported in a SACK.
const MAX_DUPLICATE_TSN_REPORTED: usize = 20;

/// The maximum number of gap-ack-blocks that will be reported in a SACK.
const MAX_GAP_ACK_BLOCKS_REPORTED: usize = 20;

#[derive(Debug, Error, PartialEq)]
pub enum ReceiveBufferError {
    #[error("The peer's initial TSN is not yet known")]
    NotInitialized,

    #[error("Out of receive buffer space")]
    OutOfBufferSpace,
}

impl ReceiveBufferError {
    /// Fatal errors can't be recovered from by discarding the offending chunk, and the association
    /// must be aborted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReceiveBufferError::OutOfBufferSpace)
    }
}

/// Tracks received DATA chunks, reassembles them into messages and produces the SACKs describing
/// what has been received.
///
/// Only TSNs above the cumulative TSN ack are remembered individually. Anything at or below it, or
/// already remembered, is a duplicate that is reported in the next SACK. A fragment occupies buffer
/// space from the moment it's stored until the application has read the message it belongs to,
/// which the reader reports with [`ReceiveBuffer::release_read_bytes`].
pub struct ReceiveBuffer {
    capacity: usize,
    max_fragments: usize,

    /// All TSNs up until (and including) this value have been seen. `None` until the peer's
    /// initial TSN is known.
    cumulative_tsn: Option<Tsn>,

    /// Received TSNs above `cumulative_tsn`.
    received_above_cumulative: HashSet<Tsn>,

    duplicates: Vec<Tsn>,
    unreported_duplicates: u64,

    /// Partially received messages, per stream key, each an unbroken run of TSNs.
    reassembly: HashMap<StreamKey, Vec<FragmentReassembler>>,

    /// Complete ordered messages waiting for an earlier SSN on the same stream.
    waiting_ordered: HashMap<StreamId, HashMap<Ssn, Deliverable>>,
    next_ssn: HashMap<StreamId, Ssn>,

    ready: VecDeque<Deliverable>,

    held_fragments: usize,
    used_bytes: usize,
    /// Part of `used_bytes` taken by messages handed out but not yet read by the application.
    unread_bytes: usize,
    received_bytes: u64,
    delivered_bytes: u64,
}

impl ReceiveBuffer {
    /// Creates a buffer holding at most `capacity` payload bytes spread over at most
    /// `max_fragments` fragments.
    pub fn new(capacity: usize, max_fragments: usize) -> Self {
        Self {
            capacity,
            max_fragments,
            cumulative_tsn: None,
            received_above_cumulative: HashSet::new(),
            duplicates: Vec::new(),
            unreported_duplicates: 0,
            reassembly: HashMap::new(),
            waiting_ordered: HashMap::new(),
            next_ssn: HashMap::new(),
            ready: VecDeque::new(),
            held_fragments: 0,
            used_bytes: 0,
            unread_bytes: 0,
            received_bytes: 0,
            delivered_bytes: 0,
        }
    }

    /// Starts tracking from the peer's initial TSN, which is the first TSN expected.
    pub fn set_initial_tsn(&mut self, peer_initial_tsn: Tsn) {
        self.cumulative_tsn = Some(peer_initial_tsn - 1);
        self.received_above_cumulative.clear();
    }

    /// Forgets everything received so far, as when a new association is established. Messages
    /// that were handed out but not yet read keep their space, and the statistics are kept.
    pub fn reset(&mut self) {
        *self = Self {
            used_bytes: self.unread_bytes,
            unread_bytes: self.unread_bytes,
            received_bytes: self.received_bytes,
            delivered_bytes: self.delivered_bytes,
            ..Self::new(self.capacity, self.max_fragments)
        };
    }

    pub fn cumulative_tsn(&self) -> Option<Tsn> {
        self.cumulative_tsn
    }

    pub fn store(&mut self, unit: ReceivedUnit) -> Result<(), ReceiveBufferError> {
        let cumulative_tsn = self.cumulative_tsn.ok_or(ReceiveBufferError::NotInitialized)?;
        let tsn = unit.tsn;

        if tsn.is_at_or_below(cumulative_tsn) || self.received_above_cumulative.contains(&tsn) {
            self.record_duplicate(tsn);
            return Ok(());
        }

        let size = unit.data.payload.len();
        if self.held_fragments >= self.max_fragments || self.used_bytes + size > self.capacity {
            return Err(ReceiveBufferError::OutOfBufferSpace);
        }

        self.received_above_cumulative.insert(tsn);
        self.held_fragments += 1;
        self.used_bytes += size;
        self.received_bytes += size as u64;

        self.route(unit);
        self.advance_cumulative_tsn();
        Ok(())
    }

    /// Returns all messages that are ready to be handed to the application. Their fragments are
    /// released, but their bytes stay accounted for until [`Self::release_read_bytes`] is called.
    pub fn get_messages_for_delivery(&mut self) -> Vec<Deliverable> {
        let messages: Vec<Deliverable> = self.ready.drain(..).collect();
        for message in &messages {
            self.held_fragments -= message.fragment_count;
            self.unread_bytes += message.payload.len();
            self.delivered_bytes += message.payload.len() as u64;
        }
        messages
    }

    /// Gives back the space of delivered messages that the application has now read.
    pub fn release_read_bytes(&mut self, bytes: usize) {
        let bytes = bytes.min(self.unread_bytes);
        self.unread_bytes -= bytes;
        self.used_bytes -= bytes;
    }

    /// Snapshots what has been received as a SACK, and clears the list of duplicates.
    pub fn get_sack_data_to_send(&mut self) -> Option<SackChunk> {
        let cumulative_tsn = self.cumulative_tsn?;

        let offsets: Vec<u32> = self
            .received_above_cumulative
            .iter()
            .map(|tsn| tsn.offset_from(cumulative_tsn))
            .collect();
        let gap_ack_blocks = build_gap_ack_ranges(&offsets)
            .into_iter()
            .take(MAX_GAP_ACK_BLOCKS_REPORTED)
            .map_while(|range| {
                Some(GapAckBlock::new(
                    u16::try_from(range.start).ok()?,
                    u16::try_from(range.end).ok()?,
                ))
            })
            .collect();

        Some(SackChunk {
            cumulative_tsn_ack: cumulative_tsn,
            a_rwnd: self.a_rwnd(),
            gap_ack_blocks,
            duplicate_tsns: std::mem::take(&mut self.duplicates),
        })
    }

    /// Moves the cumulative TSN past data that the sender has abandoned.
    ///
    /// See <https://datatracker.ietf.org/doc/html/rfc3758#section-3.6>.
    pub fn handle_forward_tsn(
        &mut self,
        new_cumulative_tsn: Tsn,
        skipped_streams: &[SkippedStream],
    ) -> Result<(), ReceiveBufferError> {
        let cumulative_tsn = self.cumulative_tsn.ok_or(ReceiveBufferError::NotInitialized)?;
        if new_cumulative_tsn.is_at_or_below(cumulative_tsn) {
            return Ok(());
        }

        self.received_above_cumulative.retain(|tsn| !tsn.is_at_or_below(new_cumulative_tsn));
        self.cumulative_tsn = Some(new_cumulative_tsn);
        self.advance_cumulative_tsn();

        // Partial messages that started at or before the new cumulative TSN are missing fragments
        // that will never be sent.
        let mut released_fragments = 0;
        let mut released_bytes = 0;
        for accumulators in self.reassembly.values_mut() {
            accumulators.retain(|r| {
                let keep = r.first_tsn().is_some_and(|tsn| !tsn.is_at_or_below(new_cumulative_tsn));
                if !keep {
                    released_fragments += r.len();
                    released_bytes += r.byte_size();
                }
                keep
            });
        }
        self.reassembly.retain(|_, accumulators| !accumulators.is_empty());
        self.held_fragments -= released_fragments;
        self.used_bytes -= released_bytes;

        for skipped in skipped_streams {
            let next_ssn = self.next_ssn.entry(skipped.stream_id).or_insert(Ssn(0));
            if *next_ssn <= skipped.ssn {
                *next_ssn = skipped.ssn + 1;
            }
            let next_ssn = *next_ssn;

            if let Some(waiting) = self.waiting_ordered.get_mut(&skipped.stream_id) {
                let mut passed: Vec<Ssn> =
                    waiting.keys().filter(|ssn| **ssn < next_ssn).copied().collect();
                passed.sort();
                for ssn in passed {
                    if let Some(message) = waiting.remove(&ssn) {
                        self.ready.push_back(message);
                    }
                }
            }
            self.deliver_in_order(skipped.stream_id);
        }
        Ok(())
    }

    /// True if the next SACK will carry gap ack blocks or duplicate TSNs. Such SACKs shouldn't be
    /// delayed, see <https://datatracker.ietf.org/doc/html/rfc9260#section-6.7>.
    pub fn has_gaps_or_duplicates(&self) -> bool {
        !self.received_above_cumulative.is_empty() || !self.duplicates.is_empty()
    }

    /// The advertised receiver window: how many more payload bytes fit in the buffer.
    pub fn a_rwnd(&self) -> u32 {
        u32::try_from(self.capacity.saturating_sub(self.used_bytes)).unwrap_or(u32::MAX)
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn unread_bytes(&self) -> usize {
        self.unread_bytes
    }

    pub fn held_fragments(&self) -> usize {
        self.held_fragments
    }

    /// Total payload bytes accepted into the buffer.
    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    /// Total payload bytes handed out as complete messages.
    pub fn delivered_bytes(&self) -> u64 {
        self.delivered_bytes
    }

    /// Duplicates that were received but didn't fit in any SACK.
    pub fn unreported_duplicates(&self) -> u64 {
        self.unreported_duplicates
    }

    fn record_duplicate(&mut self, tsn: Tsn) {
        if self.duplicates.len() < MAX_DUPLICATE_TSN_REPORTED {
            self.duplicates.push(tsn);
        } else {
            self.unreported_duplicates += 1;
        }
    }

    fn advance_cumulative_tsn(&mut self) {
        let Some(mut cumulative_tsn) = self.cumulative_tsn else {
            return;
        };
        while self.received_above_cumulative.remove(&(cumulative_tsn + 1)) {
            cumulative_tsn += 1;
        }
        self.cumulative_tsn = Some(cumulative_tsn);
    }

    fn route(&mut self, unit: ReceivedUnit) {
        let stream_key = unit.data.stream_key;
        let ssn = unit.data.ssn;

        if unit.data.is_unfragmented() {
            let message = Deliverable {
                fragment_count: 1,
                stream_id: stream_key.id(),
                ppid: unit.data.ppid,
                payload: unit.data.payload,
            };
            self.on_message_complete(stream_key, ssn, message);
            return;
        }

        let accumulators = self.reassembly.entry(stream_key).or_default();
        let precedes = accumulators.iter().position(|r| r.accepts_before(&unit));
        let follows = accumulators.iter().position(|r| r.accepts_after(&unit));

        let idx = match (follows, precedes) {
            (Some(left), Some(right)) => {
                // The fragment bridges two runs.
                let right_run = accumulators.swap_remove(right);
                let left = if left == accumulators.len() { right } else { left };
                accumulators[left].add_fragment(unit);
                accumulators[left].merge(right_run);
                left
            }
            (Some(idx), None) | (None, Some(idx)) => {
                accumulators[idx].add_fragment(unit);
                idx
            }
            (None, None) => {
                let mut run = FragmentReassembler::new();
                run.add_fragment(unit);
                accumulators.push(run);
                accumulators.len() - 1
            }
        };

        if !accumulators[idx].is_complete() {
            return;
        }
        let run = accumulators.swap_remove(idx);
        if accumulators.is_empty() {
            self.reassembly.remove(&stream_key);
        }
        if let Ok(message) = run.into_deliverable() {
            self.on_message_complete(stream_key, ssn, message);
        }
    }

    fn on_message_complete(&mut self, stream_key: StreamKey, ssn: Ssn, message: Deliverable) {
        match stream_key {
            StreamKey::Unordered(_) => self.ready.push_back(message),
            StreamKey::Ordered(stream_id) => {
                self.waiting_ordered.entry(stream_id).or_default().insert(ssn, message);
                self.deliver_in_order(stream_id);
            }
        }
    }

    fn deliver_in_order(&mut self, stream_id: StreamId) {
        let Some(waiting) = self.waiting_ordered.get_mut(&stream_id) else {
            return;
        };
        let next_ssn = self.next_ssn.entry(stream_id).or_insert(Ssn(0));
        while let Some(message) = waiting.remove(next_ssn) {
            self.ready.push_back(message);
            *next_ssn += 1;
        }
        if waiting.is_empty() {
            self.waiting_ordered.remove(&stream_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PpId;
    use crate::packet::data::Data;
    use crate::testing::data_generator::DataGenerator;

    const CAPACITY: usize = 1000;
    const MAX_FRAGMENTS: usize = 100;

    fn unordered(tsn: u32, payload: &[u8]) -> ReceivedUnit {
        ReceivedUnit {
            tsn: Tsn(tsn),
            data: Data {
                stream_key: StreamKey::Unordered(StreamId(1)),
                ssn: Ssn(0),
                ppid: PpId(51),
                payload: payload.to_vec(),
                is_beginning: true,
                is_end: true,
            },
        }
    }

    fn initialized(peer_initial_tsn: u32) -> ReceiveBuffer {
        let mut buf = ReceiveBuffer::new(CAPACITY, MAX_FRAGMENTS);
        buf.set_initial_tsn(Tsn(peer_initial_tsn));
        buf
    }

    fn payloads(messages: &[Deliverable]) -> Vec<&[u8]> {
        messages.iter().map(|m| m.payload.as_slice()).collect()
    }

    #[test]
    fn store_before_initialization_fails() {
        let mut buf = ReceiveBuffer::new(CAPACITY, MAX_FRAGMENTS);
        assert_eq!(buf.store(unordered(1, b"a")), Err(ReceiveBufferError::NotInitialized));
        assert!(buf.get_sack_data_to_send().is_none());
    }

    #[test]
    fn stores_with_gap_and_delivers_unordered() {
        let mut buf = initialized(2);
        assert_eq!(buf.cumulative_tsn(), Some(Tsn(1)));

        buf.store(unordered(2, b"a")).unwrap();
        buf.store(unordered(3, b"b")).unwrap();
        buf.store(unordered(5, b"c")).unwrap();

        let sack = buf.get_sack_data_to_send().unwrap();
        assert_eq!(sack.cumulative_tsn_ack, Tsn(3));
        assert_eq!(sack.gap_ack_blocks, vec![GapAckBlock::new(2, 2)]);
        assert!(sack.duplicate_tsns.is_empty());

        let messages = buf.get_messages_for_delivery();
        assert_eq!(messages.len(), 3);
        assert!(buf.get_messages_for_delivery().is_empty());
    }

    #[test]
    fn filling_the_gap_advances_cumulative_tsn() {
        let mut buf = initialized(1);
        buf.store(unordered(1, b"a")).unwrap();
        buf.store(unordered(3, b"c")).unwrap();
        buf.store(unordered(4, b"d")).unwrap();
        assert_eq!(buf.cumulative_tsn(), Some(Tsn(1)));

        assert!(buf.has_gaps_or_duplicates());

        buf.store(unordered(2, b"b")).unwrap();
        assert_eq!(buf.cumulative_tsn(), Some(Tsn(4)));
        assert!(!buf.has_gaps_or_duplicates());
        assert!(buf.get_sack_data_to_send().unwrap().gap_ack_blocks.is_empty());
    }

    #[test]
    fn duplicates_are_reported_once() {
        let mut buf = initialized(1);
        buf.store(unordered(1, b"a")).unwrap();
        buf.store(unordered(3, b"c")).unwrap();
        buf.store(unordered(1, b"a")).unwrap();
        buf.store(unordered(3, b"c")).unwrap();
        assert_eq!(buf.cumulative_tsn(), Some(Tsn(1)));

        assert_eq!(buf.get_sack_data_to_send().unwrap().duplicate_tsns, vec![Tsn(1), Tsn(3)]);
        assert!(buf.get_sack_data_to_send().unwrap().duplicate_tsns.is_empty());
        assert_eq!(payloads(&buf.get_messages_for_delivery()), vec![b"a", b"c"]);
    }

    #[test]
    fn duplicate_list_is_capped() {
        let mut buf = initialized(1);
        buf.store(unordered(1, b"a")).unwrap();
        for _ in 0..25 {
            buf.store(unordered(1, b"a")).unwrap();
        }
        let sack = buf.get_sack_data_to_send().unwrap();
        assert_eq!(sack.duplicate_tsns.len(), MAX_DUPLICATE_TSN_REPORTED);
        assert_eq!(buf.unreported_duplicates(), 5);
    }

    #[test]
    fn gap_ack_blocks_are_capped() {
        let mut buf = initialized(1);
        for i in 0..30 {
            buf.store(unordered(2 + i * 2, b"x")).unwrap();
        }
        let sack = buf.get_sack_data_to_send().unwrap();
        assert_eq!(sack.cumulative_tsn_ack, Tsn(0));
        assert_eq!(sack.gap_ack_blocks.len(), MAX_GAP_ACK_BLOCKS_REPORTED);
        assert_eq!(sack.gap_ack_blocks[0], GapAckBlock::new(2, 2));
    }

    #[test]
    fn accepts_tsn_far_ahead_while_there_is_space() {
        let mut buf = ReceiveBuffer::new(CAPACITY, 10);
        buf.set_initial_tsn(Tsn(1));
        buf.store(unordered(25, b"a")).unwrap();
        assert_eq!(buf.held_fragments(), 1);
        assert_eq!(buf.cumulative_tsn(), Some(Tsn(0)));

        for tsn in 1..25 {
            buf.store(unordered(tsn, b"b")).unwrap_or_else(|e| {
                assert_eq!(e, ReceiveBufferError::OutOfBufferSpace);
            });
        }
        assert_eq!(buf.held_fragments(), 10);
        assert_eq!(buf.get_messages_for_delivery().len(), 10);
    }

    #[test]
    fn running_out_of_bytes_is_fatal() {
        let mut buf = ReceiveBuffer::new(10, MAX_FRAGMENTS);
        buf.set_initial_tsn(Tsn(1));
        buf.store(unordered(1, b"123456")).unwrap();
        let err = buf.store(unordered(2, b"123456")).unwrap_err();
        assert_eq!(err, ReceiveBufferError::OutOfBufferSpace);
        assert!(err.is_fatal());
        assert_eq!(buf.cumulative_tsn(), Some(Tsn(1)));
    }

    #[test]
    fn running_out_of_fragments_is_fatal() {
        let mut buf = ReceiveBuffer::new(CAPACITY, 2);
        buf.set_initial_tsn(Tsn(1));
        let mut generator = DataGenerator::new(StreamId(1), Tsn(1));
        buf.store(generator.unordered("a", "B")).unwrap();
        buf.store(generator.unordered("b", "")).unwrap();
        assert_eq!(
            buf.store(generator.unordered("c", "E")),
            Err(ReceiveBufferError::OutOfBufferSpace)
        );
    }

    #[test]
    fn a_rwnd_tracks_undelivered_bytes() {
        let mut buf = initialized(1);
        assert_eq!(buf.a_rwnd(), CAPACITY as u32);
        buf.store(unordered(1, &[0; 100])).unwrap();
        buf.store(unordered(3, &[0; 50])).unwrap();
        assert_eq!(buf.get_sack_data_to_send().unwrap().a_rwnd, (CAPACITY - 150) as u32);

        buf.get_messages_for_delivery();
        assert_eq!(buf.received_bytes(), 150);
        assert_eq!(buf.delivered_bytes(), 150);
        assert_eq!(buf.held_fragments(), 0);
        assert_eq!(buf.unread_bytes(), 150);
        assert_eq!(buf.a_rwnd(), (CAPACITY - 150) as u32);

        buf.release_read_bytes(100);
        assert_eq!(buf.a_rwnd(), (CAPACITY - 50) as u32);
        buf.release_read_bytes(50);
        assert_eq!(buf.a_rwnd(), CAPACITY as u32);
        assert_eq!(buf.used_bytes(), 0);
    }

    #[test]
    fn unread_messages_exhaust_the_buffer() {
        let mut buf = initialized(1);
        for tsn in 1..=10 {
            buf.store(unordered(tsn, &[0; 100])).unwrap();
            assert_eq!(buf.get_messages_for_delivery().len(), 1);
        }
        assert_eq!(buf.a_rwnd(), 0);
        assert_eq!(buf.store(unordered(11, &[0; 1])), Err(ReceiveBufferError::OutOfBufferSpace));

        buf.release_read_bytes(100);
        assert_eq!(buf.a_rwnd(), 100);
        buf.store(unordered(11, &[0; 100])).unwrap();
    }

    #[test]
    fn reset_keeps_space_of_unread_messages() {
        let mut buf = initialized(1);
        buf.store(unordered(1, &[0; 100])).unwrap();
        buf.get_messages_for_delivery();
        buf.store(unordered(3, &[0; 50])).unwrap();

        buf.reset();
        assert_eq!(buf.cumulative_tsn(), None);
        assert_eq!(buf.held_fragments(), 0);
        assert_eq!(buf.used_bytes(), 100);
        assert_eq!(buf.received_bytes(), 150);

        buf.set_initial_tsn(Tsn(500));
        buf.store(unordered(500, b"new")).unwrap();
        assert_eq!(payloads(&buf.get_messages_for_delivery()), vec![b"new"]);
        buf.release_read_bytes(103);
        assert_eq!(buf.a_rwnd(), CAPACITY as u32);
    }

    #[test]
    fn reassembles_out_of_order_fragments() {
        let mut buf = initialized(10);
        let mut generator = DataGenerator::new(StreamId(1), Tsn(10));
        let first = generator.unordered("ab", "B");
        let middle = generator.unordered("cd", "");
        let last = generator.unordered("ef", "E");

        buf.store(last).unwrap();
        buf.store(first).unwrap();
        assert!(buf.get_messages_for_delivery().is_empty());
        assert_eq!(buf.held_fragments(), 2);

        buf.store(middle).unwrap();
        let messages = buf.get_messages_for_delivery();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, b"abcdef");
        assert_eq!(messages[0].fragment_count, 3);
        assert_eq!(buf.held_fragments(), 0);
        assert_eq!(buf.used_bytes(), 6);
        buf.release_read_bytes(6);
        assert_eq!(buf.used_bytes(), 0);
    }

    #[test]
    fn separates_adjacent_unordered_messages() {
        let mut buf = initialized(1);
        let mut generator = DataGenerator::new(StreamId(1), Tsn(1));
        let a1 = generator.unordered("a1", "B");
        let a2 = generator.unordered("a2", "E");
        let b1 = generator.unordered("b1", "B");
        let b2 = generator.unordered("b2", "E");

        buf.store(a2).unwrap();
        buf.store(b1).unwrap();
        assert!(buf.get_messages_for_delivery().is_empty());

        buf.store(a1).unwrap();
        buf.store(b2).unwrap();
        assert_eq!(payloads(&buf.get_messages_for_delivery()), vec![b"a1a2", b"b1b2"]);
    }

    #[test]
    fn delivers_ordered_messages_in_ssn_order() {
        let mut buf = initialized(1);
        let mut generator = DataGenerator::new(StreamId(3), Tsn(1));
        let m0 = generator.ordered("zero", "BE");
        let m1 = generator.ordered("one", "BE");
        let m2_first = generator.ordered("tw", "B");
        let m2_last = generator.ordered("o", "E");

        buf.store(m1).unwrap();
        buf.store(m2_first).unwrap();
        buf.store(m2_last).unwrap();
        assert!(buf.get_messages_for_delivery().is_empty());

        buf.store(m0).unwrap();
        assert_eq!(payloads(&buf.get_messages_for_delivery()), vec![&b"zero"[..], b"one", b"two"]);
    }

    #[test]
    fn unordered_messages_bypass_ordered_queue() {
        let mut buf = initialized(1);
        let mut ordered = DataGenerator::new(StreamId(1), Tsn(1));
        ordered.skip();
        let mut late = ordered.ordered("second", "BE");
        late.data.ssn = Ssn(1);
        buf.store(late).unwrap();
        buf.store(unordered(3, b"now")).unwrap();
        assert_eq!(payloads(&buf.get_messages_for_delivery()), vec![b"now"]);
    }

    #[test]
    fn forward_tsn_drops_abandoned_partial_message() {
        let mut buf = initialized(1);
        let mut generator = DataGenerator::new(StreamId(1), Tsn(1));
        generator.skip();
        buf.store(generator.unordered("lost", "")).unwrap();
        generator.skip();
        buf.store(generator.unordered("kept", "BE")).unwrap();
        assert_eq!(buf.get_messages_for_delivery().len(), 1);
        assert_eq!(buf.held_fragments(), 1);
        assert_eq!(buf.used_bytes(), 8);

        buf.handle_forward_tsn(Tsn(3), &[]).unwrap();
        assert_eq!(buf.cumulative_tsn(), Some(Tsn(4)));
        assert_eq!(buf.used_bytes(), 4);
        assert_eq!(buf.unread_bytes(), 4);
        assert_eq!(buf.held_fragments(), 0);
    }

    #[test]
    fn forward_tsn_skips_ordered_stream() {
        let mut buf = initialized(1);
        let mut generator = DataGenerator::new(StreamId(7), Tsn(1));
        generator.skip();
        let mut second = generator.ordered("second", "BE");
        second.data.ssn = Ssn(1);
        buf.store(second).unwrap();
        assert!(buf.get_messages_for_delivery().is_empty());

        buf.handle_forward_tsn(Tsn(1), &[SkippedStream { stream_id: StreamId(7), ssn: Ssn(0) }])
            .unwrap();
        assert_eq!(buf.cumulative_tsn(), Some(Tsn(2)));
        assert_eq!(payloads(&buf.get_messages_for_delivery()), vec![b"second"]);
    }

    #[test]
    fn stale_forward_tsn_is_ignored() {
        let mut buf = initialized(5);
        buf.store(unordered(5, b"a")).unwrap();
        buf.handle_forward_tsn(Tsn(3), &[]).unwrap();
        assert_eq!(buf.cumulative_tsn(), Some(Tsn(5)));
    }

    #[test]
    fn gap_ack_blocks_across_wraparound() {
        let mut buf = initialized(u32::MAX - 1);
        buf.store(unordered(u32::MAX - 1, b"a")).unwrap();
        buf.store(unordered(1, b"b")).unwrap();

        let sack = buf.get_sack_data_to_send().unwrap();
        assert_eq!(sack.cumulative_tsn_ack, Tsn(u32::MAX - 1));
        assert_eq!(sack.gap_ack_blocks, vec![GapAckBlock::new(3, 3)]);
    }
}
