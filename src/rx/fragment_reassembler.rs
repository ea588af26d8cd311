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
use crate::rx::ReceivedUnit;
use crate::types::Tsn;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ReassemblyError {
    #[error("The message is missing fragments")]
    Incomplete,
}

/// Collects the fragments of a single message until it can be reassembled.
///
/// Fragments are kept sorted by TSN and a TSN is only stored once. Fragments may arrive in any
/// order, and the message is complete once it spans from a beginning fragment to an end fragment
/// without holes. All bookkeeping needed by [`Self::is_complete`] is updated on insertion.
///
/// TSNs wrap, so fragments are keyed by their signed distance to the first TSN ever added. All
/// fragments of one message lie well within 2^31 of each other.
#[derive(Debug, Default)]
pub struct FragmentReassembler {
    anchor: Option<Tsn>,
    fragments: BTreeMap<i32, ReceivedUnit>,
    beginnings: usize,
    ends: usize,
    byte_size: usize,
}

impl FragmentReassembler {
    pub fn new() -> Self {
        Default::default()
    }

    fn key(&mut self, tsn: Tsn) -> i32 {
        let anchor = *self.anchor.get_or_insert(tsn);
        tsn.offset_from(anchor) as i32
    }

    /// Adds a fragment. Returns false if its TSN was already present, in which case it is ignored.
    pub fn add_fragment(&mut self, unit: ReceivedUnit) -> bool {
        let key = self.key(unit.tsn);
        if self.fragments.contains_key(&key) {
            return false;
        }

        self.beginnings += usize::from(unit.data.is_beginning);
        self.ends += usize::from(unit.data.is_end);
        self.byte_size += unit.data.payload.len();
        self.fragments.insert(key, unit);
        true
    }

    fn first(&self) -> Option<&ReceivedUnit> {
        self.fragments.first_key_value().map(|(_, f)| f)
    }

    fn last(&self) -> Option<&ReceivedUnit> {
        self.fragments.last_key_value().map(|(_, f)| f)
    }

    pub fn first_tsn(&self) -> Option<Tsn> {
        self.first().map(|f| f.tsn)
    }

    pub fn last_tsn(&self) -> Option<Tsn> {
        self.last().map(|f| f.tsn)
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Payload bytes held by this accumulator.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn is_complete(&self) -> bool {
        let (Some(first), Some(last)) = (self.first(), self.last()) else {
            return false;
        };
        // Exactly one beginning at the lowest TSN and one end at the highest, and as TSNs are
        // unique, no holes in between.
        self.beginnings == 1
            && self.ends == 1
            && first.data.is_beginning
            && last.data.is_end
            && last.tsn.offset_from(first.tsn) as usize + 1 == self.fragments.len()
    }

    /// Returns the fragments of the complete message, ordered by TSN.
    pub fn complete_ordered_message(&self) -> Result<Vec<&ReceivedUnit>, ReassemblyError> {
        if !self.is_complete() {
            return Err(ReassemblyError::Incomplete);
        }
        Ok(self.fragments.values().collect())
    }

    /// Consumes the accumulator and joins the payload of all fragments into one message.
    pub fn into_deliverable(self) -> Result<Deliverable, ReassemblyError> {
        if !self.is_complete() {
            return Err(ReassemblyError::Incomplete);
        }
        let fragment_count = self.fragments.len();
        let mut payload = Vec::with_capacity(self.byte_size);
        let mut first = None;
        for unit in self.fragments.into_values() {
            if first.is_none() {
                first = Some((unit.data.stream_key.id(), unit.data.ppid));
            }
            payload.extend(unit.data.payload);
        }
        let (stream_id, ppid) = first.ok_or(ReassemblyError::Incomplete)?;
        Ok(Deliverable { payload, fragment_count, stream_id, ppid })
    }

    /// True if `unit` directly precedes the lowest fragment and may be part of the same message.
    pub(crate) fn accepts_before(&self, unit: &ReceivedUnit) -> bool {
        self.first().is_some_and(|first| {
            first.tsn == unit.tsn + 1
                && !first.data.is_beginning
                && !unit.data.is_end
                && Self::same_message(first, unit)
        })
    }

    /// True if `unit` directly follows the highest fragment and may be part of the same message.
    pub(crate) fn accepts_after(&self, unit: &ReceivedUnit) -> bool {
        self.last().is_some_and(|last| {
            unit.tsn == last.tsn + 1
                && !last.data.is_end
                && !unit.data.is_beginning
                && Self::same_message(last, unit)
        })
    }

    fn same_message(a: &ReceivedUnit, b: &ReceivedUnit) -> bool {
        a.data.stream_key == b.data.stream_key
            && (b.data.stream_key.is_unordered() || a.data.ssn == b.data.ssn)
    }

    /// Moves all fragments of `other` into this accumulator.
    pub(crate) fn merge(&mut self, other: FragmentReassembler) {
        for unit in other.fragments.into_values() {
            self.add_fragment(unit);
        }
    }
}
