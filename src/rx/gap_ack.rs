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

/// An inclusive run of received TSNs, expressed as offsets from the cumulative TSN ack.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GapAckRange {
    pub start: u32,
    pub end: u32,
}

impl GapAckRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

/// Collapses `offsets` into sorted, non-adjacent inclusive ranges.
///
/// The input may be in any order and contain duplicates, and is left untouched.
pub fn build_gap_ack_ranges(offsets: &[u32]) -> Vec<GapAckRange> {
    let mut sorted = offsets.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut ranges: Vec<GapAckRange> = Vec::new();
    for offset in sorted {
        match ranges.last_mut() {
            Some(last) if last.end.checked_add(1) == Some(offset) => last.end = offset,
            _ => ranges.push(GapAckRange::new(offset, offset)),
        }
    }
    ranges
}
