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

use crate::api::StreamId;
use std::cmp::Ordering;
use std::fmt;

/// Two TSNs further apart than this are considered to have wrapped around.
pub const TSN_WRAP_THRESHOLD: u32 = 1_000_000_000;

/// Ordered/Unordered stream identifiers.
///
/// Ordered and unordered messages on the same stream id are reassembled and delivered
/// independently of each other, so internally they are kept apart using this key. Called
/// `StreamKey` to differentiate itself with [`StreamId`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum StreamKey {
    Ordered(StreamId),
    Unordered(StreamId),
}

impl StreamKey {
    pub fn new(is_unordered: bool, id: StreamId) -> Self {
        if is_unordered {
            Self::Unordered(id)
        } else {
            Self::Ordered(id)
        }
    }

    pub fn id(&self) -> StreamId {
        match *self {
            StreamKey::Ordered(id) | StreamKey::Unordered(id) => id,
        }
    }

    pub fn is_ordered(&self) -> bool {
        matches!(self, Self::Ordered(_))
    }

    pub fn is_unordered(&self) -> bool {
        matches!(self, Self::Unordered(_))
    }
}

/// Returns whichever of `a` and `b` is logically the earliest.
///
/// Values closer than [`TSN_WRAP_THRESHOLD`] compare by natural order. When they are further
/// apart, the sequence is assumed to have wrapped and the numerically larger value is the
/// earlier one.
pub fn distance_or_min(a: u32, b: u32) -> u32 {
    if a.abs_diff(b) < TSN_WRAP_THRESHOLD { a.min(b) } else { a.max(b) }
}

fn cmp_rfc1982_u16(a: u16, b: u16) -> Ordering {
    if a == b {
        Ordering::Equal
    } else if (a < b && (b - a) < (1 << 15)) || (a > b && (a - b) > (1 << 15)) {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

/// Stream Sequence Number (SSN)
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Ssn(pub u16);

impl fmt::Debug for Ssn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Ssn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::cmp::PartialOrd for Ssn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::cmp::Ord for Ssn {
    fn cmp(&self, other: &Self) -> Ordering {
        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-1.6>:
        //
        //   Any arithmetic done on Stream Sequence Numbers SHOULD use Serial Number Arithmetic, as
        //   defined in [RFC1982] [...]
        cmp_rfc1982_u16(self.0, other.0)
    }
}

impl std::ops::Add<u16> for Ssn {
    type Output = Ssn;

    #[inline]
    fn add(self, rhs: u16) -> Ssn {
        Ssn(self.0.wrapping_add(rhs))
    }
}

impl std::ops::Sub<u16> for Ssn {
    type Output = Ssn;

    #[inline]
    fn sub(self, rhs: u16) -> Ssn {
        Ssn(self.0.wrapping_sub(rhs))
    }
}

impl std::ops::AddAssign<u16> for Ssn {
    fn add_assign(&mut self, rhs: u16) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

/// Transmission Sequence Number (TSN)
///
/// Equality is exact and is what duplicate detection relies on. There is intentionally no `Ord`
/// implementation: "which one is earlier" is answered by [`Tsn::is_below`], which follows the
/// wraparound rule of [`distance_or_min`] and is only meaningful within one wrap epoch.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Tsn(pub u32);

impl fmt::Debug for Tsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Tsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add<u32> for Tsn {
    type Output = Tsn;

    #[inline]
    fn add(self, rhs: u32) -> Tsn {
        Tsn(self.0.wrapping_add(rhs))
    }
}

impl std::ops::Sub<u32> for Tsn {
    type Output = Tsn;

    #[inline]
    fn sub(self, rhs: u32) -> Tsn {
        Tsn(self.0.wrapping_sub(rhs))
    }
}

impl std::ops::AddAssign<u32> for Tsn {
    fn add_assign(&mut self, rhs: u32) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl Tsn {
    /// Returns true if `self` is logically earlier than `reference`.
    pub fn is_below(self, reference: Tsn) -> bool {
        self != reference && distance_or_min(self.0, reference.0) == self.0
    }

    pub fn is_at_or_below(self, reference: Tsn) -> bool {
        self == reference || self.is_below(reference)
    }

    /// Returns the logically later of the two.
    pub fn latest(self, other: Tsn) -> Tsn {
        if self.is_below(other) { other } else { self }
    }

    /// Number of steps from `base` forward to `self`, wrapping.
    pub fn offset_from(self, base: Tsn) -> u32 {
        self.0.wrapping_sub(base.0)
    }

    pub fn distance_to(self, other: Tsn) -> u32 {
        if other.is_below(self) {
            self.0.wrapping_sub(other.0)
        } else {
            other.0.wrapping_sub(self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LARGE_TSN_OFFSET: u32 = 1_000_000;
    const MAX_U32: u32 = 4_294_967_295;
    const MAX_U16: u16 = 65_535;

    #[test]
    fn distance_or_min_within_threshold_picks_smallest() {
        assert_eq!(distance_or_min(3, 7), 3);
        assert_eq!(distance_or_min(7, 3), 3);
        assert_eq!(distance_or_min(42, 42), 42);
        assert_eq!(distance_or_min(0, TSN_WRAP_THRESHOLD - 1), 0);
    }

    #[test]
    fn distance_or_min_beyond_threshold_picks_largest() {
        assert_eq!(distance_or_min(0, TSN_WRAP_THRESHOLD), TSN_WRAP_THRESHOLD);
        assert_eq!(distance_or_min(MAX_U32, 5), MAX_U32);
        assert_eq!(distance_or_min(5, MAX_U32), MAX_U32);
    }

    #[test]
    fn tsn_is_below() {
        assert!(!Tsn(42).is_below(Tsn(42)));
        assert!(Tsn(0).is_below(Tsn(1)));
        assert!(!Tsn(1).is_below(Tsn(0)));
        assert!(Tsn(44).is_below(Tsn(100)));
        assert!(Tsn(200).is_below(Tsn(255)));
        assert!(!Tsn(255).is_below(Tsn(200)));
        assert!(Tsn(MAX_U32).is_below(Tsn(0)));
        assert!(!Tsn(0).is_below(Tsn(MAX_U32)));
        assert!(Tsn(MAX_U32).is_below(Tsn(44)));
        assert!(Tsn(MAX_U32 - LARGE_TSN_OFFSET).is_below(Tsn(LARGE_TSN_OFFSET)));
    }

    #[test]
    fn tsn_is_below_at_threshold_boundary() {
        assert!(Tsn(0).is_below(Tsn(TSN_WRAP_THRESHOLD - 1)));
        assert!(Tsn(TSN_WRAP_THRESHOLD).is_below(Tsn(0)));
        assert!(!Tsn(0).is_below(Tsn(TSN_WRAP_THRESHOLD)));
    }

    #[test]
    fn tsn_is_at_or_below_and_latest() {
        assert!(Tsn(7).is_at_or_below(Tsn(7)));
        assert!(Tsn(6).is_at_or_below(Tsn(7)));
        assert!(!Tsn(8).is_at_or_below(Tsn(7)));
        assert_eq!(Tsn(MAX_U32).latest(Tsn(2)), Tsn(2));
        assert_eq!(Tsn(10).latest(Tsn(9)), Tsn(10));
    }

    #[test]
    fn tsn_next_and_prev_value() {
        let tsn1 = Tsn(MAX_U32 - 1);
        let tsn2 = Tsn(MAX_U32);
        let tsn3 = Tsn(0);
        let tsn4 = Tsn(1);

        assert_eq!(tsn1 + 1, tsn2);
        assert_eq!(tsn2 + 1, tsn3);
        assert_eq!(tsn3 + 1, tsn4);

        assert_eq!(tsn4 - 1, tsn3);
        assert_eq!(tsn3 - 1, tsn2);
        assert_eq!(tsn2 - 1, tsn1);
    }

    #[test]
    fn tsn_increment() {
        let mut tsn1 = Tsn(MAX_U32 - 1);

        tsn1 += 1;
        assert_eq!(tsn1, Tsn(MAX_U32));

        tsn1 += 1;
        assert_eq!(tsn1, Tsn(0));
    }

    #[test]
    fn tsn_offset_from_wraps() {
        assert_eq!(Tsn(10).offset_from(Tsn(7)), 3);
        assert_eq!(Tsn(1).offset_from(Tsn(MAX_U32)), 2);
    }

    #[test]
    fn tsn_distance_to() {
        let tsn1 = Tsn(MAX_U32 - LARGE_TSN_OFFSET);
        let tsn2 = Tsn(MAX_U32);
        let tsn3 = Tsn(0);
        let tsn4 = Tsn(LARGE_TSN_OFFSET);

        assert_eq!(tsn1.distance_to(tsn2), LARGE_TSN_OFFSET);
        assert_eq!(tsn2.distance_to(tsn1), LARGE_TSN_OFFSET);
        assert_eq!(tsn2.distance_to(tsn3), 1);
        assert_eq!(tsn3.distance_to(tsn2), 1);
        assert_eq!(tsn1.distance_to(tsn4), LARGE_TSN_OFFSET + 1 + LARGE_TSN_OFFSET);
        assert_eq!(tsn4.distance_to(tsn3), LARGE_TSN_OFFSET);
    }

    #[test]
    fn ssn_cmp() {
        assert!(Ssn(42) == Ssn(42));
        assert!(Ssn(1) > Ssn(0));
        assert!(Ssn(200) < Ssn(255));
        assert!(Ssn(0) > Ssn(MAX_U16));
        assert!(Ssn(MAX_U16) < Ssn(44));
    }

    #[test]
    fn ssn_next_and_prev_value() {
        assert_eq!(Ssn(MAX_U16) + 1, Ssn(0));
        assert_eq!(Ssn(0) - 1, Ssn(MAX_U16));

        let mut ssn = Ssn(MAX_U16);
        ssn += 1;
        assert_eq!(ssn, Ssn(0));
    }
}
