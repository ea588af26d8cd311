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

use crate::packet::ChunkParseError;
use crate::packet::SerializableTlv;
use crate::packet::parameter::RawParameter;
use crate::packet::parameter::write_parameter_header;
use crate::packet::read_u32_be;
use crate::packet::read_u64_be;
use crate::packet::write_u32_be;
use crate::packet::write_u64_be;
use anyhow::Error;
use anyhow::ensure;
use std::fmt;

pub(crate) const PARAMETER_TYPE: u16 = 1;

// Size of the info this implementation puts in its own heartbeats: a counter and a timestamp.
const STAMP_SIZE: usize = 12;

/// Heartbeat Info parameter
///
/// See <https://datatracker.ietf.org/doc/html/rfc9260#section-3.3.5-4.6.1>.
///
/// ```txt
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |    Heartbeat Info Type = 1    |        HB Info Length         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                Sender-Specific Heartbeat Info                 /
/// \                                                               \
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The info is opaque to the receiver, which echoes it back unchanged in a HEARTBEAT-ACK.
#[derive(Clone, Debug, PartialEq)]
pub struct HeartbeatInfoParameter {
    pub(crate) info: Vec<u8>,
}

impl HeartbeatInfoParameter {
    /// Creates the info of a locally originated heartbeat.
    pub fn from_counter_and_time(counter: u32, sent_at_millis: u64) -> Self {
        let mut info = vec![0; STAMP_SIZE];
        write_u32_be!(&mut info[0..4], counter);
        write_u64_be!(&mut info[4..12], sent_at_millis);
        Self { info }
    }

    /// Returns the counter and send time of a heartbeat made by [`Self::from_counter_and_time`].
    pub fn counter_and_time(&self) -> Option<(u32, u64)> {
        if self.info.len() != STAMP_SIZE {
            return None;
        }
        Some((read_u32_be!(&self.info[0..4]), read_u64_be!(&self.info[4..12])))
    }
}

impl TryFrom<RawParameter<'_>> for HeartbeatInfoParameter {
    type Error = Error;

    fn try_from(raw: RawParameter<'_>) -> Result<Self, Error> {
        ensure!(raw.typ == PARAMETER_TYPE, ChunkParseError::InvalidType);
        Ok(Self { info: raw.value.to_vec() })
    }
}

impl SerializableTlv for HeartbeatInfoParameter {
    fn serialize_to(&self, output: &mut [u8]) {
        let value = write_parameter_header(PARAMETER_TYPE, self.value_size(), output);
        value.copy_from_slice(&self.info);
    }

    fn value_size(&self) -> usize {
        self.info.len()
    }
}

impl fmt::Display for HeartbeatInfoParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Heartbeat Info parameter, info_length={}", self.info.len())
    }
}
