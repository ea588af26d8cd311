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

use crate::api::PpId;
use crate::api::StreamId;
use crate::packet::data::Data;
use crate::rx::ReceivedUnit;
use crate::types::Ssn;
use crate::types::StreamKey;
use crate::types::Tsn;

/// Produces consecutive fragments for one stream. `flags` is a string that may contain "B" and
/// "E" for the beginning and end fragment flags.
pub struct DataGenerator {
    stream_id: StreamId,
    ssn: Ssn,
    next_tsn: Tsn,
}

impl DataGenerator {
    pub fn new(stream_id: StreamId, first_tsn: Tsn) -> Self {
        DataGenerator { stream_id, ssn: Ssn(0), next_tsn: first_tsn }
    }

    pub fn ordered(&mut self, payload: &str, flags: &str) -> ReceivedUnit {
        let unit = self.make(StreamKey::Ordered(self.stream_id), self.ssn, payload, flags);
        if unit.data.is_end {
            self.ssn += 1;
        }
        unit
    }

    pub fn unordered(&mut self, payload: &str, flags: &str) -> ReceivedUnit {
        self.make(StreamKey::Unordered(self.stream_id), Ssn(0), payload, flags)
    }

    /// Skips a TSN, as if it was lost on the way.
    pub fn skip(&mut self) -> Tsn {
        let tsn = self.next_tsn;
        self.next_tsn += 1;
        tsn
    }

    fn make(
        &mut self,
        stream_key: StreamKey,
        ssn: Ssn,
        payload: &str,
        flags: &str,
    ) -> ReceivedUnit {
        let tsn = self.next_tsn;
        self.next_tsn += 1;
        ReceivedUnit {
            tsn,
            data: Data {
                stream_key,
                ssn,
                ppid: PpId(53),
                payload: payload.as_bytes().to_vec(),
                is_beginning: flags.contains('B'),
                is_end: flags.contains('E'),
            },
        }
    }
}
