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
use crate::types::Ssn;
use crate::types::StreamKey;

/// The user data of one DATA chunk, without its TSN.
///
/// Outgoing data is created by fragmenting a message before any TSN is known, as TSNs are assigned
/// when the fragments enter the send buffer. Incoming data keeps the TSN next to it instead, see
/// [`crate::rx::ReceivedUnit`].
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Data {
    pub stream_key: StreamKey,
    pub ssn: Ssn,
    pub ppid: PpId,
    pub payload: Vec<u8>,
    pub is_beginning: bool,
    pub is_end: bool,
}

impl Data {
    /// True if this fragment carries a complete message on its own.
    pub fn is_unfragmented(&self) -> bool {
        self.is_beginning && self.is_end
    }

    /// True if this is neither the first nor the last fragment of a message.
    pub fn is_middle(&self) -> bool {
        !self.is_beginning && !self.is_end
    }
}

impl Default for Data {
    fn default() -> Self {
        Self {
            stream_key: StreamKey::Ordered(StreamId(0)),
            ssn: Ssn(0),
            ppid: PpId(0),
            payload: Default::default(),
            is_beginning: false,
            is_end: false,
        }
    }
}
