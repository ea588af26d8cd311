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

use crate::packet::data::Data;
use crate::types::Tsn;

pub mod fragment_reassembler;
pub mod gap_ack;
pub mod receive_buffer;

pub use receive_buffer::ReceiveBuffer;
pub use receive_buffer::ReceiveBufferError;

/// A DATA chunk as it was received: the user data and the TSN it was sent with.
#[derive(Clone, Debug, PartialEq)]
pub struct ReceivedUnit {
    pub tsn: Tsn,
    pub data: Data,
}
