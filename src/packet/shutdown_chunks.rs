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

//! The three chunks of the graceful shutdown handshake, see
//! <https://datatracker.ietf.org/doc/html/rfc9260#section-9.2>.

use crate::packet::ChunkParseError;
use crate::packet::SerializableTlv;
use crate::packet::chunk::RawChunk;
use crate::packet::chunk::write_chunk_header;
use crate::packet::read_u32_be;
use crate::packet::write_u32_be;
use crate::types::Tsn;
use anyhow::Error;
use anyhow::ensure;
use std::fmt;

pub(crate) const SHUTDOWN_CHUNK_TYPE: u8 = 7;
pub(crate) const SHUTDOWN_ACK_CHUNK_TYPE: u8 = 8;
pub(crate) const SHUTDOWN_COMPLETE_CHUNK_TYPE: u8 = 14;

const FLAGS_BIT_TAG_REFLECTED: u8 = 0;

/// Shutdown (SHUTDOWN) chunk
///
/// ```txt
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   Type = 7    |  Chunk Flags  |          Length = 8           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                      Cumulative TSN Ack                       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct ShutdownChunk {
    pub cumulative_tsn_ack: Tsn,
}

impl TryFrom<RawChunk<'_>> for ShutdownChunk {
    type Error = Error;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, Error> {
        ensure!(raw.typ == SHUTDOWN_CHUNK_TYPE, ChunkParseError::InvalidType);
        ensure!(raw.value.len() == 4, ChunkParseError::InvalidLength);

        Ok(Self { cumulative_tsn_ack: Tsn(read_u32_be!(&raw.value[0..4])) })
    }
}

impl SerializableTlv for ShutdownChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        let value = write_chunk_header(SHUTDOWN_CHUNK_TYPE, 0, self.value_size(), output);
        write_u32_be!(&mut value[0..4], self.cumulative_tsn_ack.0);
    }

    fn value_size(&self) -> usize {
        4
    }
}

impl fmt::Display for ShutdownChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SHUTDOWN cumulative_tsn_ack={}", self.cumulative_tsn_ack)
    }
}

/// Shutdown Acknowledgement (SHUTDOWN ACK) chunk, which has no value.
#[derive(Clone, Debug, PartialEq)]
pub struct ShutdownAckChunk;

impl TryFrom<RawChunk<'_>> for ShutdownAckChunk {
    type Error = Error;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, Error> {
        ensure!(raw.typ == SHUTDOWN_ACK_CHUNK_TYPE, ChunkParseError::InvalidType);
        ensure!(raw.value.is_empty(), ChunkParseError::InvalidLength);
        Ok(Self)
    }
}

impl SerializableTlv for ShutdownAckChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        write_chunk_header(SHUTDOWN_ACK_CHUNK_TYPE, 0, 0, output);
    }

    fn value_size(&self) -> usize {
        0
    }
}

impl fmt::Display for ShutdownAckChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SHUTDOWN-ACK")
    }
}

/// Shutdown Complete (SHUTDOWN COMPLETE) chunk
///
/// ```txt
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   Type = 14   |  Reserved   |T|          Length = 4           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct ShutdownCompleteChunk {
    pub tag_reflected: bool,
}

impl TryFrom<RawChunk<'_>> for ShutdownCompleteChunk {
    type Error = Error;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, Error> {
        ensure!(raw.typ == SHUTDOWN_COMPLETE_CHUNK_TYPE, ChunkParseError::InvalidType);
        ensure!(raw.value.is_empty(), ChunkParseError::InvalidLength);
        Ok(Self { tag_reflected: (raw.flags & (1 << FLAGS_BIT_TAG_REFLECTED)) != 0 })
    }
}

impl SerializableTlv for ShutdownCompleteChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        let flags = if self.tag_reflected { 1 << FLAGS_BIT_TAG_REFLECTED } else { 0 };
        write_chunk_header(SHUTDOWN_COMPLETE_CHUNK_TYPE, flags, 0, output);
    }

    fn value_size(&self) -> usize {
        0
    }
}

impl fmt::Display for ShutdownCompleteChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SHUTDOWN-COMPLETE, tag_reflected={}", self.tag_reflected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::parse_error;

    #[test]
    fn shutdown_from_capture() {
        // SHUTDOWN chunk (Cumulative TSN ack: 101831101)
        //  Chunk type: SHUTDOWN (7)
        //  Chunk flags: 0x00
        //  Chunk length: 8
        //  Cumulative TSN Ack: 101831101
        const BYTES: &[u8] = &[0x07, 0x00, 0x00, 0x08, 0x06, 0x11, 0xd1, 0xbd];
        let c = ShutdownChunk::try_from(RawChunk::from_bytes(BYTES).unwrap().0).unwrap();
        assert_eq!(c.cumulative_tsn_ack, Tsn(101831101));
        assert_eq!(c.to_string(), "SHUTDOWN cumulative_tsn_ack=101831101");
    }

    #[test]
    fn shutdown_serializes_tsn() {
        let chunk = ShutdownChunk { cumulative_tsn_ack: Tsn(0x01020304) };
        let mut serialized = vec![0; chunk.serialized_size()];
        chunk.serialize_to(&mut serialized);
        assert_eq!(serialized, &[0x07, 0x00, 0x00, 0x08, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn shutdown_ack_rejects_value() {
        const BYTES: &[u8] = &[0x08, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(
            parse_error(ShutdownAckChunk::try_from(RawChunk::from_bytes(BYTES).unwrap().0)),
            Some(ChunkParseError::InvalidLength)
        );
    }

    #[test]
    fn shutdown_complete_keeps_tag_reflected() {
        let chunk = ShutdownCompleteChunk { tag_reflected: true };

        let mut serialized = vec![0; chunk.serialized_size()];
        chunk.serialize_to(&mut serialized);
        assert_eq!(serialized, &[0x0e, 0x01, 0x00, 0x04]);

        let deserialized =
            ShutdownCompleteChunk::try_from(RawChunk::from_bytes(&serialized).unwrap().0).unwrap();
        assert_eq!(deserialized, chunk);
    }
}
