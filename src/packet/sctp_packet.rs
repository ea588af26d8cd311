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

use crate::api::Options;
use crate::math::is_divisible_by_4;
use crate::math::round_down_to_4;
use crate::math::round_up_to_4;
use crate::packet::AsSerializableTlv;
use crate::packet::TLV_HEADER_SIZE;
use crate::packet::chunk::Chunk;
use crate::packet::chunk::RawChunk;
use crate::packet::crc32c::Crc32c;
use crate::packet::read_u16_be;
use crate::packet::read_u32_be;
use crate::packet::write_u16_be;
use crate::packet::write_u32_be;
use anyhow::ensure;
use thiserror::Error;

pub const COMMON_HEADER_SIZE: usize = 12;

/// Upper bound on accepted packet sizes. Real packets are limited by the MTU of the secure
/// transport and are far smaller.
const MAX_PACKET_SIZE: usize = 65535;

/// SCTP common header
///
/// See <https://datatracker.ietf.org/doc/html/rfc9260#section-3.1>.
///
/// ```txt
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |      Source Port Number       |    Destination Port Number    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Verification Tag                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Checksum                            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug)]
pub(crate) struct CommonHeader {
    pub source_port: u16,
    pub destination_port: u16,
    pub verification_tag: u32,
    pub checksum: u32,
}

#[derive(Debug)]
pub(crate) struct SctpPacket {
    pub common_header: CommonHeader,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum PacketParseError {
    #[error("Invalid packet size")]
    InvalidPacketSize,
    #[error("Invalid packet checksum")]
    InvalidChecksum,
}

fn checksum_of(header_without_checksum: &[u8], rest: &[u8]) -> u32 {
    let mut crc = Crc32c::new();
    crc.digest(header_without_checksum);
    crc.digest(&[0, 0, 0, 0]);
    crc.digest(rest);
    crc.value().to_be()
}

impl SctpPacket {
    /// Parses a packet received from the secure transport. The checksum is verified unless
    /// [`Options::disable_checksum_verification`] is set.
    pub fn from_bytes(data: &[u8], options: &Options) -> anyhow::Result<SctpPacket> {
        ensure!(
            data.len() >= COMMON_HEADER_SIZE + TLV_HEADER_SIZE && data.len() <= MAX_PACKET_SIZE,
            PacketParseError::InvalidPacketSize
        );

        let common_header = CommonHeader {
            source_port: read_u16_be!(&data[0..2]),
            destination_port: read_u16_be!(&data[2..4]),
            verification_tag: read_u32_be!(&data[4..8]),
            checksum: read_u32_be!(&data[8..12]),
        };

        if !options.disable_checksum_verification {
            let expected = checksum_of(&data[0..8], &data[COMMON_HEADER_SIZE..]);
            ensure!(expected == common_header.checksum, PacketParseError::InvalidChecksum);
        }

        let mut chunks = Vec::new();
        let mut remaining = &data[COMMON_HEADER_SIZE..];
        while !remaining.is_empty() {
            let (raw, rest) = RawChunk::from_bytes(remaining)?;
            chunks.push(Chunk::try_from(raw)?);
            remaining = rest;
        }

        Ok(SctpPacket { common_header, chunks })
    }
}

/// Accumulates chunks into a single packet that never exceeds the configured size.
pub(crate) struct SctpPacketBuilder {
    verification_tag: u32,
    source_port: u16,
    dest_port: u16,
    max_packet_size: usize,
    data: Vec<u8>,
}

impl SctpPacketBuilder {
    pub(crate) fn new(
        verification_tag: u32,
        source_port: u16,
        dest_port: u16,
        max_packet_size: usize,
    ) -> Self {
        Self {
            verification_tag,
            source_port,
            dest_port,
            max_packet_size: round_down_to_4!(max_packet_size),
            data: vec![],
        }
    }

    pub(crate) fn add(&mut self, chunk: &Chunk) -> &mut Self {
        if self.data.is_empty() {
            self.data.reserve(self.max_packet_size);
            self.data.resize(COMMON_HEADER_SIZE, 0);
            write_u16_be!(&mut self.data[0..2], self.source_port);
            write_u16_be!(&mut self.data[2..4], self.dest_port);
            write_u32_be!(&mut self.data[4..8], self.verification_tag);
        }
        debug_assert!(is_divisible_by_4!(self.data.len()));

        let offset = self.data.len();
        let size = chunk.as_serializable().serialized_size();
        self.data.resize(round_up_to_4!(offset + size), 0);
        chunk.as_serializable().serialize_to(&mut self.data[offset..offset + size]);
        debug_assert!(self.data.len() <= self.max_packet_size);
        self
    }

    /// Space left for chunks, taking the not yet written common header into account.
    pub fn bytes_remaining(&self) -> usize {
        let used = if self.data.is_empty() { COMMON_HEADER_SIZE } else { self.data.len() };
        self.max_packet_size.saturating_sub(used)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the serialized packet, with its checksum filled in, and resets the builder.
    pub fn build(&mut self) -> Vec<u8> {
        if !self.data.is_empty() {
            let checksum = checksum_of(&self.data[0..8], &self.data[COMMON_HEADER_SIZE..]);
            write_u32_be!(&mut self.data[8..12], checksum);
        }
        std::mem::take(&mut self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PpId;
    use crate::api::StreamId;
    use crate::packet::ChunkParseError;
    use crate::packet::abort_chunk::AbortChunk;
    use crate::packet::data::Data;
    use crate::packet::data_chunk;
    use crate::packet::data_chunk::DataChunk;
    use crate::packet::error_causes::ErrorCause;
    use crate::packet::parse_error;
    use crate::packet::sack_chunk::GapAckBlock;
    use crate::packet::sack_chunk::SackChunk;
    use crate::packet::shutdown_chunks::ShutdownChunk;
    use crate::types::Ssn;
    use crate::types::StreamKey;
    use crate::types::Tsn;

    const VERIFICATION_TAG: u32 = 0x12345678;

    // SACK chunk (Cumulative TSN: 999, a_rwnd: 456, gaps: 0, duplicate TSNs: 0) from port 5000 to
    // port 5000, with a valid checksum.
    const SACK_PACKET: &[u8] = &[
        0x13, 0x88, 0x13, 0x88, 0x12, 0x34, 0x56, 0x78, //
        0x07, 0xe8, 0x38, 0x77, // checksum
        0x03, 0x00, 0x00, 0x10, 0x00, 0x00, 0x03, 0xe7, 0x00, 0x00, 0x01, 0xc8, 0x00, 0x00, 0x00,
        0x00,
    ];

    // Same as above, from a capture with a checksum that doesn't match its contents.
    const SACK_PACKET_WRONG_CHECKSUM: &[u8] = &[
        0x13, 0x88, 0x13, 0x88, 0x0e, 0xdd, 0xca, 0x08, 0x2a, 0x81, 0xf5, 0x31, 0x03, 0x00, 0x00,
        0x10, 0x55, 0x08, 0x36, 0x40, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];

    fn builder() -> SctpPacketBuilder {
        let options = Options::default();
        let (src, dst) = (options.local_port, options.remote_port);
        SctpPacketBuilder::new(VERIFICATION_TAG, src, dst, options.mtu)
    }

    #[test]
    fn deserialize_sack_packet() {
        let packet = SctpPacket::from_bytes(SACK_PACKET, &Options::default()).unwrap();
        assert_eq!(packet.common_header.source_port, 5000);
        assert_eq!(packet.common_header.destination_port, 5000);
        assert_eq!(packet.common_header.verification_tag, VERIFICATION_TAG);
        assert_eq!(packet.common_header.checksum, 0x07e83877);

        assert_eq!(packet.chunks.len(), 1);
        let Chunk::Sack(sack) = &packet.chunks[0] else { panic!() };
        assert_eq!(sack.cumulative_tsn_ack, Tsn(999));
        assert_eq!(sack.a_rwnd, 456);
    }

    #[test]
    fn deserialize_packet_with_wrong_checksum() {
        let err = SctpPacket::from_bytes(SACK_PACKET_WRONG_CHECKSUM, &Options::default())
            .unwrap_err();
        assert_eq!(err.downcast_ref(), Some(&PacketParseError::InvalidChecksum));
    }

    #[test]
    fn deserialize_packet_dont_validate_checksum() {
        let options = Options { disable_checksum_verification: true, ..Default::default() };
        let packet = SctpPacket::from_bytes(SACK_PACKET_WRONG_CHECKSUM, &options).unwrap();
        assert_eq!(packet.common_header.verification_tag, 0x0eddca08);
        assert_eq!(packet.common_header.checksum, 0x2a81f531);
        assert!(matches!(packet.chunks[0], Chunk::Sack(_)));
    }

    #[test]
    fn rejects_packet_without_chunks() {
        let err = SctpPacket::from_bytes(&SACK_PACKET[..COMMON_HEADER_SIZE], &Options::default())
            .unwrap_err();
        assert_eq!(err.downcast_ref(), Some(&PacketParseError::InvalidPacketSize));
    }

    #[test]
    fn serialize_and_deserialize_three_chunks() {
        let mut b = builder();
        b.add(&Chunk::Sack(SackChunk {
            cumulative_tsn_ack: Tsn(999),
            a_rwnd: 456,
            gap_ack_blocks: vec![GapAckBlock::new(2, 3)],
            duplicate_tsns: vec![Tsn(1), Tsn(2), Tsn(3)],
        }));
        b.add(&Chunk::Data(DataChunk {
            tsn: Tsn(123),
            data: Data {
                stream_key: StreamKey::Ordered(StreamId(456)),
                ssn: Ssn(789),
                ppid: PpId(51),
                payload: vec![1, 2, 3, 4, 5],
                is_beginning: true,
                is_end: true,
            },
        }));
        b.add(&Chunk::Shutdown(ShutdownChunk { cumulative_tsn_ack: Tsn(998) }));
        let serialized = b.build();
        assert!(b.is_empty());

        let packet = SctpPacket::from_bytes(&serialized, &Options::default()).unwrap();
        assert_eq!(packet.common_header.verification_tag, VERIFICATION_TAG);
        assert_eq!(packet.chunks.len(), 3);

        let Chunk::Sack(sack) = &packet.chunks[0] else { panic!() };
        assert_eq!(sack.gap_ack_blocks, vec![GapAckBlock::new(2, 3)]);
        let Chunk::Data(data) = &packet.chunks[1] else { panic!() };
        assert_eq!(data.tsn, Tsn(123));
        assert_eq!(data.data.payload, vec![1, 2, 3, 4, 5]);
        let Chunk::Shutdown(shutdown) = &packet.chunks[2] else { panic!() };
        assert_eq!(shutdown.cumulative_tsn_ack, Tsn(998));
    }

    #[test]
    fn parse_abort_with_empty_cause() {
        let bytes = builder()
            .add(&Chunk::Abort(AbortChunk {
                tag_reflected: false,
                error_causes: vec![ErrorCause::UserInitiatedAbort(String::new())],
            }))
            .build();

        let packet = SctpPacket::from_bytes(&bytes, &Options::default()).unwrap();
        let Chunk::Abort(abort) = &packet.chunks[0] else { panic!() };
        assert_eq!(abort.error_causes, vec![ErrorCause::UserInitiatedAbort(String::new())]);
    }

    #[test]
    fn detect_packet_with_zero_size_chunk() {
        let options = Options { disable_checksum_verification: true, ..Default::default() };
        let bytes: &[u8] = &[
            0xff, 0xff, 0xff, 0xff, 0xff, 0x0a, 0x0a, 0x0a, 0x5c, 0x0a, 0x0a, 0x0a, 0x0a, 0x0a,
            0x00, 0x00, 0x00,
        ];

        assert_eq!(
            parse_error(SctpPacket::from_bytes(bytes, &options)),
            Some(ChunkParseError::InvalidLength)
        );
    }

    #[test]
    fn returns_correct_space_available_to_stay_within_mtu() {
        const MTU: usize = 1191;
        const MAX_SIZE: usize = round_down_to_4!(MTU);

        let mut builder = SctpPacketBuilder::new(VERIFICATION_TAG, 5000, 5000, MTU);
        assert_eq!(builder.bytes_remaining(), MAX_SIZE - COMMON_HEADER_SIZE);

        let payload = vec![0; 183];
        builder.add(&Chunk::Data(DataChunk {
            tsn: Tsn(1),
            data: Data { payload: payload.clone(), ..Default::default() },
        }));
        let chunk1_size = round_up_to_4!(data_chunk::HEADER_SIZE + payload.len());
        assert_eq!(builder.bytes_remaining(), MAX_SIZE - COMMON_HEADER_SIZE - chunk1_size);
        assert_eq!(builder.bytes_remaining(), 976);

        let payload = vec![0; 957];
        builder.add(&Chunk::Data(DataChunk {
            tsn: Tsn(2),
            data: Data { payload, ..Default::default() },
        }));
        assert_eq!(builder.bytes_remaining(), 0);
    }

    #[test]
    fn write_packet_with_calculated_checksum() {
        let mut b = builder();
        b.add(&Chunk::Sack(SackChunk {
            cumulative_tsn_ack: Tsn(999),
            a_rwnd: 456,
            gap_ack_blocks: vec![],
            duplicate_tsns: vec![],
        }));
        assert_eq!(b.build(), SACK_PACKET);
    }
}
