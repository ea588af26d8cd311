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

/// Reflected form of the Castagnoli polynomial, see
/// <https://datatracker.ietf.org/doc/html/rfc9260#appendix-A>.
const POLYNOMIAL: u32 = 0x82f6_3b78;

const TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut value = n as u32;
        let mut bit = 0;
        while bit < 8 {
            value = if value & 1 == 1 { (value >> 1) ^ POLYNOMIAL } else { value >> 1 };
            bit += 1;
        }
        table[n] = value;
        n += 1;
    }
    table
}

/// Incremental CRC-32C, the checksum of the SCTP common header.
///
/// Packets are small (bounded by the MTU), so a single lookup table processing one byte at a time
/// is sufficient.
pub struct Crc32c(u32);

impl Default for Crc32c {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc32c {
    pub fn new() -> Self {
        Self(!0)
    }

    pub fn digest(&mut self, data: &[u8]) {
        self.0 = data.iter().fold(self.0, |crc, &byte| {
            (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xff) as usize]
        });
    }

    pub fn value(&self) -> u32 {
        !self.0
    }
}
