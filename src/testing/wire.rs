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

use crate::api::WireSink;
use std::sync::Arc;
use std::sync::Mutex;

/// An in-memory wire. Clones share the same packet queue, so a test can keep one clone while the
/// association owns the other.
#[derive(Clone, Default)]
pub struct CapturingSink {
    packets: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything written so far.
    pub fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.packets.lock().unwrap())
    }
}

impl WireSink for CapturingSink {
    fn put_bytes_on_wire(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.packets.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }
}

/// A wire that refuses every write.
pub struct BrokenSink;

impl WireSink for BrokenSink {
    fn put_bytes_on_wire(&mut self, _bytes: &[u8]) -> anyhow::Result<()> {
        anyhow::bail!("transport closed")
    }
}
