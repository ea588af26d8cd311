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

use crate::api::SocketTime;
use std::time::Duration;

// Caps the exponential backoff to avoid overflow.
const MAX_BACKOFF_COUNT: u32 = 10;

/// A restarting timer with exponential backoff, driven by explicit time values.
///
/// Once started, the timer first expires after `duration`, and every consecutive expiry doubles
/// the time to the next one, up to `max_duration`, until stopped or started again. Expiry times are
/// computed from the previous expiry time and not from when [`Timer::expire`] was called, so the
/// cadence doesn't drift.
#[derive(Debug)]
pub struct Timer {
    duration: Duration,
    max_duration: Duration,
    expirations: u32,
    next_expiry: Option<SocketTime>,
}

impl Timer {
    pub fn new(duration: Duration, max_duration: Duration) -> Self {
        Self { duration, max_duration, expirations: 0, next_expiry: None }
    }

    fn current_interval(&self) -> Duration {
        self.duration
            .saturating_mul(1 << self.expirations.min(MAX_BACKOFF_COUNT))
            .min(self.max_duration)
    }

    /// Starts, or restarts, the timer from `now` and resets the backoff.
    pub fn start(&mut self, now: SocketTime) {
        self.expirations = 0;
        self.next_expiry = (!self.duration.is_zero()).then(|| now + self.current_interval());
    }

    pub fn stop(&mut self) {
        self.next_expiry = None;
    }

    pub fn next_expiry(&self) -> Option<SocketTime> {
        self.next_expiry
    }

    /// Returns true if the timer has expired at `now`, and schedules the next expiry. Calling this
    /// changes the timer's state.
    pub fn expire(&mut self, now: SocketTime) -> bool {
        match self.next_expiry {
            Some(expiry) if expiry <= now => {
                self.expirations = self.expirations.saturating_add(1);
                self.next_expiry = Some(expiry + self.current_interval());
                true
            }
            _ => false,
        }
    }

    /// Changes the base duration. A running timer keeps its current expiry time.
    pub fn set_duration(&mut self, duration: Duration) {
        self.duration = duration;
    }
}
