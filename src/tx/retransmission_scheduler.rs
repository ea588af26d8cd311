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

use crate::api::Clock;
use crate::api::SystemClock;
use crate::timer::Timer;
use log::warn;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug)]
struct State {
    running: bool,
    fired: bool,
    shutdown: bool,
    interval: Duration,
    /// Bumped whenever the cadence must restart from the current time.
    generation: u64,
}

struct Shared {
    state: Mutex<State>,
    wakeup: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Provides the cadence at which the association checks for chunks to retransmit.
///
/// The scheduler doesn't know anything about the send buffer. While running, it raises a flag
/// when `interval` has passed, and [`RetransmissionScheduler::check_for_timeout`] consumes that
/// flag. Every tick without a restart in between doubles the time to the next one, up to
/// `max_interval`, which is the T3-rtx backoff of
/// <https://datatracker.ietf.org/doc/html/rfc9260#section-6.3.3>, rule E2. Restarting, or setting a
/// new interval, goes back to ticking after `interval`.
///
/// Ticks come from a single worker thread that is spawned on the first `start` and lives until the
/// scheduler is dropped, so it can be started and stopped any number of times.
pub struct RetransmissionScheduler {
    shared: Arc<Shared>,
    max_interval: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RetransmissionScheduler {
    pub fn new(interval: Duration, max_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    running: false,
                    fired: false,
                    shutdown: false,
                    interval,
                    generation: 0,
                }),
                wakeup: Condvar::new(),
            }),
            max_interval,
            worker: Mutex::new(None),
        }
    }

    /// Starts ticking. Has no effect if already running.
    pub fn start(&self) {
        {
            let mut state = self.shared.lock();
            if state.running {
                return;
            }
            state.running = true;
            state.generation += 1;
        }
        self.shared.wakeup.notify_all();
        self.ensure_worker();
    }

    /// Stops ticking, and forgets a tick that hasn't been consumed.
    pub fn stop(&self) {
        {
            let mut state = self.shared.lock();
            state.running = false;
            state.fired = false;
        }
        self.shared.wakeup.notify_all();
    }

    /// Stops and starts again, so that the next tick is a full interval away.
    pub fn restart(&self) {
        {
            let mut state = self.shared.lock();
            state.running = true;
            state.fired = false;
            state.generation += 1;
        }
        self.shared.wakeup.notify_all();
        self.ensure_worker();
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Returns true if a tick has happened since the last call.
    pub fn check_for_timeout(&self) -> bool {
        std::mem::take(&mut self.shared.lock().fired)
    }

    /// Changes the tick interval. A running scheduler restarts its cadence with the new interval.
    pub fn set_interval(&self, interval: Duration) {
        {
            let mut state = self.shared.lock();
            if state.interval == interval {
                return;
            }
            state.interval = interval;
            state.generation += 1;
        }
        self.shared.wakeup.notify_all();
    }

    pub fn interval(&self) -> Duration {
        self.shared.lock().interval
    }

    fn ensure_worker(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let max_interval = self.max_interval;
        let spawned = thread::Builder::new()
            .name("rtx-scheduler".into())
            .spawn(move || run(&shared, max_interval));
        match spawned {
            Ok(handle) => *worker = Some(handle),
            Err(e) => {
                warn!("Failed to spawn the retransmission scheduler: {e}");
                self.shared.lock().running = false;
            }
        }
    }

    #[cfg(test)]
    fn worker_id(&self) -> Option<thread::ThreadId> {
        self.worker.lock().unwrap().as_ref().map(|h| h.thread().id())
    }
}

impl Drop for RetransmissionScheduler {
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.wakeup.notify_all();
        let worker = self.worker.get_mut().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = worker {
            let _ = handle.join();
        }
    }
}

fn run(shared: &Shared, max_interval: Duration) {
    let clock = SystemClock::new();
    let mut timer = Timer::new(Duration::ZERO, max_interval);
    let mut generation = 0;
    let mut state = shared.lock();
    while !state.shutdown {
        if !state.running {
            timer.stop();
            state = shared.wakeup.wait(state).unwrap_or_else(|e| e.into_inner());
            continue;
        }

        let now = clock.now();
        if state.generation != generation {
            generation = state.generation;
            timer.set_duration(state.interval);
            timer.start(now);
        }
        if timer.expire(now) {
            state.fired = true;
        }

        state = match timer.next_expiry() {
            Some(expiry) => {
                shared
                    .wakeup
                    .wait_timeout(state, expiry - now)
                    .unwrap_or_else(|e| e.into_inner())
                    .0
            }
            // A zero interval never ticks.
            None => shared.wakeup.wait(state).unwrap_or_else(|e| e.into_inner()),
        };
    }
}
