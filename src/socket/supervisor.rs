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

use crate::socket::Inner;
use log::warn;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

/// The periodic work of an established association, one thread per loop.
///
/// Every loop sleeps for its cadence and then does its work, until [`Inner::wait_for_stop`]
/// reports that the association was closed or dropped. A loop with a zero cadence is never started.
pub(crate) struct Supervisor {
    threads: Vec<JoinHandle<()>>,
}

impl Supervisor {
    pub(crate) fn start(inner: &Arc<Inner>) -> Self {
        let options = inner.options();
        let loops: [(&str, Duration, fn(&Inner)); 4] = [
            ("heartbeat", options.heartbeat_interval, Inner::on_heartbeat_tick),
            ("sack", options.delayed_ack_max_timeout, Inner::on_sack_tick),
            ("retransmit", options.retransmission_check_interval, Inner::on_retransmit_tick),
            ("monitor", options.monitor_interval, Inner::on_monitor_tick),
        ];

        let mut threads = Vec::with_capacity(loops.len());
        for (name, cadence, work) in loops {
            if cadence.is_zero() {
                continue;
            }
            let worker = Arc::clone(inner);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", inner.name(), name))
                .spawn(move || run(&worker, cadence, work));
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(e) => warn!("{}: Failed to start the {} loop: {}", inner.name(), name, e),
            }
        }
        Self { threads }
    }

    /// Waits for all loops to exit. They must have been told to stop first.
    pub(crate) fn join(self) {
        for handle in self.threads {
            if handle.join().is_err() {
                warn!("A supervisor loop panicked");
            }
        }
    }
}

fn run(inner: &Inner, cadence: Duration, work: fn(&Inner)) {
    while !inner.wait_for_stop(cadence) {
        work(inner);
    }
}
