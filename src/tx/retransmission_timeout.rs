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
use std::time::Duration;

/// Estimates the retransmission timeout from measured round trip times.
///
/// See <https://datatracker.ietf.org/doc/html/rfc9260#section-6.3.1>. SRTT and RTTVAR are smoothed
/// with the gains 1/8 and 1/4, and the RTO is `SRTT + 4 * RTTVAR` clamped to the configured bounds.
pub struct RetransmissionTimeout {
    min_rto: Duration,
    max_rto: Duration,
    max_rtt: Duration,
    min_rtt_variance: Duration,
    /// None until the first measurement.
    smoothed: Option<(Duration, Duration)>,
    initial_rto: Duration,
    rto: Duration,
}

impl RetransmissionTimeout {
    pub fn new(options: &Options) -> Self {
        Self {
            min_rto: options.rto_min,
            max_rto: options.rto_max,
            max_rtt: options.rtt_max,
            min_rtt_variance: options.min_rtt_variance,
            smoothed: None,
            initial_rto: options.rto_initial,
            rto: options.rto_initial,
        }
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// The smoothed RTT, or the initial RTO before anything has been measured.
    pub fn srtt(&self) -> Duration {
        self.smoothed.map_or(self.initial_rto, |(srtt, _)| srtt)
    }

    pub fn rttvar(&self) -> Duration {
        self.smoothed.map_or(Duration::ZERO, |(_, rttvar)| rttvar)
    }

    /// Feeds a new RTT sample. Samples above the configured maximum RTT are discarded.
    pub fn observe_rtt(&mut self, rtt: Duration) {
        if rtt > self.max_rtt {
            return;
        }

        let (srtt, rttvar) = match self.smoothed {
            None => (rtt, rtt / 2),
            Some((srtt, rttvar)) => {
                // RTTVAR is updated using the previous SRTT.
                let rttvar = rttvar * 3 / 4 + srtt.abs_diff(rtt) / 4;
                let srtt = srtt * 7 / 8 + rtt / 8;
                (srtt, rttvar)
            }
        };
        let rttvar = rttvar.max(self.min_rtt_variance);
        self.smoothed = Some((srtt, rttvar));
        self.rto = srtt.saturating_add(rttvar.saturating_mul(4)).clamp(self.min_rto, self.max_rto);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INITIAL_RTO: Duration = Duration::from_millis(200);
    const MAX_RTT: Duration = Duration::from_millis(8_000);
    const MAX_RTO: Duration = Duration::from_millis(800);
    const MIN_RTO: Duration = Duration::from_millis(120);
    const MIN_RTT_VARIANCE: Duration = Duration::from_millis(10);

    fn make_options() -> Options {
        Options {
            rtt_max: MAX_RTT,
            rto_initial: INITIAL_RTO,
            rto_max: MAX_RTO,
            rto_min: MIN_RTO,
            min_rtt_variance: MIN_RTT_VARIANCE,
            ..Options::default()
        }
    }

    #[test]
    fn initial_values() {
        let rto = RetransmissionTimeout::new(&make_options());
        assert_eq!(rto.rto(), INITIAL_RTO);
        assert_eq!(rto.srtt(), INITIAL_RTO);
        assert_eq!(rto.rttvar(), Duration::ZERO);
    }

    #[test]
    fn first_measurement_sets_srtt_and_half_variance() {
        let mut rto = RetransmissionTimeout::new(&make_options());
        rto.observe_rtt(Duration::from_millis(100));
        assert_eq!(rto.srtt(), Duration::from_millis(100));
        assert_eq!(rto.rttvar(), Duration::from_millis(50));
        assert_eq!(rto.rto(), Duration::from_millis(300));
    }

    #[test]
    fn stable_rtt_shrinks_variance() {
        let mut rto = RetransmissionTimeout::new(&make_options());
        rto.observe_rtt(Duration::from_millis(100));
        rto.observe_rtt(Duration::from_millis(100));
        assert_eq!(rto.srtt(), Duration::from_millis(100));
        assert_eq!(rto.rttvar(), Duration::from_micros(37_500));
        assert_eq!(rto.rto(), Duration::from_millis(250));
    }

    #[test]
    fn rtt_increase_moves_srtt_by_one_eighth() {
        let mut rto = RetransmissionTimeout::new(&make_options());
        rto.observe_rtt(Duration::from_millis(100));
        rto.observe_rtt(Duration::from_millis(180));
        assert_eq!(rto.srtt(), Duration::from_millis(110));
        assert_eq!(rto.rttvar(), Duration::from_micros(57_500));
        assert_eq!(rto.rto(), Duration::from_millis(340));
    }

    #[test]
    fn too_large_values_do_not_affect_rto() {
        let mut rto = RetransmissionTimeout::new(&make_options());
        rto.observe_rtt(MAX_RTT + Duration::from_millis(100));
        assert_eq!(rto.rto(), INITIAL_RTO);

        rto.observe_rtt(Duration::from_millis(100));
        rto.observe_rtt(MAX_RTT + Duration::from_millis(100));
        assert_eq!(rto.rto(), Duration::from_millis(300));
    }

    #[test]
    fn will_never_go_below_minimum_rto() {
        let mut rto = RetransmissionTimeout::new(&make_options());
        for _ in 0..1000 {
            rto.observe_rtt(Duration::from_millis(1));
        }
        assert_eq!(rto.rto(), MIN_RTO);
    }

    #[test]
    fn will_never_go_above_maximum_rto() {
        let mut rto = RetransmissionTimeout::new(&make_options());
        for _ in 0..1000 {
            rto.observe_rtt(MAX_RTT - Duration::from_millis(100));
        }
        assert_eq!(rto.rto(), MAX_RTO);
    }

    #[test]
    fn variance_floor_keeps_rto_above_stable_rtt() {
        let mut rto = RetransmissionTimeout::new(&make_options());
        for _ in 0..1000 {
            rto.observe_rtt(Duration::from_millis(150));
        }
        assert_eq!(rto.rttvar(), MIN_RTT_VARIANCE);
        assert_eq!(rto.rto(), Duration::from_millis(190));
    }
}
