// Copyright (C) 2024, Cloudflare, Inc.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright notice,
//       this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above copyright
//       notice, this list of conditions and the following disclaimer in the
//       documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS
// IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO,
// THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR
// PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR
// CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::time::Duration;
use std::time::Instant;

pub(crate) const INITIAL_RTT: Duration = Duration::from_millis(333);

/// RFC 9002, 6.1.2. Time Threshold: kGranularity.
pub(crate) const GRANULARITY: Duration = Duration::from_millis(1);

/// Round-trip estimator, RFC 9002 §5.
pub struct RttStats {
    pub(crate) latest_rtt: Duration,

    pub(crate) smoothed_rtt: Duration,

    pub(crate) rttvar: Duration,

    pub(crate) min_rtt: Duration,

    /// Peer's advertised max_ack_delay, caps the delay adjustment once the
    /// handshake is confirmed.
    pub(crate) max_ack_delay: Duration,

    /// When the first sample was taken. Packets sent before this don't count
    /// towards persistent congestion.
    pub(crate) first_rtt_sample: Option<Instant>,
}

impl RttStats {
    pub(crate) fn new(max_ack_delay: Duration) -> Self {
        RttStats {
            latest_rtt: Duration::ZERO,
            smoothed_rtt: INITIAL_RTT,
            rttvar: INITIAL_RTT / 2,
            min_rtt: Duration::ZERO,
            first_rtt_sample: None,
            max_ack_delay,
        }
    }

    pub(crate) fn update_rtt(
        &mut self, latest_rtt: Duration, mut ack_delay: Duration, now: Instant,
        handshake_confirmed: bool,
    ) {
        self.latest_rtt = latest_rtt;

        if self.first_rtt_sample.is_none() {
            self.min_rtt = latest_rtt;
            self.smoothed_rtt = latest_rtt;
            self.rttvar = latest_rtt / 2;
            self.first_rtt_sample = Some(now);
            return;
        }

        // min_rtt ignores acknowledgment delay.
        self.min_rtt = self.min_rtt.min(latest_rtt);

        // Limit ack_delay by max_ack_delay after handshake confirmation.
        if handshake_confirmed {
            ack_delay = ack_delay.min(self.max_ack_delay);
        }

        // Adjust for acknowledgment delay if plausible.
        let mut adjusted_rtt = latest_rtt;
        if self.min_rtt + ack_delay < latest_rtt {
            adjusted_rtt = latest_rtt - ack_delay;
        }

        self.rttvar =
            self.rttvar * 3 / 4 + sub_abs(self.smoothed_rtt, adjusted_rtt) / 4;

        self.smoothed_rtt = self.smoothed_rtt * 7 / 8 + adjusted_rtt / 8;
    }

    /// RFC 9002, 6.1.2. Time Threshold: kTimeThreshold, kGranularity.
    pub(crate) fn loss_delay(&self) -> Duration {
        let thr = self.latest_rtt.max(self.smoothed_rtt);
        let thr = thr + thr / 8;

        thr.max(GRANULARITY)
    }

    /// Base probe timeout, before backoff and the application-level
    /// max_ack_delay addend. RFC 9002, Appendix A.8.
    pub(crate) fn pto_base(&self) -> Duration {
        self.smoothed_rtt + (self.rttvar * 4).max(GRANULARITY)
    }
}

impl std::fmt::Debug for RttStats {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("RttStats")
            .field("latest_rtt", &self.latest_rtt)
            .field("srtt", &self.smoothed_rtt)
            .field("minrtt", &self.min_rtt)
            .field("rttvar", &self.rttvar)
            .finish()
    }
}

fn sub_abs(lhs: Duration, rhs: Duration) -> Duration {
    if lhs > rhs {
        lhs - rhs
    } else {
        rhs - lhs
    }
}
