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

//! NewReno congestion control, RFC 9002 §7.

use std::time::Duration;
use std::time::Instant;

use crate::recovery;
use crate::recovery::Sent;

/// NewReno congestion controller.
///
/// Window growth and reduction are driven per acknowledged or lost packet.
/// Packets sent before the accounting reset boundary (`rst_pkt_num`) or that
/// carry no congestion-controlled bytes are invisible to the controller.
pub struct Reno {
    congestion_window: usize,

    ssthresh: usize,

    bytes_in_flight: usize,

    recovery_start: Option<Instant>,

    /// Packets numbered below this are excluded from accounting, e.g. after
    /// a Retry forced the connection to start over.
    rst_pkt_num: u64,

    max_datagram_size: usize,

    max_idle_timeout: Duration,
}

impl Reno {
    pub(crate) fn new(
        max_datagram_size: usize, max_idle_timeout: Duration,
    ) -> Reno {
        Reno {
            congestion_window: max_datagram_size *
                recovery::INITIAL_WINDOW_PACKETS,

            ssthresh: usize::MAX,

            bytes_in_flight: 0,

            recovery_start: None,

            rst_pkt_num: 0,

            max_datagram_size,

            max_idle_timeout,
        }
    }

    pub fn cwnd(&self) -> usize {
        self.congestion_window
    }

    pub fn ssthresh(&self) -> usize {
        self.ssthresh
    }

    pub fn bytes_in_flight(&self) -> usize {
        self.bytes_in_flight
    }

    /// Congestion window bytes still available to the sender.
    pub fn available(&self) -> usize {
        self.congestion_window.saturating_sub(self.bytes_in_flight)
    }

    fn in_congestion_recovery(&self, sent_time: Instant) -> bool {
        match self.recovery_start {
            Some(recovery_start) => sent_time <= recovery_start,

            None => false,
        }
    }

    fn unblocked(&self, was_blocked: bool) -> bool {
        was_blocked && self.bytes_in_flight < self.congestion_window
    }

    pub(crate) fn on_packet_sent(&mut self, sent_bytes: usize) {
        self.bytes_in_flight += sent_bytes;
    }

    /// Returns true when the sender was blocked by the window and no longer
    /// is, so that it can be woken up.
    pub(crate) fn on_packet_acked(
        &mut self, packet: &Sent, now: Instant,
    ) -> bool {
        if packet.size == 0 || packet.pkt_num < self.rst_pkt_num {
            return false;
        }

        let was_blocked = self.bytes_in_flight >= self.congestion_window;

        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(packet.size);

        if self.in_congestion_recovery(packet.time_sent) {
            return self.unblocked(was_blocked);
        }

        if self.congestion_window < self.ssthresh {
            // Slow start.
            self.congestion_window += packet.size;
        } else {
            // Congestion avoidance.
            self.congestion_window +=
                self.max_datagram_size * packet.size / self.congestion_window;
        }

        // Keep the recovery start point from receding arbitrarily far into
        // the past.
        if let Some(recovery_start) = self.recovery_start {
            let horizon = self.max_idle_timeout * 2;

            if now.saturating_duration_since(recovery_start) > horizon {
                self.recovery_start = now.checked_sub(horizon);
            }
        }

        self.unblocked(was_blocked)
    }

    /// Called once per lost packet. Entering recovery halves the window;
    /// losses of packets sent before the current recovery period don't
    /// reduce it again.
    pub(crate) fn on_packet_lost(
        &mut self, packet: &Sent, now: Instant,
    ) -> bool {
        if packet.size == 0 || packet.pkt_num < self.rst_pkt_num {
            return false;
        }

        let was_blocked = self.bytes_in_flight >= self.congestion_window;

        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(packet.size);

        if self.in_congestion_recovery(packet.time_sent) {
            return self.unblocked(was_blocked);
        }

        self.recovery_start = Some(now);

        self.congestion_window = std::cmp::max(
            self.congestion_window / 2,
            self.max_datagram_size * recovery::MINIMUM_WINDOW_PACKETS,
        );

        self.ssthresh = self.congestion_window;

        self.unblocked(was_blocked)
    }

    /// RFC 9002 §7.6.2: collapse the window on persistent congestion.
    /// ssthresh is left where the preceding loss events put it.
    pub(crate) fn collapse_cwnd(&mut self, now: Instant) {
        self.recovery_start = Some(now);

        self.congestion_window =
            self.max_datagram_size * recovery::MINIMUM_WINDOW_PACKETS;
    }

    /// Removes a packet from in-flight accounting without any window
    /// adjustment, used when a packet number space is discarded.
    pub(crate) fn remove_in_flight(&mut self, packet: &Sent) -> bool {
        if packet.size == 0 || packet.pkt_num < self.rst_pkt_num {
            return false;
        }

        let was_blocked = self.bytes_in_flight >= self.congestion_window;

        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(packet.size);

        self.unblocked(was_blocked)
    }

    /// Forgets all in-flight accounting for packets sent so far.
    pub(crate) fn reset_accounting(&mut self, next_pkt_num: u64) {
        self.rst_pkt_num = next_pkt_num;
        self.bytes_in_flight = 0;
    }
}

impl std::fmt::Debug for Reno {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "cwnd={} ssthresh={} bytes_in_flight={}",
            self.congestion_window, self.ssthresh, self.bytes_in_flight,
        )
    }
}
