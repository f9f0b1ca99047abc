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

//! Loss detection and congestion control, RFC 9002.

use std::collections::VecDeque;

use std::time::Duration;
use std::time::Instant;

use smallvec::SmallVec;

use crate::Config;
use crate::Error;
use crate::Host;
use crate::PeerTransportParams;
use crate::Result;

use crate::frame;
use crate::packet;
use crate::ranges;

use self::reno::Reno;
use self::rtt::RttStats;

mod reno;
mod rtt;

/// RFC 9002, 6.1.1. Packet Threshold: kPacketThreshold.
const PACKET_THRESHOLD: u64 = 3;

/// RFC 9002, 7.6.1. Duration: kPersistentCongestionThreshold.
const PERSISTENT_CONGESTION_THRESHOLD: u32 = 3;

/// Probes sent per packet number space on PTO.
const MAX_PTO_PROBES_COUNT: usize = 2;

// Congestion control.
pub(crate) const INITIAL_WINDOW_PACKETS: usize = 10;

pub(crate) const MINIMUM_WINDOW_PACKETS: usize = 2;

/// A packet in flight, together with the frames it carried.
#[derive(Clone, Debug)]
pub struct Sent {
    pub pkt_num: u64,

    pub frames: SmallVec<[frame::Frame; 1]>,

    pub time_sent: Instant,

    /// Bytes counted towards the congestion window; 0 when the packet is not
    /// congestion controlled (a pure acknowledgment).
    pub size: usize,

    pub ack_eliciting: bool,

    /// Set on PTO probes, which the sender transmits past the window gate.
    pub ignore_congestion: bool,
}

impl Sent {
    pub fn new(
        pkt_num: u64, frames: SmallVec<[frame::Frame; 1]>, sent_bytes: usize,
        ack_eliciting: bool, ignore_congestion: bool, time_sent: Instant,
    ) -> Sent {
        let sent_bytes = if ack_eliciting { sent_bytes } else { 0 };

        Sent {
            pkt_num,
            frames,
            time_sent,
            size: sent_bytes,
            ack_eliciting,
            ignore_congestion,
        }
    }
}

/// Send times of the packets removed by the ACK frame being processed, used
/// for the RTT sample and the persistent congestion check.
#[derive(Default)]
struct AckStat {
    /// Send time of the largest acknowledged packet, when it was removed.
    max_pn: Option<Instant>,

    oldest: Option<Instant>,

    newest: Option<Instant>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TimerKind {
    Loss,
    Pto,
}

/// Loss recovery and congestion control state for one connection.
///
/// All three packet number spaces are tracked together; the caller drives
/// the state machine from its event loop and owns all I/O. Time is injected
/// through the `now` arguments, connection collaborators through [`Host`].
pub struct Recovery {
    spaces: [packet::PktNumSpace; packet::EPOCH_COUNT],

    sent: [VecDeque<Sent>; packet::EPOCH_COUNT],

    rtt: RttStats,

    congestion: Reno,

    pto_count: u32,

    timer: Option<(Instant, TimerKind)>,

    /// Deadline for flushing a delayed application-level ACK.
    ack_timer: Option<Instant>,

    handshake_confirmed: bool,

    closing: bool,

    /// Local ACK delay exponent, used when encoding outgoing ACK frames.
    ack_delay_exponent: u64,

    /// Local maximum ACK delay, bounds how long outgoing ACKs are batched.
    max_ack_delay: Duration,

    /// Peer's ACK delay exponent, used when decoding incoming ACK delays.
    peer_ack_delay_exponent: u64,
}

impl Recovery {
    pub fn new(config: &Config) -> Recovery {
        Recovery {
            spaces: [
                packet::PktNumSpace::new(),
                packet::PktNumSpace::new(),
                packet::PktNumSpace::new(),
            ],

            sent: [VecDeque::new(), VecDeque::new(), VecDeque::new()],

            rtt: RttStats::new(PeerTransportParams::default().max_ack_delay),

            congestion: Reno::new(
                config.max_udp_payload_size,
                config.max_idle_timeout,
            ),

            pto_count: 0,

            timer: None,

            ack_timer: None,

            handshake_confirmed: false,

            closing: false,

            ack_delay_exponent: config.ack_delay_exponent,

            max_ack_delay: config.max_ack_delay,

            peer_ack_delay_exponent: PeerTransportParams::default()
                .ack_delay_exponent,
        }
    }

    /// Installs the peer's transport parameters once they are known.
    pub fn set_peer_transport_params(&mut self, peer: PeerTransportParams) {
        self.rtt.max_ack_delay = peer.max_ack_delay;
        self.peer_ack_delay_exponent = peer.ack_delay_exponent;
    }

    /// The handshake completed; ACK delays are trusted from here on and the
    /// application space PTO accounts for the peer's max_ack_delay.
    pub fn on_handshake_confirmed(&mut self) {
        self.handshake_confirmed = true;
    }

    /// The connection entered its closing period: stop waking the sender.
    pub fn on_closing(&mut self) {
        self.closing = true;
    }

    /// Next packet number to assign in the space.
    pub fn next_pkt_num(&self, epoch: packet::Epoch) -> u64 {
        self.spaces[epoch].next_pkt_num
    }

    pub fn cwnd(&self) -> usize {
        self.congestion.cwnd()
    }

    /// Congestion window bytes available to the sender. Probe packets
    /// (`ignore_congestion`) may be sent even when this is zero.
    pub fn cwnd_available(&self) -> usize {
        self.congestion.available()
    }

    pub fn bytes_in_flight(&self) -> usize {
        self.congestion.bytes_in_flight()
    }

    pub fn rtt(&self) -> Duration {
        self.rtt.smoothed_rtt
    }

    pub fn latest_rtt(&self) -> Duration {
        self.rtt.latest_rtt
    }

    /// Deadline of the armed loss-detection or probe timer, if any. The
    /// caller invokes [`on_loss_detection_timeout`] when it expires.
    ///
    /// [`on_loss_detection_timeout`]: Recovery::on_loss_detection_timeout
    pub fn loss_detection_timer(&self) -> Option<Instant> {
        self.timer.map(|(deadline, _)| deadline)
    }

    /// Deadline for flushing a delayed ACK, if one is being batched. The
    /// caller re-runs [`generate_ack`] when it expires.
    ///
    /// [`generate_ack`]: Recovery::generate_ack
    pub fn ack_timeout(&self) -> Option<Instant> {
        self.ack_timer
    }

    /// Records a packet handed to the transport.
    pub fn on_packet_sent(
        &mut self, pkt: Sent, epoch: packet::Epoch, now: Instant,
        trace_id: &str,
    ) {
        debug_assert!(self.sent[epoch]
            .back()
            .map_or(true, |last| last.pkt_num < pkt.pkt_num));

        self.spaces[epoch].next_pkt_num = pkt.pkt_num + 1;

        self.congestion.on_packet_sent(pkt.size);

        self.sent[epoch].push_back(pkt);

        self.set_loss_detection_timer(now);

        trace!("{} {:?}", trace_id, self);
    }

    /// Processes a decoded ACK frame received at `epoch`.
    ///
    /// `largest`, `first_range`, `delay` and `ack_ranges` are the frame
    /// fields as they appear on the wire (RFC 9000 §19.3). Errors are fatal:
    /// the caller closes the connection with the error's wire code.
    #[allow(clippy::too_many_arguments)]
    pub fn on_ack_received(
        &mut self, epoch: packet::Epoch, largest: u64, first_range: u64,
        delay: u64, ack_ranges: &[ranges::AckRange], host: &mut dyn Host,
        now: Instant, trace_id: &str,
    ) -> Result<()> {
        trace!(
            "{} ack received {} largest={} first_range={} ranges={}",
            trace_id,
            packet::epoch_name(epoch),
            largest,
            first_range,
            ack_ranges.len()
        );

        // RFC 9000, 19.3.1. ACK Ranges: a computed packet number below zero
        // is a FRAME_ENCODING_ERROR.
        if first_range > largest {
            return Err(Error::InvalidAckRange);
        }

        let mut min = largest - first_range;
        let mut max = largest;

        let mut st = AckStat::default();

        self.ack_range(epoch, min, max, &mut st, host, now)?;

        // RFC 9002, 5.1. Generating RTT Samples: the sample is taken only
        // when the largest acknowledged packet is newly acknowledged and at
        // least one of the newly acknowledged packets was ack-eliciting.
        if self.spaces[epoch].largest_acked.map_or(true, |la| la < max) {
            self.spaces[epoch].largest_acked = Some(max);

            if let Some(send_time) = st.max_pn {
                let latest_rtt = now.saturating_duration_since(send_time);

                let ack_delay = Duration::from_micros(
                    delay
                        .checked_shl(self.peer_ack_delay_exponent as u32)
                        .unwrap_or(u64::MAX),
                );

                self.rtt.update_rtt(
                    latest_rtt,
                    ack_delay,
                    now,
                    self.handshake_confirmed,
                );

                trace!("{} {:?}", trace_id, self.rtt);
            }
        }

        for r in ack_ranges {
            if r.gap + 2 > min {
                return Err(Error::InvalidAckRange);
            }

            max = min - r.gap - 2;

            if r.range > max {
                return Err(Error::InvalidAckRange);
            }

            min = max - r.range;

            self.ack_range(epoch, min, max, &mut st, host, now)?;
        }

        self.detect_lost(Some(&st), host, now, trace_id);

        Ok(())
    }

    /// Removes the packets acknowledged by one `min..=max` range.
    fn ack_range(
        &mut self, epoch: packet::Epoch, min: u64, max: u64, st: &mut AckStat,
        host: &mut dyn Host, now: Instant,
    ) -> Result<()> {
        if epoch == packet::EPOCH_APPLICATION {
            host.on_ack_range(min, max)?;
        }

        st.max_pn = None;

        let mut found = false;

        let mut i = 0;
        while i < self.sent[epoch].len() {
            let pkt_num = self.sent[epoch][i].pkt_num;

            if pkt_num > max {
                break;
            }

            if pkt_num < min {
                i += 1;
                continue;
            }

            let pkt = match self.sent[epoch].remove(i) {
                Some(pkt) => pkt,
                None => break,
            };

            if self.congestion.on_packet_acked(&pkt, now) {
                self.wakeup(host);
            }

            for f in &pkt.frames {
                match f {
                    // The peer saw our acknowledgment: ranges up to its
                    // largest don't need to be sent again.
                    frame::Frame::ACK { largest, .. } =>
                        self.spaces[epoch].acks.drop_ranges(*largest),

                    frame::Frame::Stream { .. } |
                    frame::Frame::ResetStream { .. } =>
                        host.on_stream_acked(f),

                    _ => (),
                }
            }

            if pkt.pkt_num == max {
                st.max_pn = Some(pkt.time_sent);
            }

            // Earliest and latest send times of the packets acked.
            st.oldest =
                Some(st.oldest.map_or(pkt.time_sent, |t| t.min(pkt.time_sent)));
            st.newest =
                Some(st.newest.map_or(pkt.time_sent, |t| t.max(pkt.time_sent)));

            found = true;
        }

        if !found {
            if max < self.spaces[epoch].next_pkt_num {
                // Duplicate ACK, or ACK for a non-tracked packet.
                return Ok(());
            }

            return Err(Error::UnknownPacket);
        }

        self.wakeup(host);

        self.pto_count = 0;

        Ok(())
    }

    /// Declares packets lost by packet threshold and time threshold, across
    /// all packet number spaces. `st` carries the send times of the ACK
    /// frame that triggered the scan, if any, for the persistent congestion
    /// check.
    fn detect_lost(
        &mut self, st: Option<&AckStat>, host: &mut dyn Host, now: Instant,
        trace_id: &str,
    ) {
        let thr = self.rtt.loss_delay();

        // Send times of lost packets across all spaces.
        let mut oldest: Option<Instant> = None;
        let mut newest: Option<Instant> = None;

        let mut nlost = 0;

        for epoch in 0..packet::EPOCH_COUNT {
            let largest_acked = match self.spaces[epoch].largest_acked {
                Some(v) => v,
                None => continue,
            };

            loop {
                let (pkt_num, time_sent) = match self.sent[epoch].front() {
                    Some(start) => (start.pkt_num, start.time_sent),
                    None => break,
                };

                if pkt_num > largest_acked {
                    break;
                }

                if time_sent + thr > now &&
                    largest_acked - pkt_num < PACKET_THRESHOLD
                {
                    break;
                }

                trace!(
                    "{} packet {} lost {}",
                    trace_id,
                    pkt_num,
                    packet::epoch_name(epoch)
                );

                // Packets sent before the first RTT sample can't be placed
                // in time and don't count towards persistent congestion.
                if self.rtt.first_rtt_sample.map_or(false, |t| time_sent > t) {
                    oldest = Some(oldest.map_or(time_sent, |t| t.min(time_sent)));
                    newest = Some(newest.map_or(time_sent, |t| t.max(time_sent)));

                    nlost += 1;
                }

                self.resend(epoch, host, now, trace_id);
            }
        }

        // RFC 9002, 7.6.2. Establishing Persistent Congestion.
        //
        // Acknowledged packets are no longer tracked, so no send time
        // information is available for them; the check is limited to the
        // ranges of the ACK frame just processed.
        if let Some(st) = st {
            if nlost >= 2 {
                if let (Some(oldest), Some(newest)) = (oldest, newest) {
                    let disjoint = st.newest.map_or(false, |n| n < oldest) ||
                        st.oldest.map_or(true, |o| o > newest);

                    if disjoint &&
                        newest.duration_since(oldest) > self.pcg_duration()
                    {
                        self.congestion.collapse_cwnd(now);

                        trace!(
                            "{} persistent congestion {:?}",
                            trace_id,
                            self.congestion
                        );
                    }
                }
            }
        }

        self.set_loss_detection_timer(now);
    }

    fn pcg_duration(&self) -> Duration {
        let duration = self.rtt.smoothed_rtt +
            (self.rtt.rttvar * 4).max(rtt::GRANULARITY) +
            self.rtt.max_ack_delay;

        duration * PERSISTENT_CONGESTION_THRESHOLD
    }

    /// Takes the packet at the head of the space's flight queue out and
    /// disposes of its frames: limit-bearing frames are re-queued with
    /// refreshed values, stale ones are dropped, the rest are re-queued
    /// verbatim.
    fn resend(
        &mut self, epoch: packet::Epoch, host: &mut dyn Host, now: Instant,
        trace_id: &str,
    ) {
        let pkt = match self.sent[epoch].pop_front() {
            Some(pkt) => pkt,
            None => return,
        };

        trace!("{} resend packet {}", trace_id, pkt.pkt_num);

        self.congestion.on_packet_lost(&pkt, now);

        let space = &mut self.spaces[epoch];

        for f in pkt.frames {
            match f {
                frame::Frame::ACK { .. } => {
                    // Force generation of the most recent acknowledgment.
                    if epoch == packet::EPOCH_APPLICATION {
                        space.acks.force_ack();
                    }
                },

                frame::Frame::Ping |
                frame::Frame::PathChallenge { .. } |
                frame::Frame::PathResponse { .. } |
                frame::Frame::ConnectionClose { .. } => (),

                // Stale limits must not be retransmitted: refresh them.
                frame::Frame::MaxData { .. } =>
                    space.retransmit.push_back(frame::Frame::MaxData {
                        max: host.max_data(),
                    }),

                frame::Frame::MaxStreamsBidi { .. } =>
                    space.retransmit.push_back(frame::Frame::MaxStreamsBidi {
                        max: host.max_streams(true),
                    }),

                frame::Frame::MaxStreamsUni { .. } =>
                    space.retransmit.push_back(frame::Frame::MaxStreamsUni {
                        max: host.max_streams(false),
                    }),

                frame::Frame::MaxStreamData { stream_id, .. } =>
                    match host.max_stream_data(stream_id) {
                        Some(max) => space.retransmit.push_back(
                            frame::Frame::MaxStreamData { stream_id, max },
                        ),

                        // The stream is gone, nothing to update.
                        None => (),
                    },

                frame::Frame::Stream {
                    stream_id,
                    offset,
                    length,
                    fin,
                } =>
                    if !host.stream_send_reset(stream_id) {
                        space.retransmit.push_back(frame::Frame::Stream {
                            stream_id,
                            offset,
                            length,
                            fin,
                        });
                    },

                f => space.retransmit.push_back(f),
            }
        }

        self.wakeup(host);
    }

    /// Base probe timeout for a space. RFC 9002, Appendix A.8.
    fn pto(&self, epoch: packet::Epoch) -> Duration {
        let mut duration = self.rtt.pto_base();

        if epoch == packet::EPOCH_APPLICATION && self.handshake_confirmed {
            duration += self.rtt.max_ack_delay;
        }

        duration
    }

    /// Arms the earlier of the loss timer and the PTO timer; the loss timer
    /// takes precedence.
    fn set_loss_detection_timer(&mut self, now: Instant) {
        let mut lost: Option<Instant> = None;
        let mut pto: Option<Instant> = None;

        // Clamped so that deadline arithmetic cannot overflow.
        let backoff = 1u32 << self.pto_count.min(16);

        for epoch in 0..packet::EPOCH_COUNT {
            let (first, last) =
                match (self.sent[epoch].front(), self.sent[epoch].back()) {
                    (Some(first), Some(last)) => (first, last),
                    _ => continue,
                };

            if let Some(largest_acked) = self.spaces[epoch].largest_acked {
                if first.pkt_num <= largest_acked {
                    let mut deadline = first.time_sent + self.rtt.loss_delay();

                    if deadline <= now ||
                        largest_acked - first.pkt_num >= PACKET_THRESHOLD
                    {
                        deadline = now;
                    }

                    lost = Some(lost.map_or(deadline, |v| v.min(deadline)));
                }
            }

            let deadline = last.time_sent +
                self.pto(epoch).saturating_mul(backoff);
            let deadline = deadline.max(now);

            pto = Some(pto.map_or(deadline, |v| v.min(deadline)));
        }

        self.timer = match (lost, pto) {
            (Some(deadline), _) => Some((deadline, TimerKind::Loss)),
            (None, Some(deadline)) => Some((deadline, TimerKind::Pto)),
            (None, None) => None,
        };
    }

    /// Handles expiry of the timer reported by [`loss_detection_timer`].
    ///
    /// Depending on what was armed this either runs time-threshold loss
    /// detection or sends probe packets. A probe failure is fatal.
    ///
    /// [`loss_detection_timer`]: Recovery::loss_detection_timer
    pub fn on_loss_detection_timeout(
        &mut self, host: &mut dyn Host, now: Instant, trace_id: &str,
    ) -> Result<()> {
        let kind = match self.timer.take() {
            Some((_, kind)) => kind,
            None => return Ok(()),
        };

        match kind {
            TimerKind::Loss => {
                trace!("{} loss timer expired", trace_id);

                self.detect_lost(None, host, now, trace_id);

                Ok(())
            },

            TimerKind::Pto => {
                let backoff = 1u32 << self.pto_count.min(16);

                for epoch in 0..packet::EPOCH_COUNT {
                    let last = match self.sent[epoch].back() {
                        Some(last) => last,
                        None => continue,
                    };

                    if let Some(largest_acked) =
                        self.spaces[epoch].largest_acked
                    {
                        if last.pkt_num <= largest_acked {
                            continue;
                        }
                    }

                    let deadline = last.time_sent +
                        self.pto(epoch).saturating_mul(backoff);

                    if deadline > now {
                        continue;
                    }

                    trace!(
                        "{} pto {} pto_count={}",
                        trace_id,
                        packet::epoch_name(epoch),
                        self.pto_count
                    );

                    for _ in 0..MAX_PTO_PROBES_COUNT {
                        host.send_probe(epoch, frame::Frame::Ping)?;
                    }
                }

                self.pto_count += 1;

                self.set_loss_detection_timer(now);

                Ok(())
            },
        }
    }

    /// Tracks a received packet in the space's acknowledgment state.
    ///
    /// `keys_available` tells whether send keys exist for the level; without
    /// them no acknowledgment could be sent and the packet is not tracked.
    /// The returned frame, if any, is an acknowledgment that must go out now
    /// (range table overflow, or a one-off ACK for a packet too old to
    /// track); the caller queues it like any other frame.
    #[allow(clippy::too_many_arguments)]
    pub fn on_packet_received(
        &mut self, epoch: packet::Epoch, pn: u64, need_ack: bool,
        keys_available: bool, host: &mut dyn Host, now: Instant,
        trace_id: &str,
    ) -> Option<frame::Frame> {
        if !keys_available {
            return None;
        }

        trace!(
            "{} packet received {} pn={} need_ack={}",
            trace_id,
            packet::epoch_name(epoch),
            pn,
            need_ack
        );

        if need_ack {
            self.wakeup(host);
        }

        self.spaces[epoch].acks.on_packet_received(
            pn,
            need_ack,
            now,
            self.ack_delay_exponent,
        )
    }

    /// Builds an ACK frame for the space if one is due.
    ///
    /// At the application level acknowledgments are batched: while fewer
    /// than [`MAX_ACK_GAP`] ack-eliciting packets are outstanding, nothing
    /// else is waiting to be sent (`pending_frames` covers the caller's own
    /// queues) and the local max_ack_delay has not elapsed, emission is
    /// deferred and [`ack_timeout`] is armed instead.
    ///
    /// [`MAX_ACK_GAP`]: crate::ranges::MAX_ACK_GAP
    /// [`ack_timeout`]: Recovery::ack_timeout
    pub fn generate_ack(
        &mut self, epoch: packet::Epoch, pending_frames: bool, now: Instant,
    ) -> Option<frame::Frame> {
        let space = &mut self.spaces[epoch];

        if space.acks.send_ack == 0 {
            return None;
        }

        if epoch == packet::EPOCH_APPLICATION {
            let elapsed = match space.acks.ack_delay_start {
                Some(start) => now.saturating_duration_since(start),
                None => Duration::ZERO,
            };

            if !pending_frames &&
                space.retransmit.is_empty() &&
                space.acks.send_ack < ranges::MAX_ACK_GAP &&
                elapsed < self.max_ack_delay
            {
                if self.ack_timer.is_none() && !self.closing {
                    self.ack_timer = Some(now + (self.max_ack_delay - elapsed));
                }

                return None;
            }
        }

        let f = space.acks.build(now, self.ack_delay_exponent);

        if f.is_some() {
            space.acks.send_ack = 0;

            if epoch == packet::EPOCH_APPLICATION {
                self.ack_timer = None;
            }
        }

        f
    }

    /// Next frame re-queued by loss recovery for this space, if any. The
    /// sender drains these ahead of new data.
    pub fn next_retransmit(
        &mut self, epoch: packet::Epoch,
    ) -> Option<frame::Frame> {
        self.spaces[epoch].retransmit.pop_front()
    }

    pub fn has_retransmit(&self, epoch: packet::Epoch) -> bool {
        !self.spaces[epoch].retransmit.is_empty()
    }

    /// Drops all state of a space when its keys are discarded. In-flight
    /// bytes leave congestion accounting without any window adjustment.
    pub fn discard(&mut self, epoch: packet::Epoch, now: Instant) {
        while let Some(pkt) = self.sent[epoch].pop_front() {
            self.congestion.remove_in_flight(&pkt);
        }

        self.spaces[epoch].retransmit.clear();
        self.spaces[epoch].acks.reset();

        self.set_loss_detection_timer(now);
    }

    /// Forgets congestion accounting for everything sent so far in favour of
    /// a clean start, e.g. after a Retry. Packets below the current packet
    /// number of `epoch` become invisible to the congestion controller.
    pub fn reset_congestion_accounting(&mut self, epoch: packet::Epoch) {
        self.congestion
            .reset_accounting(self.spaces[epoch].next_pkt_num);
    }

    fn wakeup(&self, host: &mut dyn Host) {
        if !self.closing {
            host.wakeup_send();
        }
    }
}

impl std::fmt::Debug for Recovery {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.timer {
            Some((deadline, kind)) =>
                write!(f, "timer={kind:?}@{deadline:?} ")?,
            None => write!(f, "timer=none ")?,
        };

        write!(f, "{:?} ", self.congestion)?;
        write!(f, "latest_rtt={:?} ", self.rtt.latest_rtt)?;
        write!(f, "srtt={:?} ", self.rtt.smoothed_rtt)?;
        write!(f, "rttvar={:?} ", self.rtt.rttvar)?;
        write!(f, "pto_count={} ", self.pto_count)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::collections::HashSet;

    use smallvec::smallvec;

    use crate::packet::EPOCH_APPLICATION;
    use crate::packet::EPOCH_HANDSHAKE;
    use crate::packet::EPOCH_INITIAL;

    const MDS: usize = 1200;

    struct TestHost {
        max_data: u64,
        max_streams_bidi: u64,
        max_streams_uni: u64,
        stream_limits: HashMap<u64, u64>,
        reset_streams: HashSet<u64>,
        acked: Vec<frame::Frame>,
        probes: Vec<(packet::Epoch, frame::Frame)>,
        ack_ranges: Vec<(u64, u64)>,
        wakeups: usize,
        fail_probes: bool,
    }

    impl Default for TestHost {
        fn default() -> TestHost {
            TestHost {
                max_data: 999,
                max_streams_bidi: 11,
                max_streams_uni: 22,
                stream_limits: HashMap::from([(4, 777)]),
                reset_streams: HashSet::new(),
                acked: Vec::new(),
                probes: Vec::new(),
                ack_ranges: Vec::new(),
                wakeups: 0,
                fail_probes: false,
            }
        }
    }

    impl Host for TestHost {
        fn max_data(&self) -> u64 {
            self.max_data
        }

        fn max_streams(&self, bidi: bool) -> u64 {
            if bidi {
                self.max_streams_bidi
            } else {
                self.max_streams_uni
            }
        }

        fn max_stream_data(&self, stream_id: u64) -> Option<u64> {
            self.stream_limits.get(&stream_id).copied()
        }

        fn stream_send_reset(&self, stream_id: u64) -> bool {
            self.reset_streams.contains(&stream_id)
        }

        fn on_stream_acked(&mut self, frame: &frame::Frame) {
            self.acked.push(frame.clone());
        }

        fn on_ack_range(&mut self, min: u64, max: u64) -> Result<()> {
            self.ack_ranges.push((min, max));
            Ok(())
        }

        fn send_probe(
            &mut self, epoch: packet::Epoch, frame: frame::Frame,
        ) -> Result<()> {
            if self.fail_probes {
                return Err(Error::OutOfMemory);
            }

            self.probes.push((epoch, frame));
            Ok(())
        }

        fn wakeup_send(&mut self) {
            self.wakeups += 1;
        }
    }

    fn new_recovery() -> Recovery {
        let mut config = Config::new();
        config.set_max_udp_payload_size(MDS);
        config.set_max_idle_timeout(Duration::from_secs(60));

        Recovery::new(&config)
    }

    fn stream_frame(len: usize) -> frame::Frame {
        frame::Frame::Stream {
            stream_id: 4,
            offset: 0,
            length: len,
            fin: false,
        }
    }

    fn send_stream_pkts(
        r: &mut Recovery, epoch: packet::Epoch, pns: std::ops::Range<u64>,
        size: usize, now: Instant,
    ) {
        for pn in pns {
            let pkt =
                Sent::new(pn, smallvec![stream_frame(size)], size, true, false, now);

            r.on_packet_sent(pkt, epoch, now, "test");
        }
    }

    fn flight_bytes(r: &Recovery) -> usize {
        r.sent.iter().flatten().map(|p| p.size).sum()
    }

    #[test]
    fn ack_all_in_slow_start() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();

        send_stream_pkts(&mut r, EPOCH_APPLICATION, 0..5, MDS, t0);
        assert_eq!(r.bytes_in_flight(), 5 * MDS);

        let t1 = t0 + Duration::from_millis(50);

        r.on_ack_received(EPOCH_APPLICATION, 4, 4, 0, &[], &mut host, t1, "test")
            .unwrap();

        assert!(r.sent[EPOCH_APPLICATION].is_empty());
        assert_eq!(r.latest_rtt(), Duration::from_millis(50));
        assert_eq!(r.rtt(), Duration::from_millis(50));
        assert_eq!(r.bytes_in_flight(), 0);
        assert_eq!(r.cwnd(), MDS * INITIAL_WINDOW_PACKETS + 5 * MDS);
        assert_eq!(r.spaces[EPOCH_APPLICATION].largest_acked, Some(4));
        assert_eq!(host.ack_ranges, vec![(0, 4)]);
        assert!(host.wakeups > 0);
    }

    #[test]
    fn time_threshold_loss() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();

        send_stream_pkts(&mut r, EPOCH_APPLICATION, 0..10, MDS, t0);

        // Acks 9 and 0..=7, leaves 8 in flight.
        let ranges = [ranges::AckRange { gap: 0, range: 7 }];
        let t1 = t0 + Duration::from_millis(50);

        r.on_ack_received(
            EPOCH_APPLICATION,
            9,
            0,
            0,
            &ranges,
            &mut host,
            t1,
            "test",
        )
        .unwrap();

        assert_eq!(r.sent[EPOCH_APPLICATION].len(), 1);
        assert_eq!(r.bytes_in_flight(), MDS);

        let cwnd = MDS * INITIAL_WINDOW_PACKETS + 9 * MDS;
        assert_eq!(r.cwnd(), cwnd);

        // 9 - 8 < packet threshold: not lost yet. The loss timer is armed at
        // send time + 9/8 * rtt.
        let thr = Duration::from_micros(56_250);
        assert_eq!(r.timer, Some((t0 + thr, TimerKind::Loss)));

        let t2 = t0 + thr + Duration::from_millis(1);
        r.on_loss_detection_timeout(&mut host, t2, "test").unwrap();

        assert!(r.sent[EPOCH_APPLICATION].is_empty());
        assert_eq!(r.bytes_in_flight(), 0);
        assert_eq!(r.cwnd(), cwnd / 2);
        assert_eq!(r.congestion.ssthresh(), cwnd / 2);

        // The stream frame was re-queued.
        assert_eq!(r.next_retransmit(EPOCH_APPLICATION), Some(stream_frame(MDS)));
        assert_eq!(r.next_retransmit(EPOCH_APPLICATION), None);
    }

    #[test]
    fn packet_threshold_loss() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();

        send_stream_pkts(&mut r, EPOCH_APPLICATION, 0..10, MDS, t0);

        // Acks 7..=9 only: everything at or below 6 trails the largest by at
        // least the packet threshold and is lost immediately.
        let t1 = t0 + Duration::from_millis(10);

        r.on_ack_received(EPOCH_APPLICATION, 9, 2, 0, &[], &mut host, t1, "test")
            .unwrap();

        assert!(r.sent[EPOCH_APPLICATION].is_empty());
        assert_eq!(r.bytes_in_flight(), 0);

        // Grew by the three acked packets, then halved once: the later
        // losses were sent before the recovery period started.
        let cwnd = (MDS * INITIAL_WINDOW_PACKETS + 3 * MDS) / 2;
        assert_eq!(r.cwnd(), cwnd);
        assert_eq!(r.congestion.ssthresh(), cwnd);

        // All seven lost stream frames were re-queued.
        let mut n = 0;
        while r.next_retransmit(EPOCH_APPLICATION).is_some() {
            n += 1;
        }
        assert_eq!(n, 7);
    }

    #[test]
    fn duplicate_ack_is_noop() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();

        send_stream_pkts(&mut r, EPOCH_APPLICATION, 0..3, MDS, t0);

        let t1 = t0 + Duration::from_millis(20);

        r.on_ack_received(EPOCH_APPLICATION, 2, 2, 0, &[], &mut host, t1, "test")
            .unwrap();

        let cwnd = r.cwnd();
        let srtt = r.rtt();

        // Feeding the same frame again changes nothing.
        let t2 = t0 + Duration::from_millis(40);

        r.on_ack_received(EPOCH_APPLICATION, 2, 2, 0, &[], &mut host, t2, "test")
            .unwrap();

        assert_eq!(r.cwnd(), cwnd);
        assert_eq!(r.rtt(), srtt);
        assert_eq!(r.bytes_in_flight(), 0);
        assert_eq!(r.spaces[EPOCH_APPLICATION].largest_acked, Some(2));
    }

    #[test]
    fn ack_for_unsent_packet() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();

        assert_eq!(
            r.on_ack_received(EPOCH_APPLICATION, 5, 0, 0, &[], &mut host, t0, "test"),
            Err(Error::UnknownPacket)
        );

        send_stream_pkts(&mut r, EPOCH_APPLICATION, 0..3, MDS, t0);

        assert_eq!(
            r.on_ack_received(EPOCH_APPLICATION, 5, 0, 0, &[], &mut host, t0, "test"),
            Err(Error::UnknownPacket)
        );
    }

    #[test]
    fn malformed_ack_ranges() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();

        // first_range > largest.
        assert_eq!(
            r.on_ack_received(EPOCH_APPLICATION, 2, 5, 0, &[], &mut host, t0, "test"),
            Err(Error::InvalidAckRange)
        );

        send_stream_pkts(&mut r, EPOCH_APPLICATION, 0..10, MDS, t0);

        // gap + 2 exceeds the previous smallest.
        let ranges = [ranges::AckRange { gap: 9, range: 0 }];
        assert_eq!(
            r.on_ack_received(
                EPOCH_APPLICATION,
                9,
                0,
                0,
                &ranges,
                &mut host,
                t0,
                "test"
            ),
            Err(Error::InvalidAckRange)
        );

        // range exceeds the computed largest.
        let ranges = [ranges::AckRange { gap: 0, range: 8 }];
        assert_eq!(
            r.on_ack_received(
                EPOCH_APPLICATION,
                9,
                0,
                0,
                &ranges,
                &mut host,
                t0,
                "test"
            ),
            Err(Error::InvalidAckRange)
        );
    }

    #[test]
    fn pto_sends_two_probes() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();

        send_stream_pkts(&mut r, EPOCH_APPLICATION, 0..1, MDS, t0);

        // No RTT samples yet: base PTO comes from the initial RTT.
        let pto = rtt::INITIAL_RTT + rtt::INITIAL_RTT * 2;
        assert_eq!(r.timer, Some((t0 + pto, TimerKind::Pto)));

        r.on_loss_detection_timeout(&mut host, t0 + pto, "test")
            .unwrap();

        assert_eq!(
            host.probes,
            vec![
                (EPOCH_APPLICATION, frame::Frame::Ping),
                (EPOCH_APPLICATION, frame::Frame::Ping)
            ]
        );
        assert_eq!(r.pto_count, 1);

        // Next arming backs off exponentially.
        assert_eq!(r.timer, Some((t0 + pto * 2, TimerKind::Pto)));

        // The unacked packet stays in flight.
        assert_eq!(r.sent[EPOCH_APPLICATION].len(), 1);
    }

    #[test]
    fn pto_count_resets_on_ack() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();

        send_stream_pkts(&mut r, EPOCH_APPLICATION, 0..1, MDS, t0);

        let pto = r.pto(EPOCH_APPLICATION);
        r.on_loss_detection_timeout(&mut host, t0 + pto, "test")
            .unwrap();
        assert_eq!(r.pto_count, 1);

        let t1 = t0 + pto + Duration::from_millis(10);
        r.on_ack_received(EPOCH_APPLICATION, 0, 0, 0, &[], &mut host, t1, "test")
            .unwrap();

        assert_eq!(r.pto_count, 0);
    }

    #[test]
    fn pto_probe_failure_is_fatal() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();
        host.fail_probes = true;

        send_stream_pkts(&mut r, EPOCH_APPLICATION, 0..1, MDS, t0);

        let pto = r.pto(EPOCH_APPLICATION);

        assert_eq!(
            r.on_loss_detection_timeout(&mut host, t0 + pto, "test"),
            Err(Error::OutOfMemory)
        );
    }

    #[test]
    fn persistent_congestion_collapses_window() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();

        // Established connection with a 100ms RTT.
        r.rtt.latest_rtt = Duration::from_millis(100);
        r.rtt.smoothed_rtt = Duration::from_millis(100);
        r.rtt.rttvar = Duration::from_millis(25);
        r.rtt.min_rtt = Duration::from_millis(100);
        r.rtt.first_rtt_sample = Some(t0 + Duration::from_millis(500));

        // pcg duration = (100 + max(4 * 25, 1) + 25) * 3 = 675ms; the two
        // lost packets span 900ms.
        send_stream_pkts(
            &mut r,
            EPOCH_APPLICATION,
            0..1,
            MDS,
            t0 + Duration::from_millis(1000),
        );
        send_stream_pkts(
            &mut r,
            EPOCH_APPLICATION,
            1..2,
            MDS,
            t0 + Duration::from_millis(1900),
        );
        send_stream_pkts(
            &mut r,
            EPOCH_APPLICATION,
            2..3,
            MDS,
            t0 + Duration::from_millis(2000),
        );

        let t1 = t0 + Duration::from_millis(2100);

        r.on_ack_received(EPOCH_APPLICATION, 2, 0, 0, &[], &mut host, t1, "test")
            .unwrap();

        assert_eq!(r.cwnd(), MDS * MINIMUM_WINDOW_PACKETS);

        // ssthresh keeps the value from the loss that entered recovery.
        assert_eq!(
            r.congestion.ssthresh(),
            MDS * INITIAL_WINDOW_PACKETS / 2
        );
    }

    #[test]
    fn no_persistent_congestion_when_spans_overlap() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();

        r.rtt.latest_rtt = Duration::from_millis(100);
        r.rtt.smoothed_rtt = Duration::from_millis(100);
        r.rtt.rttvar = Duration::from_millis(25);
        r.rtt.min_rtt = Duration::from_millis(100);
        r.rtt.first_rtt_sample = Some(t0 + Duration::from_millis(500));

        // The acked packet (pn 1) was sent between the two lost ones, so
        // the loss span is not disjoint from the acked span.
        send_stream_pkts(
            &mut r,
            EPOCH_APPLICATION,
            0..1,
            MDS,
            t0 + Duration::from_millis(1000),
        );
        send_stream_pkts(
            &mut r,
            EPOCH_APPLICATION,
            1..2,
            MDS,
            t0 + Duration::from_millis(1500),
        );
        send_stream_pkts(
            &mut r,
            EPOCH_APPLICATION,
            2..3,
            MDS,
            t0 + Duration::from_millis(1900),
        );
        send_stream_pkts(
            &mut r,
            EPOCH_APPLICATION,
            3..4,
            MDS,
            t0 + Duration::from_millis(2000),
        );

        let t1 = t0 + Duration::from_millis(2100);

        // Acks 1 and 3, loses 0 and 2 by packet threshold.
        let ranges = [ranges::AckRange { gap: 0, range: 0 }];

        r.on_ack_received(
            EPOCH_APPLICATION,
            3,
            0,
            0,
            &ranges,
            &mut host,
            t1,
            "test",
        )
        .unwrap();

        // Window halved by the loss but not collapsed.
        assert_eq!(r.cwnd(), MDS * INITIAL_WINDOW_PACKETS / 2 + MDS);
    }

    #[test]
    fn resend_refreshes_limits() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();
        host.reset_streams.insert(20);

        let frames: SmallVec<[frame::Frame; 1]> = smallvec![
            frame::Frame::MaxData { max: 1 },
            frame::Frame::MaxStreamsBidi { max: 1 },
            frame::Frame::MaxStreamsUni { max: 1 },
            frame::Frame::MaxStreamData { stream_id: 4, max: 1 },
            frame::Frame::MaxStreamData { stream_id: 8, max: 1 },
            frame::Frame::Stream {
                stream_id: 20,
                offset: 0,
                length: 100,
                fin: false
            },
            frame::Frame::Stream {
                stream_id: 12,
                offset: 7,
                length: 100,
                fin: true
            },
            frame::Frame::Ping,
            frame::Frame::PathChallenge { data: [0; 8] },
            frame::Frame::HandshakeDone,
        ];

        r.on_packet_sent(
            Sent::new(0, frames, MDS, true, false, t0),
            EPOCH_APPLICATION,
            t0,
            "test",
        );
        send_stream_pkts(&mut r, EPOCH_APPLICATION, 1..4, MDS, t0);

        // Acks 1..=3: packet 0 is lost by packet threshold.
        let t1 = t0 + Duration::from_millis(10);
        r.on_ack_received(EPOCH_APPLICATION, 3, 2, 0, &[], &mut host, t1, "test")
            .unwrap();

        let mut requeued = Vec::new();
        while let Some(f) = r.next_retransmit(EPOCH_APPLICATION) {
            requeued.push(f);
        }

        assert_eq!(requeued, vec![
            // Limits refreshed from the host.
            frame::Frame::MaxData { max: 999 },
            frame::Frame::MaxStreamsBidi { max: 11 },
            frame::Frame::MaxStreamsUni { max: 22 },
            frame::Frame::MaxStreamData { stream_id: 4, max: 777 },
            // Stream 8 is gone, its update was dropped; stream 20 was
            // reset, its data was dropped; stream 12 goes out verbatim.
            frame::Frame::Stream {
                stream_id: 12,
                offset: 7,
                length: 100,
                fin: true
            },
            // PING and PATH_CHALLENGE are dropped, HANDSHAKE_DONE is kept.
            frame::Frame::HandshakeDone,
        ]);
    }

    #[test]
    fn lost_ack_frame_forces_reack() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();

        let ack = frame::Frame::ACK {
            delay: 0,
            largest: 7,
            first_range: 0,
            ranges: Vec::new(),
            ecn_counts: None,
        };

        // A pure acknowledgment carries no congestion-controlled bytes.
        r.on_packet_sent(
            Sent::new(0, smallvec![ack], 30, false, false, t0),
            EPOCH_APPLICATION,
            t0,
            "test",
        );
        send_stream_pkts(&mut r, EPOCH_APPLICATION, 1..4, MDS, t0);

        let t1 = t0 + Duration::from_millis(10);
        r.on_ack_received(EPOCH_APPLICATION, 3, 2, 0, &[], &mut host, t1, "test")
            .unwrap();

        // The ACK frame itself is not re-queued, but the latest
        // acknowledgment state is forced out at the next opportunity.
        assert_eq!(r.next_retransmit(EPOCH_APPLICATION), None);
        assert_eq!(
            r.spaces[EPOCH_APPLICATION].acks.send_ack,
            ranges::MAX_ACK_GAP
        );
    }

    #[test]
    fn ack_of_ack_drops_ranges() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();

        for pn in 0..3 {
            r.on_packet_received(
                EPOCH_APPLICATION,
                pn,
                true,
                true,
                &mut host,
                t0,
                "test",
            );
        }

        let ack = r
            .generate_ack(EPOCH_APPLICATION, false, t0 + Duration::from_millis(1))
            .unwrap();

        match &ack {
            frame::Frame::ACK { largest, .. } => assert_eq!(*largest, 2),
            other => panic!("expected ACK, got {other:?}"),
        }

        // The ACK goes out in packet 0, which the peer then acknowledges.
        r.on_packet_sent(
            Sent::new(0, smallvec![ack], 30, false, false, t0),
            EPOCH_APPLICATION,
            t0,
            "test",
        );

        let t1 = t0 + Duration::from_millis(20);
        r.on_ack_received(EPOCH_APPLICATION, 0, 0, 0, &[], &mut host, t1, "test")
            .unwrap();

        assert_eq!(r.spaces[EPOCH_APPLICATION].acks.largest, None);
        assert_eq!(r.spaces[EPOCH_APPLICATION].acks.pending_ack, None);
    }

    #[test]
    fn largest_acked_is_monotonic() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();

        send_stream_pkts(&mut r, EPOCH_APPLICATION, 0..5, MDS, t0);

        let t1 = t0 + Duration::from_millis(10);
        r.on_ack_received(EPOCH_APPLICATION, 4, 0, 0, &[], &mut host, t1, "test")
            .unwrap();
        assert_eq!(r.spaces[EPOCH_APPLICATION].largest_acked, Some(4));

        // An older ACK must not move largest_acked backwards.
        let t2 = t0 + Duration::from_millis(20);
        r.on_ack_received(EPOCH_APPLICATION, 2, 2, 0, &[], &mut host, t2, "test")
            .unwrap();
        assert_eq!(r.spaces[EPOCH_APPLICATION].largest_acked, Some(4));
    }

    #[test]
    fn delayed_ack_generation() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();

        assert_eq!(r.generate_ack(EPOCH_APPLICATION, false, t0), None);

        r.on_packet_received(EPOCH_APPLICATION, 0, true, true, &mut host, t0, "test");

        // One outstanding packet, nothing else to send: wait.
        let t1 = t0 + Duration::from_millis(1);
        assert_eq!(r.generate_ack(EPOCH_APPLICATION, false, t1), None);
        assert_eq!(r.ack_timeout(), Some(t0 + Duration::from_millis(25)));

        // Once max_ack_delay elapsed the ACK goes out.
        let t2 = t0 + Duration::from_millis(26);
        let ack = r.generate_ack(EPOCH_APPLICATION, false, t2);

        match ack {
            Some(frame::Frame::ACK { largest, .. }) => assert_eq!(largest, 0),
            other => panic!("expected ACK, got {other:?}"),
        }

        assert_eq!(r.spaces[EPOCH_APPLICATION].acks.send_ack, 0);
        assert_eq!(r.ack_timeout(), None);
    }

    #[test]
    fn ack_gap_forces_immediate_generation() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();

        r.on_packet_received(EPOCH_APPLICATION, 0, true, true, &mut host, t0, "test");
        r.on_packet_received(EPOCH_APPLICATION, 1, true, true, &mut host, t0, "test");

        // MAX_ACK_GAP ack-eliciting packets outstanding: no delay.
        assert!(r.generate_ack(EPOCH_APPLICATION, false, t0).is_some());
    }

    #[test]
    fn pending_frames_flush_ack() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();

        r.on_packet_received(EPOCH_APPLICATION, 0, true, true, &mut host, t0, "test");

        // The sender has frames to pack anyway: piggyback the ACK.
        assert!(r.generate_ack(EPOCH_APPLICATION, true, t0).is_some());
    }

    #[test]
    fn handshake_acks_are_not_delayed() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();

        r.on_packet_received(EPOCH_INITIAL, 0, true, true, &mut host, t0, "test");

        assert!(r.generate_ack(EPOCH_INITIAL, false, t0).is_some());
    }

    #[test]
    fn no_tracking_without_keys() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();

        let out = r.on_packet_received(
            EPOCH_APPLICATION,
            0,
            true,
            false,
            &mut host,
            t0,
            "test",
        );

        assert_eq!(out, None);
        assert_eq!(r.generate_ack(EPOCH_APPLICATION, false, t0), None);
        assert_eq!(host.wakeups, 0);
    }

    #[test]
    fn in_flight_accounting() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();

        send_stream_pkts(&mut r, EPOCH_HANDSHAKE, 0..2, 300, t0);
        send_stream_pkts(&mut r, EPOCH_APPLICATION, 0..4, MDS, t0);

        assert_eq!(r.bytes_in_flight(), flight_bytes(&r));

        // Acks 1..=2; 0 stays short of the packet threshold.
        let t1 = t0 + Duration::from_millis(10);
        r.on_ack_received(EPOCH_APPLICATION, 2, 1, 0, &[], &mut host, t1, "test")
            .unwrap();

        assert_eq!(r.bytes_in_flight(), flight_bytes(&r));
        assert_eq!(r.bytes_in_flight(), 2 * 300 + 2 * MDS);
    }

    #[test]
    fn discard_space() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();

        send_stream_pkts(&mut r, EPOCH_HANDSHAKE, 0..3, 300, t0);
        r.on_packet_received(EPOCH_HANDSHAKE, 0, true, true, &mut host, t0, "test");

        let cwnd = r.cwnd();

        r.discard(EPOCH_HANDSHAKE, t0);

        assert!(r.sent[EPOCH_HANDSHAKE].is_empty());
        assert_eq!(r.bytes_in_flight(), 0);
        assert_eq!(r.cwnd(), cwnd);
        assert_eq!(r.generate_ack(EPOCH_HANDSHAKE, false, t0), None);
        assert_eq!(r.timer, None);
    }

    #[test]
    fn congestion_accounting_reset() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();

        send_stream_pkts(&mut r, EPOCH_APPLICATION, 0..2, MDS, t0);
        assert_eq!(r.bytes_in_flight(), 2 * MDS);

        r.reset_congestion_accounting(EPOCH_APPLICATION);
        assert_eq!(r.bytes_in_flight(), 0);

        let cwnd = r.cwnd();

        // Packets from before the reset no longer feed the controller.
        let t1 = t0 + Duration::from_millis(10);
        r.on_ack_received(EPOCH_APPLICATION, 1, 1, 0, &[], &mut host, t1, "test")
            .unwrap();

        assert_eq!(r.cwnd(), cwnd);
        assert_eq!(r.bytes_in_flight(), 0);
    }

    #[test]
    fn closing_suppresses_wakeups() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();

        r.on_closing();

        r.on_packet_received(EPOCH_APPLICATION, 0, true, true, &mut host, t0, "test");
        assert_eq!(host.wakeups, 0);

        // No delayed-ACK timer is armed while closing either.
        assert_eq!(r.generate_ack(EPOCH_APPLICATION, false, t0), None);
        assert_eq!(r.ack_timeout(), None);
    }

    #[test]
    fn loss_timer_takes_precedence() {
        let t0 = Instant::now();
        let mut r = new_recovery();
        let mut host = TestHost::default();

        send_stream_pkts(&mut r, EPOCH_APPLICATION, 0..3, MDS, t0);

        // Acking packet 2 leaves 0 and 1 eligible for the loss timer.
        let t1 = t0 + Duration::from_millis(10);
        r.on_ack_received(EPOCH_APPLICATION, 2, 0, 0, &[], &mut host, t1, "test")
            .unwrap();

        match r.timer {
            Some((_, TimerKind::Loss)) => (),
            other => panic!("expected loss timer, got {other:?}"),
        }
    }
}
