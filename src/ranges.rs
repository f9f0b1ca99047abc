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

use std::ops::RangeInclusive;

use std::time::Instant;

use smallvec::SmallVec;

use crate::frame;

/// Maximum number of tracked ranges below the leading one. Receiving a packet
/// that would need one more forces an ACK out instead of growing the table.
pub const MAX_RANGES: usize = 16;

/// Number of outstanding ack-eliciting packets that forces an immediate ACK.
/// Out-of-order receipt raises the outstanding count straight to this value.
pub const MAX_ACK_GAP: u64 = 2;

/// A `(gap, range)` pair in RFC 9000 §19.3.1 encoding.
///
/// Walking down from the range above it: `largest = smallest_above - gap - 2`
/// and `smallest = largest - range`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AckRange {
    pub gap: u64,
    pub range: u64,
}

/// Received packet numbers pending acknowledgment, in ACK frame encoding.
///
/// The leading range is `largest - first_range ..= largest`; `ranges` holds
/// up to [`MAX_RANGES`] gap-encoded ranges below it, largest first. The table
/// never reallocates: when an insertion would need a slot that isn't there,
/// the pending acknowledgment is flushed and the oldest range is dropped.
#[derive(Debug)]
pub struct AckRanges {
    pub(crate) largest: Option<u64>,

    pub(crate) largest_received: Option<Instant>,

    pub(crate) first_range: u64,

    pub(crate) ranges: SmallVec<[AckRange; MAX_RANGES]>,

    /// Largest packet number still awaiting an ACK emission.
    pub(crate) pending_ack: Option<u64>,

    /// Ack-eliciting packets received since the last ACK went out.
    pub(crate) send_ack: u64,

    /// When the oldest outstanding ack-eliciting packet arrived.
    pub(crate) ack_delay_start: Option<Instant>,
}

impl AckRanges {
    pub fn new() -> AckRanges {
        AckRanges {
            largest: None,
            largest_received: None,
            first_range: 0,
            ranges: SmallVec::new(),
            pending_ack: None,
            send_ack: 0,
            ack_delay_start: None,
        }
    }

    /// Records a received packet number.
    ///
    /// Returns an ACK frame when the insertion forced one out: either the
    /// accumulated acknowledgment had to be flushed to make room in the
    /// table, or the packet is older than everything tracked and gets a
    /// one-off `[pn, pn]` acknowledgment. The caller queues the returned
    /// frame for transmission.
    pub fn on_packet_received(
        &mut self, pn: u64, need_ack: bool, now: Instant,
        ack_delay_exponent: u64,
    ) -> Option<frame::Frame> {
        let mut out = None;

        let prev_pending = self.pending_ack;

        if need_ack {
            if self.send_ack == 0 {
                self.ack_delay_start = Some(now);
            }

            self.send_ack += 1;

            if self.pending_ack.map_or(true, |p| p < pn) {
                self.pending_ack = Some(pn);
            }
        }

        let base = match self.largest {
            Some(v) => v,

            None => {
                self.largest = Some(pn);
                self.largest_received = Some(now);
                return None;
            },
        };

        if base == pn {
            return None;
        }

        let mut largest = base;
        let mut smallest = largest - self.first_range;

        if pn > base {
            if pn - base == 1 {
                self.first_range += 1;
                self.largest = Some(pn);
                self.largest_received = Some(now);

                return None;
            }

            // A new gap forms in front of the current leading range. If
            // there is no room for one more entry, flush the acknowledgment
            // built so far before the oldest range is dropped.
            if self.ranges.len() == MAX_RANGES {
                if prev_pending.is_some() {
                    out = self.build(now, ack_delay_exponent);
                }

                if prev_pending == self.pending_ack || !need_ack {
                    self.pending_ack = None;
                }
            }

            let gap = pn - base - 2;
            let range = self.first_range;

            self.first_range = 0;
            self.largest = Some(pn);
            self.largest_received = Some(now);

            // Packet is out of order, force an ACK out.
            if need_ack {
                self.send_ack = MAX_ACK_GAP;
            }

            self.insert_at(0, gap, range);

            return out;
        }

        // pn < base, look it up in the tracked ranges.

        // Packet is out of order.
        if need_ack {
            self.send_ack = MAX_ACK_GAP;
        }

        if pn >= smallest {
            return out;
        }

        for i in 0..self.ranges.len() {
            let ge = smallest - 1;
            let gs = ge - self.ranges[i].gap;

            if pn >= gs && pn <= ge {
                if gs == ge {
                    // The gap is exactly one packet and is now filled: the
                    // two adjacent ranges merge into one.
                    let merged = self.ranges[i].range + 2;

                    if i == 0 {
                        self.first_range += merged;
                    } else {
                        self.ranges[i - 1].range += merged;
                    }

                    self.ranges.remove(i);
                } else if pn == gs {
                    // The gap shrinks from the tail, this range grows.
                    self.ranges[i].gap -= 1;
                    self.ranges[i].range += 1;
                } else if pn == ge {
                    // The gap shrinks from the head, the range above grows.
                    self.ranges[i].gap -= 1;

                    if i == 0 {
                        self.first_range += 1;
                    } else {
                        self.ranges[i - 1].range += 1;
                    }
                } else {
                    // The gap is split in two by a zero-length range.
                    if self.ranges.len() == MAX_RANGES {
                        if prev_pending.is_some() {
                            out = self.build(now, ack_delay_exponent);
                        }

                        if prev_pending == self.pending_ack || !need_ack {
                            self.pending_ack = None;
                        }
                    }

                    let gap = ge - pn - 1;

                    self.ranges[i].gap = pn - gs - 1;

                    self.insert_at(i, gap, 0);
                }

                return out;
            }

            largest = smallest - self.ranges[i].gap - 2;
            smallest = largest - self.ranges[i].range;

            if pn >= smallest && pn <= largest {
                // Already known.
                return out;
            }
        }

        if smallest > 0 && pn == smallest - 1 {
            // Extends the lowest tracked range downwards.
            match self.ranges.last_mut() {
                Some(r) => r.range += 1,
                None => self.first_range += 1,
            }

            return out;
        }

        if self.ranges.len() == MAX_RANGES {
            // Too old to keep. Acknowledge it alone and forget it.
            if need_ack {
                return Some(frame::Frame::ACK {
                    delay: 0,
                    largest: pn,
                    first_range: 0,
                    ranges: Vec::new(),
                    ecn_counts: None,
                });
            }

            return out;
        }

        let gap = smallest - 2 - pn;

        self.insert_at(self.ranges.len(), gap, 0);

        out
    }

    fn insert_at(&mut self, i: usize, gap: u64, range: u64) {
        if self.ranges.len() == MAX_RANGES {
            self.ranges.pop();
        }

        self.ranges.insert(i, AckRange { gap, range });
    }

    /// Forgets everything at or below `pn`, after the peer acknowledged an
    /// ACK frame whose largest acknowledged was `pn`.
    pub fn drop_ranges(&mut self, pn: u64) {
        let base = match self.largest {
            Some(v) => v,
            None => return,
        };

        if self.pending_ack.map_or(false, |p| pn >= p) {
            self.pending_ack = None;
        }

        let mut largest = base;
        let mut smallest = largest - self.first_range;

        if pn >= largest {
            self.largest = None;
            self.first_range = 0;
            self.ranges.clear();
            return;
        }

        if pn >= smallest {
            self.first_range = largest - pn - 1;
            self.ranges.clear();
            return;
        }

        for i in 0..self.ranges.len() {
            largest = smallest - self.ranges[i].gap - 2;
            smallest = largest - self.ranges[i].range;

            if pn >= largest {
                self.ranges.truncate(i);
                return;
            }

            if pn >= smallest {
                self.ranges[i].range = largest - pn - 1;
                self.ranges.truncate(i + 1);
                return;
            }
        }
    }

    /// Builds an ACK frame from the current table.
    ///
    /// The delay field reflects how long the largest tracked packet has been
    /// waiting, encoded with the local ACK delay exponent.
    pub(crate) fn build(
        &self, now: Instant, ack_delay_exponent: u64,
    ) -> Option<frame::Frame> {
        let largest = self.largest?;

        let delay = match self.largest_received {
            Some(received) =>
                (now.saturating_duration_since(received).as_micros() as u64) >>
                    ack_delay_exponent,

            None => 0,
        };

        Some(frame::Frame::ACK {
            delay,
            largest,
            first_range: self.first_range,
            ranges: self.ranges.to_vec(),
            ecn_counts: None,
        })
    }

    /// Forces the next ACK generation check to emit immediately.
    pub(crate) fn force_ack(&mut self) {
        self.send_ack = MAX_ACK_GAP;
    }

    pub(crate) fn reset(&mut self) {
        *self = AckRanges::new();
    }

    /// Iterates over the tracked ranges, largest first.
    pub fn iter(&self) -> Iter {
        Iter {
            ranges: self.ranges.iter(),
            head: self.largest.map(|l| (l - self.first_range, l)),
            smallest: 0,
        }
    }
}

impl Default for AckRanges {
    fn default() -> AckRanges {
        AckRanges::new()
    }
}

pub struct Iter<'a> {
    ranges: std::slice::Iter<'a, AckRange>,
    head: Option<(u64, u64)>,
    smallest: u64,
}

impl<'a> Iterator for Iter<'a> {
    type Item = RangeInclusive<u64>;

    fn next(&mut self) -> Option<RangeInclusive<u64>> {
        if let Some((lo, hi)) = self.head.take() {
            self.smallest = lo;
            return Some(lo..=hi);
        }

        let r = self.ranges.next()?;

        let hi = self.smallest - r.gap - 2;
        let lo = hi - r.range;

        self.smallest = lo;

        Some(lo..=hi)
    }
}
