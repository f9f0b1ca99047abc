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

//! QUIC loss recovery and congestion control for event-driven servers.
//!
//! This crate implements the sender and receiver sides of QUIC
//! acknowledgment processing as specified by RFC 9002 and RFC 9000 §13/§19.3:
//! tracking packets in flight per encryption level, interpreting received
//! ACK frames, sampling round-trip time, declaring losses by packet and time
//! threshold, driving a NewReno congestion controller, maintaining the
//! receiver-side acknowledgment ranges from which outgoing ACK frames are
//! built, and scheduling the loss-detection and probe timers.
//!
//! It contains no I/O and no clock: the embedding connection passes the
//! current time into every operation and reacts to the deadlines exposed by
//! [`recovery::Recovery::loss_detection_timer()`] and
//! [`recovery::Recovery::ack_timeout()`].
//! Everything loss recovery needs from the rest of the connection (current
//! flow control limits, stream state, probe transmission, send wakeups) is
//! reached through the [`Host`] trait.
//!
//! ## Usage
//!
//! ```no_run
//! use std::time::Instant;
//!
//! use quic_recovery::packet::EPOCH_APPLICATION;
//! use quic_recovery::recovery::Recovery;
//! use quic_recovery::recovery::Sent;
//!
//! struct Connection;
//!
//! impl quic_recovery::Host for Connection {
//!     fn max_data(&self) -> u64 {
//!         1_000_000
//!     }
//!
//!     fn max_streams(&self, _bidi: bool) -> u64 {
//!         100
//!     }
//!
//!     fn max_stream_data(&self, _stream_id: u64) -> Option<u64> {
//!         Some(65_536)
//!     }
//!
//!     fn stream_send_reset(&self, _stream_id: u64) -> bool {
//!         false
//!     }
//!
//!     fn on_stream_acked(&mut self, _frame: &quic_recovery::frame::Frame) {}
//!
//!     fn on_ack_range(&mut self, _min: u64, _max: u64) -> quic_recovery::Result<()> {
//!         Ok(())
//!     }
//!
//!     fn send_probe(
//!         &mut self, _epoch: quic_recovery::packet::Epoch,
//!         _frame: quic_recovery::frame::Frame,
//!     ) -> quic_recovery::Result<()> {
//!         Ok(())
//!     }
//!
//!     fn wakeup_send(&mut self) {}
//! }
//!
//! let mut conn = Connection;
//!
//! let config = quic_recovery::Config::new();
//! let mut recovery = Recovery::new(&config);
//!
//! // Record a packet handed to the transport.
//! let pn = recovery.next_pkt_num(EPOCH_APPLICATION);
//! let frames = smallvec::smallvec![quic_recovery::frame::Frame::Ping];
//! let pkt = Sent::new(pn, frames, 1200, true, false, Instant::now());
//! recovery.on_packet_sent(pkt, EPOCH_APPLICATION, Instant::now(), "conn-1");
//!
//! // Later, feed a decoded ACK frame back in.
//! recovery.on_ack_received(
//!     EPOCH_APPLICATION,
//!     pn,
//!     0,
//!     0,
//!     &[],
//!     &mut conn,
//!     Instant::now(),
//!     "conn-1",
//! )?;
//! # Ok::<(), quic_recovery::Error>(())
//! ```

#[macro_use]
extern crate log;

use std::time::Duration;

pub use crate::error::Error;
pub use crate::error::Result;
pub use crate::error::WireErrorCode;

/// Local settings that shape loss recovery behavior.
pub struct Config {
    pub(crate) max_udp_payload_size: usize,

    pub(crate) max_idle_timeout: Duration,

    pub(crate) ack_delay_exponent: u64,

    pub(crate) max_ack_delay: Duration,
}

impl Config {
    pub fn new() -> Config {
        Config {
            max_udp_payload_size: 1452,
            max_idle_timeout: Duration::from_secs(60),
            ack_delay_exponent: 3,
            max_ack_delay: Duration::from_millis(25),
        }
    }

    /// Sets the maximum outgoing UDP payload size, the unit of congestion
    /// window arithmetic.
    pub fn set_max_udp_payload_size(&mut self, v: usize) {
        self.max_udp_payload_size = v;
    }

    pub fn set_max_idle_timeout(&mut self, v: Duration) {
        self.max_idle_timeout = v;
    }

    /// Sets the exponent used when encoding the delay of outgoing ACKs.
    pub fn set_ack_delay_exponent(&mut self, v: u64) {
        self.ack_delay_exponent = v;
    }

    /// Sets how long outgoing acknowledgments may be batched.
    pub fn set_max_ack_delay(&mut self, v: Duration) {
        self.max_ack_delay = v;
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}

/// Transport parameters advertised by the peer that loss recovery consumes.
#[derive(Clone, Copy, Debug)]
pub struct PeerTransportParams {
    /// Exponent applied to the delay field of the peer's ACK frames.
    pub ack_delay_exponent: u64,

    /// Upper bound on how long the peer delays its acknowledgments.
    pub max_ack_delay: Duration,
}

impl Default for PeerTransportParams {
    fn default() -> PeerTransportParams {
        PeerTransportParams {
            ack_delay_exponent: 3,
            max_ack_delay: Duration::from_millis(25),
        }
    }
}

/// Connection state that loss recovery reads and events it raises, provided
/// by the embedding connection.
///
/// All methods are invoked from within [`Recovery`] operations on the same
/// thread; implementations must not call back into the `Recovery` they were
/// handed to.
///
/// [`Recovery`]: crate::recovery::Recovery
pub trait Host {
    /// Current connection-level flow control limit, used to refresh a lost
    /// MAX_DATA frame.
    fn max_data(&self) -> u64;

    /// Current stream-count limit for the given direction, used to refresh
    /// lost MAX_STREAMS frames.
    fn max_streams(&self, bidi: bool) -> u64;

    /// Current flow control limit of a stream, or `None` when the stream no
    /// longer exists. A lost MAX_STREAM_DATA frame for a gone stream is
    /// dropped instead of re-queued.
    fn max_stream_data(&self, stream_id: u64) -> Option<u64>;

    /// Whether the send side of the stream has been reset (RESET_STREAM sent
    /// or the reset acknowledged). Lost STREAM frames of such streams are
    /// not retransmitted.
    fn stream_send_reset(&self, stream_id: u64) -> bool;

    /// A STREAM or RESET_STREAM frame was fully acknowledged; the stream
    /// layer reclaims the buffered data.
    fn on_stream_acked(&mut self, frame: &frame::Frame);

    /// An acknowledgment range was processed at the application level. Feeds
    /// path MTU discovery, which checks whether its probes fall within
    /// `min..=max`.
    fn on_ack_range(&mut self, min: u64, max: u64) -> Result<()>;

    /// Transmits a probe frame immediately, bypassing the congestion window
    /// gate (the packet is recorded with `ignore_congestion` set). Failure
    /// to allocate or hand off the probe is fatal to the connection.
    fn send_probe(&mut self, epoch: packet::Epoch, frame: frame::Frame)
        -> Result<()>;

    /// The sender may have something to do: frames were re-queued, the
    /// congestion window opened up, or an acknowledgment is pending. Never
    /// invoked once the connection is closing.
    fn wakeup_send(&mut self);
}

mod error;

pub mod frame;
pub mod packet;
pub mod ranges;
pub mod recovery;
