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

use std::collections::VecDeque;

use crate::frame;
use crate::ranges;

/// Encryption level of a packet number space.
pub type Epoch = usize;

/// Initial packets.
pub const EPOCH_INITIAL: Epoch = 0;

/// Handshake packets.
pub const EPOCH_HANDSHAKE: Epoch = 1;

/// 0-RTT and 1-RTT packets.
pub const EPOCH_APPLICATION: Epoch = 2;

/// Number of packet number spaces.
pub const EPOCH_COUNT: usize = 3;

pub fn epoch_name(epoch: Epoch) -> &'static str {
    match epoch {
        EPOCH_INITIAL => "init",
        EPOCH_HANDSHAKE => "hs",
        _ => "app",
    }
}

/// Per-encryption-level packet numbering and acknowledgment state.
///
/// The in-flight queue itself lives in [`Recovery`], which iterates all
/// spaces during loss detection.
///
/// [`Recovery`]: crate::recovery::Recovery
pub struct PktNumSpace {
    /// Next packet number to be assigned in this space.
    pub next_pkt_num: u64,

    /// Largest packet number the peer has acknowledged so far.
    pub largest_acked: Option<u64>,

    /// Frames re-queued after loss, waiting to be packetized again.
    pub retransmit: VecDeque<frame::Frame>,

    /// Received packet numbers pending acknowledgment.
    pub acks: ranges::AckRanges,
}

impl PktNumSpace {
    pub fn new() -> PktNumSpace {
        PktNumSpace {
            next_pkt_num: 0,
            largest_acked: None,
            retransmit: VecDeque::new(),
            acks: ranges::AckRanges::new(),
        }
    }
}

impl Default for PktNumSpace {
    fn default() -> PktNumSpace {
        PktNumSpace::new()
    }
}
