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

/// A specialized [`Result`] type for loss recovery operations.
///
/// [`Result`]: https://doc.rust-lang.org/std/result/enum.Result.html
pub type Result<T> = std::result::Result<T, Error>;

/// A loss recovery error.
///
/// Errors returned by [`Recovery`] operations are fatal to the connection:
/// the caller is expected to close it with the wire code returned by
/// [`to_wire()`].
///
/// [`Recovery`]: crate::recovery::Recovery
/// [`to_wire()`]: Error::to_wire
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The peer sent an ACK frame with an invalid first range or an
    /// acknowledgment range that would yield a negative packet number.
    InvalidAckRange,

    /// The peer acknowledged a packet number that was never sent in the
    /// frame's packet number space.
    UnknownPacket,

    /// A probe packet could not be allocated or handed to the transport.
    OutOfMemory,
}

/// QUIC transport error codes sent on the wire.
///
/// As defined in [RFC9000](https://www.rfc-editor.org/rfc/rfc9000.html#name-error-codes).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WireErrorCode {
    /// The endpoint encountered an internal error and cannot continue with
    /// the connection.
    InternalError      = 0x1,
    /// An endpoint received a frame that was badly formatted.
    FrameEncodingError = 0x7,
    /// An endpoint detected an error with protocol compliance that was not
    /// covered by more specific error codes.
    ProtocolViolation  = 0xa,
}

impl Error {
    /// Returns the error code to place in a CONNECTION_CLOSE frame.
    pub fn to_wire(self) -> u64 {
        match self {
            Error::InvalidAckRange => WireErrorCode::FrameEncodingError as u64,
            Error::UnknownPacket => WireErrorCode::ProtocolViolation as u64,
            Error::OutOfMemory => WireErrorCode::InternalError as u64,
        }
    }

    /// Returns the frame type the error is attributed to, if any.
    ///
    /// Peer-triggered errors are attributed to the ACK frame type (0x02) so
    /// the caller can fill the CONNECTION_CLOSE frame type field.
    pub fn frame_type(self) -> Option<u64> {
        match self {
            Error::InvalidAckRange | Error::UnknownPacket => Some(0x02),
            Error::OutOfMemory => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::InvalidAckRange => write!(f, "invalid range in ack frame"),
            Error::UnknownPacket => write!(f, "unknown packet number"),
            Error::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

impl std::error::Error for Error {}
