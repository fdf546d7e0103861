// Copyright 2025 The Pigweed Authors
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License. You may obtain a copy of
// the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied. See the
// License for the specific language governing permissions and limitations under
// the License.

//! Error types for the RSP transport.

use core::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::command::Reply;
use crate::packet::Packet;

/// Hex decoding failed.
#[derive(Debug, Error, PartialEq)]
#[error("hex decode error: {0}")]
pub struct DecodeError(#[from] pub hex::FromHexError);

/// The specific way in which received bytes violated the framing rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidPacketKind {
    /// A packet started with something other than `$` or a control byte.
    UnexpectedLeadingByte(u8),
    /// The two bytes after `#` are not hex digits.
    MalformedChecksum([u8; 2]),
    /// The checksum field does not match the payload.
    ChecksumMismatch { received: u8, computed: u8 },
    /// The frame ended before the `#xx` trailer.
    Incomplete,
    /// Bytes follow the checksum of a single framed packet.
    TrailingBytes(usize),
    /// A data packet grew past the given limit before it was terminated.
    TooLong(usize),
}

impl fmt::Display for InvalidPacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedLeadingByte(byte) => {
                write!(f, "unexpected leading byte 0x{byte:02x}")
            }
            Self::MalformedChecksum(digits) => {
                write!(f, "malformed checksum \"{}\"", digits.escape_ascii())
            }
            Self::ChecksumMismatch { received, computed } => write!(
                f,
                "checksum {received:02x} does not match content {computed:02x}"
            ),
            Self::Incomplete => f.write_str("incomplete frame"),
            Self::TrailingBytes(count) => write!(f, "{count} bytes after checksum"),
            Self::TooLong(limit) => write!(f, "packet longer than {limit} bytes"),
        }
    }
}

/// A protocol violation detected while parsing the receive stream.
///
/// Carries the unparsed buffer and the scan cursor at the time of the
/// failure so that the offending input can be inspected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid packet: {kind} (cursor {cursor}, buffer \"{}\")", .buffer.escape_ascii())]
pub struct InvalidPacket {
    pub kind: InvalidPacketKind,
    pub buffer: Vec<u8>,
    pub cursor: usize,
}

/// Errors surfaced by a [`Session`](crate::Session).
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    InvalidPacket(#[from] InvalidPacket),

    /// Expected an ACK and got something else.
    #[error("handshake failed: expected ACK, received {received}")]
    Handshake { received: Packet },

    /// A control byte arrived where a reply was expected.
    #[error("unexpected {0} in place of a reply")]
    UnexpectedPacket(Packet),

    /// A well formed reply that does not answer the request, such as the
    /// empty reply of a peer without `qSpeedTest` support.
    #[error("unexpected reply {0:?}")]
    UnexpectedReply(Reply),

    #[error("no data received within {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    ConnectionClosed,

    /// The peer answered with an `Exx` error reply.
    #[error("remote error E{0:02x}")]
    Remote(u8),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns true if the error ends the session.
    ///
    /// Timeouts, hex decode failures and error or unexpected replies leave
    /// the connection usable; the caller decides whether to carry on.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Timeout(_) | Self::Decode(_) | Self::Remote(_) | Self::UnexpectedReply(_)
        )
    }
}

pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ControlByte;

    #[test]
    fn test_fatal_classification() {
        assert!(!Error::Timeout(Duration::from_secs(2)).is_fatal());
        assert!(!Error::Remote(0x01).is_fatal());
        assert!(!Error::UnexpectedReply(Reply::Unsupported).is_fatal());
        assert!(Error::ConnectionClosed.is_fatal());
        assert!(
            Error::Handshake {
                received: Packet::Control(ControlByte::Nack)
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_invalid_packet_display() {
        let err = InvalidPacket {
            kind: InvalidPacketKind::ChecksumMismatch {
                received: 0x12,
                computed: 0xc0,
            },
            buffer: b"$test#12".to_vec(),
            cursor: 5,
        };
        assert_eq!(
            err.to_string(),
            "invalid packet: checksum 12 does not match content c0 (cursor 5, buffer \"$test#12\")"
        );
    }
}
