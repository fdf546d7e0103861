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

//! Incremental packet parser for a fragmented receive stream.
//!
//! Bytes are appended as they arrive from the transport and complete packets
//! are pulled out one at a time. The parser has two states, both encoded in
//! the scan cursor:
//!
//! - `cursor == 0`: looking at the start of the buffer for a control byte or
//!   a `$`.
//! - `cursor > 0`: inside a data packet, looking for the `#` terminator.
//!   The cursor marks how far the search got, so a packet arriving in many
//!   small pieces is only scanned once.

use bytes::{Buf, BytesMut};

use crate::codec::{self, AckMode, ControlByte, PACKET_END, PACKET_START};
use crate::error::{InvalidPacket, InvalidPacketKind};
use crate::packet::Packet;

const INITIAL_CAPACITY: usize = 4 * 1024;

/// Default limit on the length of one framed data packet. Comfortably above
/// the largest speed test reply the stub sends, even fully escaped.
pub const DEFAULT_MAX_PACKET_LEN: usize = 4 * 1024 * 1024;

/// Length of the `#xx` trailer.
const TRAILER_LEN: usize = 3;

/// Result of asking the assembler for the next packet.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseOutcome {
    Packet(Packet),
    /// The buffer does not yet hold a complete packet.
    NeedMore,
}

/// Reassembles packets from bytes delivered in arbitrary chunks.
///
/// A parse failure is not recoverable: the buffer is left as it was so the
/// failure can be reported, and every later call fails the same way.
#[derive(Debug)]
pub struct StreamAssembler {
    buffer: BytesMut,
    cursor: usize,
    max_packet_len: usize,
}

impl Default for StreamAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::with_max_packet_len(DEFAULT_MAX_PACKET_LEN)
    }

    /// Creates an assembler that rejects data packets longer than
    /// `max_packet_len` bytes on the wire, framing included.
    pub fn with_max_packet_len(max_packet_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY.min(max_packet_len)),
            cursor: 0,
            max_packet_len,
        }
    }

    /// Appends received bytes without parsing them.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Appends `chunk` and tries to extract one packet.
    pub fn feed(&mut self, chunk: &[u8], mode: AckMode) -> Result<ParseOutcome, InvalidPacket> {
        self.extend(chunk);
        self.next_packet(mode)
    }

    /// Extracts the next complete packet from the buffered bytes.
    ///
    /// Checksums are only verified while `mode` is [`AckMode::Enabled`].
    /// Call repeatedly until [`ParseOutcome::NeedMore`] to drain a buffer
    /// holding several packets.
    pub fn next_packet(&mut self, mode: AckMode) -> Result<ParseOutcome, InvalidPacket> {
        if self.buffer.is_empty() {
            return Ok(ParseOutcome::NeedMore);
        }

        if self.cursor == 0 {
            let first = self.buffer[0];
            if let Some(control) = ControlByte::from_byte(first) {
                self.buffer.advance(1);
                return Ok(ParseOutcome::Packet(Packet::Control(control)));
            }
            if first != PACKET_START {
                return Err(self.invalid(InvalidPacketKind::UnexpectedLeadingByte(first)));
            }
            self.cursor = 1;
        }

        // Pick up the search for '#' where the previous call left off.
        let end = match self.buffer[self.cursor..]
            .iter()
            .position(|&b| b == PACKET_END)
        {
            Some(offset) => self.cursor + offset,
            None => {
                self.cursor = self.buffer.len();
                return self.check_len(self.cursor).map(|()| ParseOutcome::NeedMore);
            }
        };
        self.cursor = end;
        self.check_len(end + TRAILER_LEN)?;
        if self.buffer.len() < end + TRAILER_LEN {
            return Ok(ParseOutcome::NeedMore);
        }

        let digits = [self.buffer[end + 1], self.buffer[end + 2]];
        let received = codec::parse_checksum(digits)
            .ok_or_else(|| self.invalid(InvalidPacketKind::MalformedChecksum(digits)))?;
        let payload = codec::unescape(&self.buffer[1..end]);
        if mode == AckMode::Enabled {
            let computed = codec::checksum(&payload);
            if received != computed {
                return Err(
                    self.invalid(InvalidPacketKind::ChecksumMismatch { received, computed })
                );
            }
        }

        self.buffer.advance(end + TRAILER_LEN);
        self.cursor = 0;
        Ok(ParseOutcome::Packet(Packet::Data(payload)))
    }

    /// Number of bytes received but not yet returned as packets.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Fails once a data packet in progress is known to be at least `len`
    /// bytes long and that exceeds the limit.
    fn check_len(&self, len: usize) -> Result<(), InvalidPacket> {
        if len > self.max_packet_len {
            return Err(self.invalid(InvalidPacketKind::TooLong(self.max_packet_len)));
        }
        Ok(())
    }

    fn invalid(&self, kind: InvalidPacketKind) -> InvalidPacket {
        InvalidPacket {
            kind,
            buffer: self.buffer.to_vec(),
            cursor: self.cursor,
        }
    }
}
