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

//! Stateless framing primitives for the GDB remote serial protocol.
//!
//! A data packet travels as `$<escaped payload>#<checksum>`, where the
//! checksum is two lowercase hex digits holding the sum of the unescaped
//! payload bytes modulo 256. The three control bytes (`+`, `-` and `0x03`)
//! travel bare.

use crate::error::{DecodeError, InvalidPacketKind};

pub const PACKET_START: u8 = b'$';
pub const PACKET_END: u8 = b'#';
pub const ESCAPE: u8 = b'}';
const ESCAPE_XOR: u8 = 0x20;

/// Whether packets are acknowledged with `+`/`-` and checksums verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    Enabled,
    Disabled,
}

/// Single byte packets which are never framed, escaped or checksummed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlByte {
    /// `+`
    Ack,
    /// `-`
    Nack,
    /// `0x03`
    Interrupt,
}

impl ControlByte {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'+' => Some(Self::Ack),
            b'-' => Some(Self::Nack),
            0x03 => Some(Self::Interrupt),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Ack => b'+',
            Self::Nack => b'-',
            Self::Interrupt => 0x03,
        }
    }
}

/// Calculates the GDB checksum for the given data.
///
/// The checksum is the sum of all bytes modulo 256.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, &x| acc.wrapping_add(x))
}

fn needs_escape(byte: u8) -> bool {
    matches!(byte, PACKET_START | PACKET_END | ESCAPE)
}

/// Escapes `$`, `#` and `}` as `}` followed by the byte XOR 0x20.
pub fn escape(payload: &[u8]) -> Vec<u8> {
    let extra = payload.iter().filter(|&&b| needs_escape(b)).count();
    let mut out = Vec::with_capacity(payload.len() + extra);
    for &byte in payload {
        if needs_escape(byte) {
            out.push(ESCAPE);
            out.push(byte ^ ESCAPE_XOR);
        } else {
            out.push(byte);
        }
    }
    out
}

/// Reverses [`escape`].
///
/// A `}` in the final position has nothing to modify and is kept as is.
pub fn unescape(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    let mut bytes = payload.iter();
    while let Some(&byte) = bytes.next() {
        if byte == ESCAPE {
            match bytes.next() {
                Some(&escaped) => out.push(escaped ^ ESCAPE_XOR),
                None => out.push(ESCAPE),
            }
        } else {
            out.push(byte);
        }
    }
    out
}

/// Frames a payload for the wire.
///
/// Control bytes are returned untouched; everything else becomes
/// `$<escaped payload>#<checksum>`.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    if matches!(payload, [byte] if ControlByte::from_byte(*byte).is_some()) {
        return payload.to_vec();
    }
    let escaped = escape(payload);
    let mut out = Vec::with_capacity(escaped.len() + 4);
    out.push(PACKET_START);
    out.extend_from_slice(&escaped);
    out.push(PACKET_END);
    out.extend_from_slice(format!("{:02x}", checksum(payload)).as_bytes());
    out
}

/// Parses the two checksum digits that follow `#`.
pub fn parse_checksum(digits: [u8; 2]) -> Option<u8> {
    let mut out = [0u8; 1];
    hex::decode_to_slice(digits, &mut out).ok()?;
    Some(out[0])
}

/// Recovers the payload from exactly one framed packet.
///
/// This is the inverse of [`frame`] for a buffer that holds a single
/// complete packet. The checksum is always verified.
pub fn unframe(frame: &[u8]) -> Result<Vec<u8>, InvalidPacketKind> {
    let (&first, rest) = frame.split_first().ok_or(InvalidPacketKind::Incomplete)?;
    if ControlByte::from_byte(first).is_some() {
        return match rest.len() {
            0 => Ok(vec![first]),
            n => Err(InvalidPacketKind::TrailingBytes(n)),
        };
    }
    if first != PACKET_START {
        return Err(InvalidPacketKind::UnexpectedLeadingByte(first));
    }
    let end = rest
        .iter()
        .position(|&b| b == PACKET_END)
        .ok_or(InvalidPacketKind::Incomplete)?;
    let (escaped, trailer) = rest.split_at(end);
    let digits: [u8; 2] = match trailer.get(1..3) {
        Some(&[a, b]) => [a, b],
        _ => return Err(InvalidPacketKind::Incomplete),
    };
    if trailer.len() > 3 {
        return Err(InvalidPacketKind::TrailingBytes(trailer.len() - 3));
    }
    let received = parse_checksum(digits).ok_or(InvalidPacketKind::MalformedChecksum(digits))?;
    let payload = unescape(escaped);
    let computed = checksum(&payload);
    if received != computed {
        return Err(InvalidPacketKind::ChecksumMismatch { received, computed });
    }
    Ok(payload)
}

/// Encodes bytes as lowercase hex digit pairs.
pub fn hex_encode(data: &[u8]) -> String {
    hex::encode(data)
}

/// Decodes hex digit pairs into bytes.
pub fn hex_decode(data: impl AsRef<[u8]>) -> Result<Vec<u8>, DecodeError> {
    Ok(hex::decode(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        assert_eq!(checksum(b""), 0);
        assert_eq!(checksum(b"OK"), 0x9a);
        assert_eq!(checksum(b"test"), 0xc0);
        assert_eq!(checksum(b"QStartNoAckMode"), 0xb0);
        assert_eq!(checksum(&[0xff, 0x02]), 0x01);
    }

    #[test]
    fn test_checksum_ignores_order() {
        let payload = b"qSpeedTest:response_size:32;";
        let mut reversed = payload.to_vec();
        reversed.reverse();
        let mut sorted = payload.to_vec();
        sorted.sort_unstable();
        assert_eq!(checksum(payload), checksum(&reversed));
        assert_eq!(checksum(payload), checksum(&sorted));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape(b"a$b#c}d"), b"a}\x04b}\x03c}]d");
        assert_eq!(escape(b"plain"), b"plain");
    }

    #[test]
    fn test_escape_leaves_no_reserved_bytes() {
        let payload = b"$$##}}x$";
        let escaped = escape(payload);
        let mut i = 0;
        while i < escaped.len() {
            if escaped[i] == ESCAPE {
                assert!(!needs_escape(escaped[i + 1]));
                i += 2;
                continue;
            }
            assert!(!matches!(escaped[i], PACKET_START | PACKET_END));
            i += 1;
        }
        assert_eq!(unescape(&escaped), payload);
    }

    #[test]
    fn test_unescape_trailing_escape_byte() {
        assert_eq!(unescape(b"ab}"), b"ab}");
    }

    #[test]
    fn test_frame() {
        assert_eq!(frame(b"OK"), b"$OK#9a");
        assert_eq!(frame(b""), b"$#00");
        assert_eq!(frame(b"m1000,4"), b"$m1000,4#8e");
        // The checksum covers the payload before escaping.
        assert_eq!(frame(b"#"), b"$}\x03#23");
    }

    #[test]
    fn test_frame_control_bytes_untouched() {
        assert_eq!(frame(b"+"), b"+");
        assert_eq!(frame(b"-"), b"-");
        assert_eq!(frame(b"\x03"), b"\x03");
        // Only a lone control byte is exempt.
        assert_eq!(frame(b"++"), b"$++#56");
    }

    #[test]
    fn test_unframe_inverts_frame() {
        let payloads: [&[u8]; 5] = [b"", b"OK", b"a$b#c}d", b"}}}", &[0x00, 0xff, 0x7d, 0x80]];
        for payload in payloads {
            assert_eq!(unframe(&frame(payload)).unwrap(), payload);
        }
    }

    #[test]
    fn test_unframe_errors() {
        assert_eq!(
            unframe(b"xOK#9a"),
            Err(InvalidPacketKind::UnexpectedLeadingByte(b'x'))
        );
        assert_eq!(unframe(b"$OK"), Err(InvalidPacketKind::Incomplete));
        assert_eq!(unframe(b"$OK#9"), Err(InvalidPacketKind::Incomplete));
        assert_eq!(
            unframe(b"$OK#zz"),
            Err(InvalidPacketKind::MalformedChecksum(*b"zz"))
        );
        assert_eq!(
            unframe(b"$OK#9b"),
            Err(InvalidPacketKind::ChecksumMismatch {
                received: 0x9b,
                computed: 0x9a
            })
        );
        assert_eq!(unframe(b"$OK#9a+"), Err(InvalidPacketKind::TrailingBytes(1)));
    }

    #[test]
    fn test_parse_checksum() {
        assert_eq!(parse_checksum(*b"9a"), Some(0x9a));
        assert_eq!(parse_checksum(*b"9A"), Some(0x9a));
        assert_eq!(parse_checksum(*b"+1"), None);
        assert_eq!(parse_checksum(*b"g0"), None);
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex_encode(&[0xde, 0xca, 0xfb, 0xad]), "decafbad");
        assert_eq!(hex_decode("decafbad").unwrap(), [0xde, 0xca, 0xfb, 0xad]);
        assert!(hex_decode("abc").is_err());
        assert!(hex_decode("zz").is_err());
    }
}
