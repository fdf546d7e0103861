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

use nom::branch::alt;
use nom::bytes::complete::{tag, take};
use nom::character::complete::digit1;
use nom::combinator::{all_consuming, map, map_opt, rest, value};
use nom::sequence::{preceded, separated_pair};
use nom::{IResult, Parser};

use crate::codec;

/// Byte used to pad the data field of a speed test request.
pub const SPEED_TEST_FILLER: u8 = b's';

/// Byte used to pad the data field of a speed test reply.
pub const SPEED_TEST_REPLY_FILLER: u8 = b'r';

/// A request sent to the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Asks the remote side to stop acknowledging packets.
    ///
    /// Format: `QStartNoAckMode`
    StartNoAckMode,
    /// Asks the remote side to answer with `response_size` bytes of data.
    ///
    /// Format: `qSpeedTest:response_size:<decimal>;data:<bytes>`
    SpeedTest { response_size: usize, data: Vec<u8> },
}

impl Command {
    /// Builds a speed test request carrying `send_size` filler bytes.
    pub fn speed_test(send_size: usize, recv_size: usize) -> Self {
        Command::SpeedTest {
            response_size: recv_size,
            data: vec![SPEED_TEST_FILLER; send_size],
        }
    }

    /// Encodes the command into its payload bytes (without framing).
    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Command::StartNoAckMode => b"QStartNoAckMode".to_vec(),
            Command::SpeedTest {
                response_size,
                data,
            } => {
                let mut payload = format!("qSpeedTest:response_size:{response_size};data:")
                    .into_bytes();
                payload.extend_from_slice(data);
                payload
            }
        }
    }

    /// Encodes the command with GDB framing.
    ///
    /// Format: `$<payload>#<checksum>`
    pub fn encode(&self) -> Vec<u8> {
        codec::frame(&self.encode_payload())
    }

    /// Decodes a command from its payload bytes (without framing).
    pub fn decode_payload(input: &[u8]) -> IResult<&[u8], Command> {
        alt((
            value(Command::StartNoAckMode, all_consuming(tag("QStartNoAckMode"))),
            map(parse_speed_test, |(response_size, data)| Command::SpeedTest {
                response_size,
                data: data.to_vec(),
            }),
        ))
        .parse(input)
    }
}

fn parse_speed_test(input: &[u8]) -> IResult<&[u8], (usize, &[u8])> {
    preceded(
        tag("qSpeedTest:response_size:"),
        separated_pair(map_opt(digit1, parse_decimal), tag(";data:"), rest),
    )
    .parse(input)
}

fn parse_decimal(digits: &[u8]) -> Option<usize> {
    digits.iter().try_fold(0usize, |acc, &d| {
        acc.checked_mul(10)?.checked_add(usize::from(d - b'0'))
    })
}

/// A response received from the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Format: `OK`
    Ok,
    /// The empty packet, sent for commands the remote does not know.
    Unsupported,
    /// Format: `E<two hex digits>`
    Error(u8),
    /// Format: `data:<bytes>`
    SpeedTest(Vec<u8>),
    /// Anything else.
    Other(Vec<u8>),
}

impl Reply {
    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Reply::Ok => b"OK".to_vec(),
            Reply::Unsupported => Vec::new(),
            Reply::Error(code) => format!("E{code:02x}").into_bytes(),
            Reply::SpeedTest(data) => {
                let mut payload = b"data:".to_vec();
                payload.extend_from_slice(data);
                payload
            }
            Reply::Other(payload) => payload.clone(),
        }
    }

    /// Classifies a reply payload. Never fails; unrecognized payloads come
    /// back as [`Reply::Other`].
    pub fn decode_payload(input: &[u8]) -> Reply {
        if input.is_empty() {
            return Reply::Unsupported;
        }
        let parsed: IResult<&[u8], Reply> = alt((
            value(Reply::Ok, all_consuming(tag("OK"))),
            map(
                all_consuming(preceded(tag("E"), map_opt(take(2usize), parse_hex_byte))),
                Reply::Error,
            ),
            map(preceded(tag("data:"), rest), |data: &[u8]| {
                Reply::SpeedTest(data.to_vec())
            }),
        ))
        .parse(input);
        match parsed {
            Ok((_, reply)) => reply,
            Err(_) => Reply::Other(input.to_vec()),
        }
    }
}

fn parse_hex_byte(digits: &[u8]) -> Option<u8> {
    match digits {
        &[a, b] => codec::parse_checksum([a, b]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_speed_test() {
        let command = Command::speed_test(4, 32);
        assert_eq!(
            command.encode_payload(),
            b"qSpeedTest:response_size:32;data:ssss"
        );
        assert_eq!(
            Command::speed_test(0, 0).encode_payload(),
            b"qSpeedTest:response_size:0;data:"
        );
    }

    #[test]
    fn test_encode_start_no_ack_mode() {
        assert_eq!(Command::StartNoAckMode.encode(), b"$QStartNoAckMode#b0");
    }

    #[test]
    fn test_decode_speed_test() {
        let (rem, command) =
            Command::decode_payload(b"qSpeedTest:response_size:512;data:ss$s").unwrap();
        assert!(rem.is_empty());
        assert_eq!(
            command,
            Command::SpeedTest {
                response_size: 512,
                data: b"ss$s".to_vec()
            }
        );
    }

    #[test]
    fn test_decode_start_no_ack_mode() {
        let (_, command) = Command::decode_payload(b"QStartNoAckMode").unwrap();
        assert_eq!(command, Command::StartNoAckMode);
    }

    #[test]
    fn test_decode_rejects_unknown() {
        assert!(Command::decode_payload(b"QStartNoAckModeX").is_err());
        assert!(Command::decode_payload(b"qSpeedTest:response_size:x;data:").is_err());
        assert!(Command::decode_payload(b"qSpeedTest:response_size:1").is_err());
        assert!(Command::decode_payload(b"m1000,4").is_err());
    }

    #[test]
    fn test_decode_reply() {
        assert_eq!(Reply::decode_payload(b"OK"), Reply::Ok);
        assert_eq!(Reply::decode_payload(b""), Reply::Unsupported);
        assert_eq!(Reply::decode_payload(b"E0a"), Reply::Error(0x0a));
        assert_eq!(
            Reply::decode_payload(b"data:rrr"),
            Reply::SpeedTest(b"rrr".to_vec())
        );
        assert_eq!(Reply::decode_payload(b"data:"), Reply::SpeedTest(Vec::new()));
        assert_eq!(Reply::decode_payload(b"OKAY"), Reply::Other(b"OKAY".to_vec()));
        assert_eq!(Reply::decode_payload(b"E0"), Reply::Other(b"E0".to_vec()));
        assert_eq!(Reply::decode_payload(b"E0a1"), Reply::Other(b"E0a1".to_vec()));
    }

    #[test]
    fn test_encode_reply() {
        assert_eq!(Reply::Ok.encode_payload(), b"OK");
        assert_eq!(Reply::Error(0x1f).encode_payload(), b"E1f");
        assert_eq!(Reply::SpeedTest(b"rr".to_vec()).encode_payload(), b"data:rr");
        assert!(Reply::Unsupported.encode_payload().is_empty());
    }
}
