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

use core::fmt;

use crate::codec::{self, ControlByte};

/// A unit received from (or sent to) the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// A bare `+`, `-` or `0x03`.
    Control(ControlByte),
    /// The unescaped payload of a `$...#xx` packet.
    Data(Vec<u8>),
}

impl Packet {
    /// Encodes the packet as it appears on the wire.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Packet::Control(control) => vec![control.as_byte()],
            Packet::Data(payload) => codec::frame(payload),
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Packet::Control(_))
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Packet::Control(ControlByte::Ack) => f.write_str("ACK"),
            Packet::Control(ControlByte::Nack) => f.write_str("NACK"),
            Packet::Control(ControlByte::Interrupt) => f.write_str("INTERRUPT"),
            Packet::Data(payload) => write!(f, "\"{}\"", payload.escape_ascii()),
        }
    }
}
