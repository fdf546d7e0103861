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

//! Transport layer of the GDB remote serial protocol, and a link latency
//! benchmark built on top of it.
//!
//! This crate provides a `Session` that frames, checksums and escapes
//! packets, reassembles replies from a fragmented byte stream and handles the
//! `+`/`-` acknowledgment handshake, including switching it off with
//! `QStartNoAckMode`. It uses the futures crate `AsyncRead` and `AsyncWrite`
//! traits for I/O to abstract the underlying transport.
//!
//! Requests are lock-step: one packet in flight per session. To measure
//! several targets at once, run one session per target.
//!
//! # Example
//!
//! ```
//! use rsp_latency::{Session, SessionConfig};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = Session::connect("localhost:1234", &SessionConfig::default()).await?;
//!     session.negotiate_no_ack().await?;
//!
//!     let latency = session.speed_test(32, 512).await?;
//!     println!("round trip: {latency:?}");
//!
//!     Ok(())
//! }
//! ```

pub mod assembler;
pub mod codec;
pub mod command;
pub mod config;
mod error;
pub mod harness;
mod packet;
pub mod session;
pub mod stub;

pub use assembler::{ParseOutcome, StreamAssembler};
pub use codec::ControlByte;
pub use command::{Command, Reply};
pub use config::{BenchmarkConfig, Config, SessionConfig};
pub use error::{DecodeError, Error, InvalidPacket, InvalidPacketKind, Result};
pub use packet::Packet;
pub use session::{AckMode, Session, TcpSession};
