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

//! A minimal remote stub that answers the commands used by the benchmark.
//!
//! Handy as a loopback baseline: measuring against it shows the cost of the
//! transport alone.

use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{debug, info, trace, warn};

use crate::assembler::{ParseOutcome, StreamAssembler};
use crate::codec::{self, AckMode, ControlByte};
use crate::command::{Command, Reply, SPEED_TEST_REPLY_FILLER};
use crate::error::Result;
use crate::packet::Packet;

/// Largest `response_size` the stub will honour.
pub const MAX_SPEED_TEST_RESPONSE: usize = 1024 * 1024;

/// `EINVAL`, sent back for oversized speed test requests.
const ERROR_INVALID_ARGUMENT: u8 = 0x16;

const READ_CHUNK_SIZE: usize = 4096;

/// Serves a single client connection.
pub struct StubPeer<S> {
    stream: S,
    assembler: StreamAssembler,
    ack_mode: AckMode,
    read_buf: Vec<u8>,
    /// Last framed reply, resent when the client answers with a NACK.
    last_reply: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> StubPeer<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            assembler: StreamAssembler::new(),
            ack_mode: AckMode::Enabled,
            read_buf: vec![0; READ_CHUNK_SIZE],
            last_reply: Vec::new(),
        }
    }

    /// Answers requests until the client hangs up.
    pub async fn serve(mut self) -> Result<()> {
        while let Some(packet) = self.next_packet().await? {
            let payload = match packet {
                Packet::Control(ControlByte::Nack) if self.ack_mode == AckMode::Enabled => {
                    debug!("NACK received, resending last reply");
                    let reply = core::mem::take(&mut self.last_reply);
                    self.write(&reply).await?;
                    self.last_reply = reply;
                    continue;
                }
                Packet::Control(_) => continue,
                Packet::Data(payload) => payload,
            };

            if self.ack_mode == AckMode::Enabled {
                self.write(&[ControlByte::Ack.as_byte()]).await?;
            }

            let command = Command::decode_payload(&payload).ok().map(|(_, command)| command);
            let reply = match &command {
                Some(Command::StartNoAckMode) => Reply::Ok,
                Some(Command::SpeedTest { response_size, .. })
                    if *response_size > MAX_SPEED_TEST_RESPONSE =>
                {
                    Reply::Error(ERROR_INVALID_ARGUMENT)
                }
                Some(Command::SpeedTest { response_size, .. }) => {
                    Reply::SpeedTest(vec![SPEED_TEST_REPLY_FILLER; *response_size])
                }
                None => {
                    debug!(payload = %payload.escape_ascii(), "unsupported command");
                    Reply::Unsupported
                }
            };

            let frame = codec::frame(&reply.encode_payload());
            self.write(&frame).await?;
            self.last_reply = frame;

            if command == Some(Command::StartNoAckMode) {
                self.ack_mode = AckMode::Disabled;
                debug!("ack mode disabled");
            }
        }
        Ok(())
    }

    /// Returns `None` once the client has closed the connection.
    async fn next_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            if let ParseOutcome::Packet(packet) = self.assembler.next_packet(self.ack_mode)? {
                trace!("stub getpkt {packet}");
                return Ok(Some(packet));
            }
            let bytes_read = self.stream.read(&mut self.read_buf).await?;
            if bytes_read == 0 {
                return Ok(None);
            }
            self.assembler.extend(&self.read_buf[..bytes_read]);
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        trace!("stub putpkt \"{}\"", bytes.escape_ascii());
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

/// Binds `addr` and serves every client that connects.
pub async fn listen(addr: impl ToSocketAddrs) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "stub listening");
    serve_listener(listener).await
}

/// Serves every client accepted on `listener`, each on its own task.
pub async fn serve_listener(listener: TcpListener) -> Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        socket.set_nodelay(true)?;
        debug!(%peer, "client connected");
        tokio::spawn(async move {
            match StubPeer::new(socket.compat()).serve().await {
                Ok(()) => debug!(%peer, "client disconnected"),
                Err(err) => warn!(%peer, error = %err, "client session failed"),
            }
        });
    }
}
