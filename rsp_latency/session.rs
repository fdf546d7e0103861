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

use std::time::{Duration, Instant};

use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, trace, warn};

use crate::assembler::{ParseOutcome, StreamAssembler};
pub use crate::codec::AckMode;
use crate::codec::{self, ControlByte};
use crate::command::{Command, Reply};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::packet::Packet;

/// A session over a TCP connection.
pub type TcpSession = Session<Compat<TcpStream>>;

/// The client side of a GDB remote protocol connection.
///
/// Requests are strictly sequential: every call sends at most one packet and
/// waits for its reply before returning. When a request times out, its late
/// reply is read and discarded before the next request is sent, so replies
/// are never matched to the wrong request. Any protocol violation, handshake
/// failure or hangup closes the connection, after which every call fails with
/// [`Error::ConnectionClosed`].
pub struct Session<S> {
    stream: S,
    assembler: StreamAssembler,
    ack_mode: AckMode,
    read_timeout: Duration,
    read_buf: Vec<u8>,
    /// What is still owed for a request that timed out.
    outstanding: Option<Outstanding>,
    closed: bool,
}

/// The part of an answer not yet received for the last request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outstanding {
    Ack,
    Reply,
}

impl TcpSession {
    /// Connects to `endpoint` and sends the initial ACK.
    pub async fn connect(endpoint: impl ToSocketAddrs, config: &SessionConfig) -> Result<Self> {
        let stream = TcpStream::connect(endpoint).await?;
        stream.set_nodelay(true)?;
        debug!(peer = ?stream.peer_addr().ok(), "connected");

        let mut session = Session::new(stream.compat(), config);
        session.send_ack().await?;
        Ok(session)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    /// Creates a `Session` over an already connected stream.
    ///
    /// Nothing is sent; see [`Session::send_ack`].
    pub fn new(stream: S, config: &SessionConfig) -> Self {
        Self {
            stream,
            assembler: StreamAssembler::new(),
            ack_mode: AckMode::Enabled,
            read_timeout: config.read_timeout(),
            read_buf: vec![0; config.chunk_size.max(1)],
            outstanding: None,
            closed: false,
        }
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub async fn send_ack(&mut self) -> Result<()> {
        self.send_packet(&[ControlByte::Ack.as_byte()], false)
            .await
            .map(drop)
    }

    pub async fn send_nack(&mut self) -> Result<()> {
        self.send_packet(&[ControlByte::Nack.as_byte()], false)
            .await
            .map(drop)
    }

    /// Asks the remote side to stop acknowledging packets.
    ///
    /// On an `OK` reply acknowledgments and checksum verification are turned
    /// off for the rest of the session. Any other reply leaves them on.
    /// Returns the resulting mode.
    pub async fn negotiate_no_ack(&mut self) -> Result<AckMode> {
        match self.request(&Command::StartNoAckMode).await? {
            Reply::Ok => {
                self.ack_mode = AckMode::Disabled;
                debug!("ack mode disabled");
            }
            reply => debug!(?reply, "remote declined no-ack mode"),
        }
        Ok(self.ack_mode)
    }

    /// Sends `command` and decodes the reply.
    pub async fn request(&mut self, command: &Command) -> Result<Reply> {
        match self.send_packet(&command.encode_payload(), true).await? {
            Some(Packet::Data(payload)) => Ok(Reply::decode_payload(&payload)),
            Some(packet) => Err(self.fail(Error::UnexpectedPacket(packet)).await),
            None => Err(self.fail(Error::ConnectionClosed).await),
        }
    }

    /// Frames and writes `payload`.
    ///
    /// With `expect_response`, waits for the remote's ACK (in ack mode) and
    /// then for the response packet, which is returned. Without it, nothing
    /// is read and `None` is returned.
    pub async fn send_packet(
        &mut self,
        payload: &[u8],
        expect_response: bool,
    ) -> Result<Option<Packet>> {
        self.ensure_open()?;
        let result = if expect_response {
            self.transact(payload).await.map(Some)
        } else {
            self.write_payload(payload).await.map(|()| None)
        };
        self.check(result).await
    }

    /// Reads the next packet from the remote side.
    ///
    /// In ack mode every data packet is acknowledged before it is returned.
    pub async fn receive_packet(&mut self) -> Result<Packet> {
        self.ensure_open()?;
        let result = self.read_packet().await;
        self.check(result).await
    }

    /// Issues one `qSpeedTest` and returns the round trip time.
    ///
    /// The request carries `send_size` filler bytes and asks for `recv_size`
    /// bytes back. Timing covers framing, the write, any handshake and
    /// parsing the complete reply. Only a `data:` reply of exactly
    /// `recv_size` bytes counts; anything else is
    /// [`Error::UnexpectedReply`].
    pub async fn speed_test(&mut self, send_size: usize, recv_size: usize) -> Result<Duration> {
        self.ensure_open()?;
        let result = self.resync().await;
        self.check(result).await?;
        let payload = Command::speed_test(send_size, recv_size).encode_payload();

        let start = Instant::now();
        let result = self.transact(&payload).await;
        let elapsed = start.elapsed();

        match self.check(result).await? {
            Packet::Data(reply) => match Reply::decode_payload(&reply) {
                Reply::SpeedTest(data) if data.len() == recv_size => Ok(elapsed),
                Reply::Error(code) => Err(Error::Remote(code)),
                reply => Err(Error::UnexpectedReply(reply)),
            },
            packet => Err(self.fail(Error::UnexpectedPacket(packet)).await),
        }
    }

    /// Shuts down the connection.
    pub async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.stream.close().await?;
        }
        Ok(())
    }

    async fn transact(&mut self, payload: &[u8]) -> Result<Packet> {
        self.resync().await?;
        self.write_payload(payload).await?;
        self.outstanding = Some(match self.ack_mode {
            AckMode::Enabled => Outstanding::Ack,
            AckMode::Disabled => Outstanding::Reply,
        });
        self.await_response().await
    }

    /// Reads what is still owed for the last request, up to and including
    /// its reply.
    ///
    /// `outstanding` is only cleared once the reply arrives, so a timeout
    /// here leaves it in place for the next attempt.
    async fn await_response(&mut self) -> Result<Packet> {
        if self.outstanding == Some(Outstanding::Ack) {
            match self.read_packet().await? {
                Packet::Control(ControlByte::Ack) => self.outstanding = Some(Outstanding::Reply),
                received => return Err(Error::Handshake { received }),
            }
        }
        let packet = self.read_packet().await?;
        self.outstanding = None;
        Ok(packet)
    }

    /// Discards the late answer to a request that timed out.
    async fn resync(&mut self) -> Result<()> {
        if self.outstanding.is_none() {
            return Ok(());
        }
        match self.await_response().await? {
            Packet::Data(payload) => {
                debug!(payload = %payload.escape_ascii(), "discarded late reply");
                Ok(())
            }
            packet => Err(Error::UnexpectedPacket(packet)),
        }
    }

    async fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        let frame = codec::frame(payload);
        trace!(len = frame.len(), "putpkt \"{}\"", frame.escape_ascii());
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_packet(&mut self) -> Result<Packet> {
        loop {
            if let ParseOutcome::Packet(packet) = self.assembler.next_packet(self.ack_mode)? {
                trace!("getpkt {packet}");
                if self.ack_mode == AckMode::Enabled && !packet.is_control() {
                    self.write_payload(&[ControlByte::Ack.as_byte()]).await?;
                }
                return Ok(packet);
            }

            let read = self.stream.read(&mut self.read_buf);
            let bytes_read = match tokio::time::timeout(self.read_timeout, read).await {
                Ok(result) => result?,
                Err(_) => return Err(Error::Timeout(self.read_timeout)),
            };
            if bytes_read == 0 {
                return Err(Error::ConnectionClosed);
            }
            self.assembler.extend(&self.read_buf[..bytes_read]);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }

    async fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => Err(self.fail(err).await),
        }
    }

    /// Closes the connection if `err` is fatal and hands it back.
    async fn fail(&mut self, err: Error) -> Error {
        if err.is_fatal() && !self.closed {
            warn!(error = %err, "closing session");
            self.closed = true;
            // Errors from the close itself are dropped in favour of `err`.
            let _ = self.stream.close().await;
        }
        err
    }
}
