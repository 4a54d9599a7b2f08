// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-connection incremental packet assembly and dispatch (§4.4
//! "ConnectionReader"). Owns the partial-read buffer for one TCP
//! connection, hands complete packets to the `SessionMachine`, and writes
//! the resulting reply back out — all sequentially within the same task,
//! which is what gives the per-session ordering guarantee of §5 for free
//! (turn N+1 cannot even be read off the socket until turn N's reply has
//! been written).

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use bytes::BytesMut;
use tokio::{
    io::AsyncReadExt,
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    packet::Packet,
    request::ConnectionId,
    server::registry::ConnectionRegistry,
    state_machine::session::SessionMachine,
    wire::{DecodeOutcome, WireCodec},
};

/// Read-side chunk size per socket poll; the framing header (§6a) is 12
/// bytes, so this comfortably covers header plus a modest attribute body
/// in one syscall for the common case.
const READ_CHUNK: usize = 4096;

/// Drives one accepted TCP connection end to end: read -> decode -> drive
/// the `SessionMachine` -> encode -> write, looping until the peer closes
/// the connection or a fatal error occurs (§4.4, §7).
pub struct Connection {
    id: ConnectionId,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    codec: Arc<dyn WireCodec>,
    machine: Arc<SessionMachine>,
    registry: ConnectionRegistry,
    cancel: CancellationToken,
    io_timeout: Duration,
    buf: BytesMut,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        stream: TcpStream,
        codec: Arc<dyn WireCodec>,
        machine: Arc<SessionMachine>,
        registry: ConnectionRegistry,
        cancel: CancellationToken,
        io_timeout: Duration,
    ) -> Result<Self> {
        stream.set_nodelay(true).context("failed to set TCP_NODELAY")?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            id,
            reader,
            writer,
            codec,
            machine,
            registry,
            cancel,
            io_timeout,
            buf: BytesMut::with_capacity(READ_CHUNK),
        })
    }

    /// Runs the read/process/write loop until the connection ends (§4.4).
    /// Marks itself end-of-life in the registry on return, whatever the
    /// reason (§7 "per-connection fatal errors").
    pub async fn run(mut self) {
        let peer = self.reader.peer_addr().ok();
        loop {
            match self.try_decode_one(peer) {
                Some(DecodeOutcome::Complete(packet)) => {
                    let reply = self.machine.run(self.id, packet.clone()).await;
                    if let Err(e) = self.send_reply(&reply, &packet).await {
                        warn!(connection = self.id.0, error = %e, "failed to send reply");
                        break;
                    }
                    continue;
                },
                Some(DecodeOutcome::Partial) => {},
                Some(DecodeOutcome::ClientAbort) => {
                    debug!(connection = self.id.0, "peer closed connection");
                    break;
                },
                Some(DecodeOutcome::RecoverableError {
                    kind,
                    session_id,
                    seq_no,
                    error,
                }) => {
                    debug!(connection = self.id.0, error = %error, "malformed body, replying with error status");
                    let peer = peer.unwrap_or_else(|| "0.0.0.0:0".parse().expect("valid fallback addr"));
                    let reply = self
                        .machine
                        .run_decode_failure(self.id, kind, session_id, seq_no, peer)
                        .await;
                    let inbound = Packet::new(kind, session_id, seq_no, peer);
                    if let Err(e) = self.send_reply(&reply, &inbound).await {
                        warn!(connection = self.id.0, error = %e, "failed to send reply");
                        break;
                    }
                    continue;
                },
                Some(DecodeOutcome::Error(e)) => {
                    warn!(connection = self.id.0, error = %e, "decode error, closing connection");
                    break;
                },
                None => {},
            }

            if self.fill_buffer().await.is_err() {
                break;
            }
        }

        self.registry.unregister(self.id);
        trace!(connection = self.id.0, "connection closed");
    }

    /// Attempts to decode exactly one packet from the buffered bytes
    /// without touching the socket. `None` means the buffer is currently
    /// empty and a read is needed before decoding can say anything.
    fn try_decode_one(&mut self, peer: Option<std::net::SocketAddr>) -> Option<DecodeOutcome> {
        if self.buf.is_empty() {
            return None;
        }
        let peer = peer.unwrap_or_else(|| "0.0.0.0:0".parse().expect("valid fallback addr"));
        Some(self.codec.decode(&mut self.buf, peer))
    }

    /// Reads one chunk from the socket. `decode` (§6a) only ever sees a
    /// non-empty buffer (`try_decode_one` guards that), so EOF detection
    /// lives here rather than in the codec: a zero-length read with an
    /// empty buffer is a graceful close (§7, "no back-reference" to any
    /// in-flight conversation); with a non-empty buffer it is a truncated
    /// connection, a per-connection fatal error.
    async fn fill_buffer(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = timeout(self.io_timeout, async {
            tokio::select! {
                _ = self.cancel.cancelled() => Err(anyhow!("connection cancelled")),
                res = self.reader.read(&mut chunk) => res.map_err(Into::into),
            }
        })
        .await
        .context("read timed out")??;

        if n == 0 {
            if self.buf.is_empty() {
                debug!(connection = self.id.0, "peer closed connection");
            } else {
                warn!(connection = self.id.0, "peer closed mid-packet");
            }
            return Err(anyhow!("connection closed"));
        }
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    async fn send_reply(&mut self, reply: &crate::packet::Packet, inbound: &crate::packet::Packet) -> Result<()> {
        self.codec
            .encode_and_send(reply, inbound, &mut self.writer)
            .await
            .context("failed to encode/send reply")
    }
}
