// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The wire codec boundary (§6a): a minimal framing/obfuscation contract
//! sufficient to drive `ConnectionReader` end-to-end, plus a reference
//! implementation (`FramedCodec`). A production deployment swaps in a
//! dictionary-aware codec behind the same `WireCodec` trait; the full TLV
//! attribute-value encoding remains out of scope (§1).

use std::{future::Future, net::SocketAddr, pin::Pin};

use bytes::{Buf, BufMut, BytesMut};
use md5::{Digest as _, Md5};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{
    error::CodecError,
    packet::{Attribute, Packet, PacketKind},
};

const HEADER_LEN: usize = 12;
const MAJOR_MINOR_VERSION: u8 = 0xC0;

bitflags::bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    /// TACACS+ header flags byte (RFC 8907 §4.1).
    struct HeaderFlags: u8 {
        const UNENCRYPTED    = 0b0000_0001;
        const SINGLE_CONNECT = 0b0000_0100;
    }
}

/// Result of attempting to decode one packet from a connection's read
/// buffer (§4.4 "ConnectionReader" outcomes).
#[derive(Debug)]
pub enum DecodeOutcome {
    Complete(Packet),
    Partial,
    ClientAbort,
    /// A body-level decode failure with a valid, already-consumed header
    /// (`kind`/`session_id`/`seq_no` all known): the buffer stays in sync,
    /// so this is the "any other decode failure" case of §4.3 INIT — a
    /// transient per-packet error reported via StatusMapper, not a
    /// connection-fatal one (§7).
    RecoverableError {
        kind: PacketKind,
        session_id: u32,
        seq_no: u8,
        error: CodecError,
    },
    /// A header-level failure (bad version, unknown packet type) or a
    /// declared body length that can't be trusted enough to skip past:
    /// no valid `kind` exists to reply with, and/or the buffer can't be
    /// resynchronized, so this is connection-fatal (§7).
    Error(CodecError),
}

/// The framing/obfuscation contract `ConnectionReader` drives (§6a).
pub trait WireCodec: Send + Sync {
    /// Attempts to decode one complete packet from `buf`, draining exactly
    /// the bytes consumed on success.
    fn decode(&self, buf: &mut BytesMut, peer: SocketAddr) -> DecodeOutcome;

    /// Serializes `reply` and writes it to `sink`. `inbound` is passed so a
    /// codec can cross-check sequence numbers or session ids if desired.
    fn encode_and_send<'a>(
        &'a self,
        reply: &'a Packet,
        inbound: &'a Packet,
        sink: &'a mut (dyn AsyncWrite + Unpin + Send),
    ) -> Pin<Box<dyn Future<Output = Result<(), CodecError>> + Send + 'a>>;
}

/// Reference `WireCodec` implementing the RFC 8907 §4.1 framing shape: a
/// fixed 12-byte header (version, type, seq, flags, session id, body
/// length) followed by a body XORed against an MD5-derived pseudo-random
/// pad when a shared secret is configured (§4.5). Attribute encoding within
/// the body is a minimal `name=value\0`-joined list rather than the full
/// vendor TLV dictionary.
pub struct FramedCodec {
    secret: Option<Vec<u8>>,
    max_body_len: u32,
}

impl FramedCodec {
    pub fn new(secret: Option<Vec<u8>>) -> Self {
        Self {
            secret,
            max_body_len: 1 << 20,
        }
    }

    fn pad(&self, session_id: u32, seq_no: u8, len: usize) -> Vec<u8> {
        let Some(secret) = &self.secret else {
            return vec![0u8; len];
        };

        let mut pad = Vec::with_capacity(len + 16);
        let mut prev: Option<[u8; 16]> = None;
        while pad.len() < len {
            let mut hasher = Md5::new();
            hasher.update(session_id.to_be_bytes());
            hasher.update(secret);
            hasher.update([MAJOR_MINOR_VERSION, seq_no]);
            if let Some(p) = prev {
                hasher.update(p);
            }
            let chunk: [u8; 16] = hasher.finalize().into();
            pad.extend_from_slice(&chunk);
            prev = Some(chunk);
        }
        pad.truncate(len);
        pad
    }

    fn obfuscate(&self, session_id: u32, seq_no: u8, body: &mut [u8]) {
        let pad = self.pad(session_id, seq_no, body.len());
        for (b, p) in body.iter_mut().zip(pad.iter()) {
            *b ^= *p;
        }
    }

    fn encode_body(&self, packet: &Packet) -> Vec<u8> {
        let mut parts = Vec::with_capacity(packet.attributes.len());
        for a in &packet.attributes {
            parts.push(format!("{}={}", a.name, a.value));
        }
        parts.join("\0").into_bytes()
    }

    fn decode_body(body: &[u8]) -> Result<Vec<Attribute>, CodecError> {
        if body.is_empty() {
            return Ok(Vec::new());
        }
        let text = std::str::from_utf8(body)
            .map_err(|e| CodecError::Malformed(format!("body is not utf8: {e}")))?;
        text.split('\0')
            .map(|kv| {
                let (name, value) = kv.split_once('=').ok_or_else(|| {
                    CodecError::Malformed(format!("attribute missing '=': {kv:?}"))
                })?;
                Ok(Attribute::new(name, value))
            })
            .collect()
    }
}

impl WireCodec for FramedCodec {
    fn decode(&self, buf: &mut BytesMut, peer: SocketAddr) -> DecodeOutcome {
        if buf.len() < HEADER_LEN {
            if buf.is_empty() {
                return DecodeOutcome::ClientAbort;
            }
            return DecodeOutcome::Partial;
        }

        let version = buf[0];
        if version != MAJOR_MINOR_VERSION {
            return DecodeOutcome::Error(CodecError::UnsupportedVersion(version));
        }
        let Some(kind) = PacketKind::from_wire_byte(buf[1]) else {
            return DecodeOutcome::Error(CodecError::UnknownPacketType(buf[1]));
        };
        let seq_no = buf[2];
        let flags = buf[3];
        let session_id = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let body_len = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

        if body_len > self.max_body_len {
            return DecodeOutcome::Error(CodecError::BodyTooLarge {
                declared: body_len,
                max: self.max_body_len,
            });
        }

        let total = HEADER_LEN + body_len as usize;
        if buf.len() < total {
            return DecodeOutcome::Partial;
        }

        let mut framed = buf.split_to(total);
        framed.advance(HEADER_LEN);
        let mut body = framed.to_vec();
        self.obfuscate(session_id, seq_no, &mut body);

        let attributes = match Self::decode_body(&body) {
            Ok(a) => a,
            Err(e) => {
                // The full frame is already drained from `buf` above, so
                // the connection stays in sync even though this packet's
                // body didn't parse (§4.3 INIT "any other decode failure").
                return DecodeOutcome::RecoverableError {
                    kind,
                    session_id,
                    seq_no,
                    error: e,
                };
            },
        };

        let mut packet = Packet::new(kind, session_id, seq_no, peer);
        packet.single_connect = HeaderFlags::from_bits_truncate(flags).contains(HeaderFlags::SINGLE_CONNECT);
        packet.attributes = attributes;
        DecodeOutcome::Complete(packet)
    }

    fn encode_and_send<'a>(
        &'a self,
        reply: &'a Packet,
        _inbound: &'a Packet,
        sink: &'a mut (dyn AsyncWrite + Unpin + Send),
    ) -> Pin<Box<dyn Future<Output = Result<(), CodecError>> + Send + 'a>> {
        Box::pin(async move {
            let mut body = self.encode_body(reply);
            self.obfuscate(reply.session_id, reply.seq_no, &mut body);

            let mut out = BytesMut::with_capacity(HEADER_LEN + body.len());
            out.put_u8(MAJOR_MINOR_VERSION);
            out.put_u8(reply.kind.to_wire_byte());
            out.put_u8(reply.seq_no);
            let flags = if reply.single_connect {
                HeaderFlags::SINGLE_CONNECT
            } else {
                HeaderFlags::empty()
            };
            out.put_u8(flags.bits());
            out.put_u32(reply.session_id);
            out.put_u32(body.len() as u32);
            out.extend_from_slice(&body);

            sink.write_all(&out).await?;
            sink.flush().await?;
            Ok(())
        })
    }
}
