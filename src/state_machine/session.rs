// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The per-request phase driver (§4.3 "SessionMachine"): `INIT -> RECV ->
//! PROCESS -> SEND -> DONE`, interleaved with the cooperative policy
//! interpreter. Cooperative yielding is realized natively by `.await`ing
//! each policy section's `step` future rather than by a hand-rolled
//! resumption enum (§5, §9) — the compiler-generated async state machine
//! for `SessionMachine::run` plays that role.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{trace, warn};

use crate::{
    dictionary::{
        AUTHENTICATION_STATUS, AUTH_TYPE, AUTH_TYPE_ACCEPT, AUTH_TYPE_REJECT, STATE, authen_status,
    },
    packet::{Packet, PacketKind, Token},
    policy::{PolicyOutcome, PolicySection, PolicyTable},
    request::{ConnectionId, MasterState, Phase, Request},
    state_store::StateStore,
    status,
};

/// Inbound sequence number at which the *next* turn would overflow the
/// 8-bit TACACS+ sequence space (§4.3 SEND).
const SEQ_RESTART_THRESHOLD: u8 = 253;

/// Builds the deterministic 16-byte key `to_request`/`from_request` use to
/// bind an AUTHEN conversation to the TCP connection and `session_id` it
/// lives on (§4.3 "Per-connection state token").
///
/// Unlike `StateStore::create`'s own (random, `tries`-mixed) token
/// derivation, this key is stable across every turn of one conversation:
/// it is installed verbatim on both the packet `to_request` reads from and
/// the reply `from_request`/`create` persists under, so `create` always
/// takes the "caller-supplied token" branch (§4.1) rather than generating
/// a fresh random one. The source's analogous key uses `sizeof(listener
/// pointer)`; this rewrite resolves Open Question §9.1 with an explicit,
/// monotonically assigned `ConnectionId` instead.
pub fn state_add(connection_id: ConnectionId, session_id: u32) -> Token {
    let mut bytes = [0u8; 16];
    bytes[0..8].copy_from_slice(&connection_id.0.to_ne_bytes());
    bytes[12..16].copy_from_slice(&session_id.to_ne_bytes());
    Token(bytes)
}

fn lookup_packet(kind: PacketKind, session_id: u32, seq_no: u8, peer: std::net::SocketAddr, token: Token) -> Packet {
    let mut p = Packet::new(kind, session_id, seq_no, peer);
    p.set_state_token(token);
    p
}

fn stopped(request: &Request) -> bool {
    matches!(request.master_state, MasterState::StopProcessing)
}

/// Drives `Request`s through their fixed phase sequence against a shared
/// `StateStore` and `PolicyTable` (§4.3).
pub struct SessionMachine {
    store: Arc<StateStore>,
    policy: Arc<PolicyTable>,
}

impl SessionMachine {
    pub fn new(store: Arc<StateStore>, policy: Arc<PolicyTable>) -> Self {
        Self { store, policy }
    }

    /// Drives one already-decoded packet through `INIT -> ... -> DONE` and
    /// returns the finished reply. Client aborts and connection-fatal
    /// decode errors are the `ConnectionReader`'s concern (§4.4) and never
    /// reach this point; recoverable decode failures (§7, a valid header
    /// but a malformed body) go through `run_decode_failure` instead, since
    /// no real inbound `Packet` could be decoded for them.
    pub async fn run(&self, connection_id: ConnectionId, packet: Packet) -> Packet {
        let started = Instant::now();
        let mut request = Request::new(connection_id, packet);
        request.phase = Phase::Init;

        self.init(&mut request);
        request.phase = Phase::Recv;

        if self.recv(&mut request).await {
            self.process(&mut request).await;
        }

        self.send(&mut request, started).await;
        trace!(elapsed_us = started.elapsed().as_micros(), "request done");
        request.reply
    }

    /// INIT's "any other decode failure" branch (§4.3 INIT, §7): the wire
    /// codec recovered a valid header (`kind`/`session_id`/`seq_no`) but
    /// couldn't parse the body. Records the failure via StatusMapper and
    /// jumps straight to SEND, skipping RECV/PROCESS entirely since no
    /// policy section has anything real to look at.
    pub async fn run_decode_failure(
        &self,
        connection_id: ConnectionId,
        kind: PacketKind,
        session_id: u32,
        seq_no: u8,
        peer: std::net::SocketAddr,
    ) -> Packet {
        let started = Instant::now();
        let inbound = Packet::new(kind, session_id, seq_no, peer);
        let mut request = Request::new(connection_id, inbound);
        request.phase = Phase::Send;
        status::apply(kind, PolicyOutcome::Invalid, &mut request.reply);

        self.send(&mut request, started).await;
        trace!(elapsed_us = started.elapsed().as_micros(), "decode-failure request done");
        request.reply
    }

    /// INIT: resolve `recv <kind>`, restore AUTHEN session state, and
    /// advance to RECV (§4.3 INIT). Kept infallible/synchronous: the only
    /// asynchronous step is driving the resolved policy section, which
    /// happens in `recv`.
    fn init(&self, request: &mut Request) {
        let kind = request.inbound.kind;

        if kind == PacketKind::Authentication {
            let token = state_add(request.connection_id, request.inbound.session_id);
            let key = lookup_packet(
                kind,
                request.inbound.session_id,
                request.inbound.seq_no,
                request.inbound.peer,
                token,
            );
            self.store.to_request(request, &key);
        }
    }

    /// RECV: drive `recv <kind>`, then resolve `AuthType`. Returns `true`
    /// if the conversation should proceed to PROCESS, `false` if it has
    /// already been routed to SEND (§4.3 RECV).
    async fn recv(&self, request: &mut Request) -> bool {
        let kind = request.inbound.kind;

        let Some(section) = self.policy.recv(kind) else {
            request.phase = Phase::Send;
            return false;
        };

        let outcome = section.clone().step(request).await;

        if stopped(request) {
            if kind == PacketKind::Authentication {
                self.discard_state(request);
            }
            request.phase = Phase::Done;
            return false;
        }

        use PolicyOutcome::*;
        match outcome {
            Noop | NotFound | Ok | Updated => {},
            Handled => {
                request.phase = Phase::Send;
                return false;
            },
            _ => {
                status::apply(kind, outcome, &mut request.reply);
                request.phase = Phase::Send;
                return false;
            },
        }

        self.resolve_auth_type(request)
    }

    /// AuthType resolution (§4.3 RECV): scans `request.control` for
    /// `AuthType`, short-circuits the `Accept`/`Reject` sentinels, and
    /// otherwise looks up `process <value>`.
    fn resolve_auth_type(&self, request: &mut Request) -> bool {
        let kind = request.inbound.kind;
        let mut values = request.control_attr_all(AUTH_TYPE);
        let Some(first) = values.next() else {
            status::apply(kind, PolicyOutcome::Reject, &mut request.reply);
            request.phase = Phase::Send;
            return false;
        };
        for extra in values {
            warn!(extra, "extra AuthType attribute ignored");
        }
        let alias = first.to_string();

        if alias == AUTH_TYPE_ACCEPT {
            status::apply(kind, PolicyOutcome::Ok, &mut request.reply);
            request.phase = Phase::Send;
            return false;
        }
        if alias == AUTH_TYPE_REJECT {
            status::apply(kind, PolicyOutcome::Reject, &mut request.reply);
            request.phase = Phase::Send;
            return false;
        }

        let Some(_section) = self.policy.process(&alias) else {
            status::apply(kind, PolicyOutcome::Fail, &mut request.reply);
            request.phase = Phase::Send;
            return false;
        };

        request.auth_type_alias = Some(alias);
        request.phase = Phase::Process;
        true
    }

    /// PROCESS: drive `process <alias>` (§4.3 PROCESS).
    async fn process(&self, request: &mut Request) {
        let kind = request.inbound.kind;
        let alias = request
            .auth_type_alias
            .clone()
            .expect("process phase requires a resolved AuthType alias");
        let Some(section) = self.policy.process(&alias) else {
            // The section existed during resolution and policy sections
            // are immutable once compiled (§6 "Policy surface"); this is a
            // programmer-error invariant, not a runtime condition.
            unreachable!("process section disappeared after resolution");
        };

        let outcome = section.clone().step(request).await;

        if stopped(request) {
            if kind == PacketKind::Authentication {
                self.discard_state(request);
            }
            request.phase = Phase::Done;
            return;
        }

        match outcome {
            PolicyOutcome::Ok => status::apply(kind, PolicyOutcome::Ok, &mut request.reply),
            PolicyOutcome::Handled => {},
            _ => status::apply(kind, PolicyOutcome::Fail, &mut request.reply),
        }
        request.phase = Phase::Send;
    }

    /// SEND: drive `send <kind>`, then apply AUTHEN state persistence and
    /// sequence-overflow handling (§4.3 SEND).
    async fn send(&self, request: &mut Request, started: Instant) {
        if request.phase == Phase::Done {
            return;
        }

        let kind = request.inbound.kind;
        if let Some(section) = self.policy.send(kind) {
            let outcome = section.clone().step(request).await;
            if stopped(request) {
                if kind == PacketKind::Authentication {
                    self.discard_state(request);
                }
                request.phase = Phase::Done;
                return;
            }
            let _ = outcome;
        }

        trace!(elapsed_us = started.elapsed().as_micros(), "reply timestamped");

        if kind == PacketKind::Authentication {
            self.finish_authen(request);
        }

        request.phase = Phase::Done;
    }

    /// The AUTHEN-specific tail of SEND: decide whether the conversation
    /// ends here or continues into another turn (§4.3 SEND).
    fn finish_authen(&self, request: &mut Request) {
        let Some(status) = request.reply.attr(AUTHENTICATION_STATUS).map(str::to_string) else {
            self.discard_state(request);
            return;
        };

        if authen_status::TERMINAL.contains(&status.as_str()) {
            self.discard_state(request);
            return;
        }

        if request.inbound.seq_no == SEQ_RESTART_THRESHOLD {
            self.discard_state(request);
            request.reply.attributes.clear();
            request.reply.set_attr(AUTHENTICATION_STATUS, authen_status::RESTART);
            return;
        }

        // `to_request`/`from_request` share the same deterministic key
        // (§4.3 "Per-connection state token"), so "the previous entry" and
        // "the key to persist under" are the same token.
        let token = state_add(request.connection_id, request.inbound.session_id);
        request.reply.set_state_token(token);

        let persisted =
            self.store
                .from_request(&mut request.session_state, Some(token), &mut request.reply);
        if !persisted {
            // Capacity exhausted (§7): the conversation is treated as if
            // it ended; the next client turn arrives unmatched and the
            // policy layer rejects it normally.
            request.reply.remove_attr(STATE);
        }
    }

    fn discard_state(&self, request: &mut Request) {
        let token = state_add(request.connection_id, request.inbound.session_id);
        let key = lookup_packet(
            request.inbound.kind,
            request.inbound.session_id,
            request.inbound.seq_no,
            request.inbound.peer,
            token,
        );
        self.store.discard(request, &key);
    }
}
