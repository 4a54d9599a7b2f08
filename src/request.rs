// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The processing unit for one incoming packet (§3 "Request") and the
//! session-state payload that is moved between a `Request` and a
//! `StateEntry` rather than deep-copied (§3 I4).

use crate::packet::{Attribute, Packet};

/// Identifies the connection a `Request` arrived on. Assigned once, at
/// accept time, by the connection registry (§4.3 "Per-connection state
/// token").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Phases a `Request` traverses (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Recv,
    Process,
    Send,
    Done,
}

/// Cooperative cancellation flag a policy section may set to short-circuit
/// the remaining phases (§5 "Cancellation").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MasterState {
    #[default]
    Running,
    StopProcessing,
}

/// Session-state attributes persisted across turns, moved (never deep
/// copied) between `Request.session_state` and `StateEntry.state` (§3 I4,
/// I6).
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Policy-accumulated attributes saved across turns.
    pub vps: Vec<Attribute>,
    /// Opaque persisted request-side data a policy section may stash.
    pub data: Option<Vec<u8>>,
}

impl SessionState {
    pub fn is_empty(&self) -> bool {
        self.vps.is_empty() && self.data.is_none()
    }
}

/// The processing unit for one incoming packet (§3 "Request").
#[derive(Debug)]
pub struct Request {
    pub connection_id: ConnectionId,
    pub inbound: Packet,
    pub reply: Packet,
    /// Policy-set control attributes such as `AuthType`, distinct from
    /// `session_state` (which survives across turns).
    pub control: Vec<Attribute>,
    /// Restored from, and saved back to, the `StateStore` (§3 I4).
    pub session_state: Option<SessionState>,
    pub phase: Phase,
    pub master_state: MasterState,
    /// The alias resolved during AuthType resolution (§4.3 RECV), used to
    /// pick the `process <alias>` and, implicitly, confirms a `send *`
    /// fallback is not needed.
    pub auth_type_alias: Option<String>,
}

impl Request {
    pub fn new(connection_id: ConnectionId, inbound: Packet) -> Self {
        let reply = Packet::new(
            inbound.kind,
            inbound.session_id,
            inbound.seq_no,
            inbound.peer,
        );
        Self {
            connection_id,
            inbound,
            reply,
            control: Vec::new(),
            session_state: None,
            phase: Phase::Init,
            master_state: MasterState::Running,
            auth_type_alias: None,
        }
    }

    pub fn control_attr(&self, name: &str) -> Option<&str> {
        self.control
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn control_attr_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.control
            .iter()
            .filter(move |a| a.name == name)
            .map(|a| a.value.as_str())
    }
}
