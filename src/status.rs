// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Pure mapping from `(PacketKind, PolicyOutcome)` to a reply attribute
//! write (§4.2 "StatusMapper").

use tracing::warn;

use crate::{
    dictionary::{acct_status, authen_status, author_status, AUTHENTICATION_STATUS, AUTHORIZATION_STATUS, ACCOUNTING_STATUS},
    packet::{Packet, PacketKind},
    policy::PolicyOutcome,
};

/// Writes the reply attribute implied by `(kind, outcome)` onto `reply`.
///
/// Returns `true` if the outcome was mapped to a write (or is `Handled`,
/// which is deliberately a no-op on AUTHEN — the section already set the
/// status). Returns `false` for outcomes with no entry in the table, after
/// logging a warning (§9 resolved open question 3: this is intentional
/// defensive behavior, not a bug).
pub fn apply(kind: PacketKind, outcome: PolicyOutcome, reply: &mut Packet) -> bool {
    use PolicyOutcome::*;

    match (kind, outcome) {
        (_, Handled) => true,

        (PacketKind::Authentication, Ok) => {
            reply.set_attr(AUTHENTICATION_STATUS, authen_status::PASS);
            true
        },
        (PacketKind::Authentication, Fail | Reject | UserLock) => {
            reply.set_attr(AUTHENTICATION_STATUS, authen_status::FAIL);
            true
        },
        (PacketKind::Authentication, Invalid) => {
            reply.set_attr(AUTHENTICATION_STATUS, authen_status::ERROR);
            true
        },

        (PacketKind::Authorization, Ok) => {
            reply.set_attr(AUTHORIZATION_STATUS, author_status::PASS_REPL);
            true
        },
        (PacketKind::Authorization, Fail | Reject | UserLock) => {
            reply.set_attr(AUTHORIZATION_STATUS, author_status::FAIL);
            true
        },
        (PacketKind::Authorization, Invalid) => {
            reply.set_attr(AUTHORIZATION_STATUS, author_status::ERROR);
            true
        },

        (PacketKind::Accounting, Ok) => {
            reply.set_attr(ACCOUNTING_STATUS, acct_status::SUCCESS);
            true
        },
        (PacketKind::Accounting, Fail | Reject | UserLock | Invalid) => {
            reply.set_attr(ACCOUNTING_STATUS, acct_status::ERROR);
            true
        },

        (_, other) => {
            warn!(?kind, ?other, "policy outcome has no StatusMapper entry");
            false
        },
    }
}
