// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Attribute names and status-code constants the core depends on (§6
//! "Attributes consumed/produced"). The full dictionary (symbolic name ⇄
//! wire TLV translation, vendor extensions) lives outside this crate; these
//! are just the fixed strings the protocol core itself reads or writes.

/// Opaque conversation token, carried verbatim between turns.
pub const STATE: &str = "State";
/// Control attribute selecting the `process <alias>` section.
pub const AUTH_TYPE: &str = "AuthType";

pub const PACKET_TYPE: &str = "TacacsPacketType";
pub const SEQUENCE_NUMBER: &str = "TacacsSequenceNumber";
pub const SESSION_ID: &str = "TacacsSessionId";
pub const AUTHENTICATION_STATUS: &str = "TacacsAuthenticationStatus";
pub const AUTHORIZATION_STATUS: &str = "TacacsAuthorizationStatus";
pub const ACCOUNTING_STATUS: &str = "TacacsAccountingStatus";

/// `AuthType` sentinel meaning "treat the conversation as authenticated
/// without dispatching a `process` section".
pub const AUTH_TYPE_ACCEPT: &str = "Accept";
/// `AuthType` sentinel meaning "reject without dispatching a `process`
/// section".
pub const AUTH_TYPE_REJECT: &str = "Reject";

pub mod authen_status {
    pub const PASS: &str = "Pass";
    pub const FAIL: &str = "Fail";
    pub const GET_DATA: &str = "GetData";
    pub const GET_USER: &str = "GetUser";
    pub const GET_PASS: &str = "GetPass";
    pub const RESTART: &str = "Restart";
    pub const ERROR: &str = "Error";
    pub const FOLLOW: &str = "Follow";

    /// Statuses that end the conversation (§4.3 SEND).
    pub const TERMINAL: [&str; 5] = [PASS, FAIL, RESTART, ERROR, FOLLOW];
}

pub mod author_status {
    pub const PASS_REPL: &str = "Pass-Repl";
    pub const FAIL: &str = "Fail";
    pub const ERROR: &str = "Error";
}

pub mod acct_status {
    pub const SUCCESS: &str = "Success";
    pub const ERROR: &str = "Error";
}
