// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Typed errors for the parts of the crate that have more than one
//! meaningfully distinct failure mode. Top-level orchestration (the binary,
//! tests) composes these with `anyhow::Result` and `.context(...)`.

use thiserror::Error;

/// Errors surfaced by the wire codec boundary (§6a).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("short read: need {needed} more byte(s)")]
    Incomplete { needed: usize },

    #[error("unsupported packet version byte 0x{0:02x}")]
    UnsupportedVersion(u8),

    #[error("unknown packet type byte 0x{0:02x}")]
    UnknownPacketType(u8),

    #[error("body length {declared} exceeds configured maximum {max}")]
    BodyTooLarge { declared: u32, max: u32 },

    #[error("packet body failed to decode: {0}")]
    Malformed(String),

    #[error("client closed the connection before a reply was expected")]
    ClientAbort,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by `StateStore` operations that are genuinely recoverable
/// (as opposed to the `debug_assert!`-guarded programmer-error invariants).
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("state store is at capacity ({max_sessions} sessions)")]
    CapacityExhausted { max_sessions: u32 },
}
