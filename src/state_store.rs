// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A thread-safe, time-bounded, capacity-bounded store of multi-round
//! authentication conversations (§3 "StateStore", §4.1).
//!
//! The source design keeps a separate index map and an intrusive FIFO list
//! to decide eviction order. Because every entry shares the same lifetime
//! (`cleanup_at = insertion_time + timeout`), insertion order already equals
//! cleanup order (I2), so a single `IndexMap` plays both roles (§9).

use std::sync::Mutex;

use indexmap::IndexMap;
use rand::RngCore;
use tokio::time::{Duration, Instant};
use tracing::trace;

use crate::{
    packet::{Packet, Token},
    request::{Request, SessionState},
};

/// A tracked conversation (§3 "StateEntry").
#[derive(Debug)]
struct StateEntry {
    id: u64,
    token: Token,
    cleanup_at: Instant,
    tries: u8,
    state: Option<SessionState>,
}

/// An owned snapshot of a `StateEntry`'s metadata, returned from `find` in
/// place of a borrowed reference (Rust cannot hand out a reference beyond
/// the mutex guard's scope as cheaply as the source's pointer did).
#[derive(Debug, Clone, Copy)]
pub struct StateEntryMeta {
    pub id: u64,
    pub token: Token,
    pub tries: u8,
    pub cleanup_at: Instant,
}

struct Inner {
    next_id: u64,
    index: IndexMap<Token, StateEntry>,
}

impl Inner {
    /// Removes and returns every head-of-order entry whose `cleanup_at` has
    /// passed. Safe to call with an arbitrary number of stale entries at the
    /// front because insertion order equals cleanup order (I2).
    fn evict_expired(&mut self, now: Instant) -> Vec<StateEntry> {
        let mut freed = Vec::new();
        while let Some((_, entry)) = self.index.get_index(0) {
            if entry.cleanup_at > now {
                break;
            }
            if let Some((_, entry)) = self.index.shift_remove_index(0) {
                freed.push(entry);
            }
        }
        freed
    }
}

/// Thread-safe, time-bounded, capacity-bounded store of `StateEntry`
/// records (§3, §4.1). Constructed once at startup and shared behind an
/// `Arc` (§9 "no global mutable state").
pub struct StateStore {
    inner: Mutex<Inner>,
    max_sessions: u32,
    timeout: Duration,
    state_seed: Option<u8>,
}

/// Fixed byte this crate's server reports in derived tokens, mixed into the
/// token the way the source mixes in the server version (§4.1).
const SERVER_VERSION: u8 = 1;

impl StateStore {
    pub fn new(max_sessions: u32, timeout: Duration, state_seed: Option<u8>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 0,
                index: IndexMap::new(),
            }),
            max_sessions,
            timeout,
            state_seed,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("state store mutex poisoned").index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocates a new `StateEntry`, reaping expired ones first (§4.1
    /// "create"). Returns `None` when the store is at capacity.
    pub fn create(&self, packet: &mut Packet, previous: Option<Token>) -> Option<Token> {
        let now = Instant::now();

        let mut freed = Vec::new();
        let (tries, seed_token) = {
            let mut inner = self.inner.lock().expect("state store mutex poisoned");
            freed = inner.evict_expired(now);

            let mut tries = 0u8;
            let mut seed_token = None;
            if let Some(prev) = previous
                && let Some(entry) = inner.index.get(&prev)
            {
                tries = entry.tries.saturating_add(1);
                seed_token = Some(entry.token);
                if entry.state.is_none()
                    && let Some((_, removed)) = inner.index.shift_remove_entry(&prev)
                {
                    freed.push(removed);
                }
            }

            if inner.index.len() >= self.max_sessions as usize {
                return None;
            }

            (tries, seed_token)
        };
        // `freed` is dropped here, after the lock above has been released,
        // so any expensive destructors in persisted session-state run
        // outside the critical section.
        drop(freed);

        let token = packet.state_token().unwrap_or_else(|| {
            self.derive_token(tries, seed_token)
        });

        {
            let mut inner = self.inner.lock().expect("state store mutex poisoned");
            if inner.index.len() >= self.max_sessions as usize {
                return None;
            }
            inner.next_id += 1;
            let id = inner.next_id;
            inner.index.insert(
                token,
                StateEntry {
                    id,
                    token,
                    cleanup_at: now + self.timeout,
                    tries,
                    state: None,
                },
            );
            trace!(id, tries, "state entry created");
        }

        packet.set_state_token(token);
        Some(token)
    }

    fn derive_token(&self, tries: u8, seed: Option<Token>) -> Token {
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        if let Some(seed) = seed {
            for (b, s) in bytes.iter_mut().zip(seed.as_bytes().iter()) {
                *b ^= *s;
            }
        }
        bytes[0] = tries;
        bytes[1] = 0 ^ tries;
        bytes[8] ^= SERVER_VERSION;
        bytes[10] ^= SERVER_VERSION;
        bytes[12] ^= SERVER_VERSION;
        if let Some(prefix) = self.state_seed {
            bytes[3] = prefix;
        }
        Token(bytes)
    }

    /// Metadata for the entry matching `packet`'s `State` attribute, or
    /// `None` if absent, of the wrong length, or unknown (§4.1 "find").
    pub fn find(&self, packet: &Packet) -> Option<StateEntryMeta> {
        let token = packet.state_token()?;
        let inner = self.inner.lock().expect("state store mutex poisoned");
        inner.index.get(&token).map(|e| StateEntryMeta {
            id: e.id,
            token: e.token,
            tries: e.tries,
            cleanup_at: e.cleanup_at,
        })
    }

    /// Unlinks and frees the entry matching `packet`, clearing the
    /// request's session state too (§4.1 "discard").
    pub fn discard(&self, request: &mut Request, packet: &Packet) {
        if let Some(token) = packet.state_token() {
            let mut inner = self.inner.lock().expect("state store mutex poisoned");
            let _freed = inner.index.shift_remove(&token);
        }
        request.session_state = None;
    }

    /// Moves a matching entry's saved state into the request, leaving the
    /// entry itself (minus its state) in place (§4.1 "to_request", §3 I6).
    pub fn to_request(&self, request: &mut Request, packet: &Packet) {
        let Some(token) = packet.state_token() else {
            return;
        };
        let restored = {
            let mut inner = self.inner.lock().expect("state store mutex poisoned");
            inner.index.get_mut(&token).map(|entry| entry.state.take())
        };
        if let Some(restored) = restored {
            let old = request.session_state.take();
            request.session_state = restored;
            // `old` is dropped here, after `inner`'s guard above has already
            // gone out of scope (§4.1 "freed after releasing the mutex").
            drop(old);
        }
    }

    /// Persists `session_state` into a (possibly new) entry seeded from
    /// `original` (§4.1 "from_request"). Returns `false` only when there is
    /// data to persist and the store is at capacity.
    ///
    /// Takes `session_state` rather than `&mut Request` so a caller that
    /// also needs a live `&mut` borrow of `request.reply` (the packet this
    /// is normally called with) doesn't have to fight the borrow checker
    /// over two fields of the same struct (§4.3 SEND).
    pub fn from_request(
        &self,
        session_state: &mut Option<SessionState>,
        original: Option<Token>,
        packet: &mut Packet,
    ) -> bool {
        let has_data = session_state.as_ref().is_some_and(|s| !s.is_empty());
        if !has_data {
            return true;
        }

        match self.create(packet, original) {
            Some(token) => {
                let mut inner = self.inner.lock().expect("state store mutex poisoned");
                if let Some(entry) = inner.index.get_mut(&token) {
                    entry.state = session_state.take();
                }
                true
            },
            None => false,
        }
    }
}
