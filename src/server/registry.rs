// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Connection-id allocation and the live-connection registry (§5 "Shared-
//! resource policy"). `ConnectionId`s must be unique process-wide — not
//! merely per-listener — so that two virtual servers seeing colliding
//! `session_id` values still land on disjoint `StateStore` keys (§8
//! scenario 6).

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::request::ConnectionId;

/// Hands out process-wide unique `ConnectionId`s. The source keys AUTHEN
/// conversations off a raw listener pointer (§9 open question 1); this
/// monotonic counter is the explicit, pointer-free replacement.
#[derive(Default)]
pub struct ConnectionIdAllocator {
    next: AtomicU64,
}

impl ConnectionIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Tracks live connections so they can be cancelled from outside their own
/// task (e.g. on listener shutdown). A concurrent map, not a second global
/// mutex, matching the access pattern (many readers, rare insert/remove) —
/// §5 "Shared-resource policy".
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    live: Arc<DashMap<ConnectionId, CancellationToken>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ConnectionId, cancel: CancellationToken) {
        self.live.insert(id, cancel);
    }

    /// Marks the connection end-of-life (§4.4, §7 "per-connection fatal
    /// errors") and drops it from the registry.
    pub fn unregister(&self, id: ConnectionId) {
        self.live.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Cancels every live connection, used for listener shutdown.
    pub fn cancel_all(&self) {
        for entry in self.live.iter() {
            entry.value().cancel();
        }
    }
}
