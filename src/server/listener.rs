// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The listener-lifecycle layer (§6 "Listener contract"): binds one TCP
//! socket per virtual server and spawns a `Connection` task per accepted
//! client. TLS is not used at this layer, matching §6.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    cfg::config::ListenerConfig,
    policy::PolicyTable,
    server::{
        connection::Connection,
        registry::{ConnectionIdAllocator, ConnectionRegistry},
    },
    state_machine::session::SessionMachine,
    state_store::StateStore,
    wire::{FramedCodec, WireCodec},
};

/// One bound TCP listener / virtual server (§6 "Listener contract").
pub struct Listener {
    name: String,
    tcp: TcpListener,
    codec: Arc<dyn WireCodec>,
    machine: Arc<SessionMachine>,
    registry: ConnectionRegistry,
    ids: Arc<ConnectionIdAllocator>,
    io_timeout: Duration,
}

impl Listener {
    /// `open` (§6 "Listener contract"): binds and starts listening.
    pub async fn bind(
        cfg: &ListenerConfig,
        store: Arc<StateStore>,
        policy: Arc<PolicyTable>,
        ids: Arc<ConnectionIdAllocator>,
        io_timeout: Duration,
    ) -> Result<Self> {
        let tcp = TcpListener::bind(cfg.bind_address)
            .await
            .with_context(|| format!("failed to bind listener {:?} on {}", cfg.name, cfg.bind_address))?;
        let secret = cfg.secret.as_ref().map(|s| s.as_bytes().to_vec());
        Ok(Self {
            name: cfg.name.clone(),
            tcp,
            codec: Arc::new(FramedCodec::new(secret)),
            machine: Arc::new(SessionMachine::new(store, policy)),
            registry: ConnectionRegistry::new(),
            ids,
            io_timeout,
        })
    }

    /// The address actually bound, useful when `cfg.bind_address` used port
    /// `0` (tests, ephemeral listeners).
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.tcp.local_addr()
    }

    /// `recv` (§6 "Listener contract", §4.4): the accept loop. Runs until
    /// `cancel` fires, at which point every live connection is cancelled
    /// too so the process can shut down cleanly.
    pub async fn run(self, cancel: CancellationToken) {
        info!(listener = %self.name, addr = %self.tcp.local_addr().map(|a| a.to_string()).unwrap_or_default(), "listener started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.tcp.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.spawn_connection(stream, peer, cancel.child_token()),
                        Err(e) => {
                            // `error` (§6 "Listener contract"): mark end-of-life.
                            // A listener-level accept error is process-fatal for
                            // this virtual server; log and keep trying, since a
                            // transient fd-exhaustion blip shouldn't take down
                            // the whole listener.
                            warn!(listener = %self.name, error = %e, "accept failed");
                        },
                    }
                },
            }
        }

        self.registry.cancel_all();
        info!(listener = %self.name, "listener stopped");
    }

    fn spawn_connection(&self, stream: tokio::net::TcpStream, peer: std::net::SocketAddr, cancel: CancellationToken) {
        let id = self.ids.next();
        self.registry.register(id, cancel.clone());
        let connection = match Connection::new(
            id,
            stream,
            self.codec.clone(),
            self.machine.clone(),
            self.registry.clone(),
            cancel,
            self.io_timeout,
        ) {
            Ok(c) => c,
            Err(e) => {
                warn!(listener = %self.name, %peer, error = %e, "failed to initialize connection");
                self.registry.unregister(id);
                return;
            },
        };

        tracing::debug!(listener = %self.name, %peer, connection = id.0, "connection accepted");
        tokio::spawn(async move {
            connection.run().await;
        });
    }
}
