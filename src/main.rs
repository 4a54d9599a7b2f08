// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result};
use tacacs_core::{
    cfg::{cli::resolve_config_path, config::Config, logger::init_logger},
    dictionary::{AUTH_TYPE, AUTH_TYPE_ACCEPT},
    packet::PacketKind,
    policy::{PolicyOutcome, StaticPolicyTable},
    policy_fn,
    server::{listener::Listener, registry::ConnectionIdAllocator},
    state_store::StateStore,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A minimal, always-accept policy table for the standalone binary.
///
/// Compiling real `recv`/`process`/`send` virtual-server sections from a
/// policy-language source is out of scope for this crate (§1, §6b); an
/// embedding application supplies its own `PolicyTable` built from its own
/// `PolicyCompiler`. This stands in for that so the binary is runnable
/// end-to-end out of the box.
fn demo_policy() -> tacacs_core::policy::PolicyTable {
    StaticPolicyTable::new()
        .recv(
            PacketKind::Authentication,
            "recv Authentication",
            policy_fn!(|req| {
                req.control
                    .push(tacacs_core::packet::Attribute::new(AUTH_TYPE, AUTH_TYPE_ACCEPT));
                PolicyOutcome::Ok
            }),
        )
        .recv(
            PacketKind::Authorization,
            "recv Authorization",
            policy_fn!(|_req| PolicyOutcome::Ok),
        )
        .recv(
            PacketKind::Accounting,
            "recv Accounting",
            policy_fn!(|_req| PolicyOutcome::Ok),
        )
        .build()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg_path = resolve_config_path("tacacsd.yaml").unwrap_or_else(|_| "tacacsd.yaml".into());
    let cfg = Config::load_from_file(&cfg_path)
        .with_context(|| format!("failed to load configuration from {cfg_path:?}"))?;

    let _logger_guard = init_logger(&cfg.logger)?;
    info!(listeners = cfg.listeners.len(), "tacacsd starting");

    let store = Arc::new(StateStore::new(
        cfg.state_store.max_sessions,
        cfg.state_store.timeout,
        cfg.state_seed_byte(),
    ));
    let policy = Arc::new(demo_policy());
    let ids = Arc::new(ConnectionIdAllocator::new());
    let cancel = CancellationToken::new();

    let mut tasks = Vec::with_capacity(cfg.listeners.len());
    for listener_cfg in &cfg.listeners {
        let listener = Listener::bind(
            listener_cfg,
            store.clone(),
            policy.clone(),
            ids.clone(),
            cfg.runtime.connection_timeout,
        )
        .await
        .with_context(|| format!("failed to bind listener {:?}", listener_cfg.name))?;

        let child_cancel = cancel.child_token();
        tasks.push(tokio::spawn(async move {
            listener.run(child_cancel).await;
        }));
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        },
    }
    cancel.cancel();

    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "listener task panicked");
        }
    }

    Ok(())
}
