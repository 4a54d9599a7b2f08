// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The policy interpreter boundary (§6b). `PolicySection` is the trait a
//! compiled virtual-server section implements; `PolicyTable` is the
//! six-fixed-sections-plus-named-aliases registry the `SessionMachine`
//! consults. Compilation of policy source into sections is out of scope
//! (§1) and left to a `PolicyCompiler` this crate does not implement.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use crate::{packet::PacketKind, request::Request};

/// The generic result of interpreting one policy section (§4.2). Cooperative
/// yielding is whatever the implementation's own `.await` points do — the
/// `step` future simply resolves once the section has finished running (or
/// is driven to completion by its caller across suspensions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyOutcome {
    Ok,
    Fail,
    Reject,
    UserLock,
    Invalid,
    NotFound,
    Noop,
    Updated,
    /// The section has already written the reply status itself; the
    /// `StatusMapper` must not overwrite it.
    Handled,
}

/// One compiled virtual-server section (`recv Authentication`, `process
/// PAP`, ...). Boxed-future `step` (rather than an async fn in the trait)
/// keeps this trait object-safe, since `PolicyTable` stores an open,
/// runtime-determined set of sections behind `Arc<dyn PolicySection>`.
pub trait PolicySection: Send + Sync {
    fn name(&self) -> &str;

    fn step<'a>(
        &'a self,
        request: &'a mut Request,
    ) -> Pin<Box<dyn Future<Output = PolicyOutcome> + Send + 'a>>;
}

/// Registry of the six fixed sections plus any number of named `process
/// <alias>` sections (§6 "Policy surface", §6b).
#[derive(Default, Clone)]
pub struct PolicyTable {
    recv: HashMap<PacketKind, Arc<dyn PolicySection>>,
    send: HashMap<PacketKind, Arc<dyn PolicySection>>,
    process: HashMap<String, Arc<dyn PolicySection>>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recv(&self, kind: PacketKind) -> Option<&Arc<dyn PolicySection>> {
        self.recv.get(&kind)
    }

    pub fn send(&self, kind: PacketKind) -> Option<&Arc<dyn PolicySection>> {
        self.send.get(&kind)
    }

    pub fn process(&self, alias: &str) -> Option<&Arc<dyn PolicySection>> {
        self.process.get(alias)
    }

    pub fn set_recv(&mut self, kind: PacketKind, section: Arc<dyn PolicySection>) {
        self.recv.insert(kind, section);
    }

    pub fn set_send(&mut self, kind: PacketKind, section: Arc<dyn PolicySection>) {
        self.send.insert(kind, section);
    }

    pub fn set_process(&mut self, alias: impl Into<String>, section: Arc<dyn PolicySection>) {
        self.process.insert(alias.into(), section);
    }
}

type StepFn =
    Box<dyn for<'a> Fn(&'a mut Request) -> Pin<Box<dyn Future<Output = PolicyOutcome> + Send + 'a>> + Send + Sync>;

/// A `PolicySection` built from a boxed closure, for tests and simple
/// static deployments that don't need a real policy-language compiler
/// (§6b "StaticPolicyTable").
pub struct FnSection {
    name: String,
    f: StepFn,
}

impl FnSection {
    pub fn new(name: impl Into<String>, f: StepFn) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            f,
        })
    }
}

impl PolicySection for FnSection {
    fn name(&self) -> &str {
        &self.name
    }

    fn step<'a>(
        &'a self,
        request: &'a mut Request,
    ) -> Pin<Box<dyn Future<Output = PolicyOutcome> + Send + 'a>> {
        (self.f)(request)
    }
}

/// Convenience builder assembling a `PolicyTable` from `FnSection`s.
#[derive(Default)]
pub struct StaticPolicyTable {
    table: PolicyTable,
}

impl StaticPolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recv(mut self, kind: PacketKind, name: &str, f: StepFn) -> Self {
        self.table.set_recv(kind, FnSection::new(name, f));
        self
    }

    pub fn send(mut self, kind: PacketKind, name: &str, f: StepFn) -> Self {
        self.table.set_send(kind, FnSection::new(name, f));
        self
    }

    pub fn process(mut self, alias: &str, f: StepFn) -> Self {
        self.table.set_process(alias, FnSection::new(alias, f));
        self
    }

    pub fn build(self) -> PolicyTable {
        self.table
    }
}

#[macro_export]
/// Boxes an `async move { ... }` block as a `StepFn` body without spelling
/// out the `Pin<Box<dyn Future<...>>>` at every call site.
macro_rules! policy_fn {
    (|$req:ident| $body:expr) => {
        Box::new(move |$req: &mut $crate::request::Request| {
            Box::pin(async move { $body }) as std::pin::Pin<Box<dyn std::future::Future<Output = $crate::policy::PolicyOutcome> + Send + '_>>
        })
    };
}
