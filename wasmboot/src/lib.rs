// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Single-shot bootstrap for a precompiled WebAssembly payload.
//!
//! The bootstrap retrieves a binary module over HTTP (always bypassing
//! caches), compiles and links it against a host-provided capability table in
//! one combined asynchronous step, and then transfers control to its entry
//! routine. The module's own logic is opaque; only its import/export surface
//! is of interest here.
//!
//! The whole sequence is one pass through
//!
//! ```text
//! Unstarted → StrategyResolved → Fetching → Instantiating → Running
//!                                   │              │           │
//!                                   └──► Failed ◄──┘       Terminated
//! ```
//!
//! with no transition back to an earlier phase. Failures are returned as
//! [`Error`] values and logged with kind and message by exactly one handler in
//! [`Bootstrap::run`]; nothing is swallowed.

mod bridge;
mod driver;
mod errors;
mod pipeline;
mod strategy;

pub use bridge::{HostBridge, HostState};
pub use driver::{DEFAULT_ENTRY, Driver, ExecutionHandle};
pub use errors::Error;
pub use pipeline::{LoadPipeline, Loaded, fetch, instantiate};
pub use strategy::{PayloadSource, SourceKind, Strategy};

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Builds the engine every bootstrap instantiates against.
///
/// Async support is on because every call into the guest goes through the
/// async entrypoints.
pub fn engine() -> Result<wasmtime::Engine> {
    let mut config = wasmtime::Config::new();
    config.async_support(true);
    wasmtime::Engine::new(&config).map_err(|e| Error::Engine(format!("{e:#}")))
}

/// Where the bootstrap finds the payload and what it calls once linked.
#[derive(Debug, Clone)]
pub struct BootConfig {
    /// Resource locator of the binary payload.
    pub payload_url: String,
    /// Name of the entry export to invoke. Defaults to [`DEFAULT_ENTRY`].
    pub entry: String,
}

impl BootConfig {
    pub fn new(payload_url: impl Into<String>) -> Self {
        Self {
            payload_url: payload_url.into(),
            entry: DEFAULT_ENTRY.into(),
        }
    }

    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }
}

/// Observable progress of the bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unstarted,
    StrategyResolved,
    Fetching,
    Instantiating,
    Running,
    /// The entry routine returned and control came back to the bootstrap.
    Terminated,
    /// Retrieval or instantiation failed; the driver was never invoked.
    Failed,
}

/// Sequences the whole bootstrap: strategy resolution, fetch + instantiate,
/// control transfer.
///
/// Single-shot per value; a second [`run`](Bootstrap::run) observes the
/// pipeline guard and fails with [`Error::AlreadyLoaded`].
#[derive(Debug)]
pub struct Bootstrap {
    config: BootConfig,
    client: reqwest::Client,
    bridge: HostBridge,
    pipeline: LoadPipeline,
    loaded: Option<Loaded>,
    phase: Phase,
}

impl Bootstrap {
    /// Builds a bootstrap with the built-in `host` capability namespace.
    pub fn new(config: BootConfig) -> Result<Self> {
        let engine = engine()?;
        let bridge = HostBridge::with_default_capabilities(&engine)?;
        Ok(Self::with_bridge(config, bridge))
    }

    /// Builds a bootstrap around a caller-populated bridge.
    ///
    /// The bridge must be fully initialized before [`run`](Bootstrap::run) is
    /// called; it is sealed when instantiation begins.
    pub fn with_bridge(config: BootConfig, bridge: HostBridge) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            bridge,
            pipeline: LoadPipeline::new(),
            loaded: None,
            phase: Phase::Unstarted,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The bridge, for inspection (e.g. of the instance's memory) after the
    /// entry routine returned.
    pub fn bridge_mut(&mut self) -> &mut HostBridge {
        &mut self.bridge
    }

    /// Both load artifacts, present once the pipeline has succeeded.
    pub fn loaded(&self) -> Option<&Loaded> {
        self.loaded.as_ref()
    }

    /// Runs the bootstrap to completion.
    ///
    /// This is the single top-level failure handler: any error out of the
    /// stages is logged here with its kind and message, then returned.
    pub async fn run(&mut self) -> Result<()> {
        match self.run_inner().await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(kind = e.kind(), "bootstrap failed: {e}");
                Err(e)
            }
        }
    }

    async fn run_inner(&mut self) -> Result<()> {
        // Stage ordering is load-bearing: the strategy must be resolved before
        // the first fetch byte, and both module and instance must exist before
        // the driver runs.
        self.pipeline.begin()?;

        let strategy = Strategy::resolve(SourceKind::Response);
        self.phase = Phase::StrategyResolved;

        self.phase = Phase::Fetching;
        let source = match fetch(&self.client, &self.config.payload_url).await {
            Ok(source) => source,
            Err(e) => {
                self.phase = Phase::Failed;
                return Err(e);
            }
        };

        self.phase = Phase::Instantiating;
        let loaded = match instantiate(&strategy, &mut self.bridge, source).await {
            Ok(loaded) => loaded,
            Err(e) => {
                self.phase = Phase::Failed;
                return Err(e);
            }
        };

        self.phase = Phase::Running;
        let result = Driver::run(&mut self.bridge, &loaded, &self.config.entry).await;
        self.loaded = Some(loaded);
        self.phase = Phase::Terminated;
        result
    }
}
