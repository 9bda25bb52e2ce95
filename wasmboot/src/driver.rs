// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Control transfer into the instantiated module.
//!
//! The driver only ever sees a fully linked [`Loaded`] pair, so it cannot run
//! before both module and instance exist. It does not interpret any return
//! value; completion is observed solely as control returning to the caller,
//! and a module designed to run forever suspends the bootstrap indefinitely.

use tokio::task::JoinHandle;

use crate::bridge::HostBridge;
use crate::errors::Error;
use crate::pipeline::Loaded;
use crate::Result;

/// The entry export Go- and WASI-style payloads conventionally expose.
pub const DEFAULT_ENTRY: &str = "_start";

pub struct Driver;

impl Driver {
    /// Invokes the module's entry routine and suspends until it returns.
    ///
    /// Emits the load-complete diagnostic exactly once, strictly before the
    /// first instruction of guest code runs. That line is advisory only; its
    /// purpose is to tell "load completed" apart from "execution completed"
    /// when troubleshooting.
    pub async fn run(bridge: &mut HostBridge, loaded: &Loaded, entry: &str) -> Result<()> {
        let func = loaded
            .instance
            .get_func(bridge.store_mut(), entry)
            .ok_or_else(|| Error::MissingEntry(entry.into()))?;
        let typed = func
            .typed::<(), ()>(bridge.store_mut())
            .map_err(Error::execution)?;

        tracing::info!(entry, "load complete, transferring control to module");

        typed
            .call_async(bridge.store_mut(), ())
            .await
            .map_err(Error::execution)
    }

    /// Same semantics as [`Driver::run`], on a spawned task.
    ///
    /// The current scope defines no cancellation or timeout policy; the handle
    /// exists so one can be added without reshaping the bootstrap.
    pub fn spawn(mut bridge: HostBridge, loaded: Loaded, entry: String) -> ExecutionHandle {
        ExecutionHandle {
            inner: tokio::spawn(async move { Self::run(&mut bridge, &loaded, &entry).await }),
        }
    }
}

/// A handle onto a spawned entry-routine invocation.
#[derive(Debug)]
pub struct ExecutionHandle {
    inner: JoinHandle<Result<()>>,
}

impl ExecutionHandle {
    /// Requests cancellation of the running module.
    pub fn abort(&self) {
        self.inner.abort();
    }

    /// Suspends until the entry routine completes (or the task is aborted).
    pub async fn join(self) -> Result<()> {
        match self.inner.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => {
                Err(Error::Execution("execution task was cancelled".into()))
            }
            Err(e) => Err(Error::Execution(format!("execution task panicked: {e}"))),
        }
    }
}
