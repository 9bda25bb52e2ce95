// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The host side of the import surface.
//!
//! A [`HostBridge`] owns the capability table (the [`Linker`]) and the
//! [`Store`] the instance will live in. It must be fully populated before
//! instantiation begins; the pipeline seals it at that point and any later
//! definition attempt is a hard error rather than undefined behavior.

use wasmtime::{Caller, Engine, Extern, Instance, IntoFunc, Linker, Store};

use crate::errors::Error;
use crate::Result;

/// Host-side state threaded through every capability call.
#[derive(Debug, Default)]
pub struct HostState {
    /// Label used in diagnostics emitted on behalf of the guest.
    pub guest_label: String,
}

/// Owns the capability table and the instance's store.
///
/// Logically 1:1 with the instance produced from it; the bridge itself never
/// owns the instance.
pub struct HostBridge {
    engine: Engine,
    linker: Linker<HostState>,
    store: Store<HostState>,
    sealed: bool,
}

impl HostBridge {
    /// Constructs an empty bridge. No capabilities are defined yet.
    pub fn new(engine: &Engine) -> Self {
        Self {
            engine: engine.clone(),
            linker: Linker::new(engine),
            store: Store::new(engine, HostState::default()),
            sealed: false,
        }
    }

    /// Constructs a bridge with the built-in `host` capability namespace.
    ///
    /// Currently that is `host::log(ptr, len)`, a console sink reading the
    /// message out of the guest's exported memory.
    pub fn with_default_capabilities(engine: &Engine) -> Result<Self> {
        let mut bridge = Self::new(engine);
        bridge.define_host_fn(
            "host",
            "log",
            |mut caller: Caller<'_, HostState>, ptr: u32, len: u32| {
                let Some(Extern::Memory(memory)) = caller.get_export("memory") else {
                    tracing::warn!("guest called host::log without an exported memory");
                    return;
                };
                let start = ptr as usize;
                let end = start.saturating_add(len as usize);
                match memory.data(&caller).get(start..end) {
                    Some(bytes) => {
                        let message = String::from_utf8_lossy(bytes);
                        tracing::info!(target: "wasmboot::guest", "{message}");
                    }
                    None => tracing::warn!(
                        ptr,
                        len,
                        "guest called host::log with an out-of-bounds range"
                    ),
                }
            },
        )?;
        Ok(bridge)
    }

    /// Defines a host function in the capability table.
    ///
    /// Fails once the bridge is sealed or when the name is already taken.
    pub fn define_host_fn<Params, Results>(
        &mut self,
        module: &str,
        name: &str,
        func: impl IntoFunc<HostState, Params, Results>,
    ) -> Result<()> {
        if self.sealed {
            return Err(Error::BridgeSealed {
                module: module.into(),
                field: name.into(),
            });
        }
        self.linker
            .func_wrap(module, name, func)
            .map_err(|_| Error::AlreadyDefined {
                module: module.into(),
                field: name.into(),
            })?;
        Ok(())
    }

    /// Seals the bridge. One-way; called by the pipeline when instantiation
    /// begins.
    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The store the instance lives in, e.g. for calling further exports
    /// after the entry routine returned.
    pub fn store_mut(&mut self) -> &mut Store<HostState> {
        &mut self.store
    }

    /// Links `module` against the capability table inside this bridge's store.
    pub(crate) async fn instantiate(&mut self, module: &wasmtime::Module) -> Result<Instance> {
        let Self { linker, store, .. } = self;
        linker
            .instantiate_async(&mut *store, module)
            .await
            .map_err(Error::instantiation)
    }

    /// Current size in bytes of the instance's exported linear memory.
    ///
    /// Non-owning: the export is re-resolved on every call because the
    /// instance may grow (and thereby move) its memory during execution.
    pub fn memory_size(&mut self, instance: &Instance) -> Option<usize> {
        let memory = instance.get_memory(&mut self.store, "memory")?;
        Some(memory.data_size(&self.store))
    }

    /// Copies `len` bytes starting at `offset` out of the instance's exported
    /// memory, or `None` when the range is out of bounds or no memory is
    /// exported.
    pub fn read_memory(
        &mut self,
        instance: &Instance,
        offset: usize,
        len: usize,
    ) -> Option<Vec<u8>> {
        let memory = instance.get_memory(&mut self.store, "memory")?;
        let end = offset.checked_add(len)?;
        memory.data(&self.store).get(offset..end).map(<[u8]>::to_vec)
    }
}

impl core::fmt::Debug for HostBridge {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HostBridge")
            .field("sealed", &self.sealed)
            .finish_non_exhaustive()
    }
}
