//! Fetch and instantiate, as one combined asynchronous step.
//!
//! One retrieval, one instantiation, per [`LoadPipeline`]. The guard is not
//! advisory: a second `load` returns [`Error::AlreadyLoaded`] instead of
//! silently producing a second live instance.

use core::sync::atomic::{AtomicBool, Ordering};

use reqwest::header;
use wasmtime::{Instance, Module};

use crate::bridge::HostBridge;
use crate::errors::Error;
use crate::strategy::{PayloadSource, Strategy};
use crate::Result;

/// The outcome of a successful load: both artifacts, retained for the rest of
/// the process.
#[derive(Debug)]
pub struct Loaded {
    /// The immutable, validated compiled module.
    pub module: Module,
    /// The live instance linked against the bridge's capability table.
    pub instance: Instance,
}

/// Single-shot guard around the fetch/instantiate sequence.
#[derive(Debug, Default)]
pub struct LoadPipeline {
    loaded: AtomicBool,
}

impl LoadPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the pipeline's single shot. The first call succeeds, every
    /// later call fails.
    pub(crate) fn begin(&self) -> Result<()> {
        if self.loaded.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyLoaded);
        }
        Ok(())
    }

    /// The combined operation: retrieve the payload, then compile and link it
    /// against `bridge`'s capability table.
    pub async fn load(
        &self,
        client: &reqwest::Client,
        url: &str,
        strategy: &Strategy,
        bridge: &mut HostBridge,
    ) -> Result<Loaded> {
        self.begin()?;
        let source = fetch(client, url).await?;
        instantiate(strategy, bridge, source).await
    }
}

/// Issues the single GET for the payload, instructing every cache along the
/// way to hand back fresh bytes.
pub async fn fetch(client: &reqwest::Client, url: &str) -> Result<PayloadSource> {
    tracing::debug!(url, "retrieving payload");
    let response = client
        .get(url)
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::PRAGMA, "no-cache")
        .send()
        .await
        .map_err(|e| Error::Retrieval {
            url: url.into(),
            reason: e.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Retrieval {
            url: url.into(),
            reason: format!("unexpected status {status}"),
        });
    }
    Ok(PayloadSource::Response(response))
}

/// Compiles the payload and links it against the bridge's capability table,
/// yielding both the module and the instance.
///
/// The bridge is sealed before the first byte is compiled; a partially
/// populated capability table can therefore never reach linking. On any
/// failure the whole pipeline fails and no partial instance escapes.
pub async fn instantiate(
    strategy: &Strategy,
    bridge: &mut HostBridge,
    source: PayloadSource,
) -> Result<Loaded> {
    bridge.seal();

    let bytes = source.materialize(strategy).await?;
    tracing::debug!(len = bytes.len(), ?strategy, "payload materialized, compiling");

    let module = Module::new(bridge.engine(), &bytes).map_err(Error::instantiation)?;
    let instance = bridge.instantiate(&module).await?;

    Ok(Loaded { module, instance })
}
