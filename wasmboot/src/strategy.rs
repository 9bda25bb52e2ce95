// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Streaming-instantiation capability resolution.
//!
//! Hosts differ in whether a payload can be consumed while it is still in
//! flight. Instead of patching ambient global state the resolved capability is
//! an explicit [`Strategy`] value, constructed once per bootstrap and passed
//! by reference into the pipeline. Resolution is pure: resolving the same
//! source kind twice yields an equal value, so there is nothing to double-wrap
//! and no failure path.

use futures_util::StreamExt;

use crate::errors::Error;
use crate::Result;

/// The 8-byte preamble every valid WebAssembly binary starts with.
const WASM_PREAMBLE: [u8; 8] = [0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

/// How the payload bytes are materialized before compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Consume the payload chunk-by-chunk while the transfer is in flight,
    /// rejecting non-WebAssembly payloads as soon as the preamble arrives.
    Streaming,
    /// The fallback: await the complete payload, materialize it into one
    /// in-memory buffer and instantiate against that buffer.
    Buffered,
}

/// What kind of source the payload will arrive from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// An in-flight network response whose body streams in.
    Response,
    /// A byte buffer that is already fully materialized.
    Buffer,
}

impl Strategy {
    /// Resolves the instantiation strategy for a payload source.
    ///
    /// Infallible and idempotent: the result depends only on the source kind.
    pub fn resolve(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Response => Self::Streaming,
            SourceKind::Buffer => Self::Buffered,
        }
    }
}

/// A retrieved-but-not-yet-consumed binary payload.
#[derive(Debug)]
pub enum PayloadSource {
    /// A successful network response, body not yet consumed.
    Response(reqwest::Response),
    /// Pre-materialized bytes, e.g. handed in by a test harness.
    Buffer(Vec<u8>),
}

impl PayloadSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Response(_) => SourceKind::Response,
            Self::Buffer(_) => SourceKind::Buffer,
        }
    }

    /// Materializes the payload according to `strategy`.
    ///
    /// Both arms must yield byte-identical output for identical input; they
    /// differ only in how eagerly the transfer is consumed and validated.
    pub(crate) async fn materialize(self, strategy: &Strategy) -> Result<Vec<u8>> {
        match strategy {
            Strategy::Streaming => self.stream_chunks().await,
            Strategy::Buffered => self.buffer_all().await,
        }
    }

    /// Polyfill path: await the full response, then hand back one buffer.
    async fn buffer_all(self) -> Result<Vec<u8>> {
        match self {
            Self::Response(resp) => {
                let url = resp.url().to_string();
                let bytes = resp.bytes().await.map_err(|e| Error::Retrieval {
                    url,
                    reason: format!("failed to read response body: {e}"),
                })?;
                Ok(bytes.to_vec())
            }
            Self::Buffer(bytes) => Ok(bytes),
        }
    }

    /// Streaming path: consume the body chunk-by-chunk as it arrives and
    /// reject payloads whose preamble is not WebAssembly before the transfer
    /// completes.
    async fn stream_chunks(self) -> Result<Vec<u8>> {
        let resp = match self {
            Self::Response(resp) => resp,
            // A buffer has no in-flight chunks; fall back to the single-copy path.
            Self::Buffer(bytes) => {
                check_preamble(&bytes)?;
                return Ok(bytes);
            }
        };

        let url = resp.url().to_string();
        let mut buf = Vec::with_capacity(
            usize::try_from(resp.content_length().unwrap_or(0)).unwrap_or(0),
        );
        let mut preamble_checked = false;
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Retrieval {
                url: url.clone(),
                reason: format!("response body stream failed: {e}"),
            })?;
            buf.extend_from_slice(&chunk);

            if !preamble_checked && buf.len() >= WASM_PREAMBLE.len() {
                check_preamble(&buf)?;
                preamble_checked = true;
            }
        }

        // Short payloads never reach the in-flight check above.
        if !preamble_checked {
            check_preamble(&buf)?;
        }
        Ok(buf)
    }
}

fn check_preamble(bytes: &[u8]) -> Result<()> {
    if bytes.len() < WASM_PREAMBLE.len() || bytes[..WASM_PREAMBLE.len()] != WASM_PREAMBLE {
        return Err(Error::Instantiation(
            "payload is not a WebAssembly binary (bad preamble)".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_is_idempotent() {
        assert_eq!(Strategy::resolve(SourceKind::Response), Strategy::Streaming);
        assert_eq!(Strategy::resolve(SourceKind::Buffer), Strategy::Buffered);
        // Resolving twice yields an equal value; nothing gets double-wrapped.
        assert_eq!(
            Strategy::resolve(SourceKind::Response),
            Strategy::resolve(SourceKind::Response)
        );
    }

    #[tokio::test]
    async fn buffer_source_materializes_identically_under_both_strategies() {
        let bytes = wat::parse_str("(module)").unwrap();
        let streamed = PayloadSource::Buffer(bytes.clone())
            .materialize(&Strategy::Streaming)
            .await
            .unwrap();
        let buffered = PayloadSource::Buffer(bytes.clone())
            .materialize(&Strategy::Buffered)
            .await
            .unwrap();
        assert_eq!(streamed, bytes);
        assert_eq!(buffered, bytes);
    }

    #[tokio::test]
    async fn streaming_rejects_bad_preamble() {
        let err = PayloadSource::Buffer(b"<!DOCTYPE html>".to_vec())
            .materialize(&Strategy::Streaming)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "instantiation");
    }

    #[test]
    fn preamble_matches_real_module() {
        let bytes = wat::parse_str("(module)").unwrap();
        check_preamble(&bytes).unwrap();
        check_preamble(&bytes[..4]).unwrap_err();
    }
}
