use core::fmt;

/// Error type for the crate.
///
/// Every failure the bootstrap can observe maps to exactly one variant so the
/// top-level handler can log a stable kind next to the human-readable message.
/// Strategy resolution has no variant on purpose: it is a pure total function
/// and cannot fail.
#[derive(Debug)]
pub enum Error {
    /// The binary payload could not be retrieved from the network.
    Retrieval {
        /// The resource locator the retrieval was issued against.
        url: String,
        /// A human-readable description of the failure.
        reason: String,
    },
    /// The payload was malformed or a required import could not be resolved
    /// during linking.
    Instantiation(String),
    /// The pipeline already produced an instance; it is single-shot.
    AlreadyLoaded,
    /// The capability name is already defined in the bridge.
    AlreadyDefined {
        /// The defined module namespace.
        module: String,
        /// The defined field name.
        field: String,
    },
    /// The bridge was mutated after instantiation had begun.
    BridgeSealed {
        /// The module namespace of the rejected definition.
        module: String,
        /// The field name of the rejected definition.
        field: String,
    },
    /// The instantiated module does not export the expected entry routine.
    MissingEntry(String),
    /// The entry routine trapped or its signature did not match.
    Execution(String),
    /// The host engine could not be constructed.
    Engine(String),
}

impl Error {
    /// Stable, machine-greppable failure kind for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Retrieval { .. } => "retrieval",
            Self::Instantiation(_) => "instantiation",
            Self::AlreadyLoaded => "already-loaded",
            Self::AlreadyDefined { .. } => "already-defined",
            Self::BridgeSealed { .. } => "bridge-sealed",
            Self::MissingEntry(_) => "missing-entry",
            Self::Execution(_) => "execution",
            Self::Engine(_) => "engine",
        }
    }

    pub(crate) fn instantiation(err: wasmtime::Error) -> Self {
        Self::Instantiation(format!("{err:#}"))
    }

    pub(crate) fn execution(err: wasmtime::Error) -> Self {
        Self::Execution(format!("{err:#}"))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retrieval { url, reason } => {
                f.write_fmt(format_args!("failed to retrieve payload {url}: {reason}"))
            }
            Self::Instantiation(reason) => {
                f.write_fmt(format_args!("failed to instantiate payload: {reason}"))
            }
            Self::AlreadyLoaded => {
                f.write_str("pipeline already produced an instance for this process")
            }
            Self::AlreadyDefined { module, field } => {
                f.write_fmt(format_args!("capability {module}::{field} is already defined"))
            }
            Self::BridgeSealed { module, field } => f.write_fmt(format_args!(
                "cannot define capability {module}::{field}: bridge is sealed for instantiation"
            )),
            Self::MissingEntry(name) => {
                f.write_fmt(format_args!("module does not export entry routine `{name}`"))
            }
            Self::Execution(reason) => {
                f.write_fmt(format_args!("entry routine failed: {reason}"))
            }
            Self::Engine(reason) => {
                f.write_fmt(format_args!("failed to construct engine: {reason}"))
            }
        }
    }
}

impl core::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let err = Error::Retrieval {
            url: "http://example.invalid/module.wasm".into(),
            reason: "connection refused".into(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("http://example.invalid/module.wasm"));
        assert!(rendered.contains("connection refused"));
        assert_eq!(err.kind(), "retrieval");
    }

    #[test]
    fn kinds_are_distinct() {
        let errs = [
            Error::Instantiation("x".into()),
            Error::AlreadyLoaded,
            Error::MissingEntry("_start".into()),
            Error::Execution("trap".into()),
        ];
        let kinds: Vec<_> = errs.iter().map(Error::kind).collect();
        assert_eq!(kinds, ["instantiation", "already-loaded", "missing-entry", "execution"]);
    }
}
