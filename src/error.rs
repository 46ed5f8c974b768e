//! Error types for the Monarch operator
//!
//! Store errors carry the identity of the object being read or written so a
//! failed reconcile pass can be traced back to the exact child that broke it.
//! A missing parent is never an error: the reconciler treats it as a no-op.

use thiserror::Error;

/// Main error type for Monarch operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error outside of a specific object read or write
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Reading an object from the cluster state store failed
    #[error("failed to read {kind} {namespace}/{name}: {source}")]
    StoreRead {
        /// Object kind (e.g. "Service")
        kind: String,
        /// Object namespace
        namespace: String,
        /// Object name
        name: String,
        /// The underlying kube-rs error
        #[source]
        source: kube::Error,
    },

    /// Writing an object to the cluster state store failed
    #[error("failed to {operation} {kind} {namespace}/{name}: {source}")]
    StoreWrite {
        /// Object kind (e.g. "StatefulSet")
        kind: String,
        /// Object namespace
        namespace: String,
        /// Object name
        name: String,
        /// Write operation (create, update, update-status)
        operation: String,
        /// The underlying kube-rs error
        #[source]
        source: kube::Error,
    },

    /// The desired state of a child could not be computed from the parent
    ///
    /// Indicates a schema invariant violated upstream (missing uid, port out
    /// of range) rather than a transient failure.
    #[error("projection error for {mesh}: {message}")]
    Projection {
        /// Name of the MonarchMesh being projected
        mesh: String,
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Invalid operator configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },
}

impl Error {
    /// Create a store read error for the given object identity
    pub fn store_read(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        source: kube::Error,
    ) -> Self {
        Self::StoreRead {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
            source,
        }
    }

    /// Create a store write error for the given object identity and operation
    pub fn store_write(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        operation: impl Into<String>,
        source: kube::Error,
    ) -> Self {
        Self::StoreWrite {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
            operation: operation.into(),
            source,
        }
    }

    /// Create a projection error for the given mesh
    pub fn projection(mesh: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Projection {
            mesh: mesh.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Returns true if the store rejected a write based on a stale read
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::StoreWrite { source, .. } | Self::StoreRead { source, .. } => {
                api_code(source) == Some(409)
            }
            Self::Kube { source } => api_code(source) == Some(409),
            _ => false,
        }
    }

    /// Returns true if re-running the pass may succeed without a spec change
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Projection { .. } | Self::Config { .. })
    }
}

fn api_code(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(ae) => Some(ae.code),
        _ => None,
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
