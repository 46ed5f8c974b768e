//! Monarch - Kubernetes operator for Monarch worker meshes
//!
//! A `MonarchMesh` declares a group of Monarch worker pods. The operator keeps
//! two children in sync with it: a headless Service giving every worker a
//! stable DNS name, and a StatefulSet running the workers. Observed replica
//! counts and a `Ready` condition are written back to the mesh status.
//!
//! # Modules
//!
//! - [`crd`] - MonarchMesh Custom Resource Definition and status types
//! - [`identity`] - Child naming and label scheme
//! - [`projector`] - Desired Service and StatefulSet for a mesh
//! - [`readiness`] - Ready condition derivation
//! - [`controller`] - Reconciliation loop and controller wiring
//! - [`events`] - Kubernetes Event publishing
//! - [`config`] - Operator configuration
//! - [`startup`] - CRD installation
//! - [`retry`] - Backoff for startup calls
//! - [`telemetry`] - Logging setup
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod events;
pub mod identity;
pub mod projector;
pub mod readiness;
pub mod retry;
pub mod startup;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
