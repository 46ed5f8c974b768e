//! Operator configuration
//!
//! Naming and defaulting knobs shared by the identity scheme, the projector
//! and the status writer. The binary fills these from flags and `MONARCH_*`
//! environment variables; everything else uses [`MeshConfig::default`].

use std::time::Duration;

use crate::{Error, Result};

/// Default port for Monarch mesh communication when the spec leaves it unset
pub const DEFAULT_MESH_PORT: i32 = 26600;

/// Default resync interval for periodic self-healing passes
pub const DEFAULT_RESYNC_SECS: u64 = 300;

/// Configuration for the MonarchMesh controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeshConfig {
    /// Label key whose value is the owning MonarchMesh name
    pub mesh_label_key: String,
    /// Standard application name label key
    pub app_label_key: String,
    /// Value of the application name label on worker pods
    pub app_label_value: String,
    /// Port used when `spec.port` is unset
    pub default_port: i32,
    /// Suffix appended to the mesh name to form the headless Service name
    pub service_suffix: String,
    /// Name of the Service port
    pub port_name: String,
    /// Cluster DNS domain used to build the Service FQDN
    pub cluster_domain: String,
    /// Requeue interval after a successful pass
    pub resync_interval: Duration,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            mesh_label_key: "monarch.pytorch.org/mesh-name".to_string(),
            app_label_key: "app.kubernetes.io/name".to_string(),
            app_label_value: "monarch-worker".to_string(),
            default_port: DEFAULT_MESH_PORT,
            service_suffix: "-svc".to_string(),
            port_name: "monarch".to_string(),
            cluster_domain: "cluster.local".to_string(),
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_SECS),
        }
    }
}

impl MeshConfig {
    /// Validate the configuration
    ///
    /// Rejects empty label keys and suffixes (which would make child names
    /// collide with the parent's) and ports outside the TCP range.
    pub fn validate(&self) -> Result<()> {
        if self.mesh_label_key.is_empty() || self.app_label_key.is_empty() {
            return Err(Error::config("label keys cannot be empty"));
        }
        if self.mesh_label_key == self.app_label_key {
            return Err(Error::config(format!(
                "mesh label key and app label key must differ (both '{}')",
                self.mesh_label_key
            )));
        }
        if self.service_suffix.is_empty() {
            return Err(Error::config(
                "service suffix cannot be empty: the Service name would equal the StatefulSet name",
            ));
        }
        if self.port_name.is_empty() {
            return Err(Error::config("port name cannot be empty"));
        }
        if !(1..=65535).contains(&self.default_port) {
            return Err(Error::config(format!(
                "default port {} is out of range",
                self.default_port
            )));
        }
        if self.cluster_domain.is_empty() {
            return Err(Error::config("cluster domain cannot be empty"));
        }
        Ok(())
    }
}
