//! MonarchMesh Custom Resource Definition
//!
//! A MonarchMesh describes a group of Monarch worker pods with stable network
//! identity. The controller derives a headless Service and a StatefulSet from
//! it and reports their observed state back through the status subresource.

use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{find_condition, Condition, ConditionStatus, READY_CONDITION};

/// Specification for a MonarchMesh
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "pytorch.monarch.io",
    version = "v1",
    kind = "MonarchMesh",
    plural = "monarchmeshes",
    shortname = "mm",
    status = "MonarchMeshStatus",
    derive = "PartialEq",
    namespaced,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Service","type":"string","jsonPath":".status.serviceName"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MonarchMeshSpec {
    /// Number of Monarch worker pods
    ///
    /// The StatefulSet runs one replica when unset, but the mesh is never
    /// reported Ready without an explicit target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 1))]
    pub replicas: Option<i32>,

    /// Pod template for Monarch workers, copied into the StatefulSet
    pub template: PodTemplateSpec,

    /// Port workers listen on for mesh communication (defaults to 26600)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 1, max = 65535))]
    pub port: Option<i32>,
}

/// Observed state of a MonarchMesh
///
/// Fully recomputed from the children on every pass.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonarchMeshStatus {
    /// Number of pods targeted by the StatefulSet
    #[serde(default)]
    pub replicas: i32,

    /// Number of pods that are ready
    #[serde(default)]
    pub ready_replicas: i32,

    /// Fully-qualified DNS name of the headless Service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    /// Conditions, at most one per type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl MonarchMeshStatus {
    /// Returns true if the Ready condition is present and True
    pub fn is_ready(&self) -> bool {
        find_condition(&self.conditions, READY_CONDITION)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }
}
