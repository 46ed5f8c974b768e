//! Naming and label scheme for MonarchMesh children
//!
//! Every child name and selector is a pure function of the parent name, so
//! two meshes in a namespace can never claim the same objects.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::reflector::ObjectRef;
use kube::Resource;

use crate::config::MeshConfig;
use crate::crd::MonarchMesh;

/// Names of the objects derived from one MonarchMesh
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildNames {
    /// Headless Service name
    pub endpoint: String,
    /// StatefulSet name
    pub group: String,
}

/// Derive child object names from the parent name
pub fn child_names(mesh_name: &str, config: &MeshConfig) -> ChildNames {
    ChildNames {
        endpoint: format!("{}{}", mesh_name, config.service_suffix),
        group: mesh_name.to_string(),
    }
}

/// Labels selecting the pods of one mesh
pub fn selector_labels(mesh_name: &str, config: &MeshConfig) -> BTreeMap<String, String> {
    BTreeMap::from([
        (config.mesh_label_key.clone(), mesh_name.to_string()),
        (config.app_label_key.clone(), config.app_label_value.clone()),
    ])
}

/// Fully-qualified DNS name of a Service
pub fn service_fqdn(service_name: &str, namespace: &str, config: &MeshConfig) -> String {
    format!(
        "{}.{}.svc.{}",
        service_name, namespace, config.cluster_domain
    )
}

/// Resolve a child object back to the MonarchMesh that controls it
///
/// Only a controller owner reference of the MonarchMesh kind counts; plain
/// owner references and foreign controllers are ignored.
pub fn mesh_for_child(meta: &ObjectMeta) -> Option<ObjectRef<MonarchMesh>> {
    let namespace = meta.namespace.as_deref()?;
    let api_version = MonarchMesh::api_version(&());
    let kind = MonarchMesh::kind(&());

    meta.owner_references
        .as_deref()?
        .iter()
        .find(|owner| {
            owner.controller == Some(true) && owner.kind == kind && owner.api_version == api_version
        })
        .map(|owner| ObjectRef::new(&owner.name).within(namespace))
}
