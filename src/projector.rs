//! Desired-state projection for MonarchMesh children
//!
//! Pure functions mapping a MonarchMesh (plus operator config) to the headless
//! Service and StatefulSet it should own. Nothing here talks to the cluster;
//! the reconciler decides whether to create or converge.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{PodTemplateSpec, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use sha2::{Digest, Sha256};

use crate::config::MeshConfig;
use crate::crd::MonarchMesh;
use crate::identity::{child_names, selector_labels};
use crate::{Error, Result};

/// Annotation on the StatefulSet recording the hash of the projected pod template
///
/// The API server defaults dozens of pod template fields, so comparing the
/// stored template against the projection would report drift on every pass.
/// Comparing hashes of the projection itself does not.
pub const TEMPLATE_HASH_ANNOTATION: &str = "monarch.pytorch.org/template-hash";

/// Replica count used for the StatefulSet when `spec.replicas` is unset
pub const DEFAULT_GROUP_REPLICAS: i32 = 1;

/// Build the controller owner reference pointing at the mesh
///
/// `blockOwnerDeletion` is set so foreground deletion of the mesh waits for
/// its children.
pub fn owner_reference(mesh: &MonarchMesh) -> Result<OwnerReference> {
    let name = mesh.meta().name.clone().unwrap_or_default();
    let mut owner = mesh.controller_owner_ref(&()).ok_or_else(|| {
        Error::projection(
            name,
            "MonarchMesh has no name or uid; it has not been persisted",
        )
    })?;
    owner.block_owner_deletion = Some(true);
    Ok(owner)
}

/// Resolve the mesh port, applying the configured default when unset
pub fn resolve_port(mesh: &MonarchMesh, config: &MeshConfig) -> Result<i32> {
    let port = mesh.spec.port.unwrap_or(config.default_port);
    if !(1..=65535).contains(&port) {
        return Err(Error::projection(
            mesh.name_any(),
            format!("port {port} is out of range 1-65535"),
        ));
    }
    Ok(port)
}

/// Project the headless Service that gives each worker a stable DNS name
pub fn project_endpoint(mesh: &MonarchMesh, config: &MeshConfig) -> Result<Service> {
    let owner = owner_reference(mesh)?;
    let name = mesh.name_any();
    let port = resolve_port(mesh, config)?;
    let labels = selector_labels(&name, config);

    Ok(Service {
        metadata: child_meta(
            child_names(&name, config).endpoint,
            mesh.namespace(),
            labels.clone(),
            owner,
        ),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some(config.port_name.clone()),
                port,
                protocol: Some("TCP".to_string()),
                target_port: Some(IntOrString::Int(port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Project the StatefulSet running the workers
///
/// `endpoint_name` is the governing Service; the endpoint must be projected
/// (and converged) first.
pub fn project_group(
    mesh: &MonarchMesh,
    endpoint_name: &str,
    config: &MeshConfig,
) -> Result<StatefulSet> {
    let owner = owner_reference(mesh)?;
    let name = mesh.name_any();
    let labels = selector_labels(&name, config);
    let template = project_template(&mesh.spec.template, &labels);
    let hash = template_hash(&template)?;

    let mut metadata = child_meta(
        child_names(&name, config).group,
        mesh.namespace(),
        labels.clone(),
        owner,
    );
    metadata.annotations = Some(BTreeMap::from([(
        TEMPLATE_HASH_ANNOTATION.to_string(),
        hash,
    )]));

    Ok(StatefulSet {
        metadata,
        spec: Some(StatefulSetSpec {
            replicas: Some(mesh.spec.replicas.unwrap_or(DEFAULT_GROUP_REPLICAS)),
            selector: LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            },
            service_name: endpoint_name.to_string(),
            template,
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Copy the user's pod template, merging the selector labels into its metadata
///
/// Selector labels win over user labels with the same key; everything else in
/// the template is carried over as-is.
fn project_template(
    template: &PodTemplateSpec,
    selector: &BTreeMap<String, String>,
) -> PodTemplateSpec {
    let mut template = template.clone();
    let metadata = template.metadata.get_or_insert_with(ObjectMeta::default);
    metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(selector.iter().map(|(k, v)| (k.clone(), v.clone())));
    template
}

/// Compute a stable 16-char hex digest of a pod template
pub fn template_hash(template: &PodTemplateSpec) -> Result<String> {
    let bytes = serde_json::to_vec(template)?;
    let digest = Sha256::digest(&bytes);
    Ok(digest[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            let _ = write!(s, "{:02x}", b);
            s
        }))
}

fn child_meta(
    name: String,
    namespace: Option<String>,
    labels: BTreeMap<String, String>,
    owner: OwnerReference,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace,
        labels: Some(labels),
        owner_references: Some(vec![owner]),
        ..Default::default()
    }
}
