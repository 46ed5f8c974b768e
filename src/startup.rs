//! Operator startup: CRD installation

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};

use crate::controller::FIELD_MANAGER;
use crate::crd::MonarchMesh;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{Error, Result};

/// Name of the MonarchMesh CRD object
pub fn crd_name() -> String {
    MonarchMesh::crd().metadata.name.unwrap_or_default()
}

/// Render the MonarchMesh CRD as YAML
pub fn crd_yaml() -> Result<String> {
    serde_yaml::to_string(&MonarchMesh::crd()).map_err(|e| Error::serialization(e.to_string()))
}

/// Install or update the MonarchMesh CRD using server-side apply
///
/// Retries transient API failures; RBAC and validation errors fail at once.
pub async fn ensure_crd(client: &Client) -> Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let name = crd_name();
    let crd = MonarchMesh::crd();
    let patch = Patch::Apply(&crd);

    tracing::info!(crd = %name, "Installing MonarchMesh CRD...");
    retry_with_backoff(&RetryConfig::startup(), "install MonarchMesh CRD", is_transient, || {
        crds.patch(&name, &params, &patch)
    })
    .await?;
    tracing::info!(crd = %name, "MonarchMesh CRD installed/updated");
    Ok(())
}

/// API errors in the 4xx range (other than throttling) will not heal on retry
fn is_transient(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(ae) => ae.code == 429 || ae.code >= 500,
        _ => true,
    }
}
