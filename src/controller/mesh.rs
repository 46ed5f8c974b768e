//! MonarchMesh controller implementation
//!
//! One reconcile pass reads the parent, converges the headless Service, then
//! the StatefulSet (whose `serviceName` depends on the Service), and finally
//! republishes observed state onto the parent's status subresource. Any
//! failure aborts the pass; the controller runtime retries it whole.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use super::converge::{converge_service, converge_stateful_set};
use crate::config::MeshConfig;
use crate::crd::{set_condition, MonarchMesh, MonarchMeshStatus};
use crate::events::{reasons, EventPublisher, KubeEventPublisher, MeshEvent};
use crate::identity::service_fqdn;
use crate::projector::{project_endpoint, project_group};
use crate::readiness::evaluate_ready;
use crate::Error;

/// Field manager recorded on status writes
pub const FIELD_MANAGER: &str = "monarch-controller";

/// Requeue delay after a write lost an optimistic-concurrency race
pub const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);

/// Requeue delay after any other retryable failure
pub const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Trait abstracting the cluster state store for MonarchMesh reconciliation
///
/// All operations are namespace-scoped and keyed by object name. Reads return
/// `Ok(None)` when the object does not exist. Updates carry the
/// `resourceVersion` of the object they were computed from, so a concurrent
/// writer turns them into conflicts instead of lost updates.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MeshKubeClient: Send + Sync {
    /// Read a MonarchMesh
    async fn get_mesh(&self, namespace: &str, name: &str) -> Result<Option<MonarchMesh>, Error>;

    /// Read a Service
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error>;

    /// Create a Service, returning the stored object
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, Error>;

    /// Replace a Service, returning the stored object
    async fn update_service(&self, namespace: &str, service: &Service) -> Result<Service, Error>;

    /// Read a StatefulSet
    async fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, Error>;

    /// Create a StatefulSet, returning the stored object
    async fn create_stateful_set(
        &self,
        namespace: &str,
        stateful_set: &StatefulSet,
    ) -> Result<StatefulSet, Error>;

    /// Replace a StatefulSet, returning the stored object
    async fn update_stateful_set(
        &self,
        namespace: &str,
        stateful_set: &StatefulSet,
    ) -> Result<StatefulSet, Error>;

    /// Write `mesh.status` through the status subresource
    async fn update_mesh_status(&self, mesh: &MonarchMesh) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct MeshKubeClientImpl {
    client: Client,
}

impl MeshKubeClientImpl {
    /// Create a new MeshKubeClientImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MeshKubeClient for MeshKubeClientImpl {
    async fn get_mesh(&self, namespace: &str, name: &str) -> Result<Option<MonarchMesh>, Error> {
        let api: Api<MonarchMesh> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| Error::store_read("MonarchMesh", namespace, name, e))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| Error::store_read("Service", namespace, name, e))
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), service)
            .await
            .map_err(|e| Error::store_write("Service", namespace, service.name_any(), "create", e))
    }

    async fn update_service(&self, namespace: &str, service: &Service) -> Result<Service, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let name = service.name_any();
        api.replace(&name, &PostParams::default(), service)
            .await
            .map_err(|e| Error::store_write("Service", namespace, &name, "update", e))
    }

    async fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, Error> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| Error::store_read("StatefulSet", namespace, name, e))
    }

    async fn create_stateful_set(
        &self,
        namespace: &str,
        stateful_set: &StatefulSet,
    ) -> Result<StatefulSet, Error> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), stateful_set)
            .await
            .map_err(|e| {
                Error::store_write("StatefulSet", namespace, stateful_set.name_any(), "create", e)
            })
    }

    async fn update_stateful_set(
        &self,
        namespace: &str,
        stateful_set: &StatefulSet,
    ) -> Result<StatefulSet, Error> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        let name = stateful_set.name_any();
        api.replace(&name, &PostParams::default(), stateful_set)
            .await
            .map_err(|e| Error::store_write("StatefulSet", namespace, &name, "update", e))
    }

    async fn update_mesh_status(&self, mesh: &MonarchMesh) -> Result<(), Error> {
        let namespace = mesh.namespace().unwrap_or_default();
        let name = mesh.name_any();
        let api: Api<MonarchMesh> = Api::namespaced(self.client.clone(), &namespace);

        // resourceVersion in a merge patch makes the API server reject the
        // write if the parent changed since it was read
        let status_patch = serde_json::json!({
            "metadata": { "resourceVersion": mesh.resource_version() },
            "status": mesh.status,
        });

        api.patch_status(
            &name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await
        .map_err(|e| Error::store_write("MonarchMesh", &namespace, &name, "update status", e))?;

        Ok(())
    }
}

/// Controller context shared by every reconcile pass
///
/// Read-only after construction, so concurrent passes for different meshes
/// share it without locking.
pub struct Context {
    /// Cluster state store (trait object for testability)
    pub kube: Arc<dyn MeshKubeClient>,
    /// Kubernetes Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Naming and defaulting configuration
    pub config: MeshConfig,
}

impl Context {
    /// Create a context from explicit collaborators
    pub fn new(
        kube: Arc<dyn MeshKubeClient>,
        events: Arc<dyn EventPublisher>,
        config: MeshConfig,
    ) -> Self {
        Self {
            kube,
            events,
            config,
        }
    }

    /// Create a context backed by a live cluster
    pub fn for_cluster(client: Client, config: MeshConfig) -> Self {
        Self::new(
            Arc::new(MeshKubeClientImpl::new(client.clone())),
            Arc::new(KubeEventPublisher::new(client, FIELD_MANAGER)),
            config,
        )
    }
}

/// Reconcile a MonarchMesh resource
///
/// Entry point for `kube::runtime::Controller`. The triggering object is only
/// used for its identity; [`reconcile_mesh`] re-reads the parent.
#[instrument(skip(mesh, ctx), fields(mesh = %mesh.name_any(), namespace = ?mesh.namespace()))]
pub async fn reconcile(mesh: Arc<MonarchMesh>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = mesh.name_any();
    let Some(namespace) = mesh.namespace() else {
        return Err(Error::projection(name, "MonarchMesh has no namespace"));
    };
    reconcile_mesh(&ctx, &namespace, &name).await
}

/// Run one reconcile pass for the mesh with the given identity
///
/// A mesh that no longer exists is not an error: its children are garbage
/// collected through their owner references.
pub async fn reconcile_mesh(ctx: &Context, namespace: &str, name: &str) -> Result<Action, Error> {
    let Some(mesh) = ctx.kube.get_mesh(namespace, name).await? else {
        debug!(mesh = %name, namespace = %namespace, "MonarchMesh not found, nothing to do");
        return Ok(Action::await_change());
    };

    if mesh.meta().deletion_timestamp.is_some() {
        debug!(mesh = %name, "MonarchMesh is being deleted, leaving children to garbage collection");
        return Ok(Action::await_change());
    }

    debug!(mesh = %name, generation = ?mesh.metadata.generation, "reconciling MonarchMesh");

    let endpoint = ensure_endpoint(ctx, &mesh, namespace).await?;
    let group = ensure_group(ctx, &mesh, namespace, &endpoint).await?;
    write_status(ctx, &mesh, namespace, &endpoint, &group).await?;

    Ok(Action::requeue(ctx.config.resync_interval))
}

/// Create or converge the headless Service, returning its name
async fn ensure_endpoint(
    ctx: &Context,
    mesh: &MonarchMesh,
    namespace: &str,
) -> Result<String, Error> {
    let desired = project_endpoint(mesh, &ctx.config)?;
    let name = desired.name_any();

    match ctx.kube.get_service(namespace, &name).await? {
        None => {
            ctx.kube.create_service(namespace, &desired).await?;
            info!(mesh = %mesh.name_any(), service = %name, "created headless Service");
            ctx.events
                .publish(
                    mesh,
                    MeshEvent::child_created(reasons::SERVICE_CREATED, "headless Service", &name),
                )
                .await;
        }
        Some(current) => match converge_service(&current, &desired) {
            Some(updated) => {
                ctx.kube.update_service(namespace, &updated).await?;
                info!(mesh = %mesh.name_any(), service = %name, "updated headless Service");
            }
            None => debug!(service = %name, "Service up to date"),
        },
    }

    Ok(name)
}

/// Create or converge the StatefulSet, returning the stored object
async fn ensure_group(
    ctx: &Context,
    mesh: &MonarchMesh,
    namespace: &str,
    endpoint: &str,
) -> Result<StatefulSet, Error> {
    let desired = project_group(mesh, endpoint, &ctx.config)?;
    let name = desired.name_any();

    match ctx.kube.get_stateful_set(namespace, &name).await? {
        None => {
            let created = ctx.kube.create_stateful_set(namespace, &desired).await?;
            info!(
                mesh = %mesh.name_any(),
                stateful_set = %name,
                replicas = ?desired.spec.as_ref().and_then(|s| s.replicas),
                "created StatefulSet"
            );
            ctx.events
                .publish(
                    mesh,
                    MeshEvent::child_created(reasons::STATEFUL_SET_CREATED, "StatefulSet", &name),
                )
                .await;
            Ok(created)
        }
        Some(current) => match converge_stateful_set(&current, &desired) {
            Some(updated) => {
                let stored = ctx.kube.update_stateful_set(namespace, &updated).await?;
                info!(mesh = %mesh.name_any(), stateful_set = %name, "updated StatefulSet");
                Ok(stored)
            }
            None => {
                debug!(stateful_set = %name, "StatefulSet up to date");
                Ok(current)
            }
        },
    }
}

/// Recompute the mesh status from the observed StatefulSet and persist it if it changed
async fn write_status(
    ctx: &Context,
    mesh: &MonarchMesh,
    namespace: &str,
    endpoint: &str,
    group: &StatefulSet,
) -> Result<(), Error> {
    let previous = mesh.status.clone().unwrap_or_default();
    let status = compute_status(mesh, namespace, endpoint, group, &ctx.config);

    if mesh.status.as_ref() == Some(&status) {
        debug!(mesh = %mesh.name_any(), "status unchanged, skipping write");
        return Ok(());
    }

    let was_ready = previous.is_ready();
    let is_ready = status.is_ready();
    let summary = format!("{}/{} replicas ready", status.ready_replicas, status.replicas);

    let mut updated = mesh.clone();
    updated.status = Some(status);
    ctx.kube.update_mesh_status(&updated).await?;
    debug!(mesh = %mesh.name_any(), ready = is_ready, "updated MonarchMesh status");

    if is_ready != was_ready {
        info!(mesh = %mesh.name_any(), ready = is_ready, "MonarchMesh readiness changed");
        ctx.events
            .publish(mesh, MeshEvent::readiness_changed(is_ready, summary))
            .await;
    }

    Ok(())
}

/// Derive the full status from the observed children
///
/// Existing conditions are merged rather than replaced so an unchanged Ready
/// status keeps its transition time.
fn compute_status(
    mesh: &MonarchMesh,
    namespace: &str,
    endpoint: &str,
    group: &StatefulSet,
    config: &MeshConfig,
) -> MonarchMeshStatus {
    let observed = group.status.as_ref();
    let replicas = observed.map(|s| s.replicas).unwrap_or(0);
    let ready_replicas = observed.and_then(|s| s.ready_replicas).unwrap_or(0);

    let mut conditions = mesh
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();
    set_condition(
        &mut conditions,
        evaluate_ready(
            mesh.spec.replicas,
            ready_replicas,
            mesh.metadata.generation,
            Utc::now(),
        ),
    );

    MonarchMeshStatus {
        replicas,
        ready_replicas,
        service_name: Some(service_fqdn(endpoint, namespace, config)),
        conditions,
    }
}

/// Error policy for the MonarchMesh controller
///
/// Conflicts come from a concurrent writer and are retried almost at once.
/// Projection and configuration errors cannot heal without a spec change.
pub fn error_policy(mesh: Arc<MonarchMesh>, error: &Error, _ctx: Arc<Context>) -> Action {
    if error.is_conflict() {
        debug!(mesh = %mesh.name_any(), %error, "write conflict, retrying");
        return Action::requeue(CONFLICT_REQUEUE);
    }

    if !error.is_retryable() {
        warn!(mesh = %mesh.name_any(), %error, "MonarchMesh cannot be reconciled until it changes");
        return Action::await_change();
    }

    error!(?error, mesh = %mesh.name_any(), "reconciliation failed");
    Action::requeue(ERROR_REQUEUE)
}
