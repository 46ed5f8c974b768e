//! Controller runner - wires the MonarchMesh reconciler to its triggers
//!
//! A pass runs when a MonarchMesh changes, when a Service or StatefulSet it
//! controls changes (routed back through the controller owner reference),
//! and on the periodic resync requested by every successful pass.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use super::mesh::{error_policy, reconcile, Context};
use crate::config::MeshConfig;
use crate::crd::MonarchMesh;
use crate::identity::mesh_for_child;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// so the API server closes idle watches before the client gives up on them.
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Watch configuration for MonarchMesh objects
pub fn parent_watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Watch configuration for child objects
///
/// Only objects carrying the mesh label are watched, so unrelated Services
/// and StatefulSets in the cluster never reach the mapper.
pub fn child_watcher_config(config: &MeshConfig) -> WatcherConfig {
    WatcherConfig::default()
        .timeout(WATCH_TIMEOUT_SECS)
        .labels(&config.mesh_label_key)
}

/// Build the MonarchMesh controller future
///
/// Runs until a shutdown signal arrives; in-flight passes are abandoned.
pub fn build_mesh_controller(
    client: Client,
    ctx: Arc<Context>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let meshes: Api<MonarchMesh> = Api::all(client.clone());
    let services: Api<Service> = Api::all(client.clone());
    let stateful_sets: Api<StatefulSet> = Api::all(client);
    let child_config = child_watcher_config(&ctx.config);

    tracing::info!("- MonarchMesh controller");

    Box::pin(
        Controller::new(meshes, parent_watcher_config())
            .watches(services, child_config.clone(), |svc: Service| {
                mesh_for_child(&svc.metadata)
            })
            .watches(stateful_sets, child_config, |sts: StatefulSet| {
                mesh_for_child(&sts.metadata)
            })
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("MonarchMesh")),
    )
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
