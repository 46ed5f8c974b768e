//! Controller implementation for MonarchMesh
//!
//! Observe the parent, converge each child, report status back.

mod converge;
mod mesh;
mod runner;

pub use converge::{converge_service, converge_stateful_set};
pub use mesh::{
    error_policy, reconcile, reconcile_mesh, Context, MeshKubeClient, MeshKubeClientImpl,
    CONFLICT_REQUEUE, ERROR_REQUEUE, FIELD_MANAGER,
};
pub use runner::{build_mesh_controller, child_watcher_config, parent_watcher_config, WATCH_TIMEOUT_SECS};
