//! Kubernetes Events emitted on MonarchMesh objects
//!
//! Events show up in `kubectl describe monarchmesh`. Publishing never fails a
//! reconcile pass; a rejected event is only logged.

use async_trait::async_trait;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::warn;

use crate::crd::MonarchMesh;

/// Event reasons (REASON column of `kubectl get events`)
pub mod reasons {
    /// Headless Service created for a mesh
    pub const SERVICE_CREATED: &str = "ServiceCreated";
    /// StatefulSet created for a mesh
    pub const STATEFUL_SET_CREATED: &str = "StatefulSetCreated";
    /// Every desired replica reports ready
    pub const MESH_READY: &str = "MeshReady";
    /// Mesh dropped out of Ready
    pub const MESH_NOT_READY: &str = "MeshNotReady";
}

/// Event actions (ACTION column of `kubectl get events`)
pub mod actions {
    /// A child object was created
    pub const CREATE: &str = "Create";
    /// Regular reconcile pass
    pub const RECONCILE: &str = "Reconcile";
}

/// One event about a mesh
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeshEvent {
    /// Normal or Warning
    pub type_: EventType,
    /// One of [`reasons`]
    pub reason: &'static str,
    /// One of [`actions`]
    pub action: &'static str,
    /// Human-readable message
    pub note: String,
}

impl MeshEvent {
    /// A child object was created; `reason` names which one
    pub fn child_created(reason: &'static str, kind: &str, name: &str) -> Self {
        Self {
            type_: EventType::Normal,
            reason,
            action: actions::CREATE,
            note: format!("Created {kind} {name}"),
        }
    }

    /// The Ready condition flipped
    pub fn readiness_changed(ready: bool, summary: String) -> Self {
        let (type_, reason) = if ready {
            (EventType::Normal, reasons::MESH_READY)
        } else {
            (EventType::Warning, reasons::MESH_NOT_READY)
        };
        Self {
            type_,
            reason,
            action: actions::RECONCILE,
            note: summary,
        }
    }
}

/// Sink for mesh events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Record `event` against `mesh`
    async fn publish(&self, mesh: &MonarchMesh, event: MeshEvent);
}

/// Publishes through the events.k8s.io API
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Report as `controller`; the instance is the pod name when `POD_NAME` is set
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, mesh: &MonarchMesh, event: MeshEvent) {
        let regarding = mesh.object_ref(&());
        let reason = event.reason;
        let record = Event {
            type_: event.type_,
            reason: reason.to_string(),
            note: Some(event.note),
            action: event.action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&record, &regarding).await {
            warn!(reason, mesh = ?regarding.name, error = %e, "failed to publish event");
        }
    }
}

/// Drops every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _mesh: &MonarchMesh, _event: MeshEvent) {}
}
