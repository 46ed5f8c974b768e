//! In-memory state store for reconcile tests
//!
//! Mimics the API server behavior the reconciler relies on: every write bumps
//! `resourceVersion`, updates and status writes are rejected with 409 when the
//! caller's version is stale, and creating an existing object fails. Any single
//! call can be made to fail once with `fail_next`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetStatus};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, Service};
use kube::ResourceExt;

use monarch::config::MeshConfig;
use monarch::controller::{Context, MeshKubeClient};
use monarch::crd::{MonarchMesh, MonarchMeshSpec};
use monarch::events::{EventPublisher, MeshEvent};
use monarch::Error;

pub const NAMESPACE: &str = "ml";

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn api_error(code: u16, reason: &str, message: String) -> kube::Error {
    kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    })
}

#[derive(Default)]
struct State {
    meshes: HashMap<Key, MonarchMesh>,
    services: HashMap<Key, Service>,
    stateful_sets: HashMap<Key, StatefulSet>,
    writes: Vec<String>,
    next_version: u64,
    next_uid: u64,
    race_next_status_write: bool,
    failures: HashMap<String, u16>,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn uid(&mut self) -> String {
        self.next_uid += 1;
        format!("uid-{}", self.next_uid)
    }

    fn injected_failure(&mut self, op: &str) -> Option<kube::Error> {
        self.failures
            .remove(op)
            .map(|code| api_error(code, "InternalError", format!("{op} failed")))
    }
}

/// Shared in-memory store; clones see the same state
#[derive(Clone, Default)]
pub struct FakeStore {
    state: Arc<Mutex<State>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist a mesh as a user would with `kubectl apply`
    pub fn apply_mesh(&self, mut mesh: MonarchMesh) -> MonarchMesh {
        let mut state = self.state.lock().unwrap();
        let k = key(&mesh.namespace().unwrap_or_default(), &mesh.name_any());
        match state.meshes.get(&k) {
            Some(existing) => {
                mesh.metadata.uid = existing.metadata.uid.clone();
                mesh.metadata.generation = existing.metadata.generation.map(|g| g + 1);
                mesh.status = existing.status.clone();
            }
            None => {
                mesh.metadata.uid = Some(state.uid());
                mesh.metadata.generation = Some(1);
            }
        }
        mesh.metadata.resource_version = Some(state.bump());
        state.meshes.insert(k, mesh.clone());
        mesh
    }

    pub fn delete_mesh(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .meshes
            .remove(&key(NAMESPACE, name));
    }

    pub fn mesh(&self, name: &str) -> MonarchMesh {
        self.state.lock().unwrap().meshes[&key(NAMESPACE, name)].clone()
    }

    pub fn service(&self, name: &str) -> Option<Service> {
        self.state
            .lock()
            .unwrap()
            .services
            .get(&key(NAMESPACE, name))
            .cloned()
    }

    pub fn stateful_set(&self, name: &str) -> Option<StatefulSet> {
        self.state
            .lock()
            .unwrap()
            .stateful_sets
            .get(&key(NAMESPACE, name))
            .cloned()
    }

    /// Report pod progress the way the StatefulSet controller would
    pub fn set_group_status(&self, name: &str, replicas: i32, ready: i32) {
        let mut state = self.state.lock().unwrap();
        let version = state.bump();
        let sts = state
            .stateful_sets
            .get_mut(&key(NAMESPACE, name))
            .expect("StatefulSet exists");
        sts.status = Some(StatefulSetStatus {
            replicas,
            ready_replicas: Some(ready),
            ..Default::default()
        });
        sts.metadata.resource_version = Some(version);
    }

    /// Mutate a stored Service out of band (someone ran `kubectl edit`)
    pub fn edit_service(&self, name: &str, edit: impl FnOnce(&mut Service)) {
        let mut state = self.state.lock().unwrap();
        let version = state.bump();
        let svc = state
            .services
            .get_mut(&key(NAMESPACE, name))
            .expect("Service exists");
        edit(svc);
        svc.metadata.resource_version = Some(version);
    }

    /// Mutate a stored StatefulSet out of band
    pub fn edit_stateful_set(&self, name: &str, edit: impl FnOnce(&mut StatefulSet)) {
        let mut state = self.state.lock().unwrap();
        let version = state.bump();
        let sts = state
            .stateful_sets
            .get_mut(&key(NAMESPACE, name))
            .expect("StatefulSet exists");
        edit(sts);
        sts.metadata.resource_version = Some(version);
    }

    /// Make the next call of `op` fail with the given API status code
    ///
    /// `op` uses the same wording as the write log, e.g. `"update StatefulSet"`,
    /// `"get StatefulSet"` or `"update status MonarchMesh"`.
    pub fn fail_next(&self, op: &str, code: u16) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(op.to_string(), code);
    }

    /// Make the next status write lose a race against another writer
    pub fn race_next_status_write(&self) {
        self.state.lock().unwrap().race_next_status_write = true;
    }

    pub fn writes(&self) -> Vec<String> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().unwrap().writes.clear();
    }
}

#[async_trait]
impl MeshKubeClient for FakeStore {
    async fn get_mesh(&self, namespace: &str, name: &str) -> Result<Option<MonarchMesh>, Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .meshes
            .get(&key(namespace, name))
            .cloned())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.injected_failure("get Service") {
            return Err(Error::store_read("Service", namespace, name, err));
        }
        Ok(state.services.get(&key(namespace, name)).cloned())
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, Error> {
        let mut state = self.state.lock().unwrap();
        let name = service.name_any();
        if let Some(err) = state.injected_failure("create Service") {
            return Err(Error::store_write("Service", namespace, &name, "create", err));
        }
        let k = key(namespace, &name);
        if state.services.contains_key(&k) {
            let err = api_error(409, "AlreadyExists", format!("services \"{name}\" already exists"));
            return Err(Error::store_write("Service", namespace, &name, "create", err));
        }
        let mut stored = service.clone();
        stored.metadata.uid = Some(state.uid());
        stored.metadata.resource_version = Some(state.bump());
        // API server defaulting
        if let Some(spec) = stored.spec.as_mut() {
            spec.type_ = Some("ClusterIP".to_string());
            spec.session_affinity = Some("None".to_string());
        }
        state.services.insert(k, stored.clone());
        state.writes.push(format!("create Service {namespace}/{name}"));
        Ok(stored)
    }

    async fn update_service(&self, namespace: &str, service: &Service) -> Result<Service, Error> {
        let mut state = self.state.lock().unwrap();
        let name = service.name_any();
        if let Some(err) = state.injected_failure("update Service") {
            return Err(Error::store_write("Service", namespace, &name, "update", err));
        }
        let k = key(namespace, &name);
        let current_version = state
            .services
            .get(&k)
            .and_then(|s| s.metadata.resource_version.clone());
        if current_version != service.metadata.resource_version {
            let err = api_error(409, "Conflict", "the object has been modified".to_string());
            return Err(Error::store_write("Service", namespace, &name, "update", err));
        }
        let mut stored = service.clone();
        stored.metadata.resource_version = Some(state.bump());
        state.services.insert(k, stored.clone());
        state.writes.push(format!("update Service {namespace}/{name}"));
        Ok(stored)
    }

    async fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, Error> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.injected_failure("get StatefulSet") {
            return Err(Error::store_read("StatefulSet", namespace, name, err));
        }
        Ok(state.stateful_sets.get(&key(namespace, name)).cloned())
    }

    async fn create_stateful_set(
        &self,
        namespace: &str,
        stateful_set: &StatefulSet,
    ) -> Result<StatefulSet, Error> {
        let mut state = self.state.lock().unwrap();
        let name = stateful_set.name_any();
        if let Some(err) = state.injected_failure("create StatefulSet") {
            return Err(Error::store_write("StatefulSet", namespace, &name, "create", err));
        }
        let k = key(namespace, &name);
        if state.stateful_sets.contains_key(&k) {
            let err = api_error(
                409,
                "AlreadyExists",
                format!("statefulsets.apps \"{name}\" already exists"),
            );
            return Err(Error::store_write("StatefulSet", namespace, &name, "create", err));
        }
        let mut stored = stateful_set.clone();
        stored.metadata.uid = Some(state.uid());
        stored.metadata.resource_version = Some(state.bump());
        stored.metadata.generation = Some(1);
        // API server defaulting inside the pod template
        if let Some(pod) = stored.spec.as_mut().and_then(|s| s.template.spec.as_mut()) {
            pod.restart_policy = Some("Always".to_string());
            pod.dns_policy = Some("ClusterFirst".to_string());
        }
        state.stateful_sets.insert(k, stored.clone());
        state
            .writes
            .push(format!("create StatefulSet {namespace}/{name}"));
        Ok(stored)
    }

    async fn update_stateful_set(
        &self,
        namespace: &str,
        stateful_set: &StatefulSet,
    ) -> Result<StatefulSet, Error> {
        let mut state = self.state.lock().unwrap();
        let name = stateful_set.name_any();
        if let Some(err) = state.injected_failure("update StatefulSet") {
            return Err(Error::store_write("StatefulSet", namespace, &name, "update", err));
        }
        let k = key(namespace, &name);
        let current_version = state
            .stateful_sets
            .get(&k)
            .and_then(|s| s.metadata.resource_version.clone());
        if current_version != stateful_set.metadata.resource_version {
            let err = api_error(409, "Conflict", "the object has been modified".to_string());
            return Err(Error::store_write("StatefulSet", namespace, &name, "update", err));
        }
        let mut stored = stateful_set.clone();
        stored.metadata.resource_version = Some(state.bump());
        stored.metadata.generation = stored.metadata.generation.map(|g| g + 1);
        state.stateful_sets.insert(k, stored.clone());
        state
            .writes
            .push(format!("update StatefulSet {namespace}/{name}"));
        Ok(stored)
    }

    async fn update_mesh_status(&self, mesh: &MonarchMesh) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let namespace = mesh.namespace().unwrap_or_default();
        let name = mesh.name_any();
        let k = key(&namespace, &name);

        if let Some(err) = state.injected_failure("update status MonarchMesh") {
            return Err(Error::store_write("MonarchMesh", &namespace, &name, "update status", err));
        }
        if std::mem::take(&mut state.race_next_status_write) {
            let version = state.bump();
            if let Some(stored) = state.meshes.get_mut(&k) {
                stored.metadata.resource_version = Some(version);
            }
        }

        let version = state.bump();
        let Some(stored) = state.meshes.get_mut(&k) else {
            let err = api_error(404, "NotFound", format!("monarchmeshes \"{name}\" not found"));
            return Err(Error::store_write("MonarchMesh", &namespace, &name, "update status", err));
        };
        if stored.metadata.resource_version != mesh.metadata.resource_version {
            let err = api_error(409, "Conflict", "the object has been modified".to_string());
            return Err(Error::store_write("MonarchMesh", &namespace, &name, "update status", err));
        }
        stored.status = mesh.status.clone();
        stored.metadata.resource_version = Some(version);
        state
            .writes
            .push(format!("update status MonarchMesh {namespace}/{name}"));
        Ok(())
    }
}

/// Event sink recording every published reason
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    reasons: Arc<Mutex<Vec<String>>>,
}

impl RecordingPublisher {
    pub fn reasons(&self) -> Vec<String> {
        self.reasons.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, _mesh: &MonarchMesh, event: MeshEvent) {
        self.reasons.lock().unwrap().push(event.reason.to_string());
    }
}

/// Store, event recorder and a controller context wired to both
pub struct Harness {
    pub store: FakeStore,
    pub events: RecordingPublisher,
    pub ctx: Context,
}

impl Harness {
    pub fn new() -> Self {
        let store = FakeStore::new();
        let events = RecordingPublisher::default();
        let ctx = Context::new(
            Arc::new(store.clone()),
            Arc::new(events.clone()),
            MeshConfig::default(),
        );
        Self { store, events, ctx }
    }
}

/// A mesh as a user would write it
pub fn user_mesh(name: &str, replicas: Option<i32>) -> MonarchMesh {
    let mut mesh = MonarchMesh::new(
        name,
        MonarchMeshSpec {
            replicas,
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "worker".to_string(),
                        image: Some("ghcr.io/meta-pytorch/monarch:latest".to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            port: None,
        },
    );
    mesh.metadata.namespace = Some(NAMESPACE.to_string());
    mesh
}
