//! Minimal-mutation diffs for existing children
//!
//! Each function takes the object read from the cluster and the projected
//! desired object, and returns `Some(updated)` only if a write is needed.
//! The updated object starts from the current one, so status, server-populated
//! metadata (including `resourceVersion`) and foreign labels survive.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{PodTemplateSpec, Service, ServicePort};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;

use crate::projector::TEMPLATE_HASH_ANNOTATION;

/// Converge an existing headless Service toward its projection
///
/// Only labels, owner references, selector and ports are managed. The
/// cluster IP is immutable after creation and is left alone.
pub fn converge_service(current: &Service, desired: &Service) -> Option<Service> {
    let mut updated = current.clone();
    let mut changed = converge_meta(&mut updated.metadata, &desired.metadata);

    let desired_spec = desired.spec.clone().unwrap_or_default();
    let spec = updated.spec.get_or_insert_with(Default::default);

    if spec.selector != desired_spec.selector {
        spec.selector = desired_spec.selector;
        changed = true;
    }

    let ports_match = match (&spec.ports, &desired_spec.ports) {
        (Some(current), Some(desired)) => {
            current.len() == desired.len()
                && current.iter().zip(desired).all(|(c, d)| port_matches(c, d))
        }
        (current, desired) => current == desired,
    };
    if !ports_match {
        spec.ports = desired_spec.ports;
        changed = true;
    }

    changed.then_some(updated)
}

/// Converge an existing StatefulSet toward its projection
///
/// A change to the mesh template shows up as a [`TEMPLATE_HASH_ANNOTATION`]
/// mismatch. Edits made directly to the StatefulSet template are caught by
/// [`template_covers`], which ignores fields the API server defaulted.
pub fn converge_stateful_set(current: &StatefulSet, desired: &StatefulSet) -> Option<StatefulSet> {
    let mut updated = current.clone();
    let mut changed = converge_meta(&mut updated.metadata, &desired.metadata);

    let Some(desired_spec) = desired.spec.clone() else {
        return changed.then_some(updated);
    };
    let spec = updated.spec.get_or_insert_with(Default::default);

    if spec.replicas != desired_spec.replicas {
        spec.replicas = desired_spec.replicas;
        changed = true;
    }
    if spec.selector.match_labels != desired_spec.selector.match_labels {
        spec.selector = desired_spec.selector;
        changed = true;
    }
    if spec.service_name != desired_spec.service_name {
        spec.service_name = desired_spec.service_name;
        changed = true;
    }

    let current_hash = annotation(&current.metadata, TEMPLATE_HASH_ANNOTATION);
    let desired_hash = annotation(&desired.metadata, TEMPLATE_HASH_ANNOTATION);
    let hash_changed = desired_hash.is_none() || current_hash != desired_hash;
    if hash_changed || !template_covers(&desired_spec.template, &spec.template) {
        spec.template = desired_spec.template;
        changed = true;
    }

    changed.then_some(updated)
}

/// Merge managed labels and annotations and make sure our owner reference is present
fn converge_meta(current: &mut ObjectMeta, desired: &ObjectMeta) -> bool {
    let mut changed = merge_map(&mut current.labels, desired.labels.as_ref());
    changed |= merge_map(&mut current.annotations, desired.annotations.as_ref());

    for owner in desired.owner_references.iter().flatten() {
        let owners = current.owner_references.get_or_insert_with(Vec::new);
        match owners.iter_mut().find(|o| o.uid == owner.uid) {
            Some(existing) if existing == owner => {}
            Some(existing) => {
                *existing = owner.clone();
                changed = true;
            }
            None => {
                owners.push(owner.clone());
                changed = true;
            }
        }
    }
    changed
}

/// Insert every desired entry, keeping keys the projection does not manage
fn merge_map(
    current: &mut Option<BTreeMap<String, String>>,
    desired: Option<&BTreeMap<String, String>>,
) -> bool {
    let Some(desired) = desired else {
        return false;
    };
    let current = current.get_or_insert_with(BTreeMap::new);
    let mut changed = false;
    for (k, v) in desired {
        if current.get(k) != Some(v) {
            current.insert(k.clone(), v.clone());
            changed = true;
        }
    }
    changed
}

/// Returns true if every field set in `desired` holds the same value in `current`
///
/// Fields the projection leaves unset are skipped, so values the API server
/// filled in on its own never count as drift. Lists must match in length and
/// element by element.
pub fn template_covers(desired: &PodTemplateSpec, current: &PodTemplateSpec) -> bool {
    match (serde_json::to_value(desired), serde_json::to_value(current)) {
        (Ok(desired), Ok(current)) => value_covers(&desired, &current),
        _ => false,
    }
}

fn value_covers(desired: &Value, current: &Value) -> bool {
    match (desired, current) {
        (Value::Null, _) => true,
        (Value::Object(d), Value::Object(c)) => d
            .iter()
            .all(|(k, dv)| value_covers(dv, c.get(k).unwrap_or(&Value::Null))),
        (Value::Object(d), Value::Null) => d.values().all(|dv| value_covers(dv, &Value::Null)),
        (Value::Array(d), Value::Array(c)) => {
            d.len() == c.len() && d.iter().zip(c).all(|(dv, cv)| value_covers(dv, cv))
        }
        (Value::Array(d), Value::Null) => d.is_empty(),
        (d, c) => d == c,
    }
}

fn annotation<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a String> {
    meta.annotations.as_ref().and_then(|a| a.get(key))
}

/// Compare the port fields the projection sets; server-assigned ones are ignored
fn port_matches(current: &ServicePort, desired: &ServicePort) -> bool {
    current.name == desired.name
        && current.port == desired.port
        && current.target_port == desired.target_port
        && current.protocol.as_deref().unwrap_or("TCP") == desired.protocol.as_deref().unwrap_or("TCP")
}
