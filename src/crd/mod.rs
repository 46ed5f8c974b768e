//! Custom Resource Definitions for Monarch
//!
//! This module contains the MonarchMesh CRD and the status types it shares.

mod mesh;
mod types;

pub use mesh::{MonarchMesh, MonarchMeshSpec, MonarchMeshStatus};
pub use types::{
    find_condition, set_condition, Condition, ConditionStatus, READY_CONDITION,
    REASON_ALL_READY, REASON_WAITING,
};
