//! Integration tests for the MonarchMesh reconcile pass
//!
//! # Test Organization
//!
//! - `store`: the in-memory state store and event recorder the stories run against
//! - `lifecycle`: stories about a mesh from creation to Ready, scaling and deletion
//! - `convergence`: stories about drift, conflicts and idempotence
//! - `failures`: stories about reads and writes failing partway through a pass

mod store;
