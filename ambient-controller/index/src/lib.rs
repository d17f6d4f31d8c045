//! Ambient Controller index
//!
//! Maintains normalized Workload and Service entities derived from cluster
//! resource streams, plus the secondary indexes needed to answer
//! address-resolution queries in near-constant time. It watches the following
//! resources:
//!
//! - `Pod` and `WorkloadEntry` records produce Workload entities, joined with
//!   `Node` locality, service membership, and waypoint assignment.
//! - `Service` and `ServiceEntry` records produce Service entities.
//! - `Gateway`/`GatewayClass` records produce Waypoints; workloads and
//!   services assigned to a waypoint are indexed by its published hostname.
//! - `AuthorizationPolicy` and `PeerAuthentication` records produce workload
//!   authorizations, pushed alongside address changes.
//!
//! ```text
//! [ Pod ]──┐                       ┌──[ Service ]
//! [ WE  ]──┤                       ├──[ ServiceEntry ]
//! [ Node]──┼─> Workloads <─────────┴─> Services <── [ Waypoints ] <── [ Gateway ]
//!          │     │ by-address, by-service, by-waypoint │ by-address, by-waypoint
//!          └─────┴──> change dispatcher ──> ConfigUpdate(push)
//! ```
//!
//! Each derived collection recomputes only the entities whose inputs changed,
//! and batched listeners decide per change whether it is externally visible
//! enough to push downstream.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod collection;
mod dispatch;
mod index;
mod mesh;
mod policy;
mod service;
mod sources;
mod status;
mod waypoint;
mod workload;

#[cfg(test)]
mod tests;

pub use self::{
    dispatch::DispatchMetrics,
    index::{Index, Options},
    mesh::MeshConfig,
    policy::{Authorization, WorkloadAuthorization},
    sources::{sources, SourceWriters, Sources},
    status::{Patcher, StatusPatchers, StatusQueue, StatusUpdate},
    waypoint::Waypoint,
};

/// Marks the waypoint proxies the controller itself manages. A workload or
/// service carrying this label is a waypoint and is never indexed as being
/// fronted by one.
pub const MANAGED_GATEWAY_LABEL: &str = "gateway.ambientmesh.io/managed";
pub const MANAGED_GATEWAY_WAYPOINT: &str = "waypoint";

/// Names the waypoint (in the entity's namespace) fronting a workload or
/// service. A namespace-level label provides the default.
pub const USE_WAYPOINT_LABEL: &str = "ambientmesh.io/use-waypoint";

/// Holds cluster metadata.
#[derive(Clone, Debug)]
pub struct ClusterInfo {
    /// Qualifies workload uids so multi-cluster deployments stay disjoint.
    pub cluster_id: String,

    /// The DNS suffix services and waypoints publish under.
    pub domain_suffix: String,

    /// The namespace where the controller's own configuration lives.
    pub system_namespace: String,
}

impl ClusterInfo {
    /// The hostname a native service publishes.
    pub(crate) fn service_hostname(&self, namespace: &str, name: &str) -> String {
        format!("{}.{}.svc.{}", name, namespace, self.domain_suffix)
    }

    /// The hostname a waypoint publishes.
    pub(crate) fn waypoint_hostname(&self, namespace: &str, name: &str) -> String {
        format!("{}.{}.{}", name, namespace, self.domain_suffix)
    }
}
