//! Domain model for the ambient controller.
//!
//! The index maintains normalized [`WorkloadInfo`] and [`ServiceInfo`]
//! entities derived from cluster resources. Each entity separates its
//! external wire form ([`Workload`], [`Service`]) from bookkeeping fields
//! that only drive internal recomputation: downstream pushes fire only when
//! the wire form changes.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod address;
mod push;
mod resource_id;
mod service;
mod workload;

pub use self::{
    address::{AddressInfo, NamespaceHostname, NetworkAddress, WaypointKey},
    push::{
        ConfigKey, Kind, LookupNetwork, LookupNetworkGateways, NetworkGateway, PushReason,
        PushRequest, Updater,
    },
    resource_id::{ResourceId, SourceKind, SourceRef},
    service::{Service, ServiceInfo},
    workload::{NetworkMode, PortBinding, PortList, Workload, WorkloadInfo},
};

pub const CONTROLLER_NAME: &str = "ambientmesh.io/ambient-controller";
