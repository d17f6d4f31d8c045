//! Typed records for the cluster resources the ambient controller indexes.
//!
//! These types sit at the source-stream boundary: whatever mechanism fetches
//! resources from the cluster (watches, polling, test fixtures) converts them
//! into these records before feeding them to the index. Each record carries
//! only the fields the entity builders actually read.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;

mod cluster;
mod external;
mod gateway;
mod meta;
mod pod;
mod policy;
mod service;

pub use self::{
    cluster::{ConfigMap, Namespace, Node},
    external::{ServiceEntry, WorkloadEntry},
    gateway::{Gateway, GatewayClass},
    labels::Labels,
    meta::Meta,
    pod::{NamedPort, Pod},
    policy::{AuthorizationPolicy, PeerAuthentication, PolicyAction, TlsMode},
    service::{EndpointSlice, Service, ServicePort, TargetPort},
};
